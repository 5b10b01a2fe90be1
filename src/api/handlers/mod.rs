//! Route handlers and shared validation helpers.

pub mod blocks;
pub mod events;
pub mod gate;
pub mod health;
pub mod report;

use regex::Regex;

/// Login identifiers are emails or account names: non-empty, no
/// whitespace, bounded length.
pub fn valid_identifier(identifier: &str) -> bool {
    Regex::new(r"^\S{1,254}$").is_ok_and(|re| re.is_match(identifier))
}
