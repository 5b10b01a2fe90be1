//! # Gardisto (Authorization & Threat Response Core)
//!
//! `gardisto` decides, for every privileged request of the surrounding
//! business application, whether an identity may act, and watches the stream
//! of authentication events to detect and automatically contain abuse.
//!
//! ## Components
//!
//! - **Permission Resolver** ([`authz`]): merges role-derived grants with
//!   per-principal overrides. Overrides always win over role grants, an
//!   explicit deny wins over everything, and any ambiguity or storage
//!   failure resolves to denial (fail closed).
//! - **Security Monitor** ([`security`]): appends login, second-factor and
//!   sensitive-action events to an append-only log, re-evaluates a closed
//!   set of sliding-window rules on every failure, raises alerts, and
//!   installs temporary blocks for origins and principals.
//! - **Block Registry** ([`security::blocks`]): blocked origins live in
//!   their own table keyed by address; blocked principals live on the users
//!   row. Expiry is lazy (every read filters on `expires_at > NOW()`), so
//!   the optional cleanup task is storage hygiene, never correctness.
//! - **Security Reporter** ([`security::report`]): read-only aggregation of
//!   events and alerts over a trailing window.
//!
//! ## Decision path
//!
//! The request gate first consults the block registry (origin, then
//! principal), then the resolver for the specific action. Every attempt is
//! recorded regardless of outcome. A denied permission and a resolver
//! outage are indistinguishable to the end user; only internal logs tell
//! them apart.

pub mod api;
pub mod authz;
pub mod cli;
pub mod security;

#[cfg(test)]
pub(crate) mod test_util;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
