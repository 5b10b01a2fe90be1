use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only resolver failure that surfaces to callers. Everything else
/// (storage outage, unknown principal, dangling role) fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("malformed permission code")]
    MalformedPermissionCode,
    #[error("malformed role name")]
    MalformedRoleName,
}

/// Access level for scope-qualified grants, ordered READ < WRITE < ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Self::Read),
            "WRITE" => Ok(Self::Write),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// One entry of a principal's effective permission set. `direct` marks
/// permissions that come from an override rather than the role, for audit
/// display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
    pub code: String,
    pub name: String,
    pub category: String,
    pub direct: bool,
}

/// Permission codes are dotted lowercase identifiers, e.g. `reports.view`.
pub fn valid_permission_code(code: &str) -> bool {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{0,127}$").is_ok_and(|re| re.is_match(code))
}

/// Role names are stable uppercase identifiers, e.g. `COLLABORATEUR`.
pub fn valid_role_name(name: &str) -> bool {
    Regex::new(r"^[A-Z][A-Z0-9_]{0,63}$").is_ok_and(|re| re.is_match(name))
}
