use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of facts the event log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LoginAttempt,
    SecondFactorAttempt,
    SensitiveAction,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginAttempt => "LOGIN_ATTEMPT",
            Self::SecondFactorAttempt => "SECOND_FACTOR_ATTEMPT",
            Self::SensitiveAction => "SENSITIVE_ACTION",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network origin of a request: address plus client descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Origin {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Origin {
    #[must_use]
    pub fn from_ip(ip: &str) -> Self {
        Self {
            ip: Some(ip.to_string()),
            user_agent: None,
        }
    }
}

/// Alert taxonomy. The monitor only emits the first three today; the rest
/// exist so externally recorded alerts share one severity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    MultipleFailedLogins,
    MultipleIpAttempts,
    MultipleFailed2fa,
    SuspiciousActivity,
    UnauthorizedAccess,
}

impl AlertType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MultipleFailedLogins => "MULTIPLE_FAILED_LOGINS",
            Self::MultipleIpAttempts => "MULTIPLE_IP_ATTEMPTS",
            Self::MultipleFailed2fa => "MULTIPLE_FAILED_2FA",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::MultipleFailedLogins | Self::MultipleIpAttempts => Severity::High,
            Self::MultipleFailed2fa | Self::SuspiciousActivity => Severity::Medium,
            Self::UnauthorizedAccess => Severity::Critical,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted alert, as read back for reports.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: String,
    pub severity: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An active entry of the block registry.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}
