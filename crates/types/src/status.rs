use std::fmt;

/// Lifecycle state of a [`crate::RequestId`]-identified verification request.
///
/// `Pending` is the only non-terminal state; a request moves to exactly one
/// of `Approved` or `Rejected` and then never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity/kind tag of a notification, used by the display surface to pick
/// styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Info,
    Success,
    Warning,
    Error,
    Medical,
}
