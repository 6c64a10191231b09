use caregate_types::{RequestId, RoleError, VerificationStatus};

/// Failure taxonomy of the portal core.
///
/// Every failed operation surfaces as one of these variants; nothing is
/// swallowed. The presentation layer distinguishes failures by
/// [`ErrorKind`], not by variant, so new variants can be added without
/// breaking its mapping. Permission denial is deliberately absent: the route
/// guard models it as a redirect decision, since denial is an expected
/// outcome, not an exceptional one.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    DuplicateRegistration(String),
    #[error("no signed-in session")]
    NoSession,
    #[error("identity provider failure: {0}")]
    Provider(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    UnknownRole(#[from] RoleError),
    #[error("rejection notes are required")]
    MissingRejectionNotes,
    #[error("a verification request is already pending for this subject")]
    SubmissionAlreadyPending,

    #[error("document upload failed: {0}")]
    DocumentUpload(String),

    #[error("verification request {0} not found")]
    RequestNotFound(RequestId),
    #[error("verification request {id} is already {status}")]
    AlreadyDecided {
        id: RequestId,
        status: VerificationStatus,
    },
    #[error(
        "role promotion failed and reverting the approval also failed: promote={promote_error}; revert={revert_error}"
    )]
    CompensationFailed {
        #[source]
        promote_error: Box<PortalError>,
        revert_error: Box<PortalError>,
    },
}

/// Coarse failure classes the presentation layer messages on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential or registration failures from the identity provider.
    Auth,
    /// Input rejected before any backend call was made.
    Validation,
    /// Document storage failures; the submission was aborted.
    Storage,
    /// A transition attempted against stale state; refresh and re-render.
    State,
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::InvalidCredentials
            | PortalError::DuplicateRegistration(_)
            | PortalError::NoSession
            | PortalError::Provider(_) => ErrorKind::Auth,
            PortalError::InvalidInput(_)
            | PortalError::UnknownRole(_)
            | PortalError::MissingRejectionNotes
            | PortalError::SubmissionAlreadyPending => ErrorKind::Validation,
            PortalError::DocumentUpload(_) => ErrorKind::Storage,
            PortalError::RequestNotFound(_)
            | PortalError::AlreadyDecided { .. }
            | PortalError::CompensationFailed { .. } => ErrorKind::State,
        }
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
