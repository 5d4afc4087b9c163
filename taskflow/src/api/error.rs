//! REST error taxonomy.

/// Errors returned by [`ApiClient`](super::ApiClient) calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP 401. The held credential has been cleared.
    #[error("not signed in: {0}")]
    Unauthorized(String),

    /// HTTP 403.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 409.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input rejected before any request was sent.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Any other non-success status.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the error body, or the status reason.
        message: String,
    },

    /// The request could not be sent or the response not read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// The configured base URL or a derived endpoint is not a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Server or validation message carried by the error, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Validation(m)
            | Self::Status { message: m, .. } => Some(m),
            Self::Http(_) | Self::Decode(_) | Self::InvalidUrl(_) => None,
        }
    }

    /// HTTP status behind the error, if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::Status { status, .. } => Some(*status),
            Self::Validation(_) | Self::Http(_) | Self::Decode(_) | Self::InvalidUrl(_) => None,
        }
    }
}

/// Why inviting a collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum InviteFailure {
    /// The account already collaborates on the task.
    #[error("{0} is already a collaborator on this task")]
    AlreadyCollaborator(String),

    /// No account is registered under the email.
    #[error("no registered user found with email {0}")]
    NoSuchUser(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] ApiError),
}

impl InviteFailure {
    /// Sorts a failed invite of `email` into the cases a user can act on.
    #[must_use]
    pub fn classify(err: ApiError, email: &str) -> Self {
        let message = err.message().unwrap_or_default().to_lowercase();
        if matches!(err, ApiError::Conflict(_)) || message.contains("already") {
            return Self::AlreadyCollaborator(email.to_string());
        }
        if message.contains("not found") && (message.contains("user") || message.contains("email"))
        {
            return Self::NoSuchUser(email.to_string());
        }
        Self::Other(err)
    }
}
