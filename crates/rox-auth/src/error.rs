//! Authentication error types.
//!
//! Errors are classified by [`ErrorKind`] rather than by concrete type. Callers
//! that need to branch on a failure (HTTP status mapping, fail-closed token
//! checks, M2M error collapsing) should match on [`AuthError::kind`], which
//! looks through any context wrapping added on the way up.

use std::fmt;

/// Errors raised by the provider registry, token machinery and M2M exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request, state or configuration is malformed.
    #[error("invalid arguments: {message}")]
    InvalidArgs {
        /// Description of what is malformed.
        message: String,
    },

    /// An unknown provider, role, source or config was referenced.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// An object with the same identity already exists.
    #[error("already exists: {message}")]
    AlreadyExists {
        /// Description of the conflicting object.
        message: String,
    },

    /// Authentication or verification failed.
    #[error("credentials not found: {message}")]
    NoCredentials {
        /// Description of the failure.
        message: String,
    },

    /// The caller lacks permission for the operation itself.
    #[error("not authorized: {message}")]
    NotAuthorized {
        /// Description of the missing permission.
        message: String,
    },

    /// An internal contract was broken.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// A collaborator (network, storage, key material) failed.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// An error wrapped with the operation or object it occurred in.
    #[error("{context}: {source}")]
    Context {
        /// Operation name, provider ID or config ID.
        context: String,
        /// The wrapped error.
        #[source]
        source: Box<AuthError>,
    },
}

impl AuthError {
    /// Creates a new `InvalidArgs` error.
    #[must_use]
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Creates a new `NoCredentials` error.
    #[must_use]
    pub fn no_credentials(message: impl Into<String>) -> Self {
        Self::NoCredentials {
            message: message.into(),
        }
    }

    /// Creates a new `NotAuthorized` error.
    #[must_use]
    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized {
            message: message.into(),
        }
    }

    /// Creates a new `InvariantViolation` error.
    #[must_use]
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps this error with the operation or object it occurred in.
    #[must_use]
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the kind of the innermost error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgs { .. } => ErrorKind::InvalidArgs,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NoCredentials { .. } => ErrorKind::NoCredentials,
            Self::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Returns `true` if this error (or the error it wraps) is `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns `true` if this error (or the error it wraps) is `NoCredentials`.
    #[must_use]
    pub fn is_no_credentials(&self) -> bool {
        self.kind() == ErrorKind::NoCredentials
    }

    /// Returns `true` if this error (or the error it wraps) is `InvalidArgs`.
    #[must_use]
    pub fn is_invalid_args(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgs
    }

    /// Returns `true` if the caller caused the failure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvariantViolation | ErrorKind::Internal
        )
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgs => 400,
            ErrorKind::NoCredentials => 401,
            ErrorKind::NotAuthorized => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::InvariantViolation | ErrorKind::Internal => 500,
        }
    }
}

/// Error classification shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgs,
    NotFound,
    AlreadyExists,
    NoCredentials,
    NotAuthorized,
    InvariantViolation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgs => write!(f, "invalid_args"),
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::NoCredentials => write!(f, "no_credentials"),
            Self::NotAuthorized => write!(f, "not_authorized"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Adds context wrapping to [`AuthResult`].
pub trait ResultExt<T> {
    /// Wraps the error, if any, with a static context string.
    fn context(self, context: impl Into<String>) -> AuthResult<T>;

    /// Wraps the error, if any, with a lazily built context string.
    fn with_context<F>(self, f: F) -> AuthResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for AuthResult<T> {
    fn context(self, context: impl Into<String>) -> AuthResult<T> {
        self.map_err(|e| e.wrap(context))
    }

    fn with_context<F>(self, f: F) -> AuthResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.wrap(f()))
    }
}
