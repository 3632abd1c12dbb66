use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::format::FormatError;

/// Closed set of failure categories every error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unqualified,
    ResourceConflict,
    UserConflict,
    InvalidInterval,
    Validation,
    InUse,
    Storage,
}

impl ErrorKind {
    /// Numeric status reported to clients.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Unqualified => 422,
            ErrorKind::ResourceConflict | ErrorKind::UserConflict | ErrorKind::InUse => 409,
            ErrorKind::InvalidInterval | ErrorKind::Validation => 400,
            ErrorKind::Storage => 503,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unqualified => "unqualified",
            ErrorKind::ResourceConflict => "resource_conflict",
            ErrorKind::UserConflict => "user_conflict",
            ErrorKind::InvalidInterval => "invalid_interval",
            ErrorKind::Validation => "validation",
            ErrorKind::InUse => "in_use",
            ErrorKind::Storage => "storage",
        }
    }

    /// Worth retrying unchanged.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Storage)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure surfaced by the service layer.
#[derive(Debug)]
pub enum Error {
    Engine(EngineError),
    Catalog(CatalogError),
    Format(FormatError),
    Validation(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Engine(e) => e.kind(),
            Error::Catalog(e) => e.kind(),
            // Dates only ever bound a rental interval.
            Error::Format(FormatError::Date(_)) => ErrorKind::InvalidInterval,
            Error::Format(_) | Error::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn status(&self) -> u16 {
        self.kind().status()
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Engine(e) => write!(f, "{e}"),
            Error::Catalog(e) => write!(f, "{e}"),
            Error::Format(e) => write!(f, "{e}"),
            Error::Validation(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Engine(e) => Some(e),
            Error::Catalog(e) => Some(e),
            Error::Format(e) => Some(e),
            Error::Validation(_) => None,
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::Engine(e)
    }
}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        Error::Catalog(e)
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}
