use std::fmt;

/// Main error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Configuration error
    Config(String),
    /// Credential discovery or validation error
    Credentials(String),
    /// Error returned by a provider API call
    Api(String),
    /// Provider throttled the call
    RateLimit(String),
    /// No catalog offering matches the recommendation
    CatalogMiss(String),
    /// Malformed recommendation or invalid user input
    Validation(String),
    /// Provider returned a string we could not parse
    Parse(String),
    /// Operation was cancelled
    Cancelled(String),
    /// Requested provider or service is not supported
    Unsupported(String),
    /// IO error
    Io(String),
    /// Internal error
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }

    /// Create a new credentials error
    pub fn credentials<S: Into<String>>(message: S) -> Self {
        Error::Credentials(message.into())
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        Error::Api(message.into())
    }

    /// Create a new rate limit error
    pub fn rate_limit<S: Into<String>>(message: S) -> Self {
        Error::RateLimit(message.into())
    }

    /// Create a new catalog miss error
    pub fn catalog_miss<S: Into<String>>(message: S) -> Self {
        Error::CatalogMiss(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation(message.into())
    }

    /// Create a parse error
    pub fn parsing<S: Into<String>>(message: S) -> Self {
        Error::Parse(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Error::Cancelled(message.into())
    }

    /// Create an unsupported provider/service error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Error::Unsupported(message.into())
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Error::Io(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Credentials(_) => "credentials",
            Error::Api(_) => "api",
            Error::RateLimit(_) => "rate-limit",
            Error::CatalogMiss(_) => "catalog-miss",
            Error::Validation(_) => "validation",
            Error::Parse(_) => "parse",
            Error::Cancelled(_) => "cancelled",
            Error::Unsupported(_) => "unsupported",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether the rate limiter may retry the failed call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Api(_) | Error::RateLimit(_))
    }

    /// Whether the error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(message) => write!(f, "Configuration error: {}", message),
            Error::Credentials(message) => write!(f, "Credentials error: {}", message),
            Error::Api(message) => write!(f, "API error: {}", message),
            Error::RateLimit(message) => write!(f, "Rate limit error: {}", message),
            Error::CatalogMiss(message) => write!(f, "Catalog miss: {}", message),
            Error::Validation(message) => write!(f, "Validation error: {}", message),
            Error::Parse(message) => write!(f, "Parse error: {}", message),
            Error::Cancelled(message) => write!(f, "Cancelled: {}", message),
            Error::Unsupported(message) => write!(f, "Unsupported: {}", message),
            Error::Io(message) => write!(f, "IO error: {}", message),
            Error::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for cloudcommit
pub type Result<T> = std::result::Result<T, Error>;

/// From serde_json::Error to Error
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(format!("JSON error: {}", err))
    }
}

/// From std::io::Error to Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(format!("I/O error: {}", err))
    }
}

/// From csv::Error to Error
impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Parse(format!("CSV error: {}", err))
    }
}
