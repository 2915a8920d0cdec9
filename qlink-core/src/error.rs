// Error handling for the link layer
// Every transport failure is terminal for the worker that hit it

use thiserror::Error;

/// Type alias for link results
pub type LinkResult<T> = Result<T, LinkError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Dial failed: {message}")]
    Dial {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Dial timed out: {message}")]
    Timeout {
        message: String,
    },

    #[error("Read failed: {message}")]
    Read {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Stream closed: {message}")]
    StreamClosed {
        message: String,
    },

    #[error("Write failed: {message}")]
    Write {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid peer address: {message}")]
    InvalidAddress {
        message: String,
    },

    #[error("Discovery error: {message}")]
    Discovery {
        message: String,
    },

    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl LinkError {
    /// Create a dial failure
    pub fn dial(message: impl Into<String>) -> Self {
        Self::Dial {
            message: message.into(),
            source: None,
        }
    }

    /// Create a dial failure from an underlying I/O error
    pub fn dial_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Dial {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a dial timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a read failure
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
            source: None,
        }
    }

    /// Create a read failure from an underlying I/O error
    pub fn read_io(source: std::io::Error) -> Self {
        Self::Read {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an end-of-stream / closed-handle error
    pub fn stream_closed(message: impl Into<String>) -> Self {
        Self::StreamClosed {
            message: message.into(),
        }
    }

    /// Create a write failure
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
            source: None,
        }
    }

    /// Create a write failure from an underlying I/O error
    pub fn write_io(source: std::io::Error) -> Self {
        Self::Write {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            message: message.into(),
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LinkError::Dial { .. } | LinkError::Timeout { .. } | LinkError::Discovery { .. } => {
                ErrorCategory::Dial
            }
            LinkError::Read { .. } | LinkError::StreamClosed { .. } => ErrorCategory::Stream,
            LinkError::Write { .. } => ErrorCategory::Write,
            LinkError::NotConnected
            | LinkError::InvalidAddress { .. }
            | LinkError::Config { .. } => ErrorCategory::Usage,
            LinkError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether issuing `connect` again may succeed. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Dial { .. }
                | LinkError::Timeout { .. }
                | LinkError::Read { .. }
                | LinkError::StreamClosed { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout { .. })
    }

    /// Numeric code handed across the FFI boundary
    pub fn code(&self) -> i32 {
        match self {
            LinkError::Dial { .. } => 1001,
            LinkError::Timeout { .. } => 1002,
            LinkError::Discovery { .. } => 1003,
            LinkError::Read { .. } => 2001,
            LinkError::StreamClosed { .. } => 2002,
            LinkError::Write { .. } => 3001,
            LinkError::NotConnected => 4001,
            LinkError::InvalidAddress { .. } => 4002,
            LinkError::Config { .. } => 4003,
            LinkError::Internal { .. } => 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Dial,
    Stream,
    Write,
    Usage,
    Internal,
}
