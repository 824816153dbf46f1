//! Error types and handling for the fabric

/// Result type alias for fabric operations
pub type Result<T> = std::result::Result<T, FabricError>;

/// Error taxonomy for the shared-memory fabric
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Bad client count or region geometry; fatal at coordinator startup
    #[error("invalid topology: {message}")]
    InvalidTopology { message: String },

    /// Malformed PDU, index collision or out-of-range index; fatal to the
    /// offending peer only
    #[error("handshake failure: {message}")]
    Handshake { message: String },

    /// Region or window could not be mapped
    #[error("mapping failure: {message}")]
    Mapping { message: String },

    /// Doorbell delivery failed; non-fatal, polling recovers on its own
    #[error("notify failure: {message}")]
    Notify { message: String },

    /// I/O related errors (sockets, file operations)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },
}

impl FabricError {
    /// Create an invalid topology error
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create a handshake failure
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a mapping failure
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Create a notify failure
    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify {
            message: message.into(),
        }
    }

    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for FabricError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for FabricError {
    fn from(err: bincode::Error) -> Self {
        Self::handshake(format!("PDU encoding error: {}", err))
    }
}
