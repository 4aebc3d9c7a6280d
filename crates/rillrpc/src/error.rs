//! # Error Definitions
//!
//! Frame-level failures, and the reasons a peer gives for refusing a call.

use rillpack::Error as PackError;

/// Failures while building or reading an RPC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying codec failed (truncated input, bad tag, scope misuse).
    Pack(PackError),
    /// An unknown failure reason or top-level frame type was encountered.
    UnknownVariant(String),
    /// The structure of the message was wrong (missing header, arity mismatch).
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "codec error: {}", e),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Pack(e) }
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons carried on the "Err" side of a Reply.
///
/// These are distinct from `Error`: they describe the *remote* side refusing
/// a call, whereas `Error` describes a frame that could not be handled at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The method does not exist on the callee.
    MethodNotFound,
    /// Arguments did not match the method signature.
    BadArguments(String),
    /// The callee is not in a lifecycle state that accepts this call.
    NotServing,
    /// The RPC frame was malformed.
    ProtocolViolation(String),
    /// The callee understood the request and declined it.
    Rejected(String),
}

impl FailureReason {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::MethodNotFound => "NoMethod",
            Self::BadArguments(_) => "BadArgs",
            Self::NotServing => "NotServing",
            Self::ProtocolViolation(_) => "Protocol",
            Self::Rejected(_) => "Rejected",
        }
    }

    /// The human-readable detail, for reasons that carry one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::BadArguments(d) | Self::ProtocolViolation(d) | Self::Rejected(d) => Some(d),
            Self::MethodNotFound | Self::NotServing => None,
        }
    }

    pub fn from_tag(tag: &str, detail: Option<String>) -> Result<Self> {
        let detail = detail.unwrap_or_default();
        match tag {
            "NoMethod" => Ok(Self::MethodNotFound),
            "BadArgs" => Ok(Self::BadArguments(detail)),
            "NotServing" => Ok(Self::NotServing),
            "Protocol" => Ok(Self::ProtocolViolation(detail)),
            "Rejected" => Ok(Self::Rejected(detail)),
            other => Err(Error::UnknownVariant(format!("failure reason: {}", other))),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{}: {}", self.as_tag(), detail),
            None => write!(f, "{}", self.as_tag()),
        }
    }
}
