//! # Fatal Errors
//!
//! Every error that reaches the top of the process ends it. They are logged
//! once, by whoever owns the process, and never retried.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::model::Endpoint;
use crate::proxy::ProxyError;

#[derive(Debug)]
pub enum Fatal {
    Config(ConfigError),
    /// The log file could not be opened or the filter was invalid.
    Logging(io::Error),
    Bind { addr: Endpoint, source: io::Error },
    /// The computation could not describe itself.
    Metadata(anyhow::Error),
    /// The proxy was unreachable or refused the registration.
    Registration(ProxyError),
    /// A user callback failed. `op` is the method being served.
    Callback { op: &'static str, source: anyhow::Error },
    /// A reply could not be encoded.
    Wire(rillrpc::Error),
    /// The runtime or the listener failed.
    Runtime(io::Error),
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Logging(e) => write!(f, "logging setup failed: {}", e),
            Self::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            Self::Metadata(e) => write!(f, "metadata failed: {:#}", e),
            Self::Registration(e) => write!(f, "registration failed: {}", e),
            Self::Callback { op, source } => write!(f, "{} failed: {:#}", op, source),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Runtime(e) => write!(f, "runtime error: {}", e),
        }
    }
}

impl std::error::Error for Fatal {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Logging(e) => Some(e),
            Self::Bind { source, .. } => Some(source),
            Self::Metadata(e) => Some(&**e),
            Self::Registration(e) => Some(e),
            Self::Callback { source, .. } => Some(&**source),
            Self::Wire(e) => Some(e),
            Self::Runtime(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Fatal {
    fn from(e: ConfigError) -> Self { Self::Config(e) }
}

impl From<rillrpc::Error> for Fatal {
    fn from(e: rillrpc::Error) -> Self { Self::Wire(e) }
}

impl From<rillpack::Error> for Fatal {
    fn from(e: rillpack::Error) -> Self { Self::Wire(rillrpc::Error::Pack(e)) }
}
