//! # Data Model
//!
//! The values exchanged between a computation, its adapter and the proxy.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A unit of stream data.
///
/// On output, `stream` names the destination stream; the proxy (not the
/// adapter) checks it against the computation's declared outputs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub stream: String,
}

impl Record {
    pub fn new(stream: impl Into<String>, key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            stream: stream.into(),
        }
    }
}

/// The effects requested by one callback invocation.
///
/// Records keep the order they were produced in. Timers are keyed by name,
/// so setting the same timer twice keeps only the later fire time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub records: Vec<Record>,
    /// Timer name to fire time in epoch milliseconds.
    pub timers: BTreeMap<String, i64>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.timers.is_empty()
    }
}

/// How records on a stream are partitioned across downstream instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamGrouping {
    #[default]
    Shuffle,
    GroupBy,
    RoundRobin,
    Broadcast,
}

impl StreamGrouping {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Shuffle => "SHUFFLE",
            Self::GroupBy => "GROUP_BY",
            Self::RoundRobin => "ROUND_ROBIN",
            Self::Broadcast => "BROADCAST",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SHUFFLE" => Some(Self::Shuffle),
            "GROUP_BY" => Some(Self::GroupBy),
            "ROUND_ROBIN" => Some(Self::RoundRobin),
            "BROADCAST" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// One declared stream, as registered with the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub name: String,
    pub grouping: StreamGrouping,
}

/// A stream as a computation declares it: a bare name, or a name with an
/// explicit grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDecl {
    Name(String),
    Grouped(String, StreamGrouping),
}

impl StreamDecl {
    /// Resolves the declaration, defaulting a bare name to `Shuffle`.
    pub fn normalize(&self) -> StreamMetadata {
        match self {
            Self::Name(name) => StreamMetadata {
                name: name.clone(),
                grouping: StreamGrouping::default(),
            },
            Self::Grouped(name, grouping) => StreamMetadata {
                name: name.clone(),
                grouping: *grouping,
            },
        }
    }
}

impl From<&str> for StreamDecl {
    fn from(name: &str) -> Self { Self::Name(name.to_owned()) }
}

impl From<String> for StreamDecl {
    fn from(name: String) -> Self { Self::Name(name) }
}

impl From<(&str, StreamGrouping)> for StreamDecl {
    fn from((name, grouping): (&str, StreamGrouping)) -> Self { Self::Grouped(name.to_owned(), grouping) }
}

impl From<(String, StreamGrouping)> for StreamDecl {
    fn from((name, grouping): (String, StreamGrouping)) -> Self { Self::Grouped(name, grouping) }
}

/// Why a `Metadata` could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    EmptyName,
    NoStreams,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "computation name must not be empty"),
            Self::NoStreams => write!(f, "both input and output streams are empty"),
        }
    }
}

impl std::error::Error for MetadataError {}

/// What a computation declares about itself.
///
/// Grouping only applies to inputs; outputs are plain stream names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    istreams: Vec<StreamDecl>,
    ostreams: Vec<String>,
}

impl Metadata {
    /// # Errors
    /// `EmptyName` for an empty name, `NoStreams` when both lists are empty.
    pub fn new<I, O>(name: impl Into<String>, istreams: I, ostreams: O) -> Result<Self, MetadataError>
    where
        I: IntoIterator,
        I::Item: Into<StreamDecl>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let name = name.into();
        let istreams: Vec<StreamDecl> = istreams.into_iter().map(Into::into).collect();
        let ostreams: Vec<String> = ostreams.into_iter().map(Into::into).collect();

        if name.is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if istreams.is_empty() && ostreams.is_empty() {
            return Err(MetadataError::NoStreams);
        }
        Ok(Self { name, istreams, ostreams })
    }

    /// Starts a declaration one stream at a time.
    pub fn builder(name: impl Into<String>) -> MetadataBuilder {
        MetadataBuilder {
            name: name.into(),
            istreams: Vec::new(),
            ostreams: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn istreams(&self) -> &[StreamDecl] {
        &self.istreams
    }

    pub fn ostreams(&self) -> &[String] {
        &self.ostreams
    }

    /// Builds the registration descriptor. The endpoint is left unset.
    pub fn normalize(&self) -> ComputationMetadata {
        ComputationMetadata {
            name: self.name.clone(),
            istreams: self.istreams.iter().map(StreamDecl::normalize).collect(),
            ostreams: self
                .ostreams
                .iter()
                .map(|name| StreamDecl::Name(name.clone()).normalize())
                .collect(),
            endpoint: None,
        }
    }
}

pub struct MetadataBuilder {
    name: String,
    istreams: Vec<StreamDecl>,
    ostreams: Vec<String>,
}

impl MetadataBuilder {
    pub fn input(mut self, stream: impl Into<StreamDecl>) -> Self {
        self.istreams.push(stream.into());
        self
    }

    pub fn output(mut self, stream: impl Into<String>) -> Self {
        self.ostreams.push(stream.into());
        self
    }

    pub fn build(self) -> Result<Metadata, MetadataError> {
        Metadata::new(self.name, self.istreams, self.ostreams)
    }
}

/// The descriptor a computation registers with, and serves from `metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationMetadata {
    pub name: String,
    pub istreams: Vec<StreamMetadata>,
    pub ostreams: Vec<StreamMetadata>,
    /// Where the adapter listens; set only for registration.
    pub endpoint: Option<Endpoint>,
}

/// A network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// True for `0.0.0.0` and `::`, which no peer can dial.
    pub fn is_wildcard(&self) -> bool {
        self.ip.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses `host:port` or `[v6-host]:port`. The host may not be empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{}'", s))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in '{}': {}", s, e))?;
        Ok(Self::new(host, port))
    }
}
