use thiserror::Error;

/// Failures of the resolve pipeline. Always reported, never panicked.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resource id must not be empty")]
    EmptyId,

    #[error("unknown resource id: {0}")]
    UnknownId(String),

    #[error("no downloader accepts {uri}")]
    NoDownloader { uri: String },

    #[error("malformed uri: {0}")]
    MalformedUri(String),

    #[error("HTTP {status} while fetching {uri}")]
    HttpStatus { uri: String, status: u16 },

    #[error("failed to fetch {uri}: {reason}")]
    Transport { uri: String, reason: String },

    #[error("failed to decode {id} as {kind}: {reason}")]
    Decode {
        id: String,
        kind: &'static str,
        reason: String,
    },

    #[error("blueprint {id} declares unsupported schema version {found} (supported {min} ..= {max})")]
    UnsupportedVersion {
        id: String,
        found: String,
        min: String,
        max: String,
    },

    #[error("resolve of {id} exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { id: String, timeout_ms: u64 },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ResolveError {
    pub(crate) fn decode(id: &str, kind: &'static str, reason: impl ToString) -> Self {
        ResolveError::Decode {
            id: id.to_string(),
            kind,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transport(uri: &str, reason: impl ToString) -> Self {
        ResolveError::Transport {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures reported by a graph interpreter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph failed to load: {0}")]
    Load(String),

    #[error("unknown graph handle {0}")]
    UnknownGraph(u64),

    #[error("no active run for instance {0}")]
    UnknownRun(uuid::Uuid),

    #[error("node {node} has no output pin named {pin}")]
    UnknownPin { node: String, pin: String },

    #[error("unknown node {0}")]
    UnknownNode(String),

    #[error("scope {scope} is not running in instance {instance}")]
    UnknownScope { instance: uuid::Uuid, scope: u64 },

    #[error("native engine call {call} failed: {reason}")]
    Native { call: &'static str, reason: String },

    #[error("failed to open native engine library: {0}")]
    Library(#[from] libloading::Error),
}

/// A local, recoverable failure reading a node pin.
#[derive(Debug, Error, PartialEq)]
pub enum PinError {
    #[error("pin {node}.{pin} is not bound")]
    Unbound { node: String, pin: String },

    #[error("pin {node}.{pin} holds {found}, expected {expected}")]
    WrongType {
        node: String,
        pin: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("catalog version {0:?} is not a valid version")]
    Version(String),

    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
