use thiserror::Error;

/// Errors surfaced by adapters, the decoder and the importer.
///
/// These are values carried through [`crate::ImportOutcome`]; the scheduler
/// never sees them as panics or propagated exceptions.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error requesting {url}: {message}")]
    Transport { url: String, message: String },

    #[error("TLS error requesting {url}: {message}")]
    Tls { url: String, message: String },

    #[error("Proxy error requesting {url}: {message}")]
    Proxy { url: String, message: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Command exited with {code:?}: {stderr}")]
    Command { code: Option<i32>, stderr: String },

    #[error("Command produced no output")]
    EmptyOutput,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Path error at segment '{segment}': {reason}")]
    Path { segment: String, reason: String },

    #[error(transparent)]
    Store(#[from] listmill_store::StoreError),
}

impl ImportError {
    /// Stable error-kind code recorded in import outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport { .. } => "transport",
            Self::Tls { .. } => "tls",
            Self::Proxy { .. } => "proxy",
            Self::HttpStatus { .. } => "http_status",
            Self::Timeout { .. } => "timeout",
            Self::Command { .. } => "command",
            Self::EmptyOutput => "empty_output",
            Self::Script(_) => "script",
            Self::Format(_) => "format",
            Self::Path { .. } => "path",
            Self::Store(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
