use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("line {line} was trimmed; first retained line is {first_retained}")]
    LineTrimmed { line: u64, first_retained: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("input pipeline closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{handler}: {message}")]
    Failed {
        handler: &'static str,
        message: String,
    },
    #[error("{handler} panicked: {message}")]
    Panicked {
        handler: &'static str,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("model update rejected: {0}")]
    Model(#[from] ModelError),
    #[error("output handler failed: {0}")]
    Handler(#[from] HandlerError),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("terminal view is shut down")]
    Closed,
    #[error(transparent)]
    Input(#[from] InputError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine home directory")]
    NoHome,
    #[error("failed to read {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("backend session unavailable: {0}")]
    Unavailable(String),
}
