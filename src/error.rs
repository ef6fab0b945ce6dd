//! Error taxonomy.
//!
//! Fatal errors abort the operation that raised them:
//! - connection problems (device/app not found, attach or agent load failure)
//! - transfer failures after the strategy's retries are exhausted
//! - store precondition violations (already exists, not found)
//! - external tools exiting with an unexpected code
//!
//! Capture sub-failures (one scope, one app data category) are not errors.
//! They are collected as diagnostics on the capture result instead.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures reported by the instrumentation bridge itself.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("rpc '{method}' failed: {message}")]
    Rpc { method: String, message: String },

    #[error("bridge protocol violation: {0}")]
    Protocol(String),

    #[error("bridge process closed")]
    Closed,

    #[error("bridge i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn rpc(method: &str, message: impl Into<String>) -> Self {
        BridgeError::Rpc {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("app {0} not running")]
    AppNotRunning(String),

    #[error("failed to attach to {bundle}: {source}")]
    AttachFailed {
        bundle: String,
        #[source]
        source: BridgeError,
    },

    #[error("failed to load agent: {0}")]
    AgentLoad(#[source] BridgeError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("transfer of scope '{scope}' failed: {source}")]
    Transfer {
        scope: String,
        #[source]
        source: Box<Error>,
    },

    #[error("snapshot \"{label}\" already exists")]
    AlreadyExists { label: String },

    #[error("snapshot \"{label}\" not found")]
    NotFound { label: String },

    #[error("invalid {what} name: {name:?}")]
    InvalidName { what: &'static str, name: String },

    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    ExternalTool {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid capture response: {0}")]
    InvalidCapture(String),

    #[error("config error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl Error {
    pub fn transfer(scope: &str, source: Error) -> Self {
        Error::Transfer {
            scope: scope.to_string(),
            source: Box::new(source),
        }
    }
}
