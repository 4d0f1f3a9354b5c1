use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start command {command:?}: {source}")]
    Start {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not captured")]
    Capture(&'static str),

    #[error("output reader failed: {0}")]
    Reader(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
