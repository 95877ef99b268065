use std::path::PathBuf;

/// Failures while loading the question bank at startup.
#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("failed to read question bank {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed question bank: {0}")]
    Parse(#[from] serde_json::Error),
}
