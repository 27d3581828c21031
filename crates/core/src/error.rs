use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached. Callers may retry.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Parse(e.to_string())
    }
}
