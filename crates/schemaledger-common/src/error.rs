use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("query error: {0}")]
    Query(String),

    /// The ledger already holds a record for this filename.
    #[error("migration already recorded: {0}")]
    DuplicateRecord(String),

    #[error("migration {filename} failed: {message}")]
    Migration { filename: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport failures may succeed on a later attempt; everything else is
    /// terminal for the current run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateRecord(_))
    }
}
