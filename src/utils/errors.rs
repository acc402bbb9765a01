use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsvTranslatorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(csv::Error),

    #[error("Row length mismatch on line {line}: expected {expected} fields, got {got}")]
    RowLengthMismatch { line: u64, expected: usize, got: usize },

    #[error("Serialize error: {0}")]
    SerializeError(csv::Error),

    #[error("Stream state error: {0}")]
    StateError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl CsvTranslatorError {
    /// Classifies a `csv` error raised while reading. I/O failures are
    /// surfaced as `IoError`, everything else is malformed input.
    pub fn from_read(err: csv::Error) -> Self {
        match into_io_error(err) {
            Ok(io) => CsvTranslatorError::IoError(io),
            Err(err) => CsvTranslatorError::ParseError(err),
        }
    }

    /// Classifies a `csv` error raised while writing.
    pub fn from_write(err: csv::Error) -> Self {
        match into_io_error(err) {
            Ok(io) => CsvTranslatorError::IoError(io),
            Err(err) => CsvTranslatorError::SerializeError(err),
        }
    }

    /// True for any kind of malformed input.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            CsvTranslatorError::ParseError(_) | CsvTranslatorError::RowLengthMismatch { .. }
        )
    }

    pub fn closed_stream(operation: &str) -> Self {
        CsvTranslatorError::StateError(format!("cannot {} on a closed stream", operation))
    }
}

// Moves the underlying io::Error out so its OS code and source survive.
fn into_io_error(err: csv::Error) -> std::result::Result<std::io::Error, csv::Error> {
    if !err.is_io_error() {
        return Err(err);
    }
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Ok(io),
        other => Ok(std::io::Error::other(format!("{:?}", other))),
    }
}

pub type Result<T> = std::result::Result<T, CsvTranslatorError>;
