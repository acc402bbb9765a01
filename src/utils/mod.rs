pub mod config;
pub mod errors;

pub use config::{AppConfig, LoggingConfig, TranslatorSettings};
pub use errors::{CsvTranslatorError, Result};

/// Prefixes values a spreadsheet would evaluate as a formula.
pub fn sanitize_cell(value: &str) -> String {
    if value.starts_with('=')
        || value.starts_with('+')
        || value.starts_with('-')
        || value.starts_with('@')
    {
        format!("'{}", value)
    } else {
        value.to_string()
    }
}
