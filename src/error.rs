//! Custom error types for rustpaperbot.
//!
//! All library functions return `Result<T, PaperError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustpaperbot operations.
#[derive(Debug, Error)]
pub enum PaperError {
    /// Headless browser process error
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML/JSON shape error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by the remote site
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Remote service answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message
        message: String,
    },

    /// CAPTCHA page returned instead of results
    #[error("CAPTCHA detected, please refresh cookies")]
    Captcha,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Target table is not present in the store
    #[error("Table {0} does not exist, run `init` first")]
    MissingTable(String),

    /// Backup could not be created, destructive work was not started
    #[error("Backup failed: {0}")]
    Backup(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Input validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `PaperError`
pub type Result<T> = std::result::Result<T, PaperError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PaperError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u8> = None;
        let err = missing.ok_or_parse("no title").expect_err("should fail");
        assert_eq!(err.to_string(), "Parse error: no title");
        assert_eq!(Some(3).ok_or_parse("x").expect("should succeed"), 3);
    }
}
