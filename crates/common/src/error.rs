use thiserror::Error;

/// Errors for shared type construction and parsing.
#[derive(Debug, Error)]
pub enum Error {
    /// A conversation key string did not have the `org:contact` shape.
    #[error("malformed conversation key: {value}")]
    MalformedKey { value: String },

    /// A key segment contained the reserved separator character.
    #[error("conversation key segment contains ':': {segment}")]
    ReservedSeparator { segment: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn malformed_key(value: impl Into<String>) -> Self {
        Self::MalformedKey {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type SpinlineError = Error;
pub type Result<T> = std::result::Result<T, Error>;
