use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// The embedding function failed to encode an item; the only way `store` fails.
    EncodingFailed(String),
    Io(std::io::Error),
    Serialization(String),
    /// `import` was given a payload that failed validation; the store is left untouched.
    InvalidImport(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::EncodingFailed(reason) => write!(f, "embedding failed: {reason}"),
            StoreError::Io(err) => write!(f, "memory store I/O error: {err}"),
            StoreError::Serialization(reason) => write!(f, "serialization error: {reason}"),
            StoreError::InvalidImport(reason) => write!(f, "invalid import payload: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}
