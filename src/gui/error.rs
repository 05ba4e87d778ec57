use std::{error::Error, fmt::Display};

/// Returned when the terminal device selector fails.
#[derive(Debug)]
pub enum SelectorError {
    /// Drawing to or reading from the terminal failed.
    IOError(std::io::Error),
    /// There was nothing to select from.
    NoDevices,
}

impl Display for SelectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorError::IOError(e) => write!(f, "terminal error: {}", e),
            SelectorError::NoDevices => write!(f, "no serial devices found"),
        }
    }
}

impl Error for SelectorError {}

impl From<std::io::Error> for SelectorError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
