use thiserror::Error;

pub type Result<T> = std::result::Result<T, HiiError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HiiError {
    #[error("no package list under that handle")]
    NotFound,
    #[error("a package list with this guid is already installed")]
    DuplicateGuid,
    #[error("package data does not fit the 24-bit length field")]
    TooLarge,
    #[error("malformed package data: {0}")]
    Malformed(&'static str),
}
