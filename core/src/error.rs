use thiserror::Error;

/// Why a decoded log record could not be turned into an inbound event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },
    #[error("invalid source address: {0}")]
    InvalidAddress(String),
    #[error("destination port out of range: {0}")]
    PortOutOfRange(i64),
}
