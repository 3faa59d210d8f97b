//! Response definitions
//!
//! Represents replies sent to clients.

/// A reply to send to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK`
    Ok,

    /// `VALUE <value>`
    Value(Vec<u8>),

    /// `NOT_FOUND`
    NotFound,

    /// `ERR <reason>`
    Error(String),
}

impl Response {
    /// Create an OK response
    pub fn ok() -> Self {
        Response::Ok
    }

    /// Create a VALUE response
    pub fn value(value: Vec<u8>) -> Self {
        Response::Value(value)
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Response::NotFound
    }

    /// Create an ERR response
    pub fn error(reason: &str) -> Self {
        Response::Error(reason.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}
