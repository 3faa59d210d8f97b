//! Protocol Module
//!
//! Defines the line-based wire protocol for client-server communication.
//!
//! ## Requests
//! Newline-terminated ASCII lines; the command word is case-insensitive and
//! tokens are separated by spaces.
//! ```text
//! SET <key> <value>\n      value = everything after the key, spaces included
//! GET <key>\n
//! DELETE <key>\n
//! ```
//!
//! ## Replies
//! ```text
//! OK\n                     SET / DELETE succeeded (DELETE of a missing key too)
//! VALUE <value>\n          GET hit
//! NOT_FOUND\n              GET miss
//! ERR <reason>\n           anything else
//! ```
//!
//! Keys and values never contain the newline byte; keys never contain spaces.

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::Response;
pub use codec::{
    decode_response, encode_command, encode_response, parse_command, read_line, read_response,
    write_command, write_response,
};
