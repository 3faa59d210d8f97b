//! Protocol codec
//!
//! Parsing and serialization for the line protocol.
//!
//! ## Tokenizing
//! ```text
//! SET   user:1   hello world\r\n
//! └┬┘   └──┬─┘   └────┬────┘
//! word    key       value (rest of line, verbatim)
//! ```
//! Runs of spaces separate tokens; a trailing `\r` before the `\n` is dropped.

use std::io::{BufRead, Read, Write};

use crate::error::{CaskError, Result};
use super::{Command, CommandType, Response};

// =============================================================================
// Command Parsing/Encoding
// =============================================================================

/// Parse one request line (terminator optional)
pub fn parse_command(line: &[u8]) -> Result<Command> {
    let line = strip_line_ending(line);
    if line.contains(&b'\n') {
        return Err(CaskError::Protocol("embedded newline".to_string()));
    }

    let (word, rest) = next_token(line);
    if word.is_empty() {
        return Err(CaskError::Protocol("empty command".to_string()));
    }

    let command_type = CommandType::from_word(word)
        .ok_or_else(|| CaskError::Protocol("unknown command".to_string()))?;

    let (key, rest) = next_token(rest);
    let rest = skip_spaces(rest);

    match command_type {
        CommandType::Set => {
            if key.is_empty() || rest.is_empty() {
                return Err(wrong_arguments(command_type));
            }
            Ok(Command::Set {
                key: key.to_vec(),
                value: rest.to_vec(),
            })
        }
        CommandType::Get => {
            if key.is_empty() || !rest.is_empty() {
                return Err(wrong_arguments(command_type));
            }
            Ok(Command::Get { key: key.to_vec() })
        }
        CommandType::Delete => {
            if key.is_empty() || !rest.is_empty() {
                return Err(wrong_arguments(command_type));
            }
            Ok(Command::Delete { key: key.to_vec() })
        }
    }
}

/// Encode a command as a request line
///
/// Fails if the key contains a space or newline, or the value a newline.
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let key = command.key();
    if key.is_empty() || key.iter().any(|&b| b == b' ' || b == b'\n' || b == b'\r') {
        return Err(CaskError::Protocol(
            "key must be non-empty and free of spaces and newlines".to_string(),
        ));
    }

    let mut line = Vec::with_capacity(16 + key.len());
    line.extend_from_slice(command.command_type().as_str().as_bytes());
    line.push(b' ');
    line.extend_from_slice(key);

    if let Command::Set { value, .. } = command {
        if value.is_empty() || value.contains(&b'\n') {
            return Err(CaskError::Protocol(
                "value must be non-empty and free of newlines".to_string(),
            ));
        }
        line.push(b' ');
        line.extend_from_slice(value);
    }

    line.push(b'\n');
    Ok(line)
}

fn wrong_arguments(command_type: CommandType) -> CaskError {
    CaskError::Protocol(format!(
        "wrong number of arguments for '{}'",
        command_type.as_str()
    ))
}

/// Split off the next space-delimited token, skipping leading spaces
fn next_token(input: &[u8]) -> (&[u8], &[u8]) {
    let input = skip_spaces(input);
    let end = input.iter().position(|&b| b == b' ').unwrap_or(input.len());
    (&input[..end], &input[end..])
}

fn skip_spaces(input: &[u8]) -> &[u8] {
    let start = input.iter().position(|&b| b != b' ').unwrap_or(input.len());
    &input[start..]
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response as a reply line
pub fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Ok => b"OK\n".to_vec(),
        Response::NotFound => b"NOT_FOUND\n".to_vec(),
        Response::Value(value) => {
            let mut line = Vec::with_capacity(7 + value.len());
            line.extend_from_slice(b"VALUE ");
            line.extend_from_slice(value);
            line.push(b'\n');
            line
        }
        Response::Error(reason) => format!("ERR {}\n", reason).into_bytes(),
    }
}

/// Decode a reply line
pub fn decode_response(line: &[u8]) -> Result<Response> {
    let line = strip_line_ending(line);

    if line == b"OK" {
        Ok(Response::Ok)
    } else if line == b"NOT_FOUND" {
        Ok(Response::NotFound)
    } else if let Some(value) = line.strip_prefix(b"VALUE ") {
        Ok(Response::Value(value.to_vec()))
    } else if let Some(reason) = line.strip_prefix(b"ERR ") {
        Ok(Response::Error(String::from_utf8_lossy(reason).into_owned()))
    } else {
        Err(CaskError::Protocol(format!(
            "unrecognized reply: {:?}",
            String::from_utf8_lossy(line)
        )))
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one line of at most `max_len` bytes (terminator included)
///
/// Returns `Ok(None)` on a clean end of stream. A final line without a
/// terminator is returned as is.
pub fn read_line<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader
        .by_ref()
        .take(max_len as u64)
        .read_until(b'\n', &mut line)?;

    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") && line.len() >= max_len {
        return Err(CaskError::Protocol("line too long".to_string()));
    }

    Ok(Some(line))
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Response> {
    match read_line(reader, max_len)? {
        Some(line) => decode_response(&line),
        None => Err(CaskError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before reply",
        ))),
    }
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
