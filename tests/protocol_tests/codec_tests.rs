//! Tests for the line protocol
//!
//! These tests verify:
//! - Command parsing (case, spacing, values with spaces)
//! - Malformed request lines
//! - Reply encoding and decoding
//! - Line reading limits

use std::io::{BufReader, Cursor};

use caskkv::error::CaskError;
use caskkv::protocol::{
    decode_response, encode_command, encode_response, parse_command, read_line, read_response,
    write_command, write_response, Command, CommandType, Response,
};

fn protocol_error(line: &[u8]) -> String {
    match parse_command(line) {
        Err(CaskError::Protocol(reason)) => reason,
        other => panic!("expected protocol error for {:?}, got {:?}", line, other),
    }
}

// =============================================================================
// Command Parsing Tests
// =============================================================================

#[test]
fn test_parse_set() {
    let command = parse_command(b"SET user:1 hello\n").unwrap();
    assert_eq!(
        command,
        Command::Set {
            key: b"user:1".to_vec(),
            value: b"hello".to_vec(),
        }
    );
    assert_eq!(command.command_type(), CommandType::Set);
    assert_eq!(command.key(), b"user:1");
}

#[test]
fn test_parse_set_value_keeps_spaces() {
    let command = parse_command(b"SET greeting hello  big world \r\n").unwrap();
    assert_eq!(
        command,
        Command::Set {
            key: b"greeting".to_vec(),
            value: b"hello  big world ".to_vec(),
        }
    );
}

#[test]
fn test_parse_get_and_delete() {
    assert_eq!(
        parse_command(b"GET a\n").unwrap(),
        Command::Get { key: b"a".to_vec() }
    );
    assert_eq!(
        parse_command(b"DELETE a").unwrap(),
        Command::Delete { key: b"a".to_vec() }
    );
}

#[test]
fn test_parse_is_case_insensitive() {
    assert_eq!(
        parse_command(b"get a\n").unwrap(),
        Command::Get { key: b"a".to_vec() }
    );
    assert_eq!(
        parse_command(b"DeLeTe a\n").unwrap().command_type(),
        CommandType::Delete
    );
    // Keys keep their case
    assert_eq!(parse_command(b"set Key V\n").unwrap().key(), b"Key");
}

#[test]
fn test_parse_collapses_separator_runs() {
    assert_eq!(
        parse_command(b"  GET    a   \n").unwrap(),
        Command::Get { key: b"a".to_vec() }
    );
    assert_eq!(
        parse_command(b"SET   a    v\n").unwrap(),
        Command::Set {
            key: b"a".to_vec(),
            value: b"v".to_vec(),
        }
    );
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_parse_empty_line() {
    assert_eq!(protocol_error(b"\n"), "empty command");
    assert_eq!(protocol_error(b"   \r\n"), "empty command");
}

#[test]
fn test_parse_unknown_command() {
    assert_eq!(protocol_error(b"PING\n"), "unknown command");
    assert_eq!(protocol_error(b"INCR a\n"), "unknown command");
}

#[test]
fn test_parse_wrong_arity() {
    assert_eq!(protocol_error(b"GET\n"), "wrong number of arguments for 'GET'");
    assert_eq!(protocol_error(b"GET a b\n"), "wrong number of arguments for 'GET'");
    assert_eq!(protocol_error(b"SET a\n"), "wrong number of arguments for 'SET'");
    assert_eq!(protocol_error(b"SET a   \n"), "wrong number of arguments for 'SET'");
    assert_eq!(protocol_error(b"DELETE\n"), "wrong number of arguments for 'DELETE'");
    assert_eq!(protocol_error(b"DELETE a b\n"), "wrong number of arguments for 'DELETE'");
}

// =============================================================================
// Command Encoding Tests
// =============================================================================

#[test]
fn test_encode_command() {
    let set = Command::Set {
        key: b"a".to_vec(),
        value: b"hello world".to_vec(),
    };
    assert_eq!(encode_command(&set).unwrap(), b"SET a hello world\n");
    assert_eq!(parse_command(&encode_command(&set).unwrap()).unwrap(), set);

    let get = Command::Get { key: b"a".to_vec() };
    assert_eq!(encode_command(&get).unwrap(), b"GET a\n");

    let delete = Command::Delete { key: b"a".to_vec() };
    assert_eq!(encode_command(&delete).unwrap(), b"DELETE a\n");
}

#[test]
fn test_encode_command_rejects_unrepresentable() {
    let spaced_key = Command::Get { key: b"a b".to_vec() };
    assert!(encode_command(&spaced_key).is_err());

    let newline_value = Command::Set {
        key: b"a".to_vec(),
        value: b"x\ny".to_vec(),
    };
    assert!(encode_command(&newline_value).is_err());

    let empty_value = Command::Set {
        key: b"a".to_vec(),
        value: Vec::new(),
    };
    assert!(encode_command(&empty_value).is_err());
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_encode_responses() {
    assert_eq!(encode_response(&Response::ok()), b"OK\n");
    assert_eq!(encode_response(&Response::not_found()), b"NOT_FOUND\n");
    assert_eq!(
        encode_response(&Response::value(b"two words".to_vec())),
        b"VALUE two words\n"
    );
    assert_eq!(
        encode_response(&Response::error("unknown command")),
        b"ERR unknown command\n"
    );
}

#[test]
fn test_decode_responses() {
    assert_eq!(decode_response(b"OK\n").unwrap(), Response::Ok);
    assert_eq!(decode_response(b"NOT_FOUND\r\n").unwrap(), Response::NotFound);
    assert_eq!(
        decode_response(b"VALUE 2\n").unwrap(),
        Response::Value(b"2".to_vec())
    );
    let err = decode_response(b"ERR line too long\n").unwrap();
    assert!(err.is_error());
    assert_eq!(err, Response::Error("line too long".to_string()));

    assert!(decode_response(b"HELLO\n").is_err());
}

// =============================================================================
// Stream Tests
// =============================================================================

#[test]
fn test_read_line_sequence() {
    let mut reader = BufReader::new(Cursor::new(b"GET a\nSET b c\nDELETE b".to_vec()));

    assert_eq!(read_line(&mut reader, 64).unwrap().unwrap(), b"GET a\n");
    assert_eq!(read_line(&mut reader, 64).unwrap().unwrap(), b"SET b c\n");
    // Final line without a terminator
    assert_eq!(read_line(&mut reader, 64).unwrap().unwrap(), b"DELETE b");
    assert!(read_line(&mut reader, 64).unwrap().is_none());
}

#[test]
fn test_read_line_too_long() {
    let mut input = b"SET a ".to_vec();
    input.extend(std::iter::repeat(b'x').take(100));
    input.push(b'\n');
    let mut reader = BufReader::new(Cursor::new(input));

    match read_line(&mut reader, 32) {
        Err(CaskError::Protocol(reason)) => assert_eq!(reason, "line too long"),
        other => panic!("expected line too long, got {:?}", other),
    }
}

#[test]
fn test_read_line_at_limit() {
    let mut reader = BufReader::new(Cursor::new(b"GET abc\n".to_vec()));
    assert_eq!(read_line(&mut reader, 8).unwrap().unwrap(), b"GET abc\n");
}

#[test]
fn test_command_and_response_over_stream() {
    let command = Command::Set {
        key: b"k".to_vec(),
        value: b"v v".to_vec(),
    };
    let mut wire = Vec::new();
    write_command(&mut wire, &command).unwrap();
    write_response(&mut wire, &Response::value(b"v v".to_vec())).unwrap();

    let mut reader = BufReader::new(Cursor::new(wire));
    let line = read_line(&mut reader, 1024).unwrap().unwrap();
    assert_eq!(parse_command(&line).unwrap(), command);
    assert_eq!(
        read_response(&mut reader, 1024).unwrap(),
        Response::Value(b"v v".to_vec())
    );
    assert!(read_response(&mut reader, 1024).is_err());
}
