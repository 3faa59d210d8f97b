//! CaskKV CLI Client
//!
//! Command-line interface for interacting with CaskKV.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::process::ExitCode;

use caskkv::protocol::{read_response, write_command, Command, Response};
use clap::{Parser, Subcommand};

/// Longest reply line the client accepts
const MAX_REPLY_SIZE: usize = 256 * 1024 * 1024 + 64;

/// CaskKV CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv-cli")]
#[command(about = "CLI for CaskKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set (remaining words are joined with spaces)
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let command = match args.command {
        Commands::Get { key } => Command::Get { key: key.into_bytes() },
        Commands::Set { key, value } => Command::Set {
            key: key.into_bytes(),
            value: value.join(" ").into_bytes(),
        },
        Commands::Del { key } => Command::Delete { key: key.into_bytes() },
    };

    match send(&args.server, &command) {
        Ok(Response::Ok) => {
            println!("OK");
            ExitCode::SUCCESS
        }
        Ok(Response::Value(value)) => {
            println!("{}", String::from_utf8_lossy(&value));
            ExitCode::SUCCESS
        }
        Ok(Response::NotFound) => {
            println!("(not found)");
            ExitCode::from(1)
        }
        Ok(Response::Error(reason)) => {
            eprintln!("error: {}", reason);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn send(server: &str, command: &Command) -> caskkv::Result<Response> {
    let stream = TcpStream::connect(server)?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut reader = BufReader::new(stream);

    write_command(&mut writer, command)?;
    read_response(&mut reader, MAX_REPLY_SIZE)
}
