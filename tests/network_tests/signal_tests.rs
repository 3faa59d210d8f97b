//! Tests for signal-driven shutdown
//!
//! Kept in their own test binary: the handler is process-wide and the test
//! signals its own process.

use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use caskkv::config::Config;
use caskkv::engine::Engine;
use caskkv::network::Server;
use tempfile::TempDir;

#[test]
fn test_sigterm_stops_server_and_engine_closes() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .listen_addr("127.0.0.1:0")
        .build();

    let engine = Arc::new(Engine::open(config.clone()).unwrap());
    engine.put(b"k", b"v").unwrap();

    let mut server = Server::new(config.clone(), Arc::clone(&engine));
    server.bind().unwrap();
    server.shutdown_on_signal().unwrap();
    let handle = thread::spawn(move || server.run());

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "server did not stop after SIGTERM");
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().unwrap().unwrap();

    engine.close().unwrap();
    drop(engine);

    let reopened = Engine::open(config).unwrap();
    assert_eq!(reopened.get(b"k").unwrap(), b"v".to_vec());
}
