//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{CaskError, Result};

use super::Connection;

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP server for CaskKV
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listen address; returns the bound address (useful with port 0)
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Address the server is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind()?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| CaskError::Config("listener not bound".to_string()))?;

        tracing::info!("Listening on {}", listener.local_addr()?);

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.dispatch(stream) {
                        tracing::warn!("Failed to start handler for {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!(
            "Server shutting down ({} connections still open)",
            self.active_connections.load(Ordering::SeqCst)
        );
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Flag that stops the accept loop when set; usable from other threads
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Stop the accept loop on Ctrl+C or SIGTERM.
    ///
    /// Only one handler can be installed per process.
    pub fn shutdown_on_signal(&self) -> Result<()> {
        let shutdown = self.shutdown_handle();
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| CaskError::Config(format!("failed to install signal handler: {}", e)))
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Hand an accepted stream to a connection thread
    fn dispatch(&self, mut stream: TcpStream) -> Result<()> {
        // Accepted sockets inherit non-blocking mode on some platforms
        stream.set_nonblocking(false)?;

        let previous = self.active_connections.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(Arc::clone(&self.active_connections));
        if previous >= self.config.max_connections {
            drop(guard);
            tracing::warn!("Rejecting connection: limit of {} reached", self.config.max_connections);
            let _ = stream.write_all(b"ERR too many connections\n");
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        let read_timeout_ms = self.config.read_timeout_ms;
        let write_timeout_ms = self.config.write_timeout_ms;
        let max_line_size = self.config.max_line_size;

        thread::Builder::new()
            .name("caskkv-conn".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = Connection::new(stream, engine, max_line_size).and_then(|mut conn| {
                    conn.set_timeouts(read_timeout_ms, write_timeout_ms)?;
                    conn.handle()
                });
                if let Err(e) = result {
                    tracing::debug!("Connection ended with error: {}", e);
                }
            })?;

        Ok(())
    }
}

/// Decrements the connection count when a handler finishes
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
