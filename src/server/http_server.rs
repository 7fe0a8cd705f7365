use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, warn};

use super::request::{read_request, write_response};
use crate::dispatcher::{Dispatcher, HandlerResponse};

/// Serves a [`Dispatcher`] over HTTP/1.1 with a fixed pool of worker threads.
pub struct HttpServer<S> {
    dispatcher: Arc<Dispatcher<S>>,
    workers: usize,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it
/// gracefully, or joining the worker threads.
pub struct ServerHandle {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address actually bound; useful when starting on port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if the server doesn't accept a connection within
    /// ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub fn stop(self) {
        info!(addr = %self.addr, "Stopping HTTP server");
        // Each unblock releases one worker parked in recv()
        for _ in &self.threads {
            self.server.unblock();
        }
        if self.join().is_err() {
            warn!("An HTTP worker panicked during shutdown");
        }
    }

    /// Block until every worker has exited.
    ///
    /// # Errors
    ///
    /// Returns the payload of the first worker that panicked.
    pub fn join(self) -> thread::Result<()> {
        let mut outcome = Ok(());
        for handle in self.threads {
            if let Err(panic) = handle.join() {
                if outcome.is_ok() {
                    outcome = Err(panic);
                }
            }
        }
        outcome
    }
}

impl<S: Send + Sync + 'static> HttpServer<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, workers: usize) -> Self {
        Self {
            dispatcher,
            workers: workers.max(1),
        }
    }

    /// Bind `addr` and spawn the workers.
    ///
    /// # Errors
    ///
    /// Fails if the address does not resolve, cannot be bound, or a worker
    /// thread cannot be spawned.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> anyhow::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()
            .context("invalid listen address")?
            .next()
            .ok_or_else(|| anyhow!("listen address resolved to nothing"))?;
        let server = tiny_http::Server::http(addr).map_err(|e| anyhow!("failed to bind {addr}: {e}"))?;
        let server = Arc::new(server);
        let bound = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow!("listener on {addr} is not an IP socket"))?;

        let mut threads = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let server = Arc::clone(&server);
            let dispatcher = Arc::clone(&self.dispatcher);
            let handle = thread::Builder::new()
                .name(format!("http-worker-{id}"))
                .spawn(move || worker_loop(&server, &dispatcher))
                .with_context(|| format!("failed to spawn HTTP worker {id}"))?;
            threads.push(handle);
        }

        info!(addr = %bound, workers = self.workers, "HTTP server listening");
        Ok(ServerHandle {
            addr: bound,
            server,
            threads,
        })
    }
}

fn worker_loop<S: Send + Sync + 'static>(server: &tiny_http::Server, dispatcher: &Dispatcher<S>) {
    for mut request in server.incoming_requests() {
        let response = match read_request(&mut request) {
            Ok(incoming) => catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(incoming)))
                .unwrap_or_else(|_| {
                    error!("Dispatcher panicked outside a handler");
                    HandlerResponse::json(
                        500,
                        serde_json::json!({
                            "error": "internal_error",
                            "detail": "An unexpected error occurred"
                        }),
                    )
                }),
            Err(err) => {
                warn!(error = %err, status = err.status(), "Rejecting unreadable request");
                err.to_response()
            }
        };
        if let Err(e) = write_response(request, response) {
            debug!(error = %e, "Client went away before the response was written");
        }
    }
    debug!("HTTP worker exiting");
}
