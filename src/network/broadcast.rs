//! Microphone broadcast server
//!
//! Two threads share one [`ClientRegistry`]:
//!
//! - the accept thread sends every new client the 12-byte
//!   [`StreamHeader`](crate::protocol::StreamHeader) and registers it;
//! - the capture thread reads fixed-size chunks from a [`CaptureSource`]
//!   and queues each one for every registered client.
//!
//! Every client owns a bounded queue drained by its own writer thread, so
//! the capture thread never blocks on a socket. A client whose queue fills
//! up, or whose writer has failed, is pruned on the next broadcast.
//!
//! A client that registers mid-stream starts at the next chunk boundary.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use crate::audio::capture::CaptureSource;
use crate::config::MicServerConfig;
use crate::constants::{ACCEPT_POLL, ACCEPT_RETRY, CAPTURE_RETRY, CLIENT_QUEUE_CHUNKS};
use crate::error::{AudioError, ConfigError, NetworkError};
use crate::network::socket::bind_listener;
use crate::protocol::StreamHeader;

struct RegisteredClient {
    id: Uuid,
    peer: SocketAddr,
    queue: Sender<Bytes>,
    /// Second handle on the socket, used to unblock the writer
    control: TcpStream,
    writer: JoinHandle<()>,
}

impl RegisteredClient {
    fn disconnect(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

/// Drains one client's queue onto its socket until either side gives up
fn client_writer(mut stream: TcpStream, id: Uuid, peer: SocketAddr, queue: Receiver<Bytes>) {
    let mut bytes_sent: u64 = 0;

    for chunk in queue.iter() {
        if let Err(e) = stream.write_all(&chunk) {
            tracing::info!(
                "Client disconnected: {} ({}) after {} bytes: {}",
                peer,
                id,
                bytes_sent,
                e
            );
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        bytes_sent += chunk.len() as u64;
    }
    tracing::debug!("Writer for {} ({}) done after {} bytes", peer, id, bytes_sent);
}

/// Result of queueing one chunk for every client
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Connected microphone clients
pub struct ClientRegistry {
    clients: Mutex<Vec<RegisteredClient>>,
    queue_depth: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_queue_depth(CLIENT_QUEUE_CHUNKS)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose clients may fall `depth` chunks behind before removal
    pub fn with_queue_depth(depth: usize) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            queue_depth: depth.max(1),
        }
    }

    /// Add a client that has already received the header and start its
    /// writer thread
    pub fn register(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<Uuid> {
        let id = Uuid::new_v4();
        let control = stream.try_clone()?;
        let (queue, pending) = bounded(self.queue_depth);
        let writer = thread::Builder::new()
            .name(format!("mic-client-{}", id))
            .spawn(move || client_writer(stream, id, peer, pending))?;

        let mut clients = self.clients.lock();
        clients.push(RegisteredClient {
            id,
            peer,
            queue,
            control,
            writer,
        });
        tracing::info!(
            "Client connected: {} ({}). Total clients: {}",
            peer,
            id,
            clients.len()
        );
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Queue `chunk` for every client without blocking. Clients that are
    /// too far behind or already gone are removed and shut down.
    pub fn broadcast(&self, chunk: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut clients = self.clients.lock();

        clients.retain(|client| match client.queue.try_send(chunk.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Client {} ({}) is {} chunks behind, dropping it",
                    client.peer,
                    client.id,
                    self.queue_depth
                );
                client.disconnect();
                report.dropped += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                client.disconnect();
                report.dropped += 1;
                false
            }
        });

        if report.dropped > 0 {
            tracing::info!("Total clients: {}", clients.len());
        }
        report
    }

    /// Disconnect everyone and wait for their writers
    pub fn close_all(&self) {
        let clients: Vec<RegisteredClient> = self.clients.lock().drain(..).collect();
        for client in clients {
            client.disconnect();
            drop(client.queue);
            let _ = client.writer.join();
        }
    }
}

/// Send the header and hand the client to the registry
fn admit_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    header: &[u8],
    write_timeout: Option<Duration>,
    registry: &ClientRegistry,
) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(write_timeout)?;
    stream.write_all(header)?;
    registry.register(stream, peer)?;
    Ok(())
}

fn accept_loop(
    listener: TcpListener,
    header: StreamHeader,
    write_timeout: Option<Duration>,
    registry: Arc<ClientRegistry>,
    running: Arc<AtomicBool>,
) {
    let header = header.encode();

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = admit_client(stream, peer, &header, write_timeout, &registry) {
                    tracing::warn!("Failed to set up client {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::error!("Error accepting connection: {}", e);
                thread::sleep(ACCEPT_RETRY);
            }
        }
    }
    tracing::debug!("Accept thread exiting");
}

fn capture_loop<S: CaptureSource>(
    mut source: S,
    registry: Arc<ClientRegistry>,
    running: Arc<AtomicBool>,
) {
    let mut chunks: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match source.read_chunk() {
            Ok(chunk) => {
                registry.broadcast(Bytes::from(chunk));
                chunks += 1;
            }
            Err(AudioError::Closed) => {
                tracing::error!("Capture source closed, no more audio");
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading audio: {}", e);
                thread::sleep(CAPTURE_RETRY);
            }
        }
    }
    tracing::debug!("Capture thread exiting after {} chunks", chunks);
}

/// Microphone broadcast server
pub struct MicServer {
    config: MicServerConfig,
    registry: Arc<ClientRegistry>,
}

impl MicServer {
    pub fn new(config: MicServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
        })
    }

    pub fn config(&self) -> &MicServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Bind the configured address; the listener is polled, not blocked on
    pub fn bind(&self) -> Result<TcpListener, NetworkError> {
        let addr = self.config.bind_address();
        let listener = bind_listener(&addr)?;
        listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;
        Ok(listener)
    }

    /// Start the accept and capture threads
    pub fn start<S>(self, source: S, listener: TcpListener) -> io::Result<MicServerHandle>
    where
        S: CaptureSource + 'static,
    {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let header = self.config.header();

        tracing::info!("Server listening on {}", local_addr);
        tracing::info!(
            "Audio: {} Hz, {}-byte samples, {} frames per chunk",
            header.sample_rate,
            header.sample_width,
            header.chunk_frames
        );

        let accept_handle = {
            let registry = self.registry.clone();
            let running = running.clone();
            let write_timeout = self.config.write_timeout();
            thread::Builder::new()
                .name("mic-accept".to_string())
                .spawn(move || accept_loop(listener, header, write_timeout, registry, running))?
        };

        let capture_handle = {
            let registry = self.registry.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("mic-broadcast".to_string())
                .spawn(move || capture_loop(source, registry, running))
        };
        let capture_handle = match capture_handle {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                let _ = accept_handle.join();
                return Err(e);
            }
        };

        Ok(MicServerHandle {
            local_addr,
            registry: self.registry,
            running,
            accept_handle: Some(accept_handle),
            capture_handle: Some(capture_handle),
        })
    }
}

/// Running microphone server. Dropping it stops the server.
pub struct MicServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    running: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    capture_handle: Option<JoinHandle<()>>,
}

impl MicServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop both threads and close every client
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down server");
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
        self.registry.close_all();
        tracing::info!("Server stopped.");
    }
}

impl Drop for MicServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
