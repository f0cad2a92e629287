//! WAV playlist streaming server
//!
//! Each accepted connection gets its own task which loops over a shuffled
//! snapshot of the audio directory:
//!
//! ```text
//! STREAMING_FILE ──► SENDING_SILENCE ──► STREAMING_FILE ──► … ──► CLOSED
//! ```
//!
//! Unreadable or mismatched files are skipped with a warning. The first
//! failed write moves the connection to CLOSED; sibling connections are
//! unaffected. While a connection has nothing to play it watches the peer
//! instead, so a client that hangs up during the wait is closed too.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::audio::format::{AudioBuffer, AudioFormat};
use crate::audio::silence::make_silence;
use crate::audio::wav::read_wav;
use crate::config::ServerConfig;
use crate::constants::{ACCEPT_RETRY, IDLE_RETRY};
use crate::error::{ConfigError, NetworkError, WavError};
use crate::network::pacer::Pacer;
use crate::network::socket::bind_listener;

/// Per-connection ordering over the `.wav` files of one directory snapshot
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    files: Vec<PathBuf>,
    order: Vec<usize>,
}

impl Playlist {
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        let order = (0..files.len()).collect();
        Self { files, order }
    }

    /// Snapshot the `.wav` files (any extension case) in `dir`
    pub async fn scan(dir: &Path) -> std::io::Result<Self> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_wav = path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"));
            if is_wav && tokio::fs::metadata(&path).await.map_or(false, |m| m.is_file()) {
                files.push(path);
            }
        }
        files.sort();
        tracing::info!("Found {} WAV files in '{}'", files.len(), dir.display());
        Ok(Self::from_files(files))
    }

    pub fn shuffle<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in current play order
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.order.iter().map(|&i| self.files[i].as_path())
    }
}

/// Immutable per-server state shared by every connection
#[derive(Debug)]
pub struct StreamSession {
    audio_dir: PathBuf,
    format: AudioFormat,
    pacer: Pacer,
    silence: AudioBuffer,
    silence_ms: u32,
    idle_waits: AtomicU64,
    connections: AtomicUsize,
}

impl StreamSession {
    pub fn new(config: &ServerConfig, audio_dir: PathBuf) -> Result<Self, ConfigError> {
        let format = config.format()?;
        let pacer = Pacer::for_format(&format, config.chunk_size_bytes()?);
        Ok(Self {
            audio_dir,
            format,
            pacer,
            silence: make_silence(&format, config.silence_ms),
            silence_ms: config.silence_ms,
            idle_waits: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
        })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn silence(&self) -> &AudioBuffer {
        &self.silence
    }

    /// Times a connection found nothing playable and backed off
    pub fn idle_waits(&self) -> u64 {
        self.idle_waits.load(Ordering::Relaxed)
    }

    /// Connections currently being served
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn scan(&self) -> Playlist {
        match Playlist::scan(&self.audio_dir).await {
            Ok(playlist) => {
                if playlist.is_empty() {
                    tracing::warn!("No WAV files in '{}'", self.audio_dir.display());
                }
                playlist
            }
            Err(e) => {
                tracing::error!("Failed to list '{}': {}", self.audio_dir.display(), e);
                Playlist::default()
            }
        }
    }

    async fn load(&self, path: &Path) -> Result<AudioBuffer, WavError> {
        let owned = path.to_path_buf();
        let format = self.format;
        tokio::task::spawn_blocking(move || read_wav(&owned, &format))
            .await
            .map_err(|e| WavError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    }

    /// Back off for [`IDLE_RETRY`], failing early if the peer hangs up.
    /// Anything the peer sends meanwhile is discarded.
    async fn idle<S>(&self, peer: &mut S) -> Result<(), NetworkError>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
        let wait = tokio::time::sleep(IDLE_RETRY);
        tokio::pin!(wait);
        let mut scratch = [0u8; 256];

        loop {
            tokio::select! {
                _ = &mut wait => return Ok(()),
                read = peer.read(&mut scratch) => match read {
                    Ok(0) => {
                        return Err(NetworkError::Disconnected(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        )))
                    }
                    Ok(_) => {}
                    Err(e) => return Err(NetworkError::Disconnected(e)),
                },
            }
        }
    }

    /// Stream the playlist to `peer` until a write fails or the peer hangs
    /// up while there is nothing to play.
    ///
    /// Only returns on error; the playlist repeats forever otherwise.
    pub async fn stream_to<S>(&self, peer: &mut S) -> Result<(), NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let mut playlist = self.scan().await;
        let mut rng = StdRng::from_entropy();

        loop {
            if playlist.is_empty() {
                // Nothing is mid-stream, so a fresh look at the directory is fine
                self.idle(peer).await?;
                playlist = self.scan().await;
                continue;
            }

            playlist.shuffle(&mut rng);
            let mut streamed = 0usize;

            for path in playlist.iter() {
                tracing::info!("Streaming file: {}", path.display());
                let buffer = match self.load(path).await {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        tracing::warn!("Skipping file: {}", e);
                        continue;
                    }
                };

                let report = self.pacer.send(peer, buffer.data()).await?;
                tracing::debug!(
                    "Sent {} bytes in {} chunks ({:.2}s)",
                    report.bytes_sent,
                    report.chunks,
                    buffer.duration().as_secs_f64()
                );

                tracing::info!("{}ms silence", self.silence_ms);
                self.pacer.send(peer, self.silence.data()).await?;
                streamed += 1;
            }

            if streamed == 0 {
                tracing::warn!("No playable files this pass, waiting {:?}", IDLE_RETRY);
                self.idle(peer).await?;
            }
        }
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Drive one connection to CLOSED. The stream is shut down exactly once.
async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    session: Arc<StreamSession>,
    mut stop: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("client", peer = %peer);
    async move {
        let active = session.connections.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Connected by {}. Active connections: {}", peer, active);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {}", e);
        }

        let outcome = tokio::select! {
            result = session.stream_to(&mut stream) => result,
            _ = wait_for_stop(&mut stop) => {
                tracing::info!("Server stopping");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(NetworkError::Disconnected(e)) => {
                tracing::info!("Client {} disconnected: {}", peer, e)
            }
            Err(e) => tracing::error!("Error streaming to {}: {}", peer, e),
        }

        tracing::info!("Closing connection to {}", peer);
        let _ = stream.shutdown().await;
        session.connections.fetch_sub(1, Ordering::SeqCst);
    }
    .instrument(span)
    .await
}

/// TCP server streaming the audio directory to every client
pub struct WavServer {
    config: ServerConfig,
    session: Arc<StreamSession>,
}

impl WavServer {
    /// Validate the config and prepare the audio directory. All failures are fatal.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let audio_dir = config.prepare_audio_dir()?;
        let session = Arc::new(StreamSession::new(&config, audio_dir)?);
        Ok(Self { config, session })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Bind the configured address with address reuse enabled
    pub async fn bind(&self) -> Result<TcpListener, NetworkError> {
        let addr = self.config.bind_address();
        let listener = bind_listener(&addr)?;
        listener
            .set_nonblocking(true)
            .and_then(|()| TcpListener::from_std(listener))
            .map_err(|e| NetworkError::BindFailed {
                addr,
                reason: e.to_string(),
            })
    }

    /// Accept clients until `shutdown` resolves, then close every connection.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), NetworkError>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Server listening on {}", addr);
        }
        tracing::info!("Streaming from: {}", self.session.audio_dir.display());
        tracing::info!("Format: {}", self.session.format);
        tracing::info!("Chunk Duration: {}ms", self.config.chunk_ms);
        tracing::info!("Silence Between Files: {}ms", self.config.silence_ms);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Server shutting down.");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        handlers.spawn(handle_client(
                            stream,
                            peer,
                            self.session.clone(),
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY).await;
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Client handler panicked: {}", e);
                        }
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        while handlers.join_next().await.is_some() {}
        tracing::info!("Server stopped.");
        Ok(())
    }

    /// Bind and serve until Ctrl-C
    pub async fn run(self) -> Result<(), NetworkError> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::fixtures::write_pcm;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};

    fn config_for(dir: &Path) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            audio_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn session_for(dir: &Path) -> StreamSession {
        StreamSession::new(&config_for(dir), dir.to_path_buf()).unwrap()
    }

    /// Stream to an in-memory peer that stays connected for `window`,
    /// then return everything it was sent
    async fn collect_for(session: &StreamSession, window: Duration) -> Vec<u8> {
        let (mut server_side, mut client_side) = tokio::io::duplex(1 << 20);
        let result = tokio::time::timeout(window, session.stream_to(&mut server_side)).await;
        // The handler never gives up on its own
        assert!(result.is_err(), "stream ended early: {:?}", result);

        drop(server_side);
        let mut received = Vec::new();
        client_side.read_to_end(&mut received).await.unwrap();
        received
    }

    /// Peer that never sends anything and whose writes fail once `limit`
    /// bytes have been accepted
    struct BrokenPeer {
        written: Vec<u8>,
        limit: usize,
        failed_writes: usize,
    }

    impl BrokenPeer {
        fn new(limit: usize) -> Self {
            Self {
                written: Vec::new(),
                limit,
                failed_writes: 0,
            }
        }
    }

    impl AsyncRead for BrokenPeer {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenPeer {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let room = self.limit - self.written.len();
            if room == 0 {
                self.failed_writes += 1;
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            let n = buf.len().min(room);
            self.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_scan_filters_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.WAV", "notes.txt", "c.wav.bak"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("folder.wav")).unwrap();

        let playlist = Playlist::scan(dir.path()).await.unwrap();
        let names: Vec<_> = playlist
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.WAV", "b.wav"]);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let files: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("{}.wav", i))).collect();
        let mut playlist = Playlist::from_files(files.clone());
        playlist.shuffle(&mut StdRng::seed_from_u64(7));

        let mut seen: Vec<PathBuf> = playlist.iter().map(Path::to_path_buf).collect();
        assert_eq!(seen.len(), 20);
        seen.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_session_silence_matches_config() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path());
        assert_eq!(session.silence().len(), 160);
        assert!(session.silence().data().iter().all(|&b| b == 128));
    }

    #[tokio::test]
    async fn test_empty_directory_waits_without_spinning() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path());

        let received = collect_for(&session, Duration::from_millis(2500)).await;

        assert!(received.is_empty());
        let waits = session.idle_waits();
        assert!((2..=4).contains(&waits), "idle waits: {}", waits);
    }

    #[tokio::test]
    async fn test_unplayable_files_back_off() {
        let dir = tempfile::tempdir().unwrap();
        let wrong = AudioFormat::new(44100, 16, 2).unwrap();
        write_pcm(&dir.path().join("wrong.wav"), &wrong, &[0u8; 400]);
        std::fs::write(dir.path().join("broken.wav"), b"RIFF").unwrap();

        let session = session_for(dir.path());
        let received = collect_for(&session, Duration::from_millis(1500)).await;

        assert!(received.is_empty());
        assert!((1..=2).contains(&session.idle_waits()));
    }

    #[tokio::test]
    async fn test_peer_hanging_up_ends_idle_wait() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path());
        let (mut server_side, client_side) = tokio::io::duplex(1024);

        let hang_up = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(client_side);
        });

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(3), session.stream_to(&mut server_side))
            .await
            .expect("connection outlived its peer");

        assert!(matches!(result, Err(NetworkError::Disconnected(_))));
        // Well inside the first one-second back-off
        assert!(started.elapsed() < Duration::from_millis(900), "{:?}", started.elapsed());
        assert_eq!(session.idle_waits(), 1);
        hang_up.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_hanging_up_between_failed_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.wav"), b"RIFF").unwrap();
        let session = session_for(dir.path());
        let (mut server_side, client_side) = tokio::io::duplex(1024);
        drop(client_side);

        let result = tokio::time::timeout(Duration::from_millis(500), session.stream_to(&mut server_side))
            .await
            .expect("connection outlived its peer");
        assert!(matches!(result, Err(NetworkError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_file_then_silence() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(16000, 8, 1).unwrap();
        let pcm: Vec<u8> = (0..1600).map(|i| (i % 100) as u8).collect();
        write_pcm(&dir.path().join("short.wav"), &format, &pcm);

        let session = session_for(dir.path());
        // 100 ms of audio + 10 ms of silence per pass
        let received = collect_for(&session, Duration::from_millis(150)).await;

        assert!(received.len() >= 1760, "got {} bytes", received.len());
        assert_eq!(&received[..1600], &pcm[..]);
        assert!(received[1600..1760].iter().all(|&b| b == 128));
    }

    #[tokio::test]
    async fn test_failed_write_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(16000, 8, 1).unwrap();
        let pcm: Vec<u8> = (0..1600).map(|i| (i % 100) as u8).collect();
        write_pcm(&dir.path().join("short.wav"), &format, &pcm);

        let session = session_for(dir.path());
        // Fails partway through the second 320-byte chunk
        let mut peer = BrokenPeer::new(500);
        let result = tokio::time::timeout(Duration::from_secs(2), session.stream_to(&mut peer))
            .await
            .expect("write failure did not end the stream");

        assert!(matches!(result, Err(NetworkError::Disconnected(_))));
        assert_eq!(&peer.written[..], &pcm[..500]);
        // Nothing is attempted after the first failure
        assert_eq!(peer.failed_writes, 1);
        assert_eq!(session.idle_waits(), 0);
    }
}
