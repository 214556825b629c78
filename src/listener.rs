//! Network endpoint and ingestion loop.
//!
//! A [`Listener`] owns the bound TCP socket for one session. [`Listener::run`] accepts one
//! client at a time, reads until the peer disconnects, then goes back to accepting. Every
//! read and accept is raced against the session's shutdown signal, so a stop request
//! interrupts a blocked read immediately instead of waiting for the peer or a timeout.
//!
//! Bytes go through a per-connection [`Framer`]; each complete message is handed to the
//! [`Pipeline`], which parses it and fans the frame out to the ring buffers, the session log
//! and the dispatcher, in that order. Stop is honoured between messages.

use crate::config::ListenerSettings;
use crate::data::{ChannelStore, CsvLogger};
use crate::dispatch::Dispatcher;
use crate::error::{AppResult, DaqError};
use crate::frame::Frame;
use crate::framer::Framer;
use crate::parser::{self, ParseError};
use crate::stats::IngestStats;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A `host:port` pair as typed by the operator.
///
/// The host may be a name, an IPv4 address, a bracketed IPv6 address, or empty for
/// "every interface".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    host: String,
    port: u16,
}

impl ListenAddress {
    /// Host part, brackets removed. Empty means every interface.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to a socket address. Name lookup failures are address errors.
    pub async fn resolve(&self) -> AppResult<SocketAddr> {
        if self.host.is_empty() {
            return Ok(SocketAddr::from(([0, 0, 0, 0], self.port)));
        }
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| DaqError::AddressParse {
                address: self.to_string(),
                reason: format!("could not resolve host: {}", e),
            })?;
        addrs.next().ok_or_else(|| DaqError::AddressParse {
            address: self.to_string(),
            reason: "host resolved to no addresses".to_string(),
        })
    }
}

impl FromStr for ListenAddress {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DaqError::AddressParse {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated '[' in host"))?,
            None if host.contains(':') => {
                return Err(invalid("IPv6 hosts must be written in brackets"))
            }
            None => host,
        };

        if port.is_empty() {
            return Err(invalid("missing port"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Everything one accepted frame touches.
///
/// Owned by the ingestion task for the duration of a session and handed back when it ends,
/// so the session log is never shared between tasks.
#[derive(Debug)]
pub struct Pipeline {
    store: Arc<ChannelStore>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<IngestStats>,
    logger: Option<CsvLogger>,
}

impl Pipeline {
    /// Assemble a pipeline. Without a logger, frames are stored and dispatched only.
    pub fn new(
        store: Arc<ChannelStore>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<IngestStats>,
        logger: Option<CsvLogger>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            stats,
            logger,
        }
    }

    /// Process one framed message.
    ///
    /// A malformed message is counted and returned as an error; nothing is stored, logged or
    /// dispatched for it. A log write failure is counted but the frame is still stored and
    /// dispatched.
    pub fn ingest(&mut self, message: &[u8]) -> Result<Frame, ParseError> {
        let frame = match parser::parse(message) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_arity() {
                    self.stats.add_arity_errors(1);
                } else {
                    self.stats.add_number_errors(1);
                }
                warn!(error = %e, raw = %String::from_utf8_lossy(message), "Dropping malformed message");
                return Err(e);
            }
        };

        self.store.push_frame(&frame);
        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.append(&frame) {
                self.stats.add_log_write_errors(1);
                warn!(error = %e, "Failed to write frame to session log");
            }
        }
        self.dispatcher.notify(frame);
        self.stats.add_frames_accepted(1);
        Ok(frame)
    }

    /// Shared counters.
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Session log, if any.
    pub fn logger(&self) -> Option<&CsvLogger> {
        self.logger.as_ref()
    }

    /// Give back the session log so it can be closed.
    pub fn into_logger(self) -> Option<CsvLogger> {
        self.logger
    }
}

/// Why the ingestion loop ended.
#[derive(Debug)]
pub enum ListenerExit {
    /// Shutdown was requested.
    Stopped,
    /// The listening socket kept failing; the session must be torn down.
    Failed(DaqError),
}

/// Result of [`Listener::run`]: the pipeline comes back with the exit reason.
#[derive(Debug)]
pub struct IngestOutcome {
    /// The pipeline, including the session log still open
    pub pipeline: Pipeline,
    /// Why the loop ended
    pub exit: ListenerExit,
}

enum ConnectionEnd {
    Closed,
    Shutdown,
}

/// Bound listening socket for one session.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    settings: ListenerSettings,
}

impl Listener {
    /// Parse `address` and bind it.
    ///
    /// Fails with [`DaqError::AddressParse`] for a malformed or unresolvable address and
    /// [`DaqError::Bind`] when the socket cannot be bound. No retry is attempted.
    pub async fn bind(address: &str, settings: &ListenerSettings) -> AppResult<Self> {
        let parsed: ListenAddress = address.parse()?;
        let addr = parsed.resolve().await?;

        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| DaqError::Bind {
                address: addr.to_string(),
                source,
            })?;
        let local_addr = inner.local_addr()?;
        info!(address = %local_addr, "Listening for telemetry");

        Ok(Self {
            inner,
            local_addr,
            settings: settings.clone(),
        })
    }

    /// Address actually bound (useful when port 0 was requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve clients one at a time until `shutdown` becomes `true`.
    ///
    /// The socket is closed when this returns.
    pub async fn run(self, mut pipeline: Pipeline, mut shutdown: watch::Receiver<bool>) -> IngestOutcome {
        let mut consecutive_errors = 0u32;

        let exit = loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break ListenerExit::Stopped,
                accepted = self.inner.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;
                    pipeline.stats().add_connections_accepted(1);
                    info!(%peer, "Client connected");

                    match self.serve(stream, peer, &mut pipeline, &mut shutdown).await {
                        ConnectionEnd::Closed => continue,
                        ConnectionEnd::Shutdown => break ListenerExit::Stopped,
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "Accept error");
                    if consecutive_errors >= self.settings.max_consecutive_accept_errors.max(1) {
                        break ListenerExit::Failed(DaqError::Io(e));
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break ListenerExit::Stopped,
                        _ = tokio::time::sleep(self.settings.accept_backoff()) => {}
                    }
                }
            }
        };

        debug!(address = %self.local_addr, "Listener closed");
        IngestOutcome { pipeline, exit }
    }

    async fn serve(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        pipeline: &mut Pipeline,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let mut framer = Framer::new(self.settings.max_carry_over_bytes);
        let mut buf = vec![0u8; self.settings.read_chunk_size.max(1)];

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return ConnectionEnd::Shutdown,
                read = stream.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    info!(%peer, "Client disconnected");
                    return ConnectionEnd::Closed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(%peer, error = %e, "Read failed, dropping connection");
                    return ConnectionEnd::Closed;
                }
            };

            pipeline.stats().add_bytes_received(n as u64);
            for message in framer.feed(&buf[..n]) {
                if *shutdown.borrow() {
                    return ConnectionEnd::Shutdown;
                }
                // Errors are counted and logged by the pipeline
                let _ = pipeline.ingest(&message);
            }

            let discarded = framer.take_discarded();
            if discarded > 0 {
                pipeline.stats().add_bytes_discarded(discarded as u64);
            }
        }
    }
}

/// Resolves once shutdown is requested or the controller has gone away.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Channel;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn parts(address: &str) -> (String, u16) {
        let parsed: ListenAddress = address.parse().unwrap();
        (parsed.host().to_string(), parsed.port())
    }

    #[test]
    fn test_parse_valid_addresses() {
        assert_eq!(parts("192.168.1.1:1234"), ("192.168.1.1".to_string(), 1234));
        assert_eq!(parts("localhost:80"), ("localhost".to_string(), 80));
        assert_eq!(parts(":5000"), (String::new(), 5000));
        assert_eq!(parts("[::1]:9000"), ("::1".to_string(), 9000));
        assert_eq!(parts(" 10.0.0.1:0 "), ("10.0.0.1".to_string(), 0));
    }

    #[test]
    fn test_parse_invalid_addresses() {
        for bad in ["", "1234", "host:", "host:port", "host:70000", "::1:80", "[::1:80"] {
            let err = bad.parse::<ListenAddress>().unwrap_err();
            assert!(
                matches!(err, DaqError::AddressParse { .. }),
                "{:?} gave {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for address in ["127.0.0.1:80", "[::1]:80", ":1234"] {
            let parsed: ListenAddress = address.parse().unwrap();
            assert_eq!(parsed.to_string(), address);
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_host_binds_all() {
        let parsed: ListenAddress = ":0".parse().unwrap();
        let addr = parsed.resolve().await.unwrap();
        assert!(addr.ip().is_unspecified());
    }

    fn pipeline() -> (Pipeline, Arc<ChannelStore>, Arc<Dispatcher>, Arc<IngestStats>) {
        let stats = Arc::new(IngestStats::new());
        let store = Arc::new(ChannelStore::new(16));
        let dispatcher = Arc::new(Dispatcher::new(16, Arc::clone(&stats)));
        let pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&stats),
            None,
        );
        (pipeline, store, dispatcher, stats)
    }

    #[test]
    fn test_pipeline_drops_malformed_and_keeps_going() {
        let (mut pipeline, store, dispatcher, stats) = pipeline();

        assert!(pipeline.ingest(b"1,2,3").is_err());
        assert!(pipeline.ingest(b"1,2,x,4,5,6,7,8").is_err());
        let frame = pipeline.ingest(b"1,2,3,4,5,6,7,8").unwrap();
        assert_eq!(frame.values()[7], 8.0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.arity_errors, 1);
        assert_eq!(snapshot.number_errors, 1);
        assert_eq!(snapshot.frames_accepted, 1);
        assert_eq!(store.snapshot(Channel::new(0).unwrap()), vec![1.0]);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn test_log_write_failure_still_stores_and_dispatches() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("DAS_readonly.csv");
        std::fs::write(&path, b"").unwrap();
        // Read-only handle: every flush of the session log fails
        let file = std::fs::File::open(&path).unwrap();
        let logger = CsvLogger::from_writer(
            path,
            csv::Writer::from_writer(file),
            chrono::Local::now(),
            1,
        );

        let stats = Arc::new(IngestStats::new());
        let store = Arc::new(ChannelStore::new(16));
        let dispatcher = Arc::new(Dispatcher::new(16, Arc::clone(&stats)));
        let mut pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&stats),
            Some(logger),
        );

        let frame = pipeline.ingest(b"1,2,3,4,5,6,7,8").unwrap();
        assert_eq!(frame.values()[0], 1.0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.log_write_errors, 1);
        assert_eq!(snapshot.frames_accepted, 1);
        assert_eq!(store.snapshot(Channel::new(0).unwrap()), vec![1.0]);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let settings = ListenerSettings::default();
        let first = Listener::bind("127.0.0.1:0", &settings).await.unwrap();
        let taken = first.local_addr().to_string();

        let err = Listener::bind(&taken, &settings).await.unwrap_err();
        assert!(matches!(err, DaqError::Bind { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_read() {
        let settings = ListenerSettings::default();
        let listener = Listener::bind("127.0.0.1:0", &settings).await.unwrap();
        let addr = listener.local_addr();
        let (pipeline, _store, _dispatcher, stats) = pipeline();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(pipeline, shutdown_rx));

        // Connected client that sends a partial message and then goes quiet
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"1,2,3,4,5,6,7,8\r\n9,").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("listener did not stop while a read was pending")
            .unwrap();

        assert!(matches!(outcome.exit, ListenerExit::Stopped));
        assert_eq!(stats.snapshot().frames_accepted, 1);
        assert_eq!(stats.snapshot().connections_accepted, 1);
    }

    #[tokio::test]
    async fn test_accepts_next_client_after_disconnect() {
        let settings = ListenerSettings::default();
        let listener = Listener::bind("127.0.0.1:0", &settings).await.unwrap();
        let addr = listener.local_addr();
        let (pipeline, store, _dispatcher, stats) = pipeline();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(pipeline, shutdown_rx));

        for value in ["1", "2"] {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let line = format!("{v},{v},{v},{v},{v},{v},{v},{v}\r\n", v = value);
            client.write_all(line.as_bytes()).await.unwrap();
            client.shutdown().await.unwrap();
            drop(client);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(stats.snapshot().connections_accepted, 2);
        assert_eq!(store.snapshot(Channel::new(3).unwrap()), vec![1.0, 2.0]);
    }
}
