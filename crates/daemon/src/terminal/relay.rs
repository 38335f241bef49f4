//! Duplex relay between a terminal session and a connected client.
//!
//! Two pumps run concurrently for every connection:
//!
//! - the outbound pump reads the PTY on a blocking worker and forwards each
//!   chunk to the client, in order, as soon as it is read;
//! - the inbound pump writes every client message to the PTY, in order.
//!
//! Whichever pump finishes first triggers [`PtySession::close`]. If the
//! inbound pump finished first, the outbound pump keeps forwarding while the
//! session closes, and the relay waits a bounded time for the blocking reader
//! to observe the closed PTY before it reports back.

use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::session::{CloseOutcome, PtyIo, PtySession, SessionError};
use crate::config::{FrameMode, TerminalConfig};

/// Number of PTY chunks buffered between the blocking reader and the
/// forwarder. A slow client backs up into the reader, which stops draining
/// the PTY, which in turn blocks the shell.
const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Extra time granted to the reader beyond the teardown grace period. Covers
/// the SIGKILL escalation as well.
const READER_JOIN_SLACK: Duration = Duration::from_secs(2);

/// Errors raised by a relay endpoint.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The client channel failed or was closed.
    #[error("channel error: {0}")]
    Channel(String),
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    /// Terminal output decoded as UTF-8.
    Text(String),
    /// Raw terminal output.
    Binary(Bytes),
}

impl OutputFrame {
    /// Payload bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutputFrame::Text(text) => text.as_bytes(),
            OutputFrame::Binary(bytes) => bytes,
        }
    }
}

/// Where the outbound pump delivers terminal output.
pub trait OutputSink: Send {
    /// Delivers one frame. An error ends the outbound pump.
    fn send_output(
        &mut self,
        frame: OutputFrame,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// Where the inbound pump receives client input from.
pub trait InputSource: Send {
    /// Waits for the next data message. `None` means the client is gone.
    fn next_input(&mut self) -> impl Future<Output = Option<Result<Bytes, RelayError>>> + Send;
}

/// Where the inbound pump writes client input to.
pub trait PtyInput: Send + Sync {
    /// Writes one client message verbatim.
    fn write_input(&self, data: Bytes) -> impl Future<Output = Result<(), SessionError>> + Send;
}

impl PtyInput for PtySession {
    async fn write_input(&self, data: Bytes) -> Result<(), SessionError> {
        self.write(data).await
    }
}

impl OutputSink for mpsc::Sender<OutputFrame> {
    async fn send_output(&mut self, frame: OutputFrame) -> Result<(), RelayError> {
        self.send(frame)
            .await
            .map_err(|_| RelayError::Channel("output receiver dropped".to_string()))
    }
}

impl InputSource for mpsc::Receiver<Bytes> {
    async fn next_input(&mut self) -> Option<Result<Bytes, RelayError>> {
        self.recv().await.map(Ok)
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Turns raw PTY chunks into outbound frames.
///
/// In text mode an incomplete UTF-8 sequence at the end of a chunk is held
/// back and prefixed to the next one, so no character is ever split across
/// two frames. Invalid bytes are replaced with U+FFFD.
#[derive(Debug)]
pub struct FrameEncoder {
    mode: FrameMode,
    pending: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
        }
    }

    /// Encodes one chunk. Returns `None` when everything was held back.
    pub fn encode(&mut self, chunk: Vec<u8>) -> Option<OutputFrame> {
        match self.mode {
            FrameMode::Binary => Some(OutputFrame::Binary(Bytes::from(chunk))),
            FrameMode::Text => {
                let mut buf = if self.pending.is_empty() {
                    chunk
                } else {
                    let mut buf = std::mem::take(&mut self.pending);
                    buf.extend_from_slice(&chunk);
                    buf
                };
                let complete = complete_prefix_len(&buf);
                self.pending = buf.split_off(complete);
                if buf.is_empty() {
                    return None;
                }
                Some(OutputFrame::Text(into_text(buf)))
            }
        }
    }

    /// Flushes whatever was held back.
    pub fn finish(&mut self) -> Option<OutputFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(OutputFrame::Text(into_text(rest)))
    }
}

fn into_text(buf: Vec<u8>) -> String {
    match String::from_utf8(buf) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Length of the longest prefix of `buf` that does not end inside a
/// multi-byte UTF-8 sequence.
fn complete_prefix_len(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(4) {
        let byte = buf[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            b if b < 0x80 => 1,
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if back < width { len - back } else { len };
    }
    len
}

// ============================================================================
// Outbound
// ============================================================================

/// How the blocking reader ended.
#[derive(Debug)]
pub enum ReadEnd {
    /// End of stream. A PTY master reports EIO once the slave side is gone,
    /// which is counted here too.
    Eof,
    /// A genuine read failure.
    Failed(io::Error),
    /// The forwarder went away first.
    Abandoned,
}

impl ReadEnd {
    /// Copy of this end. A read failure keeps its kind and message.
    fn duplicate(&self) -> ReadEnd {
        match self {
            ReadEnd::Eof => ReadEnd::Eof,
            ReadEnd::Failed(e) => ReadEnd::Failed(io::Error::new(e.kind(), e.to_string())),
            ReadEnd::Abandoned => ReadEnd::Abandoned,
        }
    }
}

/// Why the outbound pump stopped forwarding.
#[derive(Debug)]
pub enum OutboundExit {
    /// The PTY stream ended.
    Ended(ReadEnd),
    /// The client could not take more output.
    ClientGone(RelayError),
}

/// PTY-to-client pump.
pub struct OutboundPump {
    rx: mpsc::Receiver<Vec<u8>>,
    worker: Option<JoinHandle<ReadEnd>>,
    encoder: FrameEncoder,
    bytes_out: u64,
    client_gone: bool,
}

impl OutboundPump {
    /// Starts the blocking reader.
    pub fn spawn<R>(reader: R, chunk_size: usize, mode: FrameMode) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let worker = tokio::task::spawn_blocking(move || read_loop(reader, chunk_size.max(1), tx));
        Self {
            rx,
            worker: Some(worker),
            encoder: FrameEncoder::new(mode),
            bytes_out: 0,
            client_gone: false,
        }
    }

    /// Bytes read from the PTY so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Forwards chunks to `sink` until the stream ends or the sink fails.
    pub async fn forward<S: OutputSink>(&mut self, sink: &mut S) -> OutboundExit {
        while let Some(chunk) = self.rx.recv().await {
            if let Err(e) = self.deliver(sink, chunk).await {
                self.client_gone = true;
                return OutboundExit::ClientGone(e);
            }
        }
        if let Some(frame) = self.encoder.finish() {
            if let Err(e) = sink.send_output(frame).await {
                self.client_gone = true;
                return OutboundExit::ClientGone(e);
            }
        }
        OutboundExit::Ended(self.join_worker().await)
    }

    /// Drains what is left after teardown and joins the reader.
    ///
    /// Returns the reader's end, `None` if it did not finish within `limit`,
    /// together with the total bytes read.
    pub async fn finish<S: OutputSink>(
        mut self,
        sink: &mut S,
        limit: Duration,
    ) -> (Option<ReadEnd>, u64) {
        if self.worker.is_none() {
            return (Some(ReadEnd::Eof), self.bytes_out);
        }
        let drained = tokio::time::timeout(limit, async {
            while let Some(chunk) = self.rx.recv().await {
                if !self.client_gone && self.deliver(sink, chunk).await.is_err() {
                    self.client_gone = true;
                }
            }
            if !self.client_gone {
                if let Some(frame) = self.encoder.finish() {
                    let _ = sink.send_output(frame).await;
                }
            }
            self.join_worker().await
        })
        .await;
        (drained.ok(), self.bytes_out)
    }

    async fn deliver<S: OutputSink>(&mut self, sink: &mut S, chunk: Vec<u8>) -> Result<(), RelayError> {
        self.bytes_out += chunk.len() as u64;
        match self.encoder.encode(chunk) {
            Some(frame) => sink.send_output(frame).await,
            None => Ok(()),
        }
    }

    async fn join_worker(&mut self) -> ReadEnd {
        match self.worker.take() {
            Some(worker) => match worker.await {
                Ok(end) => end,
                Err(e) => ReadEnd::Failed(io::Error::other(e)),
            },
            None => ReadEnd::Eof,
        }
    }
}

fn read_loop<R: Read>(mut reader: R, chunk_size: usize, tx: mpsc::Sender<Vec<u8>>) -> ReadEnd {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return ReadEnd::Eof,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    return ReadEnd::Abandoned;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => return ReadEnd::Eof,
            Err(e) => return ReadEnd::Failed(e),
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Why the inbound pump stopped.
#[derive(Debug)]
pub enum InboundExit {
    /// The client disconnected or sent a close.
    Disconnected,
    /// The client channel reported an error.
    ReceiveFailed(RelayError),
    /// No client message within the idle timeout.
    IdleTimeout,
    /// The PTY rejected a write.
    WriteFailed(SessionError),
}

/// Client-to-PTY pump.
#[derive(Debug, Default)]
pub struct InboundPump {
    idle_timeout: Option<Duration>,
    bytes_in: u64,
}

impl InboundPump {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            bytes_in: 0,
        }
    }

    /// Bytes written to the PTY so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Writes client messages to `target` until the client goes away.
    pub async fn run<I, T>(&mut self, source: &mut I, target: &T) -> InboundExit
    where
        I: InputSource,
        T: PtyInput + ?Sized,
    {
        loop {
            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, source.next_input()).await {
                    Ok(next) => next,
                    Err(_) => return InboundExit::IdleTimeout,
                },
                None => source.next_input().await,
            };

            let data = match next {
                None => return InboundExit::Disconnected,
                Some(Err(e)) => return InboundExit::ReceiveFailed(e),
                Some(Ok(data)) => data,
            };
            if data.is_empty() {
                continue;
            }

            let len = data.len() as u64;
            if let Err(e) = target.write_input(data).await {
                return InboundExit::WriteFailed(e);
            }
            self.bytes_in += len;
        }
    }
}

// ============================================================================
// Relay
// ============================================================================

/// What ended a relay.
#[derive(Debug)]
pub enum RelayTrigger {
    /// The outbound pump finished first.
    Outbound(OutboundExit),
    /// The inbound pump finished first.
    Inbound(InboundExit),
}

/// Summary of one finished relay.
#[derive(Debug)]
pub struct RelayReport {
    pub trigger: RelayTrigger,
    /// What the relay's own close call did.
    pub close: CloseOutcome,
    /// How the blocking reader ended, `None` if it was still blocked.
    pub reader: Option<ReadEnd>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Runs both pumps for one session.
pub struct Relay {
    session: Arc<PtySession>,
    chunk_size: usize,
    frame_mode: FrameMode,
    idle_timeout: Option<Duration>,
    join_limit: Duration,
}

impl Relay {
    pub fn new(session: Arc<PtySession>, config: &TerminalConfig) -> Self {
        Self {
            session,
            chunk_size: config.read_chunk_size,
            frame_mode: config.frame_mode,
            idle_timeout: config.idle_timeout(),
            join_limit: config.close_grace() + READER_JOIN_SLACK,
        }
    }

    /// Relays until either side ends, then tears the session down.
    pub async fn run<S, I>(self, io: PtyIo, sink: &mut S, source: &mut I) -> RelayReport
    where
        S: OutputSink,
        I: InputSource,
    {
        let session_id = self.session.id().clone();
        let mut outbound = OutboundPump::spawn(io.reader, self.chunk_size, self.frame_mode);
        let mut inbound = InboundPump::new(self.idle_timeout);

        let (trigger, close, drained) = {
            let out = outbound.forward(sink);
            let inp = inbound.run(source, self.session.as_ref());
            tokio::pin!(out, inp);
            let trigger = tokio::select! {
                exit = &mut out => RelayTrigger::Outbound(exit),
                exit = &mut inp => RelayTrigger::Inbound(exit),
            };

            tracing::debug!(session_id = %session_id, trigger = ?trigger, "Relay pump finished");

            match trigger {
                RelayTrigger::Outbound(_) => (trigger, self.session.close().await, None),
                RelayTrigger::Inbound(_) => {
                    // The forwarder may be in the middle of a send; keep it
                    // running until the closed PTY ends the stream.
                    let (close, drained) = tokio::join!(
                        self.session.close(),
                        tokio::time::timeout(self.join_limit, &mut out)
                    );
                    (trigger, close, Some(drained))
                }
            }
        };

        let (reader, bytes_out) = match (&trigger, drained) {
            (RelayTrigger::Outbound(OutboundExit::Ended(end)), _) => {
                (Some(end.duplicate()), outbound.bytes_out())
            }
            (_, Some(Ok(OutboundExit::Ended(end)))) => (Some(end), outbound.bytes_out()),
            (_, Some(Err(_))) => (None, outbound.bytes_out()),
            _ => outbound.finish(sink, self.join_limit).await,
        };
        if reader.is_none() {
            tracing::warn!(session_id = %session_id, "PTY reader still blocked after teardown");
        }

        RelayReport {
            trigger,
            close,
            reader,
            bytes_in: inbound.bytes_in(),
            bytes_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::session::SessionState;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tokio::time::timeout;

    /// Records everything written to it; optionally fails after `fail_after` writes.
    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<u8>>,
        writes: Mutex<usize>,
        fail_after: Option<usize>,
    }

    impl PtyInput for Recorder {
        async fn write_input(&self, data: Bytes) -> Result<(), SessionError> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|limit| *writes >= limit) {
                return Err(SessionError::Closed("recorder".to_string()));
            }
            *writes += 1;
            self.data.lock().unwrap().extend_from_slice(&data);
            Ok(())
        }
    }

    /// Reader that fails with the given OS error after yielding `data`.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
        errno: i32,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::from_raw_os_error(self.errno)),
                n => Ok(n),
            }
        }
    }

    /// Sink that takes `delay` to accept each frame.
    struct SlowSink {
        delay: Duration,
        data: Vec<u8>,
    }

    impl OutputSink for SlowSink {
        async fn send_output(&mut self, frame: OutputFrame) -> Result<(), RelayError> {
            tokio::time::sleep(self.delay).await;
            self.data.extend_from_slice(frame.as_bytes());
            Ok(())
        }
    }

    fn sample_output() -> Vec<u8> {
        (0..5000u32).map(|i| (i * 31 % 251) as u8).collect()
    }

    async fn collect(mut rx: mpsc::Receiver<OutputFrame>) -> Vec<OutputFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn sh_config() -> TerminalConfig {
        TerminalConfig {
            shell: "/bin/sh".to_string(),
            login: false,
            ..TerminalConfig::default()
        }
    }

    #[test]
    fn test_complete_prefix_len() {
        assert_eq!(complete_prefix_len(b""), 0);
        assert_eq!(complete_prefix_len(b"abc"), 3);

        let euro = "€".as_bytes(); // 3 bytes
        assert_eq!(complete_prefix_len(&euro[..1]), 0);
        assert_eq!(complete_prefix_len(&euro[..2]), 0);
        assert_eq!(complete_prefix_len(euro), 3);

        let mut buf = b"ab".to_vec();
        buf.extend_from_slice(&"😀".as_bytes()[..3]);
        assert_eq!(complete_prefix_len(&buf), 2);
    }

    #[test]
    fn test_text_encoder_never_splits_characters() {
        let text = "héllo wörld € 😀 done";
        let bytes = text.as_bytes();

        for split in 0..=bytes.len() {
            let mut encoder = FrameEncoder::new(FrameMode::Text);
            let mut out = String::new();
            for chunk in [&bytes[..split], &bytes[split..]] {
                if let Some(OutputFrame::Text(t)) = encoder.encode(chunk.to_vec()) {
                    assert!(!t.contains('\u{FFFD}'), "split at {split} produced {t:?}");
                    out.push_str(&t);
                }
            }
            assert!(encoder.finish().is_none());
            assert_eq!(out, text);
        }
    }

    #[test]
    fn test_text_encoder_flushes_dangling_tail() {
        let mut encoder = FrameEncoder::new(FrameMode::Text);
        assert_eq!(
            encoder.encode(b"ok\xE2\x82".to_vec()),
            Some(OutputFrame::Text("ok".to_string()))
        );
        assert_eq!(
            encoder.finish(),
            Some(OutputFrame::Text("\u{FFFD}".to_string()))
        );
    }

    #[test]
    fn test_binary_encoder_passes_bytes_through() {
        let mut encoder = FrameEncoder::new(FrameMode::Binary);
        let frame = encoder.encode(vec![0xff, 0x00, 0xe2]).unwrap();
        assert_eq!(frame.as_bytes(), &[0xff, 0x00, 0xe2]);
        assert!(encoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_outbound_preserves_bytes_and_order() {
        let data = sample_output();

        for chunk_size in [1usize, 7, 1024] {
            let (mut tx, rx) = mpsc::channel(8);
            let collector = tokio::spawn(collect(rx));

            let mut pump = OutboundPump::spawn(Cursor::new(data.clone()), chunk_size, FrameMode::Binary);
            let exit = pump.forward(&mut tx).await;
            drop(tx);

            assert!(matches!(exit, OutboundExit::Ended(ReadEnd::Eof)));
            assert_eq!(pump.bytes_out(), data.len() as u64);

            let frames = collector.await.unwrap();
            assert!(frames.iter().all(|f| f.as_bytes().len() <= chunk_size));
            let joined: Vec<u8> = frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect();
            assert_eq!(joined, data, "chunk size {chunk_size}");
        }
    }

    #[tokio::test]
    async fn test_outbound_text_mode_reassembles_utf8() {
        let text = "λ → ✓ ".repeat(200);
        let (mut tx, rx) = mpsc::channel(8);
        let collector = tokio::spawn(collect(rx));

        let mut pump = OutboundPump::spawn(Cursor::new(text.clone().into_bytes()), 5, FrameMode::Text);
        pump.forward(&mut tx).await;
        drop(tx);

        let frames = collector.await.unwrap();
        let joined: String = frames
            .into_iter()
            .map(|f| match f {
                OutputFrame::Text(t) => t,
                OutputFrame::Binary(_) => panic!("binary frame in text mode"),
            })
            .collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn test_outbound_eio_is_end_of_stream() {
        let reader = FailingReader {
            data: Cursor::new(b"last words".to_vec()),
            errno: nix::libc::EIO,
        };
        let (mut tx, mut rx) = mpsc::channel(8);

        let mut pump = OutboundPump::spawn(reader, 64, FrameMode::Binary);
        let exit = pump.forward(&mut tx).await;

        assert!(matches!(exit, OutboundExit::Ended(ReadEnd::Eof)));
        assert_eq!(rx.recv().await.unwrap().as_bytes(), b"last words");
    }

    #[tokio::test]
    async fn test_outbound_read_error_is_reported() {
        let reader = FailingReader {
            data: Cursor::new(Vec::new()),
            errno: nix::libc::EBADF,
        };
        let (mut tx, _rx) = mpsc::channel(8);

        let mut pump = OutboundPump::spawn(reader, 64, FrameMode::Binary);
        let exit = pump.forward(&mut tx).await;

        assert!(matches!(exit, OutboundExit::Ended(ReadEnd::Failed(_))));
    }

    #[tokio::test]
    async fn test_outbound_stops_when_client_gone() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);

        let mut pump = OutboundPump::spawn(Cursor::new(sample_output()), 16, FrameMode::Binary);
        let exit = pump.forward(&mut tx).await;

        assert!(matches!(exit, OutboundExit::ClientGone(_)));
    }

    #[tokio::test]
    async fn test_inbound_writes_in_order() {
        let recorder = Recorder::default();
        let (tx, mut rx) = mpsc::channel(16);
        let messages: Vec<&[u8]> = vec![b"ls", b" -la", b"", b"\n", "é".as_bytes()];
        for message in &messages {
            tx.send(Bytes::copy_from_slice(message)).await.unwrap();
        }
        drop(tx);

        let mut pump = InboundPump::new(None);
        let exit = pump.run(&mut rx, &recorder).await;

        assert!(matches!(exit, InboundExit::Disconnected));
        let expected: Vec<u8> = messages.concat();
        assert_eq!(*recorder.data.lock().unwrap(), expected);
        assert_eq!(pump.bytes_in(), expected.len() as u64);
        // Empty messages are not forwarded.
        assert_eq!(*recorder.writes.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_inbound_stops_on_write_failure() {
        let recorder = Recorder {
            fail_after: Some(1),
            ..Recorder::default()
        };
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(Bytes::from_static(b"a")).await.unwrap();
        tx.send(Bytes::from_static(b"b")).await.unwrap();

        let mut pump = InboundPump::new(None);
        let exit = pump.run(&mut rx, &recorder).await;

        assert!(matches!(exit, InboundExit::WriteFailed(SessionError::Closed(_))));
        assert_eq!(*recorder.data.lock().unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_inbound_idle_timeout() {
        let recorder = Recorder::default();
        let (_tx, mut rx) = mpsc::channel::<Bytes>(1);

        let mut pump = InboundPump::new(Some(Duration::from_millis(50)));
        let exit = timeout(Duration::from_secs(2), pump.run(&mut rx, &recorder))
            .await
            .unwrap();

        assert!(matches!(exit, InboundExit::IdleTimeout));
    }

    #[tokio::test]
    async fn test_relay_client_disconnect_closes_session() {
        let config = sh_config();
        let (session, io) = PtySession::open(&config, None).unwrap();

        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (mut out_tx, mut out_rx) = mpsc::channel(64);

        let relay = Relay::new(Arc::clone(&session), &config);
        let relay = tokio::spawn(async move { relay.run(io, &mut out_tx, &mut in_rx).await });

        in_tx
            .send(Bytes::from_static(b"echo relay_marker_$((40+2))\n"))
            .await
            .unwrap();

        let mut seen = String::new();
        timeout(Duration::from_secs(5), async {
            while let Some(frame) = out_rx.recv().await {
                seen.push_str(&String::from_utf8_lossy(frame.as_bytes()));
                if seen.contains("relay_marker_42") {
                    break;
                }
            }
        })
        .await
        .expect("marker never arrived");

        drop(in_tx);
        // Keep draining so the forwarder never blocks on a full channel.
        let drain = tokio::spawn(async move { while out_rx.recv().await.is_some() {} });

        let report = timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert!(matches!(report.trigger, RelayTrigger::Inbound(InboundExit::Disconnected)));
        assert!(report.close.is_released());
        assert!(report.reader.is_some());
        assert!(report.bytes_in > 0);
        assert!(report.bytes_out > 0);
        assert_eq!(session.close().await, CloseOutcome::AlreadyClosed);

        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_shell_exit_ends_relay() {
        let config = sh_config();
        let (session, io) = PtySession::open(&config, None).unwrap();

        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (mut out_tx, mut out_rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while out_rx.recv().await.is_some() {} });

        in_tx.send(Bytes::from_static(b"exit 3\n")).await.unwrap();

        let report = timeout(
            Duration::from_secs(5),
            Relay::new(Arc::clone(&session), &config).run(io, &mut out_tx, &mut in_rx),
        )
        .await
        .unwrap();
        drop(out_tx);

        assert!(matches!(
            report.trigger,
            RelayTrigger::Outbound(OutboundExit::Ended(ReadEnd::Eof))
        ));
        assert!(matches!(
            report.close,
            CloseOutcome::Released { exit_code: Some(3), .. }
        ));
        assert!(!session.is_active());

        // Input arriving after teardown never reaches the shell.
        let late = session.write(Bytes::from_static(b"echo late\n")).await;
        assert!(matches!(late, Err(SessionError::Closed(_))));

        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_delivers_final_output_before_close() {
        let config = sh_config();
        let (session, io) = PtySession::open(&config, None).unwrap();

        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (mut out_tx, out_rx) = mpsc::channel(64);
        let collector = tokio::spawn(collect(out_rx));

        in_tx
            .send(Bytes::from_static(b"echo bye-$((1+1)); exit\n"))
            .await
            .unwrap();

        let report = timeout(
            Duration::from_secs(5),
            Relay::new(Arc::clone(&session), &config).run(io, &mut out_tx, &mut in_rx),
        )
        .await
        .unwrap();
        drop(out_tx);

        assert!(matches!(
            report.trigger,
            RelayTrigger::Outbound(OutboundExit::Ended(ReadEnd::Eof))
        ));
        assert_eq!(session.state(), SessionState::Closed);

        let output: String = collector
            .await
            .unwrap()
            .iter()
            .map(|f| String::from_utf8_lossy(f.as_bytes()).into_owned())
            .collect();
        assert!(output.contains("bye-2"), "final output lost: {output:?}");
    }

    #[tokio::test]
    async fn test_relay_ends_while_background_job_holds_pty() {
        let config = sh_config();
        let (session, io) = PtySession::open(&config, None).unwrap();

        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (mut out_tx, mut out_rx) = mpsc::channel(64);

        let relay = Relay::new(Arc::clone(&session), &config);
        let relay = tokio::spawn(async move { relay.run(io, &mut out_tx, &mut in_rx).await });

        in_tx
            .send(Bytes::from_static(b"sleep 30 & echo bg_$((1+1))_started\n"))
            .await
            .unwrap();

        let mut seen = String::new();
        timeout(Duration::from_secs(5), async {
            while let Some(frame) = out_rx.recv().await {
                seen.push_str(&String::from_utf8_lossy(frame.as_bytes()));
                if seen.contains("bg_2_started") {
                    break;
                }
            }
        })
        .await
        .expect("background job never started");

        drop(in_tx);
        let drain = tokio::spawn(async move { while out_rx.recv().await.is_some() {} });

        let report = timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay hung behind the background job")
            .unwrap();
        assert!(matches!(report.trigger, RelayTrigger::Inbound(InboundExit::Disconnected)));
        assert!(report.close.is_released());
        assert!(
            matches!(report.reader, Some(ReadEnd::Eof)),
            "reader still blocked: {:?}",
            report.reader
        );

        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_idle_timeout_keeps_in_flight_output() {
        let config = TerminalConfig {
            read_chunk_size: 100,
            idle_timeout_secs: 1,
            frame_mode: FrameMode::Binary,
            ..sh_config()
        };
        let (session, _pty) = PtySession::open(&config, None).unwrap();
        let data = sample_output()[..1000].to_vec();
        let io = PtyIo {
            reader: Box::new(Cursor::new(data.clone())),
        };

        // Delivery takes about two seconds, so the idle timeout fires mid-send.
        let mut sink = SlowSink {
            delay: Duration::from_millis(200),
            data: Vec::new(),
        };
        let (_in_tx, mut in_rx) = mpsc::channel::<Bytes>(1);

        let report = timeout(
            Duration::from_secs(10),
            Relay::new(Arc::clone(&session), &config).run(io, &mut sink, &mut in_rx),
        )
        .await
        .unwrap();

        assert!(matches!(report.trigger, RelayTrigger::Inbound(InboundExit::IdleTimeout)));
        assert!(matches!(report.reader, Some(ReadEnd::Eof)));
        assert_eq!(report.bytes_out, data.len() as u64);
        assert_eq!(sink.data, data);
    }
}
