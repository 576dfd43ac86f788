// src/exec/mux.rs

//! Stream multiplexer for one job.
//!
//! A [`StreamSet`] owns the child's pipes (or any other async streams) and,
//! per call to [`StreamSet::poll_once`], waits a bounded time for a stream to
//! become ready and performs a single bounded read or write on each ready
//! stream. Output is
//! handed to an [`OutputChannel`], which keeps a capture buffer and forwards
//! a copy to an optional tee sink.

use std::fmt;
use std::future::pending;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

/// Upper bound on how long the final drain may keep reading one stream that
/// never reaches EOF but keeps producing output.
const DRAIN_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Stdin,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Stdin => write!(f, "stdin"),
        }
    }
}

/// What `poll_once` did to one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Read { stream: StreamKind, bytes: usize },
    Wrote { bytes: usize },
    /// The stream reached end-of-file (or failed) and is no longer polled.
    Closed(StreamKind),
    /// Nothing became ready within the wait.
    Idle,
}

/// Destination for one output stream: optional capture plus optional tee.
pub struct OutputChannel {
    kind: StreamKind,
    capture: Option<Vec<u8>>,
    tee: Option<Box<dyn Write + Send>>,
    flush_each: bool,
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputChannel")
            .field("kind", &self.kind)
            .field("captured", &self.capture.as_ref().map(Vec::len))
            .field("tee", &self.tee.is_some())
            .field("flush_each", &self.flush_each)
            .finish()
    }
}

impl OutputChannel {
    pub fn new(
        kind: StreamKind,
        capture: bool,
        tee: Option<Box<dyn Write + Send>>,
        flush_each: bool,
    ) -> Self {
        Self {
            kind,
            capture: capture.then(Vec::new),
            tee,
            flush_each,
        }
    }

    /// Append to the capture buffer and forward verbatim to the tee.
    ///
    /// A failing tee is logged and detached; the capture is unaffected.
    pub fn deliver(&mut self, data: &[u8]) {
        if let Some(buf) = self.capture.as_mut() {
            buf.extend_from_slice(data);
        }

        if let Some(tee) = self.tee.as_mut() {
            let mut res = tee.write_all(data);
            if res.is_ok() && self.flush_each {
                res = tee.flush();
            }
            if let Err(e) = res {
                warn!(stream = %self.kind, error = %e, "tee write failed; detaching tee");
                self.tee = None;
            }
        }
    }

    pub fn flush_tee(&mut self) {
        if let Some(tee) = self.tee.as_mut() {
            if let Err(e) = tee.flush() {
                warn!(stream = %self.kind, error = %e, "tee flush failed");
            }
        }
    }

    pub fn captured(&self) -> Option<&[u8]> {
        self.capture.as_deref()
    }

    pub fn take_capture(&mut self) -> Option<Vec<u8>> {
        self.capture.take()
    }
}

/// The pollable streams of one job.
///
/// `O` and `E` are the readable ends of the child's stdout/stderr, `I` the
/// writable end of its stdin. A stream is dropped from the set once it hits
/// EOF (outputs) or the payload is fully written (input).
#[derive(Debug)]
pub struct StreamSet<O, E, I> {
    stdout: Option<O>,
    stderr: Option<E>,
    stdin: Option<I>,
    payload: Vec<u8>,
    written: usize,
    write_chunk: usize,
    out_buf: Vec<u8>,
    err_buf: Vec<u8>,
}

impl<O, E, I> StreamSet<O, E, I>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    I: AsyncWrite + Unpin,
{
    pub fn new(
        stdout: Option<O>,
        stderr: Option<E>,
        stdin: Option<I>,
        payload: Vec<u8>,
        read_chunk: usize,
        write_chunk: usize,
    ) -> Self {
        Self {
            stdout,
            stderr,
            stdin,
            payload,
            written: 0,
            write_chunk: write_chunk.max(1),
            out_buf: vec![0; read_chunk.max(1)],
            err_buf: vec![0; read_chunk.max(1)],
        }
    }

    /// True once every stream has been closed.
    pub fn is_idle(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none() && self.stdin.is_none()
    }

    /// Bytes of the stdin payload not yet written.
    pub fn pending_input(&self) -> usize {
        self.payload.len() - self.written
    }

    fn is_open(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Stdout => self.stdout.is_some(),
            StreamKind::Stderr => self.stderr.is_some(),
            StreamKind::Stdin => self.stdin.is_some(),
        }
    }

    /// Wait up to `wait` for a stream to become ready, then perform one
    /// bounded operation on every stream that is ready.
    ///
    /// The first ready stream ends the wait; the others are serviced only if
    /// they can make progress without waiting. Returns one event per stream
    /// serviced, or a single [`StreamEvent::Idle`] if nothing became ready.
    ///
    /// Cancel safe: dropping the returned future never loses bytes. Every
    /// operation that completed has already reached its channel or advanced
    /// the stdin payload; only its event is not reported.
    pub async fn poll_once(
        &mut self,
        wait: Duration,
        out: &mut OutputChannel,
        err: &mut OutputChannel,
    ) -> Vec<StreamEvent> {
        if self.is_idle() {
            sleep(wait).await;
            return vec![StreamEvent::Idle];
        }

        let Some((serviced, first)) = self.service_first(wait, out, err).await else {
            return vec![StreamEvent::Idle];
        };

        let mut events = vec![first];
        for kind in [StreamKind::Stdout, StreamKind::Stderr, StreamKind::Stdin] {
            if kind == serviced || !self.is_open(kind) {
                continue;
            }
            if let Ok(event) = timeout(Duration::ZERO, self.service(kind, out, err)).await {
                events.push(event);
            }
        }
        events
    }

    /// One operation on whichever stream is ready first, or `None` after
    /// `wait`.
    async fn service_first(
        &mut self,
        wait: Duration,
        out: &mut OutputChannel,
        err: &mut OutputChannel,
    ) -> Option<(StreamKind, StreamEvent)> {
        let Self {
            stdout,
            stderr,
            stdin,
            payload,
            written,
            write_chunk,
            out_buf,
            err_buf,
        } = self;
        let end = (*written + *write_chunk).min(payload.len());
        let chunk = &payload[*written..end];
        let chunk_len = chunk.len();

        tokio::select! {
            res = read_some(stdout.as_mut(), &mut out_buf[..]) => {
                Some((StreamKind::Stdout, on_read(StreamKind::Stdout, res, stdout, &out_buf[..], out)))
            }
            res = read_some(stderr.as_mut(), &mut err_buf[..]) => {
                Some((StreamKind::Stderr, on_read(StreamKind::Stderr, res, stderr, &err_buf[..], err)))
            }
            res = write_some(stdin.as_mut(), chunk) => {
                let event = on_write(res, chunk_len, stdin, written, payload.len()).await;
                Some((StreamKind::Stdin, event))
            }
            _ = sleep(wait) => None,
        }
    }

    /// One operation on `kind`, waiting until it is ready.
    async fn service(
        &mut self,
        kind: StreamKind,
        out: &mut OutputChannel,
        err: &mut OutputChannel,
    ) -> StreamEvent {
        match kind {
            StreamKind::Stdout => {
                let res = read_some(self.stdout.as_mut(), &mut self.out_buf[..]).await;
                on_read(kind, res, &mut self.stdout, &self.out_buf[..], out)
            }
            StreamKind::Stderr => {
                let res = read_some(self.stderr.as_mut(), &mut self.err_buf[..]).await;
                on_read(kind, res, &mut self.stderr, &self.err_buf[..], err)
            }
            StreamKind::Stdin => {
                let end = (self.written + self.write_chunk).min(self.payload.len());
                let chunk = &self.payload[self.written..end];
                let chunk_len = chunk.len();
                let res = write_some(self.stdin.as_mut(), chunk).await;
                on_write(res, chunk_len, &mut self.stdin, &mut self.written, self.payload.len()).await
            }
        }
    }

    /// Consume whatever output is still buffered.
    ///
    /// Closes stdin, then reads each output stream until EOF or until it
    /// stays silent for `idle`. Returns the number of bytes drained.
    pub async fn drain(
        &mut self,
        idle: Duration,
        out: &mut OutputChannel,
        err: &mut OutputChannel,
    ) -> usize {
        close_input(&mut self.stdin).await;

        let mut total = 0;
        if let Some(mut stream) = self.stdout.take() {
            total += drain_stream(StreamKind::Stdout, &mut stream, &mut self.out_buf, idle, out).await;
        }
        if let Some(mut stream) = self.stderr.take() {
            total += drain_stream(StreamKind::Stderr, &mut stream, &mut self.err_buf, idle, err).await;
        }
        total
    }
}

async fn read_some<R: AsyncRead + Unpin>(stream: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => pending().await,
    }
}

async fn write_some<W: AsyncWrite + Unpin>(stream: Option<&mut W>, data: &[u8]) -> io::Result<usize> {
    match stream {
        Some(_) if data.is_empty() => Ok(0),
        Some(stream) => stream.write(data).await,
        None => pending().await,
    }
}

fn on_read<R>(
    kind: StreamKind,
    res: io::Result<usize>,
    stream: &mut Option<R>,
    buf: &[u8],
    channel: &mut OutputChannel,
) -> StreamEvent {
    match res {
        Ok(0) => {
            trace!(stream = %kind, "end of stream");
            *stream = None;
            StreamEvent::Closed(kind)
        }
        Ok(n) => {
            channel.deliver(&buf[..n]);
            StreamEvent::Read { stream: kind, bytes: n }
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => StreamEvent::Idle,
        Err(e) => {
            warn!(stream = %kind, error = %e, "read failed; no longer polling stream");
            *stream = None;
            StreamEvent::Closed(kind)
        }
    }
}

async fn on_write<W: AsyncWrite + Unpin>(
    res: io::Result<usize>,
    chunk_len: usize,
    stdin: &mut Option<W>,
    written: &mut usize,
    total: usize,
) -> StreamEvent {
    match res {
        Ok(n) if n > 0 || chunk_len == 0 => {
            *written += n;
            trace!(bytes = n, remaining = total - *written, "stdin write");
            if *written >= total {
                close_input(stdin).await;
                StreamEvent::Closed(StreamKind::Stdin)
            } else {
                StreamEvent::Wrote { bytes: n }
            }
        }
        Ok(_) => {
            debug!("stdin accepted no bytes; closing");
            close_input(stdin).await;
            StreamEvent::Closed(StreamKind::Stdin)
        }
        Err(e) => {
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!(remaining = total - *written, "child closed stdin early");
            } else {
                warn!(error = %e, "stdin write failed");
            }
            *stdin = None;
            StreamEvent::Closed(StreamKind::Stdin)
        }
    }
}

async fn close_input<W: AsyncWrite + Unpin>(stdin: &mut Option<W>) {
    if let Some(mut w) = stdin.take() {
        if let Err(e) = w.shutdown().await {
            debug!(error = %e, "stdin shutdown failed");
        }
    }
}

async fn drain_stream<R: AsyncRead + Unpin>(
    kind: StreamKind,
    stream: &mut R,
    buf: &mut [u8],
    idle: Duration,
    channel: &mut OutputChannel,
) -> usize {
    let started = Instant::now();
    let mut total = 0;

    while started.elapsed() < DRAIN_LIMIT {
        match timeout(idle, stream.read(buf)).await {
            Ok(Ok(0)) => return total,
            Ok(Ok(n)) => {
                channel.deliver(&buf[..n]);
                total += n;
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
            Ok(Err(e)) => {
                warn!(stream = %kind, error = %e, "read failed during drain");
                return total;
            }
            Err(_) => {
                debug!(stream = %kind, "stream still open after drain window; giving up");
                return total;
            }
        }
    }

    warn!(stream = %kind, drained = total, "drain limit reached; discarding further output");
    total
}
