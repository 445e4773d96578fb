//! Stream multiplexer between the VM's byte-oriented stdio hooks and the host
//!
//! - stdin: pulled one byte at a time from an `InputSource`; closed by default.
//! - stdout: buffered, flushed on `\n` or once `STDOUT_FLUSH_THRESHOLD` bytes
//!   are pending.
//! - stderr: forwarded byte by byte.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// stdout is flushed once this many bytes are buffered
pub const STDOUT_FLUSH_THRESHOLD: usize = 128;

/// Supplies stdin bytes to the VM; `None` means end of input
pub trait InputSource: Send {
    fn read_byte(&mut self) -> Option<u8>;
}

impl<F> InputSource for F
where
    F: FnMut() -> Option<u8> + Send,
{
    fn read_byte(&mut self) -> Option<u8> {
        self()
    }
}

/// Always-closed stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosedInput;

impl InputSource for ClosedInput {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }
}

/// stdin fed from a fixed buffer
#[derive(Debug, Default, Clone)]
pub struct BytesInput(VecDeque<u8>);

impl BytesInput {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into())
    }
}

impl InputSource for BytesInput {
    fn read_byte(&mut self) -> Option<u8> {
        self.0.pop_front()
    }
}

/// Receives output chunks from the multiplexer
pub trait OutputSink: Send {
    fn write(&mut self, bytes: &[u8]);
}

impl<F> OutputSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn write(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Captures every chunk written to it; clones share the same storage.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunks in the order they were delivered
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.lock().clone()
    }

    /// All delivered bytes, concatenated
    pub fn contents(&self) -> Vec<u8> {
        self.lock().concat()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) {
        self.lock().push(bytes.to_vec());
    }
}

/// Forwards to the host process stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStdout;

impl OutputSink for ProcessStdout {
    fn write(&mut self, bytes: &[u8]) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }
}

/// Forwards to the host process stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStderr;

impl OutputSink for ProcessStderr {
    fn write(&mut self, bytes: &[u8]) {
        let _ = std::io::stderr().lock().write_all(bytes);
    }
}

struct StdoutState {
    sink: Box<dyn OutputSink>,
    buffer: Vec<u8>,
}

impl StdoutState {
    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.sink.write(&self.buffer);
            self.buffer.clear();
        }
    }
}

/// Routes the VM's stdin/stdout/stderr hooks to host sources and sinks.
pub struct StreamMultiplexer {
    stdin: Mutex<Box<dyn InputSource>>,
    stdout: Mutex<StdoutState>,
    stderr: Mutex<Box<dyn OutputSink>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StreamMultiplexer {
    /// Closed stdin; stdout and stderr go to the host process.
    pub fn new() -> Self {
        Self::with_sinks(ProcessStdout, ProcessStderr)
    }

    pub fn with_sinks(stdout: impl OutputSink + 'static, stderr: impl OutputSink + 'static) -> Self {
        Self {
            stdin: Mutex::new(Box::new(ClosedInput)),
            stdout: Mutex::new(StdoutState {
                sink: Box::new(stdout),
                buffer: Vec::with_capacity(STDOUT_FLUSH_THRESHOLD),
            }),
            stderr: Mutex::new(Box::new(stderr)),
        }
    }

    pub fn set_stdin(&self, source: impl InputSource + 'static) {
        *lock(&self.stdin) = Box::new(source);
    }

    /// Replace the stdout sink; a partial line goes to the old sink first.
    pub fn set_stdout(&self, sink: impl OutputSink + 'static) {
        let mut state = lock(&self.stdout);
        state.flush();
        state.sink = Box::new(sink);
    }

    pub fn set_stderr(&self, sink: impl OutputSink + 'static) {
        *lock(&self.stderr) = Box::new(sink);
    }

    /// VM hook: next stdin byte, `None` at end of input
    pub fn read_stdin(&self) -> Option<u8> {
        lock(&self.stdin).read_byte()
    }

    /// VM hook: one stdout byte
    pub fn write_stdout(&self, byte: u8) {
        let mut state = lock(&self.stdout);
        state.buffer.push(byte);
        if byte == b'\n' || state.buffer.len() >= STDOUT_FLUSH_THRESHOLD {
            state.flush();
        }
    }

    /// VM hook: one stderr byte, forwarded immediately
    pub fn write_stderr(&self, byte: u8) {
        lock(&self.stderr).write(&[byte]);
    }

    /// Hand any partial stdout line to the sink
    pub fn flush_stdout(&self) {
        lock(&self.stdout).flush();
    }

    /// Bytes waiting for a newline or the threshold
    pub fn pending_stdout(&self) -> Vec<u8> {
        lock(&self.stdout).buffer.clone()
    }
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("pending_stdout", &lock(&self.stdout).buffer.len())
            .finish_non_exhaustive()
    }
}
