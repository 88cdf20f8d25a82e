/// Bounded output collection for sandboxed processes
///
/// Each stream is drained on its own thread into a capped buffer. Once a
/// stream hits its cap the reader stops and drops the pipe, so a guest
/// that keeps printing dies on EPIPE instead of filling host memory.
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

/// Output integrity classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    Complete,
    TruncatedByJudgeLimit,
    /// The stream did not reach EOF before the collection deadline
    CollectionTimeout,
    ReadError,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByJudgeLimit => write!(f, "truncated_by_judge_limit"),
            OutputIntegrity::CollectionTimeout => write!(f, "collection_timeout"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

impl Default for OutputIntegrity {
    fn default() -> Self {
        OutputIntegrity::Complete
    }
}

/// Output limits configuration
#[derive(Debug, Clone, Copy)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            stdout_limit: 1024 * 1024,
            stderr_limit: 64 * 1024,
        }
    }
}

/// One collected stream
#[derive(Debug, Clone, Default)]
pub struct StreamOutput {
    pub data: Vec<u8>,
    pub integrity: OutputIntegrity,
}

impl StreamOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Output collection result
#[derive(Debug, Clone, Default)]
pub struct OutputResult {
    pub stdout: StreamOutput,
    pub stderr: StreamOutput,
}

impl OutputResult {
    /// Worst integrity across both streams
    pub fn combined_integrity(&self) -> OutputIntegrity {
        let states = [self.stdout.integrity, self.stderr.integrity];
        for candidate in [
            OutputIntegrity::ReadError,
            OutputIntegrity::TruncatedByJudgeLimit,
            OutputIntegrity::CollectionTimeout,
        ] {
            if states.contains(&candidate) {
                return candidate;
            }
        }
        OutputIntegrity::Complete
    }
}

/// Collectors that are draining a child's pipes
pub struct PendingOutput {
    stdout_rx: Option<Receiver<StreamOutput>>,
    stderr_rx: Option<Receiver<StreamOutput>>,
}

/// Output collector with bounded collection
pub struct OutputCollector {
    limits: OutputLimits,
}

impl OutputCollector {
    pub fn new(limits: OutputLimits) -> Self {
        OutputCollector { limits }
    }

    /// Start draining both streams. Must be called before waiting on the
    /// child, otherwise a chatty guest blocks on a full pipe.
    pub fn start<O, E>(&self, stdout: Option<O>, stderr: Option<E>) -> PendingOutput
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        PendingOutput {
            stdout_rx: stdout.map(|s| spawn_reader(s, self.limits.stdout_limit)),
            stderr_rx: stderr.map(|s| spawn_reader(s, self.limits.stderr_limit)),
        }
    }
}

impl PendingOutput {
    /// Wait for both readers, giving up at `deadline` from now. A reader
    /// still blocked at the deadline is abandoned and its stream marked
    /// `CollectionTimeout`.
    pub fn finish(self, deadline: Duration) -> OutputResult {
        let started = Instant::now();
        let stdout = receive(self.stdout_rx, started, deadline);
        let stderr = receive(self.stderr_rx, started, deadline);
        OutputResult { stdout, stderr }
    }
}

fn receive(
    rx: Option<Receiver<StreamOutput>>,
    started: Instant,
    deadline: Duration,
) -> StreamOutput {
    let Some(rx) = rx else {
        return StreamOutput::default();
    };
    let remaining = deadline.saturating_sub(started.elapsed());
    match rx.recv_timeout(remaining) {
        Ok(output) => output,
        Err(RecvTimeoutError::Timeout) => StreamOutput {
            data: Vec::new(),
            integrity: OutputIntegrity::CollectionTimeout,
        },
        Err(RecvTimeoutError::Disconnected) => StreamOutput {
            data: Vec::new(),
            integrity: OutputIntegrity::ReadError,
        },
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<StreamOutput> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(collect_stream(stream, limit));
    });
    rx
}

/// Collect from a single stream with limit
fn collect_stream<R: Read>(mut stream: R, limit: usize) -> StreamOutput {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if buffer.len() + n > limit {
                    let remaining = limit - buffer.len();
                    buffer.extend_from_slice(&chunk[..remaining]);
                    integrity = OutputIntegrity::TruncatedByJudgeLimit;
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => {
                integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    StreamOutput {
        data: buffer,
        integrity,
    }
}
