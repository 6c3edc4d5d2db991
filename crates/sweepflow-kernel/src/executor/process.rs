//! Script runner backed by OS processes

use super::{Invocation, ScriptOutcome, ScriptRunner};
use crate::error::NodeError;
use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;

/// Runs invocations as child processes with `tokio::process`
///
/// stdin is closed. stdout and stderr are drained while the child runs and
/// only their last `tail_bytes` bytes are retained.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tail_bytes: usize,
}

impl ProcessRunner {
    /// Runner keeping `tail_bytes` of each output stream
    pub fn new(tail_bytes: usize) -> Self {
        Self { tail_bytes }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TAIL_BYTES)
    }
}

#[async_trait::async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ScriptOutcome, NodeError> {
        let launch_error = |e: io::Error| NodeError::Launch {
            program: invocation.program.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, stdout, stderr) = tokio::try_join!(
            child.wait(),
            drain(stdout, self.tail_bytes),
            drain(stderr, self.tail_bytes),
        )
        .map_err(launch_error)?;

        debug!(
            rule = %invocation.rule,
            status = ?status.code(),
            stdout_bytes = stdout.seen(),
            stderr_bytes = stderr.seen(),
            "process exited"
        );

        Ok(ScriptOutcome {
            exit_code: status.code(),
            stdout_tail: stdout.into_string(),
            stderr_tail: stderr.into_string(),
        })
    }
}

/// Read `reader` to the end, keeping only its last `max` bytes
async fn drain<R>(reader: Option<R>, max: usize) -> io::Result<TailBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(max);
    let Some(mut reader) = reader else {
        return Ok(tail);
    };
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(tail);
        }
        tail.push(&chunk[..n]);
    }
}

/// Ring of the most recent bytes of a stream
#[derive(Debug)]
pub(crate) struct TailBuffer {
    bytes: VecDeque<u8>,
    max: usize,
    seen: usize,
}

impl TailBuffer {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max.min(READ_CHUNK)),
            max,
            seen: 0,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.seen += data.len();
        let keep = &data[data.len().saturating_sub(self.max)..];
        let overflow = (self.bytes.len() + keep.len()).saturating_sub(self.max);
        self.bytes.drain(..overflow);
        self.bytes.extend(keep);
    }

    /// Total bytes pushed, including discarded ones
    pub(crate) fn seen(&self) -> usize {
        self.seen
    }

    /// Retained bytes, lossily decoded
    pub(crate) fn into_string(self) -> String {
        let bytes: Vec<u8> = self.bytes.into();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
