use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use plotwise_common::config::SandboxConfig;
use plotwise_common::ids::ExecutionId;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::{sanitize, CodeSandbox, ExecutionOutcome, SandboxError};

const DATA_FILE: &str = "data.csv";
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Runs each program in a fresh interpreter process.
pub struct SubprocessSandbox {
    config: SandboxConfig,
    /// Source prepended to every program, after placeholder substitution.
    prelude: Option<String>,
}

/// Per-execution working directory, removed when dropped.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create(id: ExecutionId) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("plotwise-exec-{}", id));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

/// Keeps only the last `max_bytes` written to it.
struct TailBuffer {
    buffer: VecDeque<u8>,
    max_bytes: usize,
    truncated: bool,
}

impl TailBuffer {
    fn new(max_bytes: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            max_bytes,
            truncated: false,
        }
    }

    fn extend(&mut self, data: &[u8]) {
        if self.max_bytes == 0 {
            return;
        }

        if data.len() >= self.max_bytes {
            self.truncated |= data.len() > self.max_bytes || !self.buffer.is_empty();
            self.buffer.clear();
            self.buffer
                .extend(data[data.len() - self.max_bytes..].iter().copied());
            return;
        }

        let overflow = (self.buffer.len() + data.len()).saturating_sub(self.max_bytes);
        if overflow > 0 {
            self.truncated = true;
            self.buffer.drain(0..overflow);
        }
        self.buffer.extend(data.iter().copied());
    }

    /// The kept bytes. After a cut, leading UTF-8 continuation bytes of a
    /// split character are dropped so the tail starts on a char boundary.
    fn into_vec(self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.buffer.into_iter().collect();
        if self.truncated {
            let partial = bytes
                .iter()
                .take(3)
                .take_while(|b| (**b & 0xC0) == 0x80)
                .count();
            bytes.drain(..partial);
        }
        bytes
    }
}

async fn read_stream_tail<R>(mut reader: R, max_bytes: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = TailBuffer::new(max_bytes);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend(&chunk[..n]);
    }

    Ok(buffer.into_vec())
}

/// Collect a reader task's output. Once the process has exited, a stream still
/// held open (by a background child, say) is given `OUTPUT_GRACE` and then dropped.
async fn join_output(
    mut handle: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    label: &str,
) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(err))) => {
            tracing::warn!(stream = label, error = %err, "Failed to read sandbox output");
            Vec::new()
        }
        Ok(Err(err)) => {
            tracing::warn!(stream = label, error = %err, "Sandbox output reader task failed");
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            tracing::warn!(stream = label, "Sandbox output still open after exit, discarding");
            Vec::new()
        }
    }
}

/// Keep the last `max_chars` characters, marking the cut.
fn truncate_to_tail(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let skip_count = char_count - max_chars;
    let tail: String = s.chars().skip(skip_count).collect();

    format!("[truncated {skip_count} chars]...{tail}")
}

/// Textual form of a failed run: the last non-empty stderr line (for Python,
/// the `ExceptionType: message` line of the traceback).
fn error_text(stderr: &str, exit_code: Option<i32>) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("Process exited with status {}", code),
            None => "Process terminated by signal".to_string(),
        })
}

impl SubprocessSandbox {
    pub fn new(config: SandboxConfig, prelude: Option<String>) -> Self {
        Self { config, prelude }
    }

    /// Prelude with resource ceilings filled in, followed by the sanitized code.
    fn program(&self, code: &str) -> String {
        let code = sanitize(code);
        match &self.prelude {
            Some(prelude) => {
                let memory_bytes = self.config.memory_limit_mb.saturating_mul(1024 * 1024);
                let cpu_seconds = self.config.timeout_ms.div_ceil(1000).max(1);
                let prelude = prelude
                    .replace("{memory_limit_bytes}", &memory_bytes.to_string())
                    .replace("{cpu_seconds}", &cpu_seconds.to_string())
                    .replace("{data_file}", DATA_FILE);
                format!("{}\n{}\n", prelude.trim_end(), code)
            }
            None => format!("{}\n", code),
        }
    }

    async fn run(&self, code: &str, data_csv: &str) -> Result<ExecutionOutcome, SandboxError> {
        let id = ExecutionId::new();
        let start = std::time::Instant::now();

        let scratch = ScratchDir::create(id).await?;
        tokio::fs::write(scratch.path().join(DATA_FILE), data_csv).await?;
        let script_path = scratch.path().join(&self.config.script_name);
        tokio::fs::write(&script_path, self.program(code)).await?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.args)
            .arg(&self.config.script_name)
            .current_dir(scratch.path())
            .env_clear()
            .env("HOME", scratch.path())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            interpreter: self.config.interpreter.clone(),
            source,
        })?;

        tracing::debug!(execution_id = %id, "Sandbox process started");

        // Bytes per char is at most 4 in UTF-8.
        let max_bytes = self.config.max_output_chars.saturating_mul(4);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            match stdout {
                Some(out) => read_stream_tail(out, max_bytes).await,
                None => Ok(Vec::new()),
            }
        });
        let stderr_handle = tokio::spawn(async move {
            match stderr {
                Some(err) => read_stream_tail(err, max_bytes).await,
                None => Ok(Vec::new()),
            }
        });

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let (exit_code, success, timed_out) =
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => (status.code(), status.success(), false),
                Ok(Err(e)) => return Err(SandboxError::Io(e)),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(execution_id = %id, error = %e, "Failed to kill sandbox process");
                    }
                    (None, false, true)
                }
            };

        let stdout_bytes = join_output(stdout_handle, "stdout").await;
        let stderr_bytes = join_output(stderr_handle, "stderr").await;

        let output = truncate_to_tail(
            &String::from_utf8_lossy(&stdout_bytes),
            self.config.max_output_chars,
        );
        let stderr = String::from_utf8_lossy(&stderr_bytes);

        let latency = start.elapsed().as_secs_f64();
        metrics::histogram!("sandbox.execution.latency").record(latency);
        metrics::counter!("sandbox.execution.count").increment(1);

        if timed_out {
            metrics::counter!("sandbox.execution.timeouts").increment(1);
            tracing::warn!(execution_id = %id, timeout_ms = self.config.timeout_ms, "Sandbox execution timed out");
        }

        let error = if success || timed_out {
            None
        } else {
            Some(error_text(&stderr, exit_code))
        };

        tracing::info!(
            execution_id = %id,
            latency_s = latency,
            exit_code = ?exit_code,
            timed_out,
            output_len = output.len(),
            "Sandbox execution finished"
        );

        Ok(ExecutionOutcome {
            output,
            error,
            timed_out,
        })
    }
}

impl CodeSandbox for SubprocessSandbox {
    fn execute<'a>(
        &'a self,
        code: &'a str,
        data_csv: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome, SandboxError>> + Send + 'a>> {
        Box::pin(self.run(code, data_csv))
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }
}
