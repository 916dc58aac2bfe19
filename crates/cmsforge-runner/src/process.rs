use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cmsforge_utils::LineWindow;

use crate::command_spec::CommandSpec;
use crate::error::SubprocessError;

/// Callback receiving each output line as it arrives.
pub type LineSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Executes a command and streams its combined stdout/stderr line by line.
///
/// Implementations MUST use argv-style APIs only. Steps hold a
/// `&dyn SubprocessRunner` so tests can substitute a scripted runner.
#[async_trait]
pub trait SubprocessRunner: Send + Sync {
    /// Run `cmd` to completion, calling `on_line` for every output line.
    ///
    /// Returns `Ok(())` only when the process exits with status 0.
    async fn run_streaming(
        &self,
        cmd: &CommandSpec,
        on_line: LineSink<'_>,
    ) -> Result<(), SubprocessError>;
}

/// Retained tail of a process's output, shared by the reader tasks.
///
/// Lines arrive from two tasks (stdout and stderr) concurrently, so the window
/// is guarded by a mutex.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    window: Arc<Mutex<LineWindow>>,
}

impl OutputCapture {
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(LineWindow::new(max_lines))),
        }
    }

    pub fn push(&self, line: &str) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.push(line);
    }

    /// Snapshot of the retained lines, oldest first
    #[must_use]
    pub fn tail(&self) -> Vec<String> {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.to_vec()
    }

    #[must_use]
    pub fn total_lines(&self) -> usize {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.total_lines_written()
    }
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self {
            window: Arc::new(Mutex::new(LineWindow::retained())),
        }
    }
}

/// Tokio-backed [`SubprocessRunner`].
///
/// The child gets a null stdin, so tools that would prompt (git credential
/// helpers, npm init) fail fast instead of hanging the run.
#[derive(Debug, Clone, Default)]
pub struct StreamingRunner {
    timeout: Option<Duration>,
}

impl StreamingRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

}

#[async_trait]
impl SubprocessRunner for StreamingRunner {
    async fn run_streaming(
        &self,
        cmd: &CommandSpec,
        on_line: LineSink<'_>,
    ) -> Result<(), SubprocessError> {
        let command_line = cmd.to_string();
        tracing::debug!(command = %command_line, cwd = ?cmd.cwd, "Spawning subprocess");

        let mut command = cmd.to_tokio_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| SubprocessError::Spawn {
            program: cmd.program_name(),
            reason: e.to_string(),
        })?;

        let io_error = |reason: &str| SubprocessError::Io {
            command: command_line.clone(),
            reason: reason.to_string(),
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error("failed to capture stderr"))?;

        let capture = OutputCapture::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let readers = [
            pump_lines(stdout, capture.clone(), tx.clone()),
            pump_lines(stderr, capture.clone(), tx),
        ];

        // Lines are forwarded until both pipes close, then the exit status is collected.
        let drive = async {
            while let Some(line) = rx.recv().await {
                on_line(&line);
            }
            child.wait().await
        };

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, drive).await.ok(),
            None => Some(drive.await),
        };

        let Some(status) = waited else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            for reader in &readers {
                reader.abort();
            }
            let seconds = self.timeout.map_or(0, |t| t.as_secs());
            tracing::warn!(command = %command_line, seconds, "Subprocess timed out");
            return Err(SubprocessError::Timeout {
                command: command_line,
                seconds,
                tail: capture.tail(),
            });
        };

        let status = status.map_err(|e| io_error(&e.to_string()))?;
        for reader in readers {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(io_error(&e.to_string())),
                Err(e) => return Err(io_error(&format!("output reader failed: {e}"))),
            }
        }

        if status.success() {
            tracing::debug!(command = %command_line, lines = capture.total_lines(), "Subprocess finished");
            Ok(())
        } else {
            Err(SubprocessError::ExitCode {
                command: command_line,
                code: status.code(),
                tail: capture.tail(),
            })
        }
    }
}

/// Read `reader` line by line into `capture`, forwarding each line on `tx`.
///
/// Invalid UTF-8 is replaced rather than treated as an error; build tools
/// occasionally emit raw bytes.
fn pump_lines<R>(
    reader: R,
    capture: OutputCapture,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            capture.push(line);
            // The receiver is gone only after a timeout; keep draining the pipe.
            let _ = tx.send(line.to_string());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_output_capture_bounded() {
        let capture = OutputCapture::new(3);
        for i in 0..10 {
            capture.push(&format!("line {i}"));
        }
        assert_eq!(capture.tail(), vec!["line 7", "line 8", "line 9"]);
        assert_eq!(capture.total_lines(), 10);
    }

    #[test]
    fn test_output_capture_default_retains_fifty() {
        let capture = OutputCapture::default();
        for i in 0..120 {
            capture.push(&format!("{i}"));
        }
        let tail = capture.tail();
        assert_eq!(tail.len(), 50);
        assert_eq!(tail.first().map(String::as_str), Some("70"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = StreamingRunner::new();
        let cmd = CommandSpec::new("cmsforge-definitely-not-a-real-program");
        let mut sink = |_: &str| {};
        let err = runner.run_streaming(&cmd, &mut sink).await.unwrap_err();
        assert!(matches!(err, SubprocessError::Spawn { .. }));
        assert!(err.tail().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_stdout_and_stderr_lines() {
        let runner = StreamingRunner::new();
        let mut seen = Vec::new();
        let mut sink = |line: &str| seen.push(line.to_string());
        runner
            .run_streaming(&sh("echo one; echo two 1>&2; echo three"), &mut sink)
            .await
            .unwrap();

        seen.sort();
        assert_eq!(seen, vec!["one", "three", "two"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_retained_tail() {
        let runner = StreamingRunner::new();
        let mut count = 0usize;
        let mut sink = |_: &str| count += 1;
        let err = runner
            .run_streaming(
                &sh("i=0; while [ $i -lt 80 ]; do echo line $i; i=$((i+1)); done; exit 3"),
                &mut sink,
            )
            .await
            .unwrap_err();

        assert_eq!(count, 80);
        match err {
            SubprocessError::ExitCode { code, tail, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(tail.len(), 50);
                assert_eq!(tail.last().map(String::as_str), Some("line 79"));
                assert_eq!(tail.first().map(String::as_str), Some("line 30"));
            }
            other => panic!("expected ExitCode, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = StreamingRunner::new().with_timeout(Duration::from_millis(200));
        let mut sink = |_: &str| {};
        let started = std::time::Instant::now();
        let err = runner
            .run_streaming(&sh("echo starting; exec sleep 30"), &mut sink)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_cwd_are_applied() {
        let dir = std::env::temp_dir();
        let runner = StreamingRunner::new();
        let mut seen = Vec::new();
        let mut sink = |line: &str| seen.push(line.to_string());
        runner
            .run_streaming(
                &sh("echo $CMSFORGE_TEST_VALUE; pwd").env("CMSFORGE_TEST_VALUE", "seeded").cwd(&dir),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(seen.first().map(String::as_str), Some("seeded"));
        assert_eq!(seen.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_clones_share_one_window(
            lines in proptest::collection::vec("[a-z]{1,8}", 0..80),
            max in 1usize..20,
        ) {
            let capture = OutputCapture::new(max);
            let other = capture.clone();
            for (i, line) in lines.iter().enumerate() {
                if i % 2 == 0 { capture.push(line) } else { other.push(line) }
            }
            let keep = lines.len().min(max);
            proptest::prop_assert_eq!(other.tail(), lines[lines.len() - keep..].to_vec());
            proptest::prop_assert_eq!(capture.total_lines(), lines.len());
        }
    }
}
