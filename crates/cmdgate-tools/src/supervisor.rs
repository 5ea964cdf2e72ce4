//! Spawning, streaming and reaping of validated commands.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ShellConfig;
use crate::error::ToolError;
use crate::executor::{CommandResult, ExecutionRequest, ProgressEvent, ProgressSink, Termination};

const LINE_CHANNEL_CAPACITY: usize = 64;

enum StreamMsg {
    Line(String),
    Failed(std::io::Error),
}

/// Runs one [`ExecutionRequest`] to completion, timeout or cancellation.
///
/// Stdout and stderr are read concurrently by two tasks and merged through a
/// channel into a single consumer, which owns the line counter. The child runs
/// in its own process group so that a kill also takes down anything it forked.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    max_output_lines: usize,
    max_line_bytes: usize,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::from_config(&ShellConfig::default())
    }
}

impl ProcessSupervisor {
    #[must_use]
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            max_output_lines: config.max_output_lines,
            max_line_bytes: config.max_line_bytes,
        }
    }

    #[must_use]
    pub fn with_max_output_lines(mut self, max: usize) -> Self {
        self.max_output_lines = max;
        self
    }

    #[must_use]
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// # Errors
    ///
    /// `SpawnFailed` when the process could not be started. Timeouts,
    /// cancellation and stream failures complete as a [`CommandResult`].
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        sink: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ToolError> {
        self.continue_from(request, sink, cancel, 0).await
    }

    /// Like [`run`](Self::run), with line numbering resuming after `start` lines.
    ///
    /// # Errors
    ///
    /// `SpawnFailed` when the process could not be started.
    pub async fn continue_from(
        &self,
        request: &ExecutionRequest,
        sink: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
        start: u64,
    ) -> Result<CommandResult, ToolError> {
        let mut child = spawn(request)?;
        tracing::debug!(command = %request.command_line(), pid = ?child.id(), "spawned");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_tree(&mut child).await;
            return Err(ToolError::SpawnFailed {
                program: request.program().to_owned(),
                source: std::io::Error::other("stdio was not captured"),
            });
        };

        Ok(self
            .supervise(request, child, (stdout, stderr), sink, cancel, start)
            .await)
    }

    /// Drain both output streams of a spawned child, then reap it.
    async fn supervise<O, E>(
        &self,
        request: &ExecutionRequest,
        mut child: Child,
        (stdout, stderr): (O, E),
        sink: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
        start: u64,
    ) -> CommandResult
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let deadline = Instant::now() + request.timeout();
        let (line_tx, mut line_rx) = mpsc::channel::<StreamMsg>(LINE_CHANNEL_CAPACITY);
        let readers: [JoinHandle<()>; 2] = [
            tokio::spawn(read_lines(stdout, self.max_line_bytes, line_tx.clone())),
            tokio::spawn(read_lines(stderr, self.max_line_bytes, line_tx)),
        ];

        let mut counter = start;
        let mut captured = Vec::new();
        let mut truncated = false;

        let interrupted = loop {
            tokio::select! {
                msg = line_rx.recv() => match msg {
                    Some(StreamMsg::Line(text)) => {
                        counter += 1;
                        if let Some(sink) = sink {
                            sink.emit(ProgressEvent { sequence: counter, text: text.clone() });
                        }
                        if captured.len() < self.max_output_lines {
                            captured.push(text);
                        } else {
                            truncated = true;
                        }
                    }
                    Some(StreamMsg::Failed(e)) => {
                        tracing::warn!(command = %request.command_line(), "output stream failed: {e}");
                        break Some(Termination::StreamFailed);
                    }
                    None => break None,
                },
                () = tokio::time::sleep_until(deadline) => break Some(Termination::TimedOut),
                () = cancel.cancelled() => break Some(Termination::Cancelled),
            }
        };

        let termination = match interrupted {
            Some(termination) => {
                kill_tree(&mut child).await;
                termination
            }
            None => wait_bounded(&mut child, deadline, cancel).await,
        };

        for reader in &readers {
            reader.abort();
        }

        match termination {
            Termination::TimedOut => tracing::warn!(
                command = %request.command_line(),
                timeout_ms = request.timeout().as_millis(),
                "command timed out"
            ),
            Termination::Cancelled => {
                tracing::info!(command = %request.command_line(), "command cancelled");
            }
            _ => {}
        }

        CommandResult {
            line_count: counter - start,
            exit_code: termination.exit_code(),
            termination,
            output_lines: captured,
            truncated,
        }
    }
}

fn spawn(request: &ExecutionRequest) -> Result<Child, ToolError> {
    let mut cmd = Command::new(request.program());
    cmd.args(request.argv())
        .envs(request.env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = request.working_dir() {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|source| ToolError::SpawnFailed {
        program: request.program().to_owned(),
        source,
    })
}

/// Wait for exit after both streams closed, still honouring deadline and cancellation.
async fn wait_bounded(
    child: &mut Child,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Termination {
    enum Waited {
        Status(std::io::Result<ExitStatus>),
        Interrupted(Termination),
    }

    let waited = tokio::select! {
        status = child.wait() => Waited::Status(status),
        () = tokio::time::sleep_until(deadline) => Waited::Interrupted(Termination::TimedOut),
        () = cancel.cancelled() => Waited::Interrupted(Termination::Cancelled),
    };

    match waited {
        Waited::Status(Ok(status)) => match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signalled,
        },
        Waited::Status(Err(e)) => {
            tracing::warn!("failed to wait for child: {e}");
            kill_tree(child).await;
            Termination::StreamFailed
        }
        Waited::Interrupted(termination) => {
            kill_tree(child).await;
            termination
        }
    }
}

/// SIGKILL the whole process group, then kill and reap the child itself.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::debug!(pid, "killpg failed: {e}");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("kill failed: {e}");
    }
}

/// Forward LF-delimited lines from `stream`, keeping at most `max_line_bytes` per line.
async fn read_lines<R>(stream: R, max_line_bytes: usize, tx: mpsc::Sender<StreamMsg>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line: Vec<u8> = Vec::new();
    let mut pending = false;

    loop {
        let buf = match reader.fill_buf().await {
            Ok(buf) => buf,
            Err(e) => {
                let _ = tx.send(StreamMsg::Failed(e)).await;
                return;
            }
        };
        if buf.is_empty() {
            if pending {
                let _ = tx.send(StreamMsg::Line(finish_line(&line))).await;
            }
            return;
        }

        let (chunk, consumed, complete) = match buf.iter().position(|b| *b == b'\n') {
            Some(i) => (&buf[..i], i + 1, true),
            None => (buf, buf.len(), false),
        };
        let room = max_line_bytes.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);
        pending = true;
        reader.consume(consumed);

        if complete {
            let text = finish_line(&line);
            line.clear();
            pending = false;
            if tx.send(StreamMsg::Line(text)).await.is_err() {
                return;
            }
        }
    }
}

fn finish_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use tokio::io::{AsyncReadExt, ReadBuf};

    use super::*;
    use crate::executor::{EXIT_CANCELLED, EXIT_STREAM_FAILED, EXIT_TIMED_OUT, ToolKind};

    fn sh(script: &str, timeout: Duration) -> ExecutionRequest {
        ExecutionRequest::new(
            ToolKind::Cat,
            None,
            vec!["-c".to_owned(), script.to_owned()],
            None,
            BTreeMap::new(),
            timeout,
        )
        .with_program("sh")
    }

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::default()
    }

    #[tokio::test]
    async fn exit_code_without_output() {
        let req = sh("exit 42", Duration::from_secs(5));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 0);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.termination, Termination::Exited(42));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn counts_stdout_and_stderr_lines() {
        let req = sh("echo one; echo two 1>&2; echo three", Duration::from_secs(5));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 3);
        assert_eq!(result.exit_code, 0);
        let mut lines = result.output_lines.clone();
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn unterminated_final_segment_counts() {
        let req = sh("printf 'a\\nb\\nc'", Duration::from_secs(5));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 3);
        assert_eq!(result.output_lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn trailing_carriage_return_stripped() {
        let req = sh("printf 'a\\r\\nb\\r\\n'", Duration::from_secs(5));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output_lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn continue_from_offsets_sequence() {
        let req = sh("echo a; echo b", Duration::from_secs(5));
        let seen = Mutex::new(Vec::new());
        let sink = |ev: ProgressEvent| seen.lock().unwrap().push(ev.sequence);
        let result = supervisor()
            .continue_from(&req, Some(&sink), &CancellationToken::new(), 5)
            .await
            .unwrap();
        assert_eq!(result.line_count, 2);
        assert_eq!(*seen.lock().unwrap(), vec![6, 7]);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_gap_free() {
        let req = sh("seq 1 50; seq 1 50 1>&2", Duration::from_secs(5));
        let seen = Mutex::new(Vec::new());
        let sink = |ev: ProgressEvent| seen.lock().unwrap().push(ev.sequence);
        let result = supervisor()
            .run(&req, Some(&sink), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 100);
        assert_eq!(*seen.lock().unwrap(), (1..=100).collect::<Vec<u64>>());
    }

    fn pid_from_line(line: &str) -> Pid {
        Pid::from_raw(line.trim().parse().unwrap())
    }

    /// Gone, or a zombie waiting for its new parent to reap it.
    fn is_running(pid: Pid) -> bool {
        if kill(pid, None) == Err(Errno::ESRCH) {
            return false;
        }
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
        !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z'))
    }

    async fn assert_stops_running(pid: Pid) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while is_running(pid) {
            assert!(
                std::time::Instant::now() < deadline,
                "process {pid} still running"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn timeout_leaves_no_process_behind() {
        let req = sh("echo $$; sleep 10 & echo $!; wait", Duration::from_millis(500));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::TimedOut);
        assert_eq!(result.output_lines.len(), 2, "{:?}", result.output_lines);
        let shell = pid_from_line(&result.output_lines[0]);
        let background = pid_from_line(&result.output_lines[1]);
        assert_eq!(kill(shell, None), Err(Errno::ESRCH));
        assert_stops_running(background).await;
    }

    #[tokio::test]
    async fn cancellation_leaves_no_process_behind() {
        let req = sh("echo $$; sleep 10 & echo $!; wait", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let result = supervisor().run(&req, None, &cancel).await.unwrap();

        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.output_lines.len(), 2, "{:?}", result.output_lines);
        assert_eq!(
            kill(pid_from_line(&result.output_lines[0]), None),
            Err(Errno::ESRCH)
        );
        assert_stops_running(pid_from_line(&result.output_lines[1])).await;
    }

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("device gone")))
        }
    }

    #[tokio::test]
    async fn stream_failure_kills_child_and_keeps_partial_output() {
        let req = sh("sleep 10", Duration::from_secs(30));
        let mut child = spawn(&req).unwrap();
        drop(child.stdout.take());
        drop(child.stderr.take());
        let pid = Pid::from_raw(i32::try_from(child.id().unwrap()).unwrap());
        let stdout = b"partial\n".as_slice().chain(Broken);

        let started = std::time::Instant::now();
        let result = supervisor()
            .supervise(
                &req,
                child,
                (stdout, tokio::io::empty()),
                None,
                &CancellationToken::new(),
                0,
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination, Termination::StreamFailed);
        assert_eq!(result.exit_code, EXIT_STREAM_FAILED);
        assert_eq!(result.output_lines, vec!["partial"]);
        assert_eq!(result.line_count, 1);
        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }

    #[tokio::test]
    async fn timeout_kills_promptly() {
        let req = sh("sleep 10", Duration::from_millis(100));
        let started = std::time::Instant::now();
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination, Termination::TimedOut);
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn timeout_kills_background_children() {
        // The backgrounded sleep keeps stdout open; only a group kill closes it.
        let req = sh("sleep 10 & sleep 10", Duration::from_millis(100));
        let started = std::time::Instant::now();
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination, Termination::TimedOut);
    }

    #[tokio::test]
    async fn timeout_keeps_captured_output() {
        let req = sh("echo started; sleep 10", Duration::from_millis(500));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert_eq!(result.output_lines, vec!["started"]);
        assert_eq!(result.line_count, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_process() {
        let req = sh("sleep 10", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let result = supervisor().run(&req, None, &cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.exit_code, EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn capture_cap_keeps_counting() {
        let req = sh("seq 1 100", Duration::from_secs(5));
        let result = supervisor()
            .with_max_output_lines(10)
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 100);
        assert_eq!(result.output_lines.len(), 10);
        assert_eq!(result.output_lines[0], "1");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn long_lines_are_bounded() {
        let req = sh("printf 'abcdefghij\\nxy\\n'", Duration::from_secs(5));
        let result = supervisor()
            .with_max_line_bytes(4)
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.line_count, 2);
        assert_eq!(result.output_lines, vec!["abcd", "xy"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let req = sh("printf 'ok\\377\\n'", Duration::from_secs(5));
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output_lines, vec!["ok\u{FFFD}"]);
    }

    #[tokio::test]
    async fn env_and_working_dir_applied() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let mut env = BTreeMap::new();
        env.insert("CMDGATE_GREETING".to_owned(), "hello".to_owned());
        let req = ExecutionRequest::new(
            ToolKind::Cat,
            None,
            vec!["-c".to_owned(), "echo $CMDGATE_GREETING; pwd -P".to_owned()],
            Some(canonical.clone()),
            env,
            Duration::from_secs(5),
        )
        .with_program("sh");
        let result = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.output_lines,
            vec!["hello".to_owned(), canonical.display().to_string()]
        );
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let req = sh("true", Duration::from_secs(5)).with_program("cmdgate-no-such-program-xyz");
        let err = supervisor()
            .run(&req, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SpawnFailed { .. }));
    }
}
