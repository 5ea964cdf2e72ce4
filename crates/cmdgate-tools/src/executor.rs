use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Exit code reported when the process was terminated by a signal and has no code.
pub const EXIT_SIGNALLED: i32 = -1;
/// Exit code reported when the supervisor killed the process on timeout.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code reported when the call was cancelled by the client.
pub const EXIT_CANCELLED: i32 = 130;
/// Exit code reported when reading the output streams failed (`EX_IOERR`).
pub const EXIT_STREAM_FAILED: i32 = 74;

/// The fixed set of commands the gateway can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Cat,
    Ls,
    Bazel,
    Git,
}

impl ToolKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Cat => "cat",
            Self::Ls => "ls",
            Self::Bazel => "bazel",
            Self::Git => "git",
        }
    }

    /// Executable passed to process creation. Never a shell.
    #[must_use]
    pub fn program(self) -> &'static str {
        self.name()
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully validated, ready-to-run command.
///
/// Only the gateway builds these, after the command policy, path guard and
/// argument sanitizer have all accepted the request. Downstream code treats it
/// as trusted.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    tool: ToolKind,
    program: String,
    subcommand: Option<String>,
    positional_args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl ExecutionRequest {
    pub(crate) fn new(
        tool: ToolKind,
        subcommand: Option<String>,
        positional_args: Vec<String>,
        working_dir: Option<PathBuf>,
        env: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            tool,
            program: tool.program().to_owned(),
            subcommand,
            positional_args,
            working_dir,
            env,
            timeout,
        }
    }

    #[must_use]
    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run an arbitrary program under the same supervision. Test-only.
    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_owned();
        self
    }

    #[must_use]
    pub fn subcommand(&self) -> Option<&str> {
        self.subcommand.as_deref()
    }

    #[must_use]
    pub fn positional_args(&self) -> &[String] {
        &self.positional_args
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Argument vector after the program name: subcommand first, then positionals.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        self.subcommand
            .iter()
            .chain(self.positional_args.iter())
            .map(String::as_str)
            .collect()
    }

    /// Human-readable rendering for logs. Not used to run anything.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program().to_owned();
        for arg in self.argv() {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How the supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signalled,
    TimedOut,
    Cancelled,
    StreamFailed,
}

impl Termination {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signalled => EXIT_SIGNALLED,
            Self::TimedOut => EXIT_TIMED_OUT,
            Self::Cancelled => EXIT_CANCELLED,
            Self::StreamFailed => EXIT_STREAM_FAILED,
        }
    }
}

/// Outcome of one supervised execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Lines seen on stdout and stderr before any transformation.
    pub line_count: u64,
    pub exit_code: i32,
    pub termination: Termination,
    pub output_lines: Vec<String>,
    /// Set when the capture cap dropped lines; `line_count` still includes them.
    pub truncated: bool,
}

impl CommandResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One raw output line, numbered by the running pre-transformation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub sequence: u64,
    pub text: String,
}

/// Receiver of per-line progress.
///
/// Called synchronously on the line-reading path, so implementations must
/// return promptly and drop events rather than wait.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for tokio::sync::mpsc::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.try_send(event) {
            tracing::debug!("progress event dropped: {e}");
        }
    }
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event);
    }
}

/// Truncate rendered output that exceeds `MAX_TOOL_OUTPUT_CHARS` using a head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let mut head_end = half;
    while !output.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = output.len() - half;
    while !output.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = tail_start - head_end;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}
