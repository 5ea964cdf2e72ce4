use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{ResponseConfig, ToolsConfig};
use crate::error::{ToolError, ValidationError};
use crate::executor::{
    CommandResult, ExecutionRequest, ProgressSink, Termination, truncate_tool_output,
};
use crate::filter::{TransformationPipeline, TransformationSpec};
use crate::path_guard;
use crate::permissions::CommandPolicy;
use crate::policy::SecurityPolicy;
use crate::request::{Operand, ToolInvocation, ToolRequest};
use crate::sanitize;
use crate::supervisor::ProcessSupervisor;

/// Rendered outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
    /// `None` when the call failed before or at spawn.
    pub result: Option<CommandResult>,
}

impl ToolResponse {
    fn failure(err: &ToolError) -> Self {
        Self {
            text: format!("Error: {err}"),
            is_error: true,
            result: None,
        }
    }
}

/// Validates tool requests, runs them under supervision and renders the response.
#[derive(Debug, Clone)]
pub struct Gateway {
    policy: Arc<SecurityPolicy>,
    commands: CommandPolicy,
    supervisor: ProcessSupervisor,
    response: ResponseConfig,
    default_timeout: Duration,
    max_output_lines: usize,
}

impl Gateway {
    #[must_use]
    pub fn new(
        policy: Arc<SecurityPolicy>,
        commands: CommandPolicy,
        supervisor: ProcessSupervisor,
        response: ResponseConfig,
    ) -> Self {
        let defaults = crate::config::ShellConfig::default();
        Self {
            policy,
            commands,
            supervisor,
            response,
            default_timeout: Duration::from_millis(defaults.timeout_ms),
            max_output_lines: defaults.max_output_lines,
        }
    }

    #[must_use]
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(
            Arc::new(SecurityPolicy::from_config(&config.security)),
            CommandPolicy::new(),
            ProcessSupervisor::from_config(&config.shell),
            config.response.clone(),
        )
        .with_default_timeout(Duration::from_millis(config.shell.timeout_ms))
        .with_max_output_lines(config.shell.max_output_lines)
    }

    /// Timeout for requests that do not set `timeout_ms`.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_output_lines(mut self, max: usize) -> Self {
        self.max_output_lines = max;
        self.supervisor = self.supervisor.with_max_output_lines(max);
        self
    }

    /// Run every check and build the execution request. Nothing is spawned.
    ///
    /// # Errors
    ///
    /// The first `ValidationError` hit, in order: required fields, subcommand
    /// allowlist, working directory, operands, env keys, transformation spec.
    pub fn prepare<T: ToolInvocation>(
        &self,
        request: &ToolRequest<T>,
    ) -> Result<(ExecutionRequest, TransformationSpec), ToolError> {
        let operands = request.inner.operands()?;
        let subcommand = request.inner.subcommand();
        self.commands.authorize(T::TOOL, subcommand)?;

        let working_dir = match request.working_dir.as_deref() {
            Some(raw) if !raw.is_empty() => {
                sanitize::check_arg(raw)?;
                Some(path_guard::authorize_working_dir(raw, &self.policy)?.into_path_buf())
            }
            _ => None,
        };

        let env = request.env.clone().unwrap_or_default();
        let opaque = operands.iter().filter_map(|operand| match operand {
            Operand::Plain(arg) => Some(*arg),
            Operand::Fixed(arg) => Some(*arg),
            Operand::Path(_) | Operand::Pathspec(_) => None,
        });
        sanitize::sanitize(subcommand.into_iter().chain(opaque), &env, &self.policy)?;

        let mut args = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Operand::Path(raw) => {
                    path_guard::reject_flag(raw)?;
                    sanitize::check_arg(raw)?;
                    let canonical =
                        path_guard::authorize(raw, working_dir.as_deref(), &self.policy)?
                            .into_path_buf();
                    args.push(
                        canonical
                            .to_str()
                            .map_or_else(|| raw.to_owned(), str::to_owned),
                    );
                }
                Operand::Pathspec(raw) => {
                    path_guard::reject_flag(raw)?;
                    sanitize::check_arg(raw)?;
                    path_guard::authorize(raw, working_dir.as_deref(), &self.policy)?;
                    args.push(raw.to_owned());
                }
                Operand::Plain(arg) => args.push(arg.to_owned()),
                Operand::Fixed(flag) => args.push(flag.to_owned()),
            }
        }

        let spec = transformation_spec(request)?;

        let timeout = request
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);

        let exec = ExecutionRequest::new(
            T::TOOL,
            subcommand.map(str::to_owned),
            args,
            working_dir,
            env,
            timeout,
        );
        Ok((exec, spec))
    }

    /// Validate, run and render one tool call. Never fails: errors become an
    /// `is_error` response.
    pub async fn call<T: ToolInvocation>(
        &self,
        request: &ToolRequest<T>,
        sink: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let tool = T::TOOL.name();
        let started = Instant::now();

        let (exec, spec) = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(tool, "request rejected: {e}");
                return ToolResponse::failure(&e);
            }
        };

        let mut result = match self.supervisor.run(&exec, sink, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool, command = %exec.command_line(), "{e}");
                return ToolResponse::failure(&e);
            }
        };

        let captured = std::mem::take(&mut result.output_lines);
        let (lines, stats) = TransformationPipeline::from_spec(&spec).run(captured);
        result.output_lines = lines;

        tracing::info!(
            tool,
            exit_code = result.exit_code,
            line_count = result.line_count,
            captured_lines = stats.raw_lines,
            output_lines = stats.filtered_lines,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "tool call completed"
        );

        let include_output = !spec.is_empty() || self.response.always_include_output;
        let text = self.render(&result, &exec, include_output);
        ToolResponse {
            text,
            is_error: !result.success(),
            result: Some(result),
        }
    }

    fn render(&self, result: &CommandResult, exec: &ExecutionRequest, include_output: bool) -> String {
        let mut text = format!(
            "Lines: {}\nExit code: {}",
            result.line_count, result.exit_code
        );

        if include_output && !result.output_lines.is_empty() {
            text.push_str("\n\n");
            text.push_str(&result.output_lines.join("\n"));
        }

        let note = match result.termination {
            Termination::TimedOut => Some(format!(
                "Command timed out after {} ms and was killed.",
                exec.timeout().as_millis()
            )),
            Termination::Cancelled => Some("Command was cancelled.".to_owned()),
            Termination::StreamFailed => {
                Some("Reading command output failed; output is partial.".to_owned())
            }
            Termination::Exited(_) | Termination::Signalled => None,
        };
        if let Some(note) = note {
            let _ = write!(text, "\n\n{note}");
        }
        if result.truncated {
            let _ = write!(
                text,
                "\n\nOutput capture stopped after {} lines; Lines counts all of them.",
                self.max_output_lines
            );
        }

        truncate_tool_output(&text)
    }
}

fn transformation_spec<T>(request: &ToolRequest<T>) -> Result<TransformationSpec, ValidationError> {
    let mut spec = TransformationSpec::new()
        .with_invert_grep(request.invert_grep.unwrap_or(false))
        .with_sort(request.sort.unwrap_or(false))
        .with_unique(request.unique.unwrap_or(false))
        .with_head(request.head)
        .with_tail(request.tail);
    if let Some(pattern) = request.grep_pattern.as_deref() {
        spec = spec.with_grep(pattern)?;
    }
    if let Some(order) = request.transform_order.as_deref() {
        spec = spec.with_order(order)?;
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BazelRequest, CatRequest, GitRequest, LsRequest};

    fn gateway() -> Gateway {
        Gateway::from_config(&ToolsConfig::default())
    }

    fn git(subcommand: &str, args: &[&str]) -> ToolRequest<GitRequest> {
        ToolRequest::new(GitRequest {
            subcommand: subcommand.to_owned(),
            args: args.iter().map(|s| (*s).to_owned()).collect(),
        })
    }

    fn validation(err: ToolError) -> ValidationError {
        match err {
            ToolError::Validation(v) => v,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn git_request_builds_argv() {
        let (exec, spec) = gateway().prepare(&git("add", &["a.txt"])).unwrap();
        assert_eq!(exec.program(), "git");
        assert_eq!(exec.argv(), vec!["add", "a.txt"]);
        assert!(spec.is_empty());
    }

    #[test]
    fn disallowed_subcommand_rejected() {
        let err = gateway().prepare(&git("push", &[])).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::SubcommandRejected { .. }
        ));
    }

    #[test]
    fn injected_argument_rejected() {
        let err = gateway()
            .prepare(&git("add", &["file.txt | cat /etc/passwd"]))
            .unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::InjectionRejected { .. }
        ));
    }

    #[test]
    fn blocked_env_key_rejected() {
        let mut req = git("status", &[]);
        req.env = Some([("LD_PRELOAD".to_owned(), "/tmp/x.so".to_owned())].into());
        let err = gateway().prepare(&req).unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::EnvRejected {
                key: "LD_PRELOAD".into()
            }
        );
    }

    #[test]
    fn traversal_rejected_before_spawn() {
        let req = ToolRequest::new(CatRequest {
            path: "/etc/../etc/passwd".into(),
        });
        let err = gateway().prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::PathTraversal { .. }
        ));
    }

    #[test]
    fn flag_path_rejected() {
        let req = ToolRequest::new(LsRequest {
            path: Some("--recursive".into()),
        });
        let err = gateway().prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::FlagInjection { .. }
        ));
    }

    fn gateway_blocking(blocked: &std::path::Path) -> Gateway {
        Gateway::new(
            Arc::new(SecurityPolicy::new([blocked], Vec::<String>::new())),
            CommandPolicy::new(),
            ProcessSupervisor::default(),
            ResponseConfig::default(),
        )
    }

    #[test]
    fn git_cannot_read_blocked_files_through_options() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret");
        std::fs::create_dir(&secret).unwrap();
        let token = secret.join("token");
        std::fs::write(&token, "hunter2\n").unwrap();
        let token = token.to_str().unwrap();
        let gw = gateway_blocking(&secret);

        let err = gw.prepare(&git("commit", &["-F", token])).unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::OptionRejected {
                tool: "git",
                option: "-F".into()
            }
        );

        let from_file = format!("--pathspec-from-file={token}");
        let err = gw.prepare(&git("add", &[from_file.as_str()])).unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::OptionRejected {
                tool: "git",
                option: "--pathspec-from-file".into()
            }
        );
    }

    #[test]
    fn git_pathspec_into_blocked_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret");
        std::fs::create_dir(&secret).unwrap();
        std::fs::write(secret.join("token"), "hunter2\n").unwrap();
        let gw = gateway_blocking(&secret);

        let mut req = git("add", &["--", "secret/token"]);
        req.working_dir = Some(dir.path().to_str().unwrap().to_owned());
        let err = gw.prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::PathRejected { .. }
        ));

        let mut req = git("checkout", &["secret"]);
        req.working_dir = Some(dir.path().to_str().unwrap().to_owned());
        assert!(gw.prepare(&req).is_err());
    }

    #[test]
    fn git_refs_and_pathspecs_pass_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway_blocking(&dir.path().join("secret"));
        let mut req = git("checkout", &["-b", "feature/x", "origin/main"]);
        req.working_dir = Some(dir.path().to_str().unwrap().to_owned());

        let (exec, _) = gw.prepare(&req).unwrap();
        assert_eq!(exec.argv(), vec!["checkout", "-b", "feature/x", "origin/main"]);
    }

    #[test]
    fn git_dash_after_separator_rejected() {
        let err = gateway()
            .prepare(&git("add", &["--", "-weird"]))
            .unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::FlagInjection { .. }
        ));
    }

    #[test]
    fn bazel_flag_target_rejected() {
        let req = ToolRequest::new(BazelRequest {
            subcommand: "build".into(),
            target: "--output_base=/blocked".into(),
        });
        let err = gateway().prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::FlagInjection { .. }
        ));
    }

    #[test]
    fn relative_working_dir_rejected() {
        let mut req = git("status", &[]);
        req.working_dir = Some("repo".into());
        let err = gateway().prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::RelativeWorkingDir { .. }
        ));
    }

    #[test]
    fn grep_pattern_is_not_sanitized() {
        let mut req = git("status", &[]);
        req.grep_pattern = Some("^(modified|new file):".into());
        let (_, spec) = gateway().prepare(&req).unwrap();
        assert!(!spec.is_empty());
    }

    #[test]
    fn invalid_transform_order_rejected() {
        let mut req = git("status", &[]);
        req.transform_order = Some(vec!["grep".into(), "awk".into()]);
        let err = gateway().prepare(&req).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::InvalidTransformOrder { .. }
        ));
    }

    #[test]
    fn bazel_builds_subcommand_and_target() {
        let req = ToolRequest::new(BazelRequest {
            subcommand: "test".into(),
            target: "//foo:bar".into(),
        });
        let (exec, _) = gateway().prepare(&req).unwrap();
        assert_eq!(exec.command_line(), "bazel test //foo:bar");
    }

    #[test]
    fn request_timeout_overrides_default() {
        let mut req = git("status", &[]);
        let (exec, _) = gateway().prepare(&req).unwrap();
        assert_eq!(exec.timeout(), Duration::from_millis(180_000));
        req.timeout_ms = Some(250);
        let (exec, _) = gateway().prepare(&req).unwrap();
        assert_eq!(exec.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn rejection_renders_error_text() {
        let resp = gateway()
            .call(&git("push", &[]), None, &CancellationToken::new())
            .await;
        assert!(resp.is_error);
        assert!(resp.result.is_none());
        assert!(resp.text.starts_with("Error: subcommand 'push' is not allowed"));
    }

    #[test]
    fn render_header_only_without_transforms() {
        let gw = gateway();
        let (exec, _) = gw.prepare(&git("status", &[])).unwrap();
        let result = CommandResult {
            line_count: 3,
            exit_code: 0,
            termination: Termination::Exited(0),
            output_lines: vec!["a".into(), "b".into(), "c".into()],
            truncated: false,
        };
        assert_eq!(gw.render(&result, &exec, false), "Lines: 3\nExit code: 0");
        assert_eq!(
            gw.render(&result, &exec, true),
            "Lines: 3\nExit code: 0\n\na\nb\nc"
        );
    }

    #[test]
    fn render_notes_timeout_and_truncation() {
        let gw = gateway().with_max_output_lines(2);
        let mut req = git("status", &[]);
        req.timeout_ms = Some(100);
        let (exec, _) = gw.prepare(&req).unwrap();
        let result = CommandResult {
            line_count: 5,
            exit_code: 124,
            termination: Termination::TimedOut,
            output_lines: vec!["a".into(), "b".into()],
            truncated: true,
        };
        let text = gw.render(&result, &exec, false);
        assert!(text.starts_with("Lines: 5\nExit code: 124"));
        assert!(text.contains("timed out after 100 ms"));
        assert!(text.contains("stopped after 2 lines"));
    }
}
