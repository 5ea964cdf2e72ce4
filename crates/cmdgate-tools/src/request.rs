//! Tool-call parameter types.
//!
//! Every tool takes its own fields plus the common execution and transformation
//! fields of [`ToolRequest`], flattened into one JSON object.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::executor::ToolKind;
use crate::path_guard;

/// Common fields wrapped around a tool-specific request.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ToolRequest<T> {
    /// Regex; keep only output lines matching it anywhere
    #[serde(default)]
    pub grep_pattern: Option<String>,

    /// Drop matching lines instead of keeping them
    #[serde(default)]
    pub invert_grep: Option<bool>,

    /// Keep only the first N lines
    #[serde(default)]
    pub head: Option<usize>,

    /// Keep only the last N lines
    #[serde(default)]
    pub tail: Option<usize>,

    /// Sort lines (byte order)
    #[serde(default)]
    pub sort: Option<bool>,

    /// Collapse adjacent duplicate lines
    #[serde(default)]
    pub unique: Option<bool>,

    /// Transformation order. Default: ["grep", "sort", "unique", "head", "tail"].
    /// Only listed steps are applied.
    #[serde(default)]
    pub transform_order: Option<Vec<String>>,

    /// Timeout in milliseconds (default 180000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Absolute directory to run the command in
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables for the command
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub inner: T,
}

impl<T> ToolRequest<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            grep_pattern: None,
            invert_grep: None,
            head: None,
            tail: None,
            sort: None,
            unique: None,
            transform_order: None,
            timeout_ms: None,
            working_dir: None,
            env: None,
            inner,
        }
    }
}

/// One argument of the spawned command, tagged with how it is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'a> {
    /// Filesystem path: flag check, character check, then path authorization.
    Path(&'a str),
    /// Argument the program may resolve as a path (git pathspecs, refs):
    /// checked like `Path` but passed through unchanged.
    Pathspec(&'a str),
    /// Opaque argument: character check only.
    Plain(&'a str),
    /// Fixed option supplied by the tool itself.
    Fixed(&'static str),
}

/// Maps a tool's parameters onto the program invocation.
pub trait ToolInvocation {
    const TOOL: ToolKind;

    fn subcommand(&self) -> Option<&str> {
        None
    }

    /// Arguments after the subcommand, in argv order.
    ///
    /// # Errors
    ///
    /// `MissingField` when a required field is empty.
    fn operands(&self) -> Result<Vec<Operand<'_>>, ValidationError>;
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(value)
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CatRequest {
    /// File to print
    pub path: String,
}

impl ToolInvocation for CatRequest {
    const TOOL: ToolKind = ToolKind::Cat;

    fn operands(&self) -> Result<Vec<Operand<'_>>, ValidationError> {
        Ok(vec![Operand::Path(required(&self.path, "path")?)])
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct LsRequest {
    /// Directory or file to list (default ".")
    #[serde(default)]
    pub path: Option<String>,
}

impl ToolInvocation for LsRequest {
    const TOOL: ToolKind = ToolKind::Ls;

    fn operands(&self) -> Result<Vec<Operand<'_>>, ValidationError> {
        let path = match self.path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => ".",
        };
        Ok(vec![Operand::Fixed("-la"), Operand::Path(path)])
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct BazelRequest {
    /// "build" or "test"
    pub subcommand: String,
    /// Target label, e.g. "//foo:bar"
    pub target: String,
}

impl ToolInvocation for BazelRequest {
    const TOOL: ToolKind = ToolKind::Bazel;

    fn subcommand(&self) -> Option<&str> {
        Some(&self.subcommand)
    }

    fn operands(&self) -> Result<Vec<Operand<'_>>, ValidationError> {
        let target = required(&self.target, "target")?;
        path_guard::reject_flag(target)?;
        Ok(vec![Operand::Plain(target)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitOption {
    /// Takes no value.
    Switch,
    /// Takes free text, inline after `=` or as the next argument.
    Text,
}

/// Options accepted in git args, matched on the whole argument (or the part
/// before `=` for `Text` options). Anything that reads a file, changes the
/// repository location or sets config is absent.
const GIT_OPTIONS: &[(&str, GitOption)] = &[
    ("-a", GitOption::Switch),
    ("--all", GitOption::Switch),
    ("-A", GitOption::Switch),
    ("-u", GitOption::Switch),
    ("--update", GitOption::Switch),
    ("-b", GitOption::Switch),
    ("-B", GitOption::Switch),
    ("--branch", GitOption::Switch),
    ("-s", GitOption::Switch),
    ("--short", GitOption::Switch),
    ("--long", GitOption::Switch),
    ("--porcelain", GitOption::Switch),
    ("--porcelain=v1", GitOption::Switch),
    ("--porcelain=v2", GitOption::Switch),
    ("--untracked-files=no", GitOption::Switch),
    ("--untracked-files=normal", GitOption::Switch),
    ("--untracked-files=all", GitOption::Switch),
    ("-v", GitOption::Switch),
    ("--verbose", GitOption::Switch),
    ("-q", GitOption::Switch),
    ("--quiet", GitOption::Switch),
    ("-n", GitOption::Switch),
    ("--dry-run", GitOption::Switch),
    ("-f", GitOption::Switch),
    ("--force", GitOption::Switch),
    ("--amend", GitOption::Switch),
    ("--no-edit", GitOption::Switch),
    ("--allow-empty", GitOption::Switch),
    ("--detach", GitOption::Switch),
    ("-m", GitOption::Text),
    ("--message", GitOption::Text),
];

fn git_option(arg: &str) -> Option<(&'static str, GitOption)> {
    GIT_OPTIONS.iter().copied().find(|(name, kind)| {
        arg == *name
            || (*kind == GitOption::Text
                && arg
                    .strip_prefix(*name)
                    .is_some_and(|rest| name.starts_with("--") && rest.starts_with('=')))
    })
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GitRequest {
    /// One of "status", "add", "commit", "checkout"
    pub subcommand: String,
    /// Arguments after the subcommand
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolInvocation for GitRequest {
    const TOOL: ToolKind = ToolKind::Git;

    fn subcommand(&self) -> Option<&str> {
        Some(&self.subcommand)
    }

    /// Options must be listed in `GIT_OPTIONS`; every other argument is a
    /// pathspec or ref and goes through path authorization.
    fn operands(&self) -> Result<Vec<Operand<'_>>, ValidationError> {
        let mut operands = Vec::with_capacity(self.args.len());
        let mut args = self.args.iter().map(String::as_str);
        let mut pathspecs_only = false;

        while let Some(arg) = args.next() {
            if pathspecs_only || !arg.starts_with('-') {
                if arg.starts_with(':') {
                    return Err(ValidationError::PathspecMagic {
                        arg: arg.to_owned(),
                    });
                }
                operands.push(Operand::Pathspec(arg));
                continue;
            }
            if arg == "--" {
                pathspecs_only = true;
                operands.push(Operand::Fixed("--"));
                continue;
            }
            match git_option(arg) {
                Some((_, GitOption::Switch)) => operands.push(Operand::Plain(arg)),
                Some((name, GitOption::Text)) => {
                    operands.push(Operand::Plain(arg));
                    if arg == name {
                        let value = args
                            .next()
                            .ok_or(ValidationError::MissingOptionValue { option: name })?;
                        operands.push(Operand::Plain(value));
                    }
                }
                None => {
                    let option = arg.split_once('=').map_or(arg, |(name, _)| name);
                    return Err(ValidationError::OptionRejected {
                        tool: Self::TOOL.name(),
                        option: option.to_owned(),
                    });
                }
            }
        }
        Ok(operands)
    }
}
