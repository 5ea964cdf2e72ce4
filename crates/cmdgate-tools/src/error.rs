use crate::policy::FORBIDDEN_CHARS_DISPLAY;

const TRANSFORM_HINT: &str = "Use grep_pattern, invert_grep, head, tail, sort, or unique parameters \
                              to filter/transform output instead of shell operators.";

/// Request rejected before any process was spawned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("subcommand '{subcommand}' is not allowed for {tool}. Allowed subcommands: {allowed}")]
    SubcommandRejected {
        tool: &'static str,
        subcommand: String,
        allowed: String,
    },

    #[error(
        "'{arg}' contains invalid characters. Forbidden characters: {}. {}",
        FORBIDDEN_CHARS_DISPLAY,
        TRANSFORM_HINT
    )]
    InjectionRejected { arg: String },

    #[error("'{arg}' looks like a command-line flag; paths must not start with '-'")]
    FlagInjection { arg: String },

    #[error("option '{option}' is not allowed for {tool}")]
    OptionRejected { tool: &'static str, option: String },

    #[error("option '{option}' requires a value")]
    MissingOptionValue { option: &'static str },

    #[error("'{arg}' uses pathspec magic (leading ':'), which is not allowed")]
    PathspecMagic { arg: String },

    #[error("environment variable '{key}' is not allowed")]
    EnvRejected { key: String },

    #[error("path '{path}' contains a parent-directory segment ('..')")]
    PathTraversal { path: String },

    #[error("path '{path}' is not allowed")]
    PathRejected { path: String },

    #[error("working_dir '{path}' must be an absolute path")]
    RelativeWorkingDir { path: String },

    #[error("unknown transformation '{step}' in transform_order (expected grep, sort, unique, head, tail)")]
    InvalidTransformOrder { step: String },

    #[error("invalid grep pattern: {message}")]
    InvalidPattern { message: String },
}

/// Errors surfaced by the gateway. Timeouts and cancellations are not errors:
/// they complete as a `CommandResult` with a synthesized exit code.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
