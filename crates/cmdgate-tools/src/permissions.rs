use crate::error::ValidationError;
use crate::executor::ToolKind;

const BAZEL_SUBCOMMANDS: &[&str] = &["build", "test"];
const GIT_SUBCOMMANDS: &[&str] = &["status", "add", "commit", "checkout"];

/// Per-tool subcommand allowlist. The table is static; there is no runtime override.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPolicy;

impl CommandPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Allowed subcommands for `tool`, or `None` when the tool takes none.
    #[must_use]
    pub fn allowed_subcommands(self, tool: ToolKind) -> Option<&'static [&'static str]> {
        match tool {
            ToolKind::Bazel => Some(BAZEL_SUBCOMMANDS),
            ToolKind::Git => Some(GIT_SUBCOMMANDS),
            ToolKind::Cat | ToolKind::Ls => None,
        }
    }

    /// Check `subcommand` against the allowlist. Exact, case-sensitive match.
    ///
    /// # Errors
    ///
    /// `MissingField` when the tool needs a subcommand and none (or an empty one)
    /// was given, `SubcommandRejected` when it is not in the table.
    pub fn authorize(self, tool: ToolKind, subcommand: Option<&str>) -> Result<(), ValidationError> {
        let Some(allowed) = self.allowed_subcommands(tool) else {
            return Ok(());
        };
        let subcommand = match subcommand {
            Some(s) if !s.is_empty() => s,
            _ => return Err(ValidationError::MissingField { field: "subcommand" }),
        };
        if allowed.contains(&subcommand) {
            return Ok(());
        }
        tracing::warn!(tool = tool.name(), subcommand, "subcommand rejected");
        Err(ValidationError::SubcommandRejected {
            tool: tool.name(),
            subcommand: subcommand.to_owned(),
            allowed: allowed.join(", "),
        })
    }
}
