use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::SecurityConfig;
use crate::path_guard::resolve_via_ancestors;

/// Characters that reject an argument outright. No escaping is attempted.
pub const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '{', '}', '[', ']', '<', '>', '\'', '"', '\\', '*', '?',
    '!', '#', '\n', '\r',
];

pub(crate) const FORBIDDEN_CHARS_DISPLAY: &str =
    "; | & $ ` ( ) { } [ ] < > ' \" \\ * ? ! # newline carriage-return";

/// Env keys that alter loader, shell or pager behaviour of the spawned program.
pub const DEFAULT_BLOCKED_ENV_KEYS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "BASH_ENV",
    "ENV",
    "SHELLOPTS",
    "BASHOPTS",
    "PS4",
    "IFS",
    "PROMPT_COMMAND",
    "PATH",
    "GIT_SSH_COMMAND",
    "GIT_EXEC_PATH",
    "GIT_EXTERNAL_DIFF",
    "GIT_PAGER",
    "GIT_EDITOR",
    "PAGER",
    "EDITOR",
    "VISUAL",
];

/// Exported bash functions travel as `BASH_FUNC_<name>%%`.
pub const BLOCKED_ENV_PREFIX: &str = "BASH_FUNC_";

/// Process-wide deny-lists. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    blocked_path_prefixes: Vec<PathBuf>,
    blocked_env_keys: BTreeSet<String>,
}

impl SecurityPolicy {
    /// Build a policy from raw prefixes and extra env keys.
    ///
    /// Relative prefixes are taken against the current directory. Existing
    /// prefixes are canonicalized so symlinked spellings of the same tree match.
    #[must_use]
    pub fn new<P, K>(blocked_paths: P, extra_env_keys: K) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<Path>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let blocked_path_prefixes = blocked_paths
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                let absolute = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    cwd.join(p)
                };
                resolve_via_ancestors(&absolute)
            })
            .collect();

        let mut blocked_env_keys: BTreeSet<String> = DEFAULT_BLOCKED_ENV_KEYS
            .iter()
            .map(|k| (*k).to_owned())
            .collect();
        blocked_env_keys.extend(extra_env_keys.into_iter().map(Into::into));

        Self {
            blocked_path_prefixes,
            blocked_env_keys,
        }
    }

    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(&config.blocked_paths, config.blocked_env_keys.iter().cloned())
    }

    #[must_use]
    pub fn blocked_path_prefixes(&self) -> &[PathBuf] {
        &self.blocked_path_prefixes
    }

    /// True when `canonical` equals or descends from a blocked prefix.
    ///
    /// `Path::starts_with` compares whole components, so `/etc2` is not under `/etc`.
    #[must_use]
    pub fn is_path_blocked(&self, canonical: &Path) -> bool {
        self.blocked_path_prefixes
            .iter()
            .any(|prefix| canonical.starts_with(prefix))
    }

    /// Case-sensitive lookup against the blocked set and the `BASH_FUNC_` prefix.
    #[must_use]
    pub fn is_env_key_blocked(&self, key: &str) -> bool {
        key.starts_with(BLOCKED_ENV_PREFIX) || self.blocked_env_keys.contains(key)
    }

    #[must_use]
    pub fn contains_forbidden_char(arg: &str) -> bool {
        arg.contains(FORBIDDEN_CHARS)
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}
