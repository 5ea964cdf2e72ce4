//! Resolution and authorization of filesystem paths against the blocked-prefix list.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;
use crate::policy::SecurityPolicy;

/// A canonical path that passed every check in this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPath(PathBuf);

impl AuthorizedPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for AuthorizedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for AuthorizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Authorize a path operand.
///
/// Relative paths are taken against `working_dir` (already authorized) or the
/// process cwd. A path that does not exist yet is not rejected here.
///
/// # Errors
///
/// `PathTraversal` when a segment is `..`, `PathRejected` when the resolved path
/// lies inside a blocked tree.
pub fn authorize(
    raw_path: &str,
    working_dir: Option<&Path>,
    policy: &SecurityPolicy,
) -> Result<AuthorizedPath, ValidationError> {
    reject_traversal(raw_path)?;

    let path = Path::new(raw_path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let base = match working_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        };
        base.join(path)
    };

    check_blocked(raw_path, &absolute, policy)
}

/// Authorize a `working_dir` request field. Same rules as [`authorize`], and
/// the raw value must be absolute.
///
/// # Errors
///
/// `RelativeWorkingDir`, `PathTraversal` or `PathRejected`.
pub fn authorize_working_dir(
    raw_path: &str,
    policy: &SecurityPolicy,
) -> Result<AuthorizedPath, ValidationError> {
    reject_traversal(raw_path)?;
    let path = Path::new(raw_path);
    if !path.is_absolute() {
        return Err(ValidationError::RelativeWorkingDir {
            path: raw_path.to_owned(),
        });
    }
    check_blocked(raw_path, path, policy)
}

/// Path operands must not be readable as options by the wrapped program.
///
/// # Errors
///
/// `FlagInjection` when the operand starts with `-`.
pub fn reject_flag(raw_path: &str) -> Result<(), ValidationError> {
    if raw_path.starts_with('-') {
        return Err(ValidationError::FlagInjection {
            arg: raw_path.to_owned(),
        });
    }
    Ok(())
}

fn reject_traversal(raw_path: &str) -> Result<(), ValidationError> {
    if Path::new(raw_path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ValidationError::PathTraversal {
            path: raw_path.to_owned(),
        });
    }
    Ok(())
}

fn check_blocked(
    raw_path: &str,
    absolute: &Path,
    policy: &SecurityPolicy,
) -> Result<AuthorizedPath, ValidationError> {
    let canonical = resolve_via_ancestors(absolute);
    if policy.is_path_blocked(&canonical) {
        tracing::warn!(path = raw_path, resolved = %canonical.display(), "blocked path rejected");
        return Err(ValidationError::PathRejected {
            path: raw_path.to_owned(),
        });
    }
    Ok(AuthorizedPath(canonical))
}

/// Canonicalize the deepest existing ancestor of `path`, then re-append the
/// components that do not exist yet.
pub(crate) fn resolve_via_ancestors(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing: Vec<&OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
