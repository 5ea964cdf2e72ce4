use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::policy::SecurityPolicy;

/// Reject the request when any argument carries a forbidden character or any
/// env key is on the blocked list.
///
/// # Errors
///
/// The first offending argument or key, as `InjectionRejected` or `EnvRejected`.
pub fn sanitize<'a, I>(
    args: I,
    env: &BTreeMap<String, String>,
    policy: &SecurityPolicy,
) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a str>,
{
    for arg in args {
        check_arg(arg)?;
    }
    for key in env.keys() {
        if policy.is_env_key_blocked(key) {
            tracing::warn!(key = %key, "blocked environment variable rejected");
            return Err(ValidationError::EnvRejected { key: key.clone() });
        }
    }
    Ok(())
}

/// # Errors
///
/// `InjectionRejected` when `arg` contains a forbidden character.
pub fn check_arg(arg: &str) -> Result<(), ValidationError> {
    if SecurityPolicy::contains_forbidden_char(arg) {
        tracing::warn!(arg, "argument with forbidden characters rejected");
        return Err(ValidationError::InjectionRejected {
            arg: arg.to_owned(),
        });
    }
    Ok(())
}
