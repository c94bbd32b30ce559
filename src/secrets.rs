use std::collections::BTreeMap;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::error::{DotsmithError, Result};
use crate::util::process::wait_child;

/// Default deadline for non-interactive secret reads.
pub const READ_DEADLINE: Duration = Duration::from_secs(30);
/// Deadline when the provider may need to prompt for authentication.
pub const AUTH_DEADLINE: Duration = Duration::from_secs(60);

/// Resolves provider-specific references such as `op://vault/item/field`.
pub trait SecretsProvider {
    fn get(&self, reference: &str) -> Result<String>;
}

/// Shells out to the 1Password CLI. The orchestrator never links a secrets
/// backend; it only drives this seam.
pub struct OnePasswordCli {
    pub deadline: Duration,
}

impl OnePasswordCli {
    pub fn new() -> Self {
        Self {
            deadline: READ_DEADLINE,
        }
    }

    pub fn with_interactive_auth() -> Self {
        Self {
            deadline: AUTH_DEADLINE,
        }
    }
}

impl Default for OnePasswordCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretsProvider for OnePasswordCli {
    fn get(&self, reference: &str) -> Result<String> {
        if !reference.starts_with("op://") {
            return Err(DotsmithError::SecretUnavailable(format!(
                "unsupported secret reference: {}",
                reference
            )));
        }

        debug!("resolving secret {}", reference);
        let mut child = Command::new("op")
            .args(["read", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                DotsmithError::SecretUnavailable(format!("failed to launch op: {}", e))
            })?;

        let status = wait_child(&mut child, &format!("op read {}", reference), Some(self.deadline))?;

        let output = child.wait_with_output().map_err(DotsmithError::IoError)?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DotsmithError::SecretUnavailable(format!(
                "{}: {}",
                reference,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Map-backed provider for tests and offline runs.
#[derive(Default)]
pub struct StaticSecrets {
    entries: BTreeMap<String, String>,
}

impl StaticSecrets {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl SecretsProvider for StaticSecrets {
    fn get(&self, reference: &str) -> Result<String> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| DotsmithError::SecretUnavailable(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider() {
        let provider = StaticSecrets::new(BTreeMap::from([(
            "op://vault/item/field".to_string(),
            "hunter2".to_string(),
        )]));
        assert_eq!(provider.get("op://vault/item/field").unwrap(), "hunter2");
        assert!(matches!(
            provider.get("op://vault/other/field").unwrap_err(),
            DotsmithError::SecretUnavailable(_)
        ));
    }

    #[test]
    fn test_non_op_reference_rejected() {
        let provider = OnePasswordCli::new();
        assert!(matches!(
            provider.get("vault/item").unwrap_err(),
            DotsmithError::SecretUnavailable(_)
        ));
    }
}
