use std::collections::BTreeMap;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::GlobalConfig;
use crate::error::{DotsmithError, Result};
use crate::events::{Event, Observer};
use crate::host::HostInfo;
use crate::module::ModuleManifest;
use crate::util::process::wait_child;

/// Everything a hook script is allowed to know about the run. This is the
/// host environment contract: hook scripts see these variables and nothing
/// else dotsmith-specific.
pub fn hook_environment(
    config: &GlobalConfig,
    host: &HostInfo,
    module: &ModuleManifest,
    interactive: bool,
    dry_run: bool,
    verbose: bool,
    prompts: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    env.insert("DOTFILES_OS".to_string(), host.os.clone());
    env.insert("DOTFILES_ARCH".to_string(), host.arch.clone());
    env.insert(
        "DOTFILES_PKG_MGR".to_string(),
        host.pkg_mgr.clone().unwrap_or_default(),
    );
    env.insert(
        "DOTFILES_HAS_SUDO".to_string(),
        bool_str(host.has_sudo).to_string(),
    );
    env.insert(
        "DOTFILES_HOME".to_string(),
        host.home.to_string_lossy().into_owned(),
    );
    env.insert(
        "DOTFILES_DIR".to_string(),
        config.dotfiles_dir.to_string_lossy().into_owned(),
    );
    env.insert(
        "DOTFILES_BIN".to_string(),
        std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "dotsmith".to_string()),
    );
    env.insert(
        "DOTFILES_MODULE_DIR".to_string(),
        module.dir.to_string_lossy().into_owned(),
    );
    env.insert("DOTFILES_MODULE_NAME".to_string(), module.name.clone());
    env.insert(
        "DOTFILES_INTERACTIVE".to_string(),
        bool_str(interactive).to_string(),
    );
    env.insert(
        "DOTFILES_DRY_RUN".to_string(),
        bool_str(dry_run).to_string(),
    );
    env.insert(
        "DOTFILES_VERBOSE".to_string(),
        bool_str(verbose).to_string(),
    );
    env.insert("DOTFILES_USER_NAME".to_string(), config.user.name.clone());
    env.insert("DOTFILES_USER_EMAIL".to_string(), config.user.email.clone());
    env.insert(
        "DOTFILES_USER_GITHUB_USER".to_string(),
        config.user.github_user.clone(),
    );

    for (key, value) in prompts {
        env.insert(
            format!("DOTFILES_PROMPT_{}", key.to_uppercase()),
            value.clone(),
        );
    }

    env
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Runs hook scripts as child processes in their own process groups so an
/// interrupt can be propagated to the whole group.
pub struct HookAdapter<'a> {
    pub observer: &'a dyn Observer,
    pub dry_run: bool,
}

impl<'a> HookAdapter<'a> {
    /// Execute one hook script, blocking until it exits. Returns the raw
    /// exit code; callers map non-zero to the phase-appropriate error.
    /// In dry-run mode nothing is spawned and success is assumed.
    pub fn run(
        &self,
        module_name: &str,
        phase: &str,
        script: &Path,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<i32> {
        self.observer.event(&Event::HookStart {
            module: module_name.to_string(),
            phase: phase.to_string(),
        });

        if self.dry_run {
            debug!(
                "dry-run: would execute {} for {}",
                script.display(),
                module_name
            );
            self.observer.event(&Event::HookEnd {
                module: module_name.to_string(),
                phase: phase.to_string(),
                success: true,
            });
            return Ok(0);
        }

        let mut child = Command::new("bash")
            .arg("-e")
            .arg(script)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                DotsmithError::InstallFailed(format!(
                    "failed to launch {}: {}",
                    script.display(),
                    e
                ))
            })?;

        let status = wait_child(&mut child, &format!("{} hook", phase), None)?;
        let code = status.code().unwrap_or(-1);

        self.observer.event(&Event::HookEnd {
            module: module_name.to_string(),
            phase: phase.to_string(),
            success: code == 0,
        });

        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;

    fn env_fixture() -> BTreeMap<String, String> {
        let mut config = GlobalConfig::default();
        config.dotfiles_dir = "/home/u/.dotfiles".into();
        config.user.name = "Alice".to_string();
        config.user.email = "alice@example.com".to_string();
        let host = HostInfo {
            os: "ubuntu".to_string(),
            family: "linux".to_string(),
            arch: "x86_64".to_string(),
            pkg_mgr: Some("apt".to_string()),
            has_sudo: true,
            home: "/home/u".into(),
        };
        let mut module = ModuleManifest::from_str("name: git\nversion: \"1.0.0\"\n").unwrap();
        module.dir = "/home/u/.dotfiles/modules/git".into();
        let prompts = BTreeMap::from([("editor".to_string(), "vim".to_string())]);
        hook_environment(&config, &host, &module, true, false, false, &prompts)
    }

    #[test]
    fn test_environment_contract() {
        let env = env_fixture();
        assert_eq!(env["DOTFILES_OS"], "ubuntu");
        assert_eq!(env["DOTFILES_PKG_MGR"], "apt");
        assert_eq!(env["DOTFILES_HAS_SUDO"], "true");
        assert_eq!(env["DOTFILES_MODULE_NAME"], "git");
        assert_eq!(env["DOTFILES_INTERACTIVE"], "true");
        assert_eq!(env["DOTFILES_DRY_RUN"], "false");
        assert_eq!(env["DOTFILES_USER_NAME"], "Alice");
        assert_eq!(env["DOTFILES_PROMPT_EDITOR"], "vim");
    }

    #[test]
    fn test_run_script_captures_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let adapter = HookAdapter {
            observer: &NullObserver,
            dry_run: false,
        };
        let code = adapter
            .run("git", "install", &script, dir.path(), &BTreeMap::new())
            .unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn test_hook_sees_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        let witness = dir.path().join("witness");
        std::fs::write(
            &script,
            format!("echo \"$DOTFILES_MODULE_NAME\" > {}\n", witness.display()),
        )
        .unwrap();

        let adapter = HookAdapter {
            observer: &NullObserver,
            dry_run: false,
        };
        let env = BTreeMap::from([("DOTFILES_MODULE_NAME".to_string(), "git".to_string())]);
        let code = adapter.run("git", "install", &script, dir.path(), &env).unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&witness).unwrap().trim(), "git");
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        let witness = dir.path().join("witness");
        std::fs::write(&script, format!("touch {}\n", witness.display())).unwrap();

        let adapter = HookAdapter {
            observer: &NullObserver,
            dry_run: true,
        };
        let code = adapter
            .run("git", "install", &script, dir.path(), &BTreeMap::new())
            .unwrap();
        assert_eq!(code, 0);
        assert!(!witness.exists());
    }

    #[test]
    fn test_empty_script_succeeds() {
        // A present-but-empty hook is executed; its exit code (0) propagates.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("empty.sh");
        std::fs::write(&script, "").unwrap();

        let adapter = HookAdapter {
            observer: &NullObserver,
            dry_run: false,
        };
        let code = adapter
            .run("git", "os", &script, dir.path(), &BTreeMap::new())
            .unwrap();
        assert_eq!(code, 0);
    }
}
