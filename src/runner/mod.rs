pub mod hook;
pub mod prompt;

use std::cell::RefCell;
use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use crate::config::GlobalConfig;
use crate::deploy::{self, DeployOutcome, FileDeployer};
use crate::error::{DotsmithError, Result};
use crate::events::{Event, Observer};
use crate::host::HostInfo;
use crate::module::{FileKind, ModuleManifest};
use crate::resolver::ExecutionPlan;
use crate::secrets::SecretsProvider;
use crate::state::{
    ModuleState, ModuleStatus, Operation, OperationType, StateStore,
};
use crate::template::{TemplateContext, TemplateRenderer};
use crate::util::checksum;

use hook::HookAdapter;
use prompt::Prompter;

/// Run-mode configuration for one orchestrator invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Describe, do not mutate.
    pub dry_run: bool,
    /// Ignore up-to-date verdicts; always run install and deploy.
    pub force: bool,
    /// Treat prior `failed` modules as skip.
    pub skip_failed: bool,
    /// Do not install never-installed modules; act only on drift.
    pub update_only: bool,
    /// Never prompt; use defaults.
    pub unattended: bool,
    /// Show `explicit_install` prompts for non-explicit modules too.
    pub prompt_dependencies: bool,
    /// A failed verify hook fails the module instead of warning.
    pub strict: bool,
    /// Surface decision-table outcomes.
    pub verbose: bool,
}

impl RunOptions {
    pub fn interactive(&self) -> bool {
        !self.unattended
    }
}

/// Verdict of the execution decision function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleAction {
    Install,
    Update,
    Skip(SkipCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    UpToDate,
    PriorFailure,
    NeverInstalled,
}

impl std::fmt::Display for SkipCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipCause::UpToDate => write!(f, "up-to-date"),
            SkipCause::PriorFailure => write!(f, "prior failure"),
            SkipCause::NeverInstalled => write!(f, "never installed (update-only)"),
        }
    }
}

/// Final per-module result, fed into the run summary.
#[derive(Debug, Clone)]
pub enum ModuleOutcome {
    Installed { notes: Option<String> },
    Updated { notes: Option<String> },
    Skipped { reason: String },
    Failed { error: String, interrupted: bool },
}

pub struct ModuleRunner<'a> {
    pub config: &'a GlobalConfig,
    pub host: &'a HostInfo,
    pub store: &'a StateStore,
    pub observer: &'a dyn Observer,
    pub renderer: &'a dyn TemplateRenderer,
    pub secrets: &'a dyn SecretsProvider,
    pub prompter: &'a dyn Prompter,
    pub options: RunOptions,
    /// Secret references resolved once per run, the first time a template
    /// module needs them.
    resolved_secrets: RefCell<Option<BTreeMap<String, String>>>,
}

impl<'a> ModuleRunner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a GlobalConfig,
        host: &'a HostInfo,
        store: &'a StateStore,
        observer: &'a dyn Observer,
        renderer: &'a dyn TemplateRenderer,
        secrets: &'a dyn SecretsProvider,
        prompter: &'a dyn Prompter,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            host,
            store,
            observer,
            renderer,
            secrets,
            prompter,
            options,
            resolved_secrets: RefCell::new(None),
        }
    }

    /// Drive one module through the full pipeline:
    /// requirements → decision → prompts → OS hook → install → deploy →
    /// verify → state.
    pub fn run_module(&self, module: &ModuleManifest, plan: &ExecutionPlan) -> ModuleOutcome {
        match self.run_module_inner(module, plan) {
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(module, e),
        }
    }

    fn run_module_inner(
        &self,
        module: &ModuleManifest,
        plan: &ExecutionPlan,
    ) -> Result<ModuleOutcome> {
        // 1. Required commands.
        for command in &module.requires {
            if which::which(command).is_err() {
                return Err(DotsmithError::MissingRequirement {
                    module: module.name.clone(),
                    command: command.clone(),
                });
            }
        }

        // 2. Decide.
        let mut prior = self.store.get(&module.name)?;
        if let Some(ref mut state) = prior {
            state.migrate_file_states();
        }

        let module_checksum = checksum::module_checksum(&module.dir)?;
        let config_hash = checksum::config_hash(&self.config.module_config(&module.name));
        let action = self.decide(prior.as_ref(), &module_checksum, &config_hash);

        let (action_str, reason) = match &action {
            ModuleAction::Install => ("install", "not installed or forced".to_string()),
            ModuleAction::Update => ("update", "drift detected".to_string()),
            ModuleAction::Skip(cause) => ("skip", cause.to_string()),
        };
        self.observer.event(&Event::Decision {
            module: module.name.clone(),
            action: action_str.to_string(),
            reason,
        });

        if let ModuleAction::Skip(cause) = action {
            return Ok(ModuleOutcome::Skipped {
                reason: cause.to_string(),
            });
        }

        // 3. Prompts.
        let prompts = prompt::resolve_prompts(
            module,
            self.prompter,
            plan.is_explicit(&module.name),
            self.options.interactive(),
            self.options.prompt_dependencies,
        )?;

        let env = hook::hook_environment(
            self.config,
            self.host,
            module,
            self.options.interactive(),
            self.options.dry_run,
            self.options.verbose,
            &prompts,
        );

        let adapter = HookAdapter {
            observer: self.observer,
            dry_run: self.options.dry_run,
        };

        let mut operations: Vec<Operation> = Vec::new();
        let mut deploy_outcome = DeployOutcome::default();
        let prior_file_states = prior
            .as_ref()
            .map(|s| s.file_states.clone())
            .unwrap_or_default();

        let result = self.run_hooks_and_deploy(
            module,
            &adapter,
            &env,
            &mut operations,
            &mut deploy_outcome,
            &prior_file_states,
        );

        match result {
            Ok(verify_warning) => {
                if !self.options.dry_run {
                    self.write_state(
                        module,
                        prior,
                        ModuleStatus::Installed,
                        None,
                        &module_checksum,
                        &config_hash,
                        operations,
                        deploy_outcome.file_states,
                    )?;
                }
                if let Some(warning) = verify_warning {
                    self.observer.event(&Event::Warn {
                        module: module.name.clone(),
                        message: warning,
                    });
                }
                let outcome = match action {
                    ModuleAction::Install => ModuleOutcome::Installed {
                        notes: module.notes.clone(),
                    },
                    _ => ModuleOutcome::Updated {
                        notes: module.notes.clone(),
                    },
                };
                Ok(outcome)
            }
            Err(e) => {
                let interrupted = matches!(e, DotsmithError::Interrupted);
                let message = e.to_string();
                if !self.options.dry_run {
                    // One state.set call, capturing every operation so far.
                    self.write_state(
                        module,
                        prior,
                        ModuleStatus::Failed,
                        Some(if interrupted {
                            "interrupted".to_string()
                        } else {
                            message.clone()
                        }),
                        &module_checksum,
                        &config_hash,
                        operations,
                        deploy_outcome.file_states,
                    )?;
                }
                self.observer.event(&Event::Fail {
                    module: module.name.clone(),
                    message: message.clone(),
                });
                Ok(ModuleOutcome::Failed {
                    error: message,
                    interrupted,
                })
            }
        }
    }

    /// Steps 4–7 of the pipeline. Returns an optional verify warning.
    /// Operations and deploy results accumulate in the out-parameters even
    /// when a step fails, so the caller can persist them.
    fn run_hooks_and_deploy(
        &self,
        module: &ModuleManifest,
        adapter: &HookAdapter,
        env: &BTreeMap<String, String>,
        operations: &mut Vec<Operation>,
        deploy_outcome: &mut DeployOutcome,
        prior_file_states: &[crate::state::FileState],
    ) -> Result<Option<String>> {
        // 4. OS pre-hook. Missing file is a no-op; a present-but-empty
        // script runs and its exit code counts.
        if let Some(script) = module.os_script(&self.host.os, &self.host.family) {
            let code = adapter.run(&module.name, "os", &script, &module.dir, env)?;
            operations.push(
                Operation::new(OperationType::ScriptRun, "os", &script)
                    .with_meta("exit_code", code.to_string()),
            );
            if code != 0 {
                return Err(DotsmithError::OsHookFailed(format!(
                    "{} exited with status {}",
                    script.display(),
                    code
                )));
            }
        } else {
            debug!("{}: no OS hook for {}", module.name, self.host.os);
        }

        // 5. Install hook.
        let install = module.install_script();
        let code = adapter.run(&module.name, "install", &install, &module.dir, env)?;
        operations.push(
            Operation::new(OperationType::ScriptRun, "install", &install)
                .with_meta("exit_code", code.to_string()),
        );
        if code != 0 {
            return Err(DotsmithError::InstallFailed(format!(
                "{} exited with status {}",
                install.display(),
                code
            )));
        }

        // 6. File deployment, in declaration order.
        let context = self.template_context(module)?;
        let deployer = FileDeployer {
            module,
            renderer: self.renderer,
            context: &context,
            observer: self.observer,
            home: self.host.home.clone(),
            dry_run: self.options.dry_run,
            force: self.options.force,
        };
        let deploy_result = deployer.deploy_all(prior_file_states, deploy_outcome);
        operations.append(&mut deploy_outcome.operations);
        deploy_result?;

        // 7. Verify hook (optional).
        let mut verify_warning = None;
        if let Some(script) = module.verify_script() {
            let code = adapter.run(&module.name, "verify", &script, &module.dir, env)?;
            operations.push(
                Operation::new(OperationType::ScriptRun, "verify", &script)
                    .with_meta("exit_code", code.to_string()),
            );
            if code != 0 {
                if self.options.strict {
                    return Err(DotsmithError::InstallFailed(format!(
                        "verify hook exited with status {}",
                        code
                    )));
                }
                verify_warning = Some(format!("verify hook exited with status {}", code));
            }
        }

        Ok(verify_warning)
    }

    fn decide(
        &self,
        state: Option<&ModuleState>,
        module_checksum: &str,
        config_hash: &str,
    ) -> ModuleAction {
        decide_action(&self.options, state, module_checksum, config_hash)
    }

    fn template_context(&self, module: &ModuleManifest) -> Result<TemplateContext> {
        let needs_secrets = module.files.iter().any(|f| f.kind == FileKind::Template)
            && !self.config.secrets.is_empty();
        let secrets = if needs_secrets {
            self.resolved_secrets(module)?
        } else {
            BTreeMap::new()
        };
        TemplateContext::new(
            self.config,
            self.host,
            &self.config.module_config(&module.name),
            secrets,
        )
    }

    fn resolved_secrets(&self, module: &ModuleManifest) -> Result<BTreeMap<String, String>> {
        if let Some(ref cached) = *self.resolved_secrets.borrow() {
            return Ok(cached.clone());
        }
        let mut resolved = BTreeMap::new();
        for (name, reference) in &self.config.secrets {
            debug!("{}: resolving secret '{}'", module.name, name);
            let value = self.secrets.get(reference)?;
            resolved.insert(name.clone(), value);
        }
        *self.resolved_secrets.borrow_mut() = Some(resolved.clone());
        Ok(resolved)
    }

    /// Exactly one `state.set` per module per run, success or failure.
    #[allow(clippy::too_many_arguments)]
    fn write_state(
        &self,
        module: &ModuleManifest,
        prior: Option<ModuleState>,
        status: ModuleStatus,
        error: Option<String>,
        module_checksum: &str,
        config_hash: &str,
        new_operations: Vec<Operation>,
        file_states: Vec<crate::state::FileState>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut state = prior.unwrap_or_else(|| ModuleState {
            name: module.name.clone(),
            version: module.version.clone(),
            status,
            installed_at: now,
            updated_at: now,
            os: self.host.os.clone(),
            error: None,
            checksum: String::new(),
            config_hash: String::new(),
            file_states: Vec::new(),
            operations: Vec::new(),
        });

        state.version = module.version.clone();
        state.status = status;
        state.os = self.host.os.clone();
        state.error = error;
        state.checksum = module_checksum.to_string();
        state.config_hash = config_hash.to_string();
        match status {
            // Success: the new records are the whole truth.
            ModuleStatus::Installed => state.file_states = file_states,
            // Failure mid-deploy: upsert what got done, keep the rest.
            _ => {
                for new in file_states {
                    match state.file_states.iter_mut().find(|f| f.dest == new.dest) {
                        Some(slot) => *slot = new,
                        None => state.file_states.push(new),
                    }
                }
            }
        }
        state.operations.extend(new_operations);

        self.store.set(&state)
    }

    fn record_failure(&self, module: &ModuleManifest, error: DotsmithError) -> ModuleOutcome {
        let interrupted = matches!(error, DotsmithError::Interrupted);
        let message = error.to_string();
        self.observer.event(&Event::Fail {
            module: module.name.clone(),
            message: message.clone(),
        });
        ModuleOutcome::Failed {
            error: message,
            interrupted,
        }
    }
}

/// The execution decision function (evaluated top-down).
pub fn decide_action(
    options: &RunOptions,
    state: Option<&ModuleState>,
    module_checksum: &str,
    config_hash: &str,
) -> ModuleAction {
    if options.force {
        return ModuleAction::Install;
    }

    let Some(state) = state else {
        if options.update_only {
            return ModuleAction::Skip(SkipCause::NeverInstalled);
        }
        return ModuleAction::Install;
    };

    if state.status == ModuleStatus::Failed {
        if options.skip_failed {
            return ModuleAction::Skip(SkipCause::PriorFailure);
        }
        return ModuleAction::Install;
    }

    if state.checksum != module_checksum || state.config_hash != config_hash {
        return ModuleAction::Update;
    }

    if deploy::detect_drift(&state.file_states) {
        return ModuleAction::Update;
    }

    ModuleAction::Skip(SkipCause::UpToDate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn installed_state(checksum: &str, config_hash: &str) -> ModuleState {
        ModuleState {
            name: "git".to_string(),
            version: "1.0.0".to_string(),
            status: ModuleStatus::Installed,
            installed_at: Utc::now(),
            updated_at: Utc::now(),
            os: "ubuntu".to_string(),
            error: None,
            checksum: checksum.to_string(),
            config_hash: config_hash.to_string(),
            file_states: vec![],
            operations: vec![],
        }
    }

    #[test]
    fn test_force_always_installs() {
        let options = RunOptions {
            force: true,
            ..Default::default()
        };
        let state = installed_state("h", "c");
        assert_eq!(
            decide_action(&options, Some(&state), "h", "c"),
            ModuleAction::Install
        );
    }

    #[test]
    fn test_fresh_module_installs() {
        let options = RunOptions::default();
        assert_eq!(decide_action(&options, None, "h", "c"), ModuleAction::Install);
    }

    #[test]
    fn test_update_only_skips_never_installed() {
        let options = RunOptions {
            update_only: true,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&options, None, "h", "c"),
            ModuleAction::Skip(SkipCause::NeverInstalled)
        );
    }

    #[test]
    fn test_failed_state_retries_unless_skip_failed() {
        let mut state = installed_state("h", "c");
        state.status = ModuleStatus::Failed;

        let options = RunOptions::default();
        assert_eq!(
            decide_action(&options, Some(&state), "h", "c"),
            ModuleAction::Install
        );

        let options = RunOptions {
            skip_failed: true,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&options, Some(&state), "h", "c"),
            ModuleAction::Skip(SkipCause::PriorFailure)
        );
    }

    #[test]
    fn test_checksum_or_config_change_updates() {
        let options = RunOptions::default();
        let state = installed_state("h1", "c1");
        assert_eq!(
            decide_action(&options, Some(&state), "h2", "c1"),
            ModuleAction::Update
        );
        assert_eq!(
            decide_action(&options, Some(&state), "h1", "c2"),
            ModuleAction::Update
        );
    }

    #[test]
    fn test_clean_state_skips_up_to_date() {
        let options = RunOptions::default();
        let state = installed_state("h", "c");
        assert_eq!(
            decide_action(&options, Some(&state), "h", "c"),
            ModuleAction::Skip(SkipCause::UpToDate)
        );
    }

    #[test]
    fn test_migrated_record_without_hashes_counts_as_drift() {
        let options = RunOptions::default();
        let mut state = installed_state("h", "c");
        state.file_states.push(crate::state::FileState {
            source: "/src".into(),
            dest: "/dest".into(),
            kind: "copy".to_string(),
            deployed_at: Utc::now(),
            source_hash: String::new(),
            deployed_hash: String::new(),
            user_modified: false,
            last_checked: Utc::now(),
        });
        assert_eq!(
            decide_action(&options, Some(&state), "h", "c"),
            ModuleAction::Update
        );
    }
}
