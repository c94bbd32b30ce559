use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{DotsmithError, Result};
use crate::module::{ModuleManifest, PromptKind, PromptSpec, ShowWhen};

/// Asks the user one question. The interactive implementation talks to the
/// terminal; tests and unattended runs use defaults.
pub trait Prompter {
    fn ask(&self, spec: &PromptSpec) -> Result<String>;
}

/// Whether a prompt should be displayed at all for this module in this run.
///
/// `explicit_install` prompts surface only for modules the user named on the
/// command line; dependencies stay silent and use defaults unless the
/// `prompt_dependencies` flag reinstates the old behaviour. Nothing is ever
/// displayed outside interactive mode.
pub fn should_display(
    spec: &PromptSpec,
    explicit: bool,
    interactive: bool,
    prompt_dependencies: bool,
) -> bool {
    if !interactive {
        return false;
    }
    match spec.show_when {
        ShowWhen::ExplicitInstall => explicit || prompt_dependencies,
        ShowWhen::Always | ShowWhen::Interactive => true,
    }
}

fn default_value(spec: &PromptSpec) -> String {
    match spec.default {
        Some(ref d) => d.clone(),
        None => match spec.kind {
            PromptKind::Confirm => "false".to_string(),
            PromptKind::Choice => spec.options.first().cloned().unwrap_or_default(),
            PromptKind::Input => String::new(),
        },
    }
}

/// Resolve every prompt of a module to a value, displaying only the gated
/// ones. Keys are returned as declared; the hook environment upper-cases
/// them into `DOTFILES_PROMPT_<KEY>`.
pub fn resolve_prompts(
    module: &ModuleManifest,
    prompter: &dyn Prompter,
    explicit: bool,
    interactive: bool,
    prompt_dependencies: bool,
) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();

    for spec in &module.prompts {
        let value = if should_display(spec, explicit, interactive, prompt_dependencies) {
            prompter.ask(spec)?
        } else {
            debug!(
                "{}: prompt '{}' suppressed, using default",
                module.name, spec.key
            );
            default_value(spec)
        };
        values.insert(spec.key.clone(), value);
    }

    Ok(values)
}

/// Terminal prompter.
pub struct InteractivePrompter;

impl Prompter for InteractivePrompter {
    fn ask(&self, spec: &PromptSpec) -> Result<String> {
        let fail = |e: inquire::InquireError| {
            DotsmithError::InstallFailed(format!("prompt '{}' failed: {}", spec.key, e))
        };

        match spec.kind {
            PromptKind::Input => {
                let mut prompt = inquire::Text::new(&spec.message);
                if let Some(ref default) = spec.default {
                    prompt = prompt.with_default(default);
                }
                prompt.prompt().map_err(fail)
            }
            PromptKind::Confirm => {
                let default = spec
                    .default
                    .as_deref()
                    .map(|d| d.eq_ignore_ascii_case("true") || d == "yes" || d == "y")
                    .unwrap_or(false);
                inquire::Confirm::new(&spec.message)
                    .with_default(default)
                    .prompt()
                    .map(|b| b.to_string())
                    .map_err(fail)
            }
            PromptKind::Choice => {
                let options: Vec<&str> = spec.options.iter().map(String::as_str).collect();
                let start = spec
                    .default
                    .as_deref()
                    .and_then(|d| options.iter().position(|o| *o == d))
                    .unwrap_or(0);
                inquire::Select::new(&spec.message, options)
                    .with_starting_cursor(start)
                    .prompt()
                    .map(|s| s.to_string())
                    .map_err(fail)
            }
        }
    }
}

/// Never displays anything; every answer is the declared default.
pub struct DefaultsPrompter;

impl Prompter for DefaultsPrompter {
    fn ask(&self, spec: &PromptSpec) -> Result<String> {
        Ok(default_value(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records which prompts were displayed and answers with a fixed value.
    pub struct RecordingPrompter {
        pub asked: Mutex<Vec<String>>,
        pub answer: String,
    }

    impl Prompter for RecordingPrompter {
        fn ask(&self, spec: &PromptSpec) -> Result<String> {
            self.asked.lock().unwrap().push(spec.key.clone());
            Ok(self.answer.clone())
        }
    }

    fn module(show_when: &str) -> ModuleManifest {
        ModuleManifest::from_str(&format!(
            r#"
name: zsh
version: "1.0.0"
prompts:
  - key: theme
    message: Which theme?
    default: minimal
    show_when: {}
"#,
            show_when
        ))
        .unwrap()
    }

    #[test]
    fn test_explicit_install_gating() {
        let m = module("explicit_install");
        let spec = &m.prompts[0];
        assert!(should_display(spec, true, true, false));
        assert!(!should_display(spec, false, true, false));
        // prompt_dependencies reinstates the old behaviour
        assert!(should_display(spec, false, true, true));
        // never outside interactive mode
        assert!(!should_display(spec, true, false, false));
    }

    #[test]
    fn test_always_and_interactive_follow_interactivity() {
        for show_when in ["always", "interactive"] {
            let m = module(show_when);
            let spec = &m.prompts[0];
            assert!(should_display(spec, false, true, false));
            assert!(!should_display(spec, false, false, false));
        }
    }

    #[test]
    fn test_suppressed_prompt_uses_default() {
        let m = module("explicit_install");
        let prompter = RecordingPrompter {
            asked: Mutex::new(vec![]),
            answer: "powerline".to_string(),
        };

        // Dependency module: prompt suppressed
        let values = resolve_prompts(&m, &prompter, false, true, false).unwrap();
        assert_eq!(values["theme"], "minimal");
        assert!(prompter.asked.lock().unwrap().is_empty());

        // Explicit module: prompt displayed
        let values = resolve_prompts(&m, &prompter, true, true, false).unwrap();
        assert_eq!(values["theme"], "powerline");
        assert_eq!(*prompter.asked.lock().unwrap(), vec!["theme"]);
    }

    #[test]
    fn test_confirm_default_when_missing() {
        let m = ModuleManifest::from_str(
            r#"
name: zsh
version: "1.0.0"
prompts:
  - key: enable
    message: Enable?
    type: confirm
"#,
        )
        .unwrap();
        let values = resolve_prompts(&m, &DefaultsPrompter, false, false, false).unwrap();
        assert_eq!(values["enable"], "false");
    }
}
