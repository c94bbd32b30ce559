use std::collections::BTreeMap;
use std::path::Path;

use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;

use crate::config::GlobalConfig;
use crate::error::{DotsmithError, Result};
use crate::host::HostInfo;

/// The standard context every template sees.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    #[serde(rename = "User")]
    pub user: UserContext,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "Arch")]
    pub arch: String,
    #[serde(rename = "Home")]
    pub home: String,
    #[serde(rename = "DotfilesDir")]
    pub dotfiles_dir: String,
    /// Module-scoped configuration subtree.
    #[serde(rename = "Module")]
    pub module: serde_json::Value,
    #[serde(rename = "Secrets")]
    pub secrets: BTreeMap<String, String>,
    #[serde(rename = "Env")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserContext {
    pub name: String,
    pub email: String,
    pub github_user: String,
}

impl TemplateContext {
    pub fn new(
        config: &GlobalConfig,
        host: &HostInfo,
        module_config: &serde_yaml::Value,
        secrets: BTreeMap<String, String>,
    ) -> Result<Self> {
        let module = serde_json::to_value(module_config)
            .map_err(|e| DotsmithError::TemplateFailed(format!("module config: {}", e)))?;

        Ok(Self {
            user: UserContext {
                name: config.user.name.clone(),
                email: config.user.email.clone(),
                github_user: config.user.github_user.clone(),
            },
            os: host.os.clone(),
            arch: host.arch.clone(),
            home: host.home.to_string_lossy().into_owned(),
            dotfiles_dir: config.dotfiles_dir.to_string_lossy().into_owned(),
            module,
            secrets,
            env: std::env::vars().collect(),
        })
    }
}

/// Seam between the deployer and whatever produces rendered bytes.
pub trait TemplateRenderer {
    fn render_str(&self, template: &str, ctx: &TemplateContext) -> Result<String>;

    fn render_file(&self, src: &Path, ctx: &TemplateContext) -> Result<String> {
        let template = std::fs::read_to_string(src).map_err(|e| {
            DotsmithError::TemplateFailed(format!("failed to read {}: {}", src.display(), e))
        })?;
        self.render_str(&template, ctx)
    }
}

handlebars_helper!(helper_env: |name: str| std::env::var(name).unwrap_or_default());
handlebars_helper!(helper_upper: |s: str| s.to_uppercase());
handlebars_helper!(helper_lower: |s: str| s.to_lowercase());
handlebars_helper!(helper_trim_space: |s: str| s.trim().to_string());
handlebars_helper!(helper_contains: |haystack: str, needle: str| haystack.contains(needle));
handlebars_helper!(helper_default: |value: Json, fallback: Json| {
    match value {
        serde_json::Value::Null => fallback.clone(),
        serde_json::Value::String(s) if s.is_empty() => fallback.clone(),
        other => other.clone(),
    }
});
handlebars_helper!(helper_join: |items: Json, sep: str| {
    match items {
        serde_json::Value::Array(arr) => arr
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(sep),
        other => other.to_string(),
    }
});

pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("env", Box::new(helper_env));
        registry.register_helper("upper", Box::new(helper_upper));
        registry.register_helper("lower", Box::new(helper_lower));
        registry.register_helper("trimSpace", Box::new(helper_trim_space));
        registry.register_helper("contains", Box::new(helper_contains));
        registry.register_helper("default", Box::new(helper_default));
        registry.register_helper("join", Box::new(helper_join));
        Self { registry }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render_str(&self, template: &str, ctx: &TemplateContext) -> Result<String> {
        self.registry
            .render_template(template, ctx)
            .map_err(|e| DotsmithError::TemplateFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        TemplateContext {
            user: UserContext {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                github_user: "alice".to_string(),
            },
            os: "ubuntu".to_string(),
            arch: "x86_64".to_string(),
            home: "/home/alice".to_string(),
            dotfiles_dir: "/home/alice/.dotfiles".to_string(),
            module: serde_json::json!({"editor": "vim", "plugins": ["a", "b"]}),
            secrets: BTreeMap::from([("token".to_string(), "s3cret".to_string())]),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_render_context_fields() {
        let renderer = HandlebarsRenderer::new();
        let out = renderer
            .render_str("{{User.name}} <{{User.email}}> on {{OS}}/{{Arch}}", &context())
            .unwrap();
        assert_eq!(out, "Alice <alice@example.com> on ubuntu/x86_64");
    }

    #[test]
    fn test_module_and_secrets() {
        let renderer = HandlebarsRenderer::new();
        let out = renderer
            .render_str("editor={{Module.editor}} token={{Secrets.token}}", &context())
            .unwrap();
        assert_eq!(out, "editor=vim token=s3cret");
    }

    #[test]
    fn test_helpers() {
        let renderer = HandlebarsRenderer::new();
        let ctx = context();
        assert_eq!(
            renderer.render_str("{{upper User.name}}", &ctx).unwrap(),
            "ALICE"
        );
        assert_eq!(
            renderer.render_str("{{lower \"ABC\"}}", &ctx).unwrap(),
            "abc"
        );
        assert_eq!(
            renderer
                .render_str("{{trimSpace \"  x  \"}}", &ctx)
                .unwrap(),
            "x"
        );
        assert_eq!(
            renderer
                .render_str("{{join Module.plugins \", \"}}", &ctx)
                .unwrap(),
            "a, b"
        );
        assert_eq!(
            renderer
                .render_str("{{default Module.missing \"fallback\"}}", &ctx)
                .unwrap(),
            "fallback"
        );
        assert_eq!(
            renderer
                .render_str("{{#if (contains User.email \"@\")}}ok{{/if}}", &ctx)
                .unwrap(),
            "ok"
        );
    }

    #[test]
    fn test_bad_template_is_template_failed() {
        let renderer = HandlebarsRenderer::new();
        let err = renderer
            .render_str("{{#if}}unterminated", &context())
            .unwrap_err();
        assert!(matches!(err, DotsmithError::TemplateFailed(_)));
    }
}
