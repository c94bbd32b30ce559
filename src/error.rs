use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DotsmithError {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("duplicate module name: {0}")]
    DuplicateName(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("missing source file: {path} (module {module})")]
    MissingSource { module: String, path: PathBuf },

    #[error("dependency cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("module {module} does not support this host ({os})")]
    OsMismatch { module: String, os: String },

    #[error("module {module} requires command not on PATH: {command}")]
    MissingRequirement { module: String, command: String },

    #[error("OS hook failed: {0}")]
    OsHookFailed(String),

    #[error("install hook failed: {0}")]
    InstallFailed(String),

    #[error("deploy error: {0}")]
    DeployFailed(String),

    #[error("template error: {0}")]
    TemplateFailed(String),

    #[error("secret unavailable: {0}")]
    SecretUnavailable(String),

    #[error("deadline of {seconds}s exceeded: {what}")]
    Deadline { what: String, seconds: u64 },

    #[error("interrupted")]
    Interrupted,

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("state error: {0}")]
    StateError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DotsmithError>;

impl DotsmithError {
    /// True when the error ends the whole run rather than one module.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DotsmithError::MalformedManifest(_)
                | DotsmithError::DuplicateName(_)
                | DotsmithError::UnknownModule(_)
                | DotsmithError::MissingSource { .. }
                | DotsmithError::Cycle(_)
                | DotsmithError::OsMismatch { .. }
                | DotsmithError::ConfigError(_)
        )
    }
}

/// Extension trait that adds `.context()` to any Result,
/// converting errors into DotsmithError::StateError with a context message.
/// Mirrors anyhow::Context so orchestrator/runner can use familiar syntax.
pub trait DotsmithResultExt<T> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: std::fmt::Display> DotsmithResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| DotsmithError::StateError(format!("{}: {}", msg, e)))
    }
}
