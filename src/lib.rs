//! dotsmith: a modular, idempotent dotfiles and developer-environment
//! installer.
//!
//! Modules declare packages, configuration files, and shell hooks in a
//! `module.yml`; the orchestrator resolves dependencies, plans an execution
//! order, and drives each module through detect → prompt → OS hook →
//! install → deploy → verify, persisting per-module state so repeated runs
//! only act on genuine change.

pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod host;
pub mod module;
pub mod orchestrator;
pub mod resolver;
pub mod runner;
pub mod secrets;
pub mod state;
pub mod template;
pub mod util;
