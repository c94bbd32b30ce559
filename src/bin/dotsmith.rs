use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use dotsmith::config::{default_dotfiles_dir, GlobalConfig};
use dotsmith::events::TracingObserver;
use dotsmith::host::HostInfo;
use dotsmith::module::ModuleRegistry;
use dotsmith::orchestrator::{self, Orchestrator, Summary};
use dotsmith::runner::prompt::{DefaultsPrompter, InteractivePrompter, Prompter};
use dotsmith::runner::{ModuleRunner, RunOptions};
use dotsmith::secrets::{OnePasswordCli, SecretsProvider};
use dotsmith::state::StateStore;
use dotsmith::template::{HandlebarsRenderer, TemplateContext, TemplateRenderer};
use dotsmith::util::process::install_interrupt_handler;

#[derive(Parser)]
#[command(name = "dotsmith", about = "dotsmith dotfiles installer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Dotfiles repository root (defaults to $DOTFILES_DIR or ~/.dotfiles)
    #[arg(long, global = true)]
    dotfiles_dir: Option<PathBuf>,

    /// Path to config file (bypasses config.yml/config.local.yml layering)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Surface decision-table outcomes and per-file actions
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or update modules
    Install {
        /// Module names to install
        modules: Vec<String>,

        /// Install a named profile from the configuration
        #[arg(long, short)]
        profile: Option<String>,

        /// Describe what would happen without mutating anything
        #[arg(long)]
        dry_run: bool,

        /// Ignore up-to-date verdicts; always run install and deploy
        #[arg(long, short)]
        force: bool,

        /// Act only on drift; do not install never-installed modules
        #[arg(long)]
        update_only: bool,

        /// Skip modules whose previous run failed
        #[arg(long)]
        skip_failed: bool,

        /// Never prompt; use declared defaults
        #[arg(long, short = 'y')]
        unattended: bool,

        /// Show explicit-install prompts for dependencies too
        #[arg(long)]
        prompt_dependencies: bool,

        /// Treat a failed verify hook as a module failure
        #[arg(long)]
        strict: bool,
    },
    /// List available modules and their install status
    List,
    /// Show persisted state for one module, or all
    Status {
        /// Module name
        module: Option<String>,
    },
    /// Remove deployed files and state for modules
    Uninstall {
        /// Module names to uninstall
        #[arg(required = true)]
        modules: Vec<String>,

        /// Only remove state; leave deployed files on disk
        #[arg(long)]
        keep_files: bool,
    },
    /// Render a template with the standard context (helper callback)
    RenderTemplate {
        /// Template source path
        #[arg(long)]
        src: PathBuf,

        /// Output path
        #[arg(long)]
        dest: PathBuf,

        /// Module directory the template belongs to
        #[arg(long)]
        module: PathBuf,
    },
    /// Resolve a secret reference and print it (helper callback)
    GetSecret {
        /// Provider reference, e.g. op://vault/item/field
        #[arg(long = "ref")]
        reference: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let dotfiles_dir = cli.dotfiles_dir.unwrap_or_else(default_dotfiles_dir);
    let config = GlobalConfig::load(&dotfiles_dir, cli.config.as_deref())
        .context("failed to load config")?;
    let host = HostInfo::detect();

    match cli.command {
        Commands::Install {
            modules,
            profile,
            dry_run,
            force,
            update_only,
            skip_failed,
            unattended,
            prompt_dependencies,
            strict,
        } => {
            let registry = ModuleRegistry::load(&config.modules_dir())
                .context("failed to load modules")?;

            let selection = match (&profile, modules.is_empty()) {
                (Some(name), _) => registry.resolve_profile(&config, name)?,
                (None, false) => registry.resolve_selection(&modules)?,
                (None, true) => {
                    eprintln!("error: name modules to install or pass --profile");
                    std::process::exit(2);
                }
            };

            let options = RunOptions {
                dry_run,
                force,
                skip_failed,
                update_only,
                unattended,
                prompt_dependencies,
                strict,
                verbose: cli.verbose,
            };

            let store = StateStore::open(&config.state_dir())
                .context("failed to open state directory")?;
            let observer = TracingObserver {
                verbose: cli.verbose,
            };
            let renderer = HandlebarsRenderer::new();
            let secrets = OnePasswordCli::new();
            let prompter: Box<dyn Prompter> = if options.interactive() {
                Box::new(InteractivePrompter)
            } else {
                Box::new(DefaultsPrompter)
            };

            install_interrupt_handler();

            let runner = ModuleRunner::new(
                &config, &host, &store, &observer, &renderer, &secrets, prompter.as_ref(), options,
            );
            let orchestrator = Orchestrator {
                registry: &registry,
                host: &host,
                runner,
                observer: &observer,
            };

            let summary = match orchestrator.run(&selection) {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("error: {}", e);
                    std::process::exit(1);
                }
            };

            print_summary(&summary, dry_run);
            if !summary.success() {
                std::process::exit(1);
            }
        }
        Commands::List => {
            let registry = ModuleRegistry::load(&config.modules_dir())
                .context("failed to load modules")?;
            let store = StateStore::open(&config.state_dir())
                .context("failed to open state directory")?;

            for name in registry.names() {
                let manifest = registry.get(&name).unwrap();
                let status = match store.get(&name)? {
                    Some(state) => format!("{:?}", state.status).to_lowercase(),
                    None => "not installed".to_string(),
                };
                println!("{:<20} {:<14} {}", name, status, manifest.description);
            }
        }
        Commands::Status { module } => {
            let store = StateStore::open(&config.state_dir())
                .context("failed to open state directory")?;

            let states = match module {
                Some(ref name) => match store.get(name)? {
                    Some(state) => vec![state],
                    None => {
                        eprintln!("no state for module '{}'", name);
                        std::process::exit(1);
                    }
                },
                None => {
                    let mut all = store.get_all()?;
                    all.sort_by(|a, b| a.name.cmp(&b.name));
                    all
                }
            };

            for state in &states {
                println!("{} {}", state.name, state.version);
                println!("  status     : {:?}", state.status);
                println!("  os         : {}", state.os);
                println!("  installed  : {}", state.installed_at);
                println!("  updated    : {}", state.updated_at);
                if let Some(ref error) = state.error {
                    println!("  error      : {}", error);
                }
                println!("  files      : {}", state.file_states.len());
                for file in &state.file_states {
                    let marker = if file.user_modified { " [modified]" } else { "" };
                    println!("    {} ({}){}", file.dest.display(), file.kind, marker);
                }
                println!("  operations : {}", state.operations.len());
            }
        }
        Commands::Uninstall {
            modules,
            keep_files,
        } => {
            let store = StateStore::open(&config.state_dir())
                .context("failed to open state directory")?;
            let observer = TracingObserver {
                verbose: cli.verbose,
            };

            for name in &modules {
                match orchestrator::uninstall(&store, &observer, name, keep_files) {
                    Ok(()) => println!("uninstalled: {}", name),
                    Err(e) => {
                        eprintln!("error uninstalling {}: {}", name, e);
                        std::process::exit(1);
                    }
                }
            }
        }
        Commands::RenderTemplate { src, dest, module } => {
            let module_name = module
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let secrets_provider = OnePasswordCli::new();
            let mut secrets = std::collections::BTreeMap::new();
            for (name, reference) in &config.secrets {
                let value = secrets_provider
                    .get(reference)
                    .context(format!("failed to resolve secret '{}'", name))?;
                secrets.insert(name.clone(), value);
            }

            let context = TemplateContext::new(
                &config,
                &host,
                &config.module_config(&module_name),
                secrets,
            )?;
            let renderer = HandlebarsRenderer::new();
            let rendered = renderer.render_file(&src, &context)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, rendered)
                .context(format!("failed to write {}", dest.display()))?;
        }
        Commands::GetSecret { reference } => {
            let provider = OnePasswordCli::new();
            match provider.get(&reference) {
                Ok(secret) => println!("{}", secret),
                Err(e) => {
                    eprintln!("error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &Summary, dry_run: bool) {
    println!();
    if dry_run {
        println!("{}", "dry run: nothing was changed".bold());
    }

    if !summary.installed.is_empty() {
        println!(
            "{} {}",
            "installed:".green().bold(),
            summary.installed.join(", ")
        );
    }
    if !summary.updated.is_empty() {
        println!(
            "{} {}",
            "updated:".green().bold(),
            summary.updated.join(", ")
        );
    }
    if !summary.skipped.is_empty() {
        // Group by reason for a compact report.
        let mut by_reason: std::collections::BTreeMap<&str, Vec<&str>> = Default::default();
        for (name, reason) in &summary.skipped {
            by_reason.entry(reason).or_default().push(name);
        }
        for (reason, names) in by_reason {
            println!(
                "{} {} ({})",
                "skipped:".yellow().bold(),
                names.join(", "),
                reason
            );
        }
    }
    if !summary.failed.is_empty() {
        for (name, error) in &summary.failed {
            println!("{} {}: {}", "failed:".red().bold(), name, error);
        }
    }

    for (name, notes) in &summary.notes {
        println!();
        println!("{} {}", "note".cyan().bold(), format!("({})", name).dimmed());
        println!("{}", notes);
    }
}
