//! Resumable workflow engine CLI.
//!
//! Reads `.conductor/config.toml`, persists progress to `.conductor/state.json`
//! and drives units of work through a remote coding agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use conductor::core::state::OrchestrationState;
use conductor::core::types::{Phase, UnitKey, UnitKind, WorkUnit};
use conductor::engine::{Engine, EngineConfig, bind_session};
use conductor::error::EngineError;
use conductor::exit_codes;
use conductor::io::agent::CursorAgentClient;
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::init::{ConductorPaths, init_conductor};
use conductor::io::oracle::ConfiguredOracle;
use conductor::io::prompt::{PromptAssembler, TemplatePrompts};
use conductor::io::registry::Registry;
use conductor::io::state_store::{JsonFileStore, StateStore};
use conductor::logging;
use conductor::looping::{run_single, run_staged, run_tasks};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Resumable workflow engine for remote coding agents"
)]
struct Cli {
    /// Project root containing `.conductor/` and the spec documents.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` with a default config.
    Init {
        /// Overwrite the existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Process units until the scope is exhausted or a unit fails terminally.
    Run {
        /// Which units to process when no single unit is selected.
        #[arg(long, value_enum, default_value_t = Scope::Tasks)]
        scope: Scope,
        /// Kind of the unit selected with `--unit`.
        #[arg(long, default_value = "task")]
        kind: UnitKind,
        /// Process only this unit (e.g. `T001`).
        #[arg(long, alias = "task")]
        unit: Option<String>,
        /// Print the launch prompts without launching anything.
        #[arg(long)]
        dry_run: bool,
        /// Treat every finished session as verified.
        #[arg(long)]
        skip_verification: bool,
    },
    /// Attach an existing remote session to a unit so the next run resumes it.
    Bind {
        #[arg(long, default_value = "task")]
        kind: UnitKind,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        session: String,
    },
    /// Print lineage, phase and per-unit progress.
    Status {
        /// Print the raw state record as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scope {
    /// Open checklist tasks in file order.
    Tasks,
    /// Features, then polish phases.
    Staged,
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            let code = err
                .downcast_ref::<EngineError>()
                .map_or(exit_codes::FAILED, exit_codes::for_error);
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ConductorPaths::new(&cli.project_dir);
    match cli.command {
        Command::Init { force } => {
            let paths = init_conductor(&paths.root, force)?;
            println!("initialized {}", paths.conductor_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Run {
            scope,
            kind,
            unit,
            dry_run,
            skip_verification,
        } => {
            let mut config = load_settings(&paths)?;
            config.skip_verification |= skip_verification;
            let target = match unit {
                Some(id) => Target::Single(kind, id),
                None => Target::Scope(scope),
            };
            if dry_run {
                cmd_dry_run(&paths, &config, &target)
            } else {
                cmd_run(&paths, &config, &target)
            }
        }
        Command::Bind {
            kind,
            unit,
            session,
        } => cmd_bind(&paths, &UnitKey::new(kind, unit), &session),
        Command::Status { json } => cmd_status(&paths, json),
    }
}

enum Target {
    Single(UnitKind, String),
    Scope(Scope),
}

fn load_settings(paths: &ConductorPaths) -> Result<ConductorConfig> {
    Ok(load_config(&paths.config_path)?.with_env_overrides())
}

fn find_unit(registry: &Registry, kind: UnitKind, id: &str) -> Result<WorkUnit> {
    registry
        .find(kind, id)?
        .with_context(|| format!("no {kind} named '{id}'"))
}

fn engine_config(paths: &ConductorPaths, config: &ConductorConfig) -> EngineConfig {
    EngineConfig {
        max_retries: config.max_retries,
        poll_interval: config.monitor.poll_interval(),
        max_poll_attempts: config.monitor.max_poll_attempts,
        skip_verification: config.skip_verification,
        repository_url: config.repository_url.clone(),
        model: config.model.clone(),
        checklist_path: Some(paths.resolve(&config.documents.tasks)),
    }
}

fn cmd_dry_run(paths: &ConductorPaths, config: &ConductorConfig, target: &Target) -> Result<i32> {
    let registry = Registry::from_config(paths, config);
    let prompts = TemplatePrompts::new(&paths.root)?;
    let units = match target {
        Target::Single(kind, id) => vec![find_unit(&registry, *kind, id)?],
        Target::Scope(Scope::Tasks) => registry.units(UnitKind::Task)?,
        Target::Scope(Scope::Staged) => {
            let store = JsonFileStore::new(&paths.state_path, &config.default_branch);
            match store.load()?.current_phase {
                Phase::Features => registry.units(UnitKind::Feature)?,
                Phase::Polish => registry.units(UnitKind::Polish)?,
                Phase::Complete => Vec::new(),
            }
        }
    };
    if units.is_empty() {
        println!("nothing to run");
    }
    for unit in &units {
        let prompt = prompts
            .launch_prompt(unit)
            .with_context(|| format!("assemble prompt for {}", unit.key()))?;
        println!("\n--- DRY RUN: PROMPT ({}) ---", unit.display_name());
        println!("{prompt}");
        println!("--- END PROMPT ---\n");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &ConductorPaths, config: &ConductorConfig, target: &Target) -> Result<i32> {
    if config.repository_url.trim().is_empty() {
        bail!("repository_url is not set (set it in config.toml or via GITHUB_REPO_URL)");
    }
    let registry = Registry::from_config(paths, config);
    let prompts = TemplatePrompts::new(&paths.root)?;
    let store = JsonFileStore::new(&paths.state_path, &config.default_branch);
    let mut state = store.load()?;
    let agent = CursorAgentClient::from_env(
        &config.agent.api_base,
        &config.agent.api_key_env,
        Duration::from_secs(config.agent.timeout_secs),
    )?;
    let oracle =
        ConfiguredOracle::from_config(&config.oracle, &paths.root, !config.skip_verification)?;
    let engine = Engine::new(
        &store,
        &agent,
        &oracle,
        &prompts,
        engine_config(paths, config),
    );

    let report = match target {
        Target::Single(kind, id) => {
            let unit = find_unit(&registry, *kind, id)?;
            run_single(&engine, &mut state, &unit)?
        }
        Target::Scope(Scope::Tasks) => run_tasks(&engine, &mut state, &registry)?,
        Target::Scope(Scope::Staged) => run_staged(&engine, &mut state, &registry)?,
    };

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        "run finished"
    );
    for key in &report.completed {
        println!("completed {key}");
    }
    for key in &report.skipped {
        println!("skipped   {key} (already completed)");
    }
    println!("lineage   {}", state.lineage_branch);
    Ok(exit_codes::OK)
}

fn cmd_bind(paths: &ConductorPaths, key: &UnitKey, session: &str) -> Result<i32> {
    let config = load_settings(paths)?;
    let store = JsonFileStore::new(&paths.state_path, &config.default_branch);
    let mut state = store.load()?;
    if bind_session(&store, &mut state, key, session)? {
        println!("bound {session} to {key}");
        Ok(exit_codes::OK)
    } else {
        eprintln!("{key} is already completed; not binding");
        Ok(exit_codes::FAILED)
    }
}

fn cmd_status(paths: &ConductorPaths, json: bool) -> Result<i32> {
    let config = load_settings(paths)?;
    let state = JsonFileStore::new(&paths.state_path, &config.default_branch).load()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", render_status(&state));
    }
    Ok(exit_codes::OK)
}

fn render_status(state: &OrchestrationState) -> String {
    let mut out = format!(
        "lineage: {}\nphase:   {}\n",
        state.lineage_branch,
        state.current_phase.as_str()
    );
    if state.units.is_empty() {
        out.push_str("no units started\n");
    }
    for (key, progress) in &state.units {
        out.push_str(&format!(
            "{:<24} {:<9} retries={} session={}\n",
            key.to_string(),
            progress.status.as_str(),
            progress.retry_count,
            progress.session_id.as_deref().unwrap_or("-"),
        ));
        if let Some(feedback) = &progress.last_feedback {
            out.push_str(&format!("    last feedback: {feedback}\n"));
        }
    }
    out
}
