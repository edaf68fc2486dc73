//! fngate CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use fngate_deploy::cli::{Cli, Commands, MessageLevel, OutputFormatter, StateCommands};
use fngate_deploy::config::{
    ConfigParser, ConfigValidator, StackConfig, StateBackend, find_config_file,
};
use fngate_deploy::deployer::StackDeployer;
use fngate_deploy::error::{FngateError, Result};
use fngate_deploy::orchestrator::Orchestrator;
use fngate_deploy::planner::DependencyGraph;
use fngate_deploy::provider::{ProviderRegistry, SandboxProvider};
use fngate_deploy::state::{LocalStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Sets up `tracing` on stderr. `--verbose` forces debug, otherwise
/// `RUST_LOG` applies with `info` as the fallback.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Runs a command and returns the process exit code.
async fn run(cli: Cli) -> Result<i32> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { destroy } => cmd_plan(config_path, destroy, &formatter).await,
        Commands::Apply { yes, concurrency } => {
            cmd_apply(config_path, yes, concurrency, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Status => cmd_status(config_path, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let (config_file, config) = load_config(config_path)?;
    info!("Validating stack: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&config, &result, show_warnings));
    if !result.is_valid() {
        return Ok(1);
    }

    let graph = DependencyGraph::build(config.descriptors())?;
    debug!(resources = graph.len(), "Dependency graph is acyclic");
    Ok(0)
}

async fn cmd_plan(
    config_path: Option<&PathBuf>,
    destroy: bool,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let stack = Stack::load(config_path, None).await?;
    let plan = stack.deployer().plan(destroy)?;
    println!("{}", formatter.format_plan(&plan));
    Ok(0)
}

async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let stack = Stack::load(config_path, concurrency).await?;
    let deployer = stack.deployer();

    let plan = deployer.plan(false)?;
    eprintln!("{}", formatter.format_plan(&plan));

    if !auto_approve && !confirm("Do you want to create these resources? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(0);
    }

    let cancel = cancel_on_ctrl_c();
    let report = deployer.apply(&cancel).await?;
    println!("{}", formatter.format_report(&report));
    Ok(report.exit_code())
}

async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let stack = Stack::load(config_path, None).await?;
    let deployer = stack.deployer();

    let status = deployer.status().await?;
    if status.live.is_empty() {
        eprintln!(
            "{}",
            formatter.message(MessageLevel::Warning, "State records no live resources")
        );
    } else {
        eprintln!("The following resources will be deleted:");
        for resource in &status.live {
            eprintln!("  - {} {}", resource.kind, resource.resource_id);
        }
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destroy cancelled.");
        return Ok(0);
    }

    let cancel = cancel_on_ctrl_c();
    let report = deployer.destroy(&cancel).await?;
    println!("{}", formatter.format_report(&report));
    Ok(report.exit_code())
}

async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<i32> {
    let stack = Stack::load(config_path, None).await?;
    let status = stack.deployer().status().await?;
    println!("{}", formatter.format_status(&status));
    Ok(0)
}

async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let stack = Stack::load(config_path, None).await?;
    let store = &stack.store;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => println!("{}", formatter.format_state(&state)),
            None => println!("{}", formatter.message(MessageLevel::Warning, "No state found")),
        },
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                println!("{}", formatter.message(MessageLevel::Success, "State forcefully unlocked"));
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                println!("{}", formatter.message(MessageLevel::Success, "State unlocked"));
            } else {
                eprintln!(
                    "{}",
                    formatter.message(MessageLevel::Error, "Provide --lock-id or use --force")
                );
                return Ok(1);
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded stack with its state backend and orchestrator.
struct Stack {
    config: StackConfig,
    store: Box<dyn StateStore>,
    orchestrator: Orchestrator,
    holder: String,
}

impl Stack {
    async fn load(config_path: Option<&PathBuf>, concurrency: Option<usize>) -> Result<Self> {
        let (config_file, config) = load_config(config_path)?;
        ConfigValidator::new().validate(&config)?;

        let store = state_store(&config, &config_file).await?;

        let mut settings = config.orchestrator_config();
        if let Some(n) = concurrency {
            settings = settings.with_concurrency(n);
        }
        let sandbox = Arc::new(SandboxProvider::new(config.sandbox_config()));
        let orchestrator = Orchestrator::new(Arc::new(ProviderRegistry::uniform(sandbox)), settings);

        Ok(Self {
            config,
            store,
            orchestrator,
            holder: generate_holder_id(),
        })
    }

    fn deployer(&self) -> StackDeployer<'_, Box<dyn StateStore>> {
        StackDeployer::new(&self.config, &self.store, &self.orchestrator, self.holder.clone())
    }
}

fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn load_config(config_path: Option<&PathBuf>) -> Result<(PathBuf, StackConfig)> {
    let config_file = resolve_config_path(config_path)?;
    let parser = ConfigParser::new().with_base_path(stack_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    Ok((config_file, config))
}

fn stack_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

async fn state_store(config: &StackConfig, config_file: &Path) -> Result<Box<dyn StateStore>> {
    let state = &config.state;
    let store: Box<dyn StateStore> = match state.backend {
        StateBackend::Local => {
            let store = match &state.path {
                Some(path) => LocalStateStore::with_state_path(stack_dir(config_file).join(path)),
                None => LocalStateStore::with_base_dir(stack_dir(config_file).join(STATE_DIR)),
            };
            Box::new(store)
        }
        StateBackend::S3 => {
            let bucket = state
                .bucket
                .as_deref()
                .ok_or_else(|| FngateError::internal("S3 bucket not configured"))?;
            Box::new(
                S3StateStore::new(
                    bucket,
                    state.prefix.as_deref(),
                    state.region.as_deref(),
                    &config.project.name,
                    &config.project.environment,
                )
                .await,
            )
        }
    };
    debug!(backend = store.backend_type(), location = %store.location(), "State backend ready");
    Ok(store)
}

/// Returns a token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the run");
            token.cancel();
        }
    });
    cancel
}

fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
