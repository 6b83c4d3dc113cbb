//! Herd CLI entrypoint.
//!
//! This is the main entrypoint for the herd command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use herd_deploy::action::{ExecutionContext, ExecutionOptions};
use herd_deploy::cli::{
    Cli, Commands, MessageLevel, OutputFormatter, QueueCommands, StateCommands,
};
use herd_deploy::config::{Settings, TemplateContext};
use herd_deploy::docker::{split_image, DockerRunBuilder};
use herd_deploy::error::{HerdError, Result};
use herd_deploy::exec::ProcessRunner;
use herd_deploy::kube::{BranchModification, KubectlActionBuilder};
use herd_deploy::planner::{
    DeploymentPlan, DeploymentQueue, ImageManifest, ImagePlanner, QueuedDeployment,
};
use herd_deploy::state::{
    DeploymentStateStore, LocalStateBackend, Operation, S3StateBackend, StateBackend,
};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            exit_code(&e)
        }
    }
}

/// Maps a failure to the process exit code.
///
/// Failed external commands pass their own exit code through.
fn exit_code(err: &HerdError) -> ExitCode {
    err.exit_code()
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

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

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    Settings::load_dotenv(cli.env_file.as_deref())?;
    let mut settings = Settings::from_env()?;
    if let Some(environment) = &cli.environment {
        settings.environment = Some(environment.clone());
    }
    if cli.wait {
        settings.wait_for_rollout = true;
    }
    if let Some(dir) = &cli.export_dir {
        settings.dry_run_dir = Some(dir.clone());
    }
    debug!("Settings: {settings:?}");

    match &cli.command {
        Commands::Queue { command } => cmd_queue(command, &formatter).await,
        Commands::State { command } => cmd_state(&cli, &settings, command, &formatter).await,
        command => {
            let store = open_store(&cli).await?;
            store.connect().await?;
            let result = cmd_deploy(&cli, &settings, command, &store, &formatter).await;
            store.disconnect_after(result).await
        }
    }
}

/// Opens the state store selected on the command line.
async fn open_store(cli: &Cli) -> Result<DeploymentStateStore> {
    let backend: Box<dyn StateBackend> = match (&cli.state_bucket, &cli.state_dir) {
        (Some(bucket), _) => Box::new(
            S3StateBackend::new(bucket, cli.state_prefix.as_deref(), cli.state_region.as_deref())
                .await,
        ),
        (None, Some(dir)) => Box::new(LocalStateBackend::with_base_dir(dir)),
        (None, None) => Box::new(LocalStateBackend::new()?),
    };
    let store = DeploymentStateStore::new(backend);
    info!("Using {} state backend", store.backend_type());
    Ok(store)
}

/// Builds and executes the plans of a deploying command.
async fn cmd_deploy(
    cli: &Cli,
    settings: &Settings,
    command: &Commands,
    store: &DeploymentStateStore,
    formatter: &OutputFormatter,
) -> Result<()> {
    let environment = settings.require_environment()?;
    let options = settings.execution_options(cli.dry_run);

    let plans = match command {
        Commands::Apply {
            files,
            branch,
            ttl,
            version,
            annotate,
        } => {
            let branch = branch_modification(branch.as_deref(), *ttl);
            let mut plans = Vec::with_capacity(files.len());
            for file in files {
                let plan = DeploymentPlan::new(file.display().to_string())
                    .with_rollout_annotation(*annotate, settings.annotation_retry_delay);
                plans.push(
                    plan_manifest(
                        plan,
                        file,
                        Operation::Apply,
                        environment,
                        version.as_deref(),
                        branch.as_ref(),
                        settings,
                        store,
                    )
                    .await?,
                );
            }
            plans
        }
        Commands::Delete { files, version } => {
            let mut plans = Vec::with_capacity(files.len());
            for file in files {
                let plan = DeploymentPlan::new(file.display().to_string());
                plans.push(
                    plan_manifest(
                        plan,
                        file,
                        Operation::Delete,
                        environment,
                        version.as_deref(),
                        None,
                        settings,
                        store,
                    )
                    .await?,
                );
            }
            plans
        }
        Commands::Run {
            image,
            command,
            env,
        } => {
            let mut builder = DockerRunBuilder::new(image.as_str(), environment).stateful(true);
            if let Some(command) = command {
                builder = builder.with_command(command.as_str());
            }
            if let Some(expansion) = &settings.docker_env {
                builder = builder.with_expansion(expansion.as_str());
            }
            for (name, value) in env {
                builder = builder.with_env(name.as_str(), value.as_str());
            }
            let action = builder.build(&TemplateContext::new())?;

            let (repository, _) = split_image(image);
            let mut plan = DeploymentPlan::new(repository);
            plan.add_action(action, store).await?;
            vec![plan]
        }
        Commands::Image {
            image,
            manifest,
            branch,
            ttl,
            annotate,
        } => {
            let manifest = ImageManifest::from_file(manifest).await?;
            let mut planner =
                ImagePlanner::from_settings(environment, settings).with_rollout_annotation(*annotate);
            if let Some(branch) = branch_modification(branch.as_deref(), *ttl) {
                planner = planner.with_branch(branch);
            }
            vec![planner.plan_image(image, &manifest, store).await?]
        }
        Commands::Queue { .. } | Commands::State { .. } => {
            return Err(HerdError::internal("not a deploying command"));
        }
    };

    execute_plans(&plans, store, &options, formatter).await
}

/// Executes plans one after another, stopping at the first failure.
async fn execute_plans(
    plans: &[DeploymentPlan],
    store: &DeploymentStateStore,
    options: &ExecutionOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    let runner = ProcessRunner::new();
    let ctx = ExecutionContext::new(&runner, store, options);

    for plan in plans {
        eprintln!("{}", formatter.format_plan(plan));
        let result = plan.execute(&ctx).await?;
        eprintln!("{}", formatter.format_result(&result));
    }

    if options.dry_run {
        eprintln!(
            "{}",
            formatter.message(MessageLevel::Warning, "Dry run: nothing was deployed")
        );
    }
    Ok(())
}

/// Adds the kubectl action for one manifest file or folder to `plan`.
#[allow(clippy::too_many_arguments)]
async fn plan_manifest(
    mut plan: DeploymentPlan,
    path: &Path,
    operation: Operation,
    environment: &str,
    version: Option<&str>,
    branch: Option<&BranchModification>,
    settings: &Settings,
    store: &DeploymentStateStore,
) -> Result<DeploymentPlan> {
    let (text, source_dir) = load_manifest(path).await?;

    let mut builder = KubectlActionBuilder::new(text, operation, environment)
        .with_origin(path.display().to_string())
        .with_policies(settings.policies.clone());
    if let Some(version) = version {
        builder = builder.with_version(version);
    }
    if let Some(branch) = branch {
        builder = builder.with_branch(branch.clone());
    }
    if let Some(dir) = source_dir {
        builder = builder.with_source_dir(dir);
    }

    plan.add_action(builder.build()?, store).await?;
    Ok(plan)
}

/// Reads a manifest file, or every YAML file of a folder in name order.
///
/// Folders are also returned as the source directory of the action.
async fn load_manifest(path: &Path) -> Result<(String, Option<PathBuf>)> {
    if !tokio::fs::metadata(path).await?.is_dir() {
        return Ok((tokio::fs::read_to_string(path).await?, None));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        let is_yaml = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml && entry.file_type().await?.is_file() {
            files.push(file);
        }
    }
    files.sort();

    let mut parts = Vec::with_capacity(files.len());
    for file in &files {
        parts.push(tokio::fs::read_to_string(file).await?);
    }
    debug!("Loaded {} manifest file(s) from {}", files.len(), path.display());
    Ok((parts.join("\n---\n"), Some(path.to_path_buf())))
}

fn branch_modification(branch: Option<&str>, ttl: Option<u32>) -> Option<BranchModification> {
    branch.map(|name| {
        let params = BranchModification::new(name);
        match ttl {
            Some(hours) => params.with_ttl_hours(hours),
            None => params,
        }
    })
}

/// Manage the deployment queue.
async fn cmd_queue(command: &QueueCommands, formatter: &OutputFormatter) -> Result<()> {
    match command {
        QueueCommands::Push {
            image,
            key,
            description,
            version,
            file,
        } => {
            let version = version
                .clone()
                .or_else(|| split_image(image).1.map(String::from))
                .unwrap_or_else(|| String::from("latest"));
            let entry = QueuedDeployment::new(image.as_str(), version, key.as_str(), description.as_str());
            DeploymentQueue::new(file).push(&entry).await?;
            eprintln!(
                "{}",
                formatter.message(MessageLevel::Success, &format!("Queued {image} as {key}"))
            );
        }
        QueueCommands::List { file } => {
            let entries = DeploymentQueue::new(file).read_all().await?;
            eprintln!("{}", formatter.format_queue(&entries));
        }
    }
    Ok(())
}

/// Manage state.
async fn cmd_state(
    cli: &Cli,
    settings: &Settings,
    command: &StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    match command {
        StateCommands::Show { identifier } => {
            let environment = settings.require_environment()?;
            let store = open_store(cli).await?;
            store.connect().await?;
            let state = store.get_stored_state(environment, identifier).await;

            match store.disconnect_after(state).await? {
                Some(state) => eprintln!("{}", formatter.format_state(&state)),
                None => eprintln!(
                    "{}",
                    formatter.message(
                        MessageLevel::Warning,
                        &format!("No state found for {identifier} in {environment}")
                    )
                ),
            }
        }
    }
    Ok(())
}
