use std::sync::Arc;

use clap::Parser;
use stacked_errors::{Result, StackableErr};
use taskforge::{
    config::ProjectConfig,
    ctrlc_init,
    engine::{run_task, RunOptions},
    logger::choose_logger,
    model::BehaviourAfterFailure,
    runtime::RuntimeAdapter,
    std_init,
};

/// Runs a task from a project configuration file inside ephemeral containers.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Name of the task to run, as declared under `tasks:` in the project
    /// configuration.
    task: String,

    /// Path to the project configuration file.
    #[arg(short, long, default_value = "taskforge.yml", env = "TASKFORGE_CONFIG")]
    config: String,

    /// Leave created containers and the task network running after a
    /// failure instead of cleaning them up.
    #[arg(long, default_value_t = false)]
    no_cleanup: bool,

    /// Forward the host's proxy environment variables (`HTTP_PROXY`, etc.)
    /// into every created container.
    #[arg(long, default_value_t = false)]
    propagate_proxy_environment_variables: bool,

    /// Number of steps the dispatcher runs concurrently. Defaults to the
    /// number of logical cores.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Always use the plain, append-only logger, even on an interactive
    /// terminal.
    #[arg(long, default_value_t = false)]
    simple: bool,

    /// Suppress all output except the final failure message, if any.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e:?}");
        std::process::exit(taskforge::engine::exit_code::CONFIGURATION_ERROR);
    }
}

/// Everything up to and including the task run itself. Any `Err` returned
/// from here means the task never started (bad config, an unresolvable
/// dependency graph, no usable runtime adapter); `main` maps that to
/// `exit_code::CONFIGURATION_ERROR`. Once the task starts, its outcome is
/// reported through `std::process::exit` instead, since by then the engine
/// itself has decided the right code (the task's own exit code, or
/// `exit_code::ORCHESTRATION_FAILURE`).
async fn run() -> Result<()> {
    std_init()?;
    ctrlc_init()?;

    let args = Args::parse();

    let config = ProjectConfig::from_file(&args.config).await.stack()?;
    let mut containers = config.containers().stack()?;
    let task = config.task(&args.task).stack()?;

    if let Some(command) = &task.command {
        let task_container = containers
            .iter_mut()
            .find(|c| c.name == task.task_container)
            .stack_err(format!("task container \"{}\" not found", task.task_container))?;
        task_container.command = Some(command.clone());
    }

    let runtime = build_runtime_adapter()?;
    let logger = choose_logger(args.simple, args.quiet);

    let options = RunOptions {
        behaviour_after_failure: if args.no_cleanup {
            BehaviourAfterFailure::DontCleanup
        } else {
            BehaviourAfterFailure::Cleanup
        },
        propagate_proxy_environment_variables: args.propagate_proxy_environment_variables,
        concurrency: args.concurrency.unwrap_or_else(taskforge::dispatcher::default_concurrency),
    };

    let exit_code = run_task(&containers, &task.task_container, runtime, logger.as_ref(), options)
        .await
        .stack()?;

    std::process::exit(exit_code);
}

#[cfg(feature = "bollard")]
fn build_runtime_adapter() -> Result<Arc<dyn RuntimeAdapter>> {
    Ok(Arc::new(taskforge::runtime::bollard_adapter::BollardAdapter::connect_with_local_defaults().stack()?))
}

#[cfg(not(feature = "bollard"))]
fn build_runtime_adapter() -> Result<Arc<dyn RuntimeAdapter>> {
    Err(stacked_errors::Error::from_kind_locationless(
        "taskforge was built without the `bollard` feature; rebuild with `--features bollard` to run tasks \
         against a real Docker daemon",
    ))
}
