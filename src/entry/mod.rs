use tracing::{error, info};

use loadfleet::app::{describe_setup, run_fleet};
use loadfleet::args::{Command, FleetArgs, RunArgs};
use loadfleet::config::{FleetSetup, apply_config, load_config};
use loadfleet::error::{AppError, AppResult, ValidationError};
use loadfleet::system::logger::init_logging;
use loadfleet::system::shutdown::{shutdown_channel, spawn_signal_listener};

pub(crate) fn run() -> AppResult<()> {
    let args = match FleetArgs::try_from_args(std::env::args_os()) {
        Ok(args) => args,
        Err(AppError::Clap { source }) if !source.use_stderr() => source.exit(),
        Err(err) => return Err(err),
    };
    init_logging(args.verbose, args.no_color);

    let loaded = load_config(args.config.as_deref())?;
    let setup = apply_config(&loaded.config, &loaded.base_dir())?;
    match args.command {
        Command::Check => check(&setup),
        Command::Run(run) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_async(&setup, &run))
        }
    }
}

fn check(setup: &FleetSetup) -> AppResult<()> {
    let plans = setup.load_plans()?;
    println!("{}", describe_setup(setup));
    println!("{} plan(s) ready", plans.len());
    Ok(())
}

async fn run_async(setup: &FleetSetup, run: &RunArgs) -> AppResult<()> {
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let listener = spawn_signal_listener(&shutdown_tx);
    let outcome = run_fleet(setup, run, &mut shutdown_rx).await;
    drop(shutdown_tx.send(()));
    listener.await?;

    let summary = outcome.inspect_err(|err| error!("Run failed: {}", err))?;
    let results = summary
        .results_dir
        .as_deref()
        .unwrap_or(setup.results_dir.as_path());
    info!(
        "Stopped {} cluster(s); results are in {}",
        summary.stopped.len(),
        results.display()
    );
    if summary.aborted {
        return Err(AppError::validation(ValidationError::RunAborted));
    }
    Ok(())
}
