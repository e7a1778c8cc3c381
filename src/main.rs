use anyhow::{Context, Result};
use clap::Parser;
use dev_stress::cli::Cli;
use dev_stress::config::StressConfig;
use dev_stress::report::{InstanceReport, RunReport};
use dev_stress::stressor::{ExitStatus, RunState, StressArgs, Stressor, page_size};
use dev_stress::supervisor::DevStressor;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = StressConfig::resolve(&cli)?;
    let stressor = DevStressor {
        root: config.root.clone(),
        scsi_root: config.scsi_root.clone(),
        max_restarts: config.max_restarts,
    };

    let runs = (0..config.instances)
        .map(|_| RunState::new(config.timeout, config.max_ops).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let handler_runs = runs.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping workers...");
        for run in &handler_runs {
            run.stop();
        }
    })
    .context("Failed to set signal handler")?;

    info!(
        root = %config.root,
        instances = config.instances,
        timeout = ?config.timeout,
        ops = ?config.max_ops,
        "starting {} stressor",
        stressor.name()
    );

    let started = Instant::now();
    let per_instance = run_instances(&stressor, &runs)?;
    let report = RunReport::new(stressor.name(), started.elapsed(), per_instance);

    info!(
        bogo_ops = report.bogo_ops,
        status = ?report.status,
        "{} stressor finished",
        stressor.name()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(ExitCode::from(report.status.code() as u8))
}

fn run_instances<S: Stressor>(stressor: &S, runs: &[Arc<RunState>]) -> Result<Vec<InstanceReport>> {
    let page_size = page_size();
    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(runs.len());
        for (instance, run) in runs.iter().enumerate() {
            let instance = instance as u32;
            let handle = std::thread::Builder::new()
                .name(format!("{}-{instance}", stressor.name()))
                .spawn_scoped(scope, move || {
                    let args = StressArgs {
                        name: stressor.name(),
                        instance,
                        page_size,
                        run: run.as_ref(),
                    };
                    let status = stressor.run(&args);
                    InstanceReport {
                        instance,
                        status,
                        bogo_ops: run.bogo_ops(),
                    }
                })
                .with_context(|| format!("Failed to start instance {instance}"))?;
            handles.push((instance, handle));
        }

        Ok(handles
            .into_iter()
            .map(|(instance, handle)| {
                handle.join().unwrap_or_else(|_| {
                    warn!(instance, "instance thread panicked");
                    InstanceReport {
                        instance,
                        status: ExitStatus::Failure,
                        bogo_ops: runs[instance as usize].bogo_ops(),
                    }
                })
            })
            .collect())
    })
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("dev_stress=debug,warn")
        } else {
            EnvFilter::new("dev_stress=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
