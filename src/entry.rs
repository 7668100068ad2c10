use std::collections::BTreeMap;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, warn};

use volley::args::CliArgs;
use volley::config::{ConfigFile, into_run, load_config};
use volley::error::EngineResult;
use volley::logger::init_logging;
use volley::report::{Reporter, TallyReporter};
use volley::run::{Dispatcher, RunSummary};
use volley::shutdown::spawn_interrupt_handler;

pub(crate) fn run() -> EngineResult<()> {
    let args = CliArgs::parse();
    if !init_logging(args.verbose) {
        debug!("A tracing subscriber was already installed; keeping it.");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args))
}

async fn run_async(args: CliArgs) -> EngineResult<()> {
    let file = match args.config.as_deref() {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            load_config(path)?
        }
        None => ConfigFile::default(),
    };
    let (run, template) = into_run(&file.merge(args.overlay()))?;

    let dispatcher = Dispatcher::new(run, template, TallyReporter::new())?;
    let interrupts = spawn_interrupt_handler(dispatcher.stop_signal());

    let summary = dispatcher.run().await?;
    interrupts.abort();
    dispatcher.finish().await?;

    match dispatcher.with_reporter(|reporter| summary_lines(&summary, reporter)) {
        Some(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        None => warn!("Reporter was not finalized; no summary to print."),
    }
    Ok(())
}

fn summary_lines(summary: &RunSummary, reporter: &TallyReporter) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push("Summary:".to_owned());
    lines.push(format!("  Total:\t{}", format_secs(summary.elapsed)));
    lines.push(format!("  Requests:\t{}", reporter.records()));
    lines.push(format!("  Successes:\t{}", reporter.successes()));
    lines.push(format!("  Bytes read:\t{}", reporter.bytes()));
    lines.push(format!(
        "  Workers:\t{} completed, {} stopped, {} timed out",
        summary.workers_completed, summary.workers_stopped, summary.workers_timed_out
    ));

    let statuses = reporter.status_code_dist();
    if !statuses.is_empty() {
        lines.push(String::new());
        lines.push("Status code distribution:".to_owned());
        lines.extend(count_lines(statuses));
    }
    let errors = reporter.error_dist();
    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("Error distribution:".to_owned());
        lines.extend(count_lines(errors));
    }
    lines
}

fn count_lines<K: std::fmt::Display>(counts: &BTreeMap<K, u64>) -> Vec<String> {
    counts
        .iter()
        .map(|(key, count)| format!("  [{}]\t{} responses", key, count))
        .collect()
}

fn format_secs(duration: Duration) -> String {
    format!("{:.4} secs", duration.as_secs_f64())
}
