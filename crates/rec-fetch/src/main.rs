//! rec-fetch CLI: download every track of a recording and decode it to raw `f32` files.
//!
//! Progress is rendered as text (event lines plus the lane board) or as JSON lines (`--json`).

use std::thread;

use anyhow::{Result, bail};
use clap::Parser;
use rec_fetch::cli;
use rec_fetch::runtime;
use rec_fetch::status::{ProgressBoard, Reporter};
use rec_fetch_types::PipelineEvent;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rec_fetch=info")),
        )
        .init();

    let config = args.to_config()?;
    if let Some(wizard) = &config.wizard {
        tracing::debug!(?wizard, format = ?wizard.format_name(), "wizard options");
    }

    let (tx, rx) = crossbeam_channel::unbounded::<PipelineEvent>();
    let reporter = Reporter::new(ProgressBoard::shared(config.lanes), Some(tx));
    let board = reporter.board().clone();
    let json = args.json;
    let printer = thread::spawn(move || {
        let mut last_board = String::new();
        for event in rx {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!("event encode failed: {e}"),
                }
                continue;
            }
            if let PipelineEvent::LaneProgress { .. } = event {
                let Ok(snapshot) = board.lock().map(|b| b.snapshot()) else {
                    continue;
                };
                let rendered = cli::render_board(&snapshot);
                if rendered != last_board {
                    println!("{rendered}");
                    last_board = rendered;
                }
            } else if let Some(line) = cli::render_event(&event) {
                println!("{line}");
            }
        }
    });

    let result = runtime::run_fetch(&config, &reporter, true);
    // Last sender: the printer drains and exits.
    drop(reporter);
    let _ = printer.join();

    let summary = result?;
    if summary.failed() > 0 {
        bail!(
            "{} of {} tracks failed",
            summary.failed(),
            summary.outcomes.len()
        );
    }
    Ok(())
}
