use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BatchResult, FetchResult, FindResult, ProgressEvent, ProgressSink, TargetStatus};
use crate::executor::outcome_label;
use crate::plan::FetchOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_find(result: &FindResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain-text rendering for terminals; progress goes to the log.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_find(result: &FindResult) {
        for chip in &result.chips {
            println!("{} {}", chip.pointing, chip.extension);
        }
    }

    pub fn print_fetch(result: &FetchResult) {
        let summary = &result.summary;
        if result.dry_run {
            println!("Planned {} stamp(s) into {}", summary.total, result.out_dir);
            for item in &result.items {
                println!("  {} -> {}", item.source_archive_path, item.dest_image_path);
            }
            return;
        }

        println!(
            "Staged {} of {} image(s) into {}",
            summary.images_staged(),
            summary.total,
            result.out_dir
        );
        for item in &result.items {
            let reason = match &item.outcome {
                FetchOutcome::HeaderCopyFailed(reason) | FetchOutcome::UnpackFailed(reason) => {
                    format!(": {reason}")
                }
                _ => String::new(),
            };
            println!(
                "  {}_{}_{} {}{reason}",
                item.pointing,
                item.filter,
                item.extension,
                outcome_label(&item.outcome)
            );
        }
        if summary.header_missing > 0 {
            println!("  {} header(s) missing", summary.header_missing);
        }
    }

    pub fn print_batch(result: &BatchResult) {
        for target in &result.targets {
            match &target.status {
                TargetStatus::Fetched { summary } => println!(
                    "{}: {} of {} image(s) staged in {}",
                    target.name,
                    summary.images_staged(),
                    summary.total,
                    target.out_dir
                ),
                TargetStatus::NoChips => println!("{}: no chips cover this position", target.name),
                TargetStatus::Failed { reason } => println!("{}: failed: {reason}", target.name),
            }
        }
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
