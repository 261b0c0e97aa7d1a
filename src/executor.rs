use std::fs;
use std::time::Instant;

use camino::Utf8Path;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::StampError;
use crate::plan::{FetchItem, FetchOutcome};
use crate::store::Store;
use crate::unpack::Unpacker;

/// Runs fetch items on a bounded pool. Items are independent: a failed item
/// is recorded in its outcome and the rest of the batch carries on.
pub struct FetchExecutor<U: Unpacker> {
    unpacker: U,
    pool: ThreadPool,
}

impl<U: Unpacker> FetchExecutor<U> {
    pub fn new(unpacker: U, jobs: usize) -> Result<Self, StampError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|index| format!("rcs2-fetch-{index}"))
            .build()
            .map_err(|err| StampError::WorkerPool(err.to_string()))?;
        Ok(Self { unpacker, pool })
    }

    pub fn jobs(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Returns the items in input order with their outcomes filled in.
    pub fn run(&self, items: Vec<FetchItem>, sink: &dyn ProgressSink) -> Vec<FetchItem> {
        let total = items.len();
        self.pool.install(|| {
            items
                .into_par_iter()
                .enumerate()
                .map(|(index, item)| self.run_item(item, index + 1, total, sink))
                .collect()
        })
    }

    fn run_item(
        &self,
        mut item: FetchItem,
        position: usize,
        total: usize,
        sink: &dyn ProgressSink,
    ) -> FetchItem {
        let label = format!("{}_{}_{}", item.pointing, item.filter, item.extension);
        let header = item
            .header_candidates
            .resolve()
            .map(Utf8Path::to_path_buf);
        if header.is_none() {
            tracing::warn!(
                item = %label,
                tried = %item.header_candidates.per_patch,
                "no header file for stamp"
            );
        }

        let started = Instant::now();
        if let Err(err) = self.unpack(&item) {
            let reason = failure_reason(err);
            tracing::error!(item = %label, source = %item.source_archive_path, %reason, "unpack failed");
            item.outcome = FetchOutcome::UnpackFailed(reason);
            sink.event(ProgressEvent {
                message: format!("[{position}/{total}] {label} unpack failed"),
                elapsed: Some(started.elapsed()),
            });
            return item;
        }
        tracing::info!(item = %label, dest = %item.dest_image_path, "unpacked");

        item.outcome = match header {
            None => FetchOutcome::HeaderMissing,
            Some(source) => match Store::copy_file_atomic(&source, &item.dest_header_path) {
                Ok(()) => {
                    tracing::debug!(item = %label, header = %source, "header staged");
                    FetchOutcome::Staged
                }
                Err(err) => {
                    tracing::warn!(item = %label, header = %source, error = %err, "header copy failed");
                    FetchOutcome::HeaderCopyFailed(err.to_string())
                }
            },
        };
        sink.event(ProgressEvent {
            message: format!("[{position}/{total}] {label} {}", outcome_label(&item.outcome)),
            elapsed: Some(started.elapsed()),
        });
        item
    }

    fn unpack(&self, item: &FetchItem) -> Result<(), StampError> {
        if let Some(parent) = item.dest_image_path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| StampError::Filesystem(format!("create {parent}: {err}")))?;
        }
        self.unpacker.unpack(
            &item.source_archive_path,
            &item.extension,
            &item.dest_image_path,
        )
    }
}

fn failure_reason(err: StampError) -> String {
    match err {
        StampError::Unpack(message) => message,
        other => other.to_string(),
    }
}

pub fn outcome_label(outcome: &FetchOutcome) -> &'static str {
    match outcome {
        FetchOutcome::Pending => "pending",
        FetchOutcome::Staged => "staged",
        FetchOutcome::HeaderMissing => "staged (header missing)",
        FetchOutcome::HeaderCopyFailed(_) => "staged (header copy failed)",
        FetchOutcome::UnpackFailed(_) => "unpack failed",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    pub staged: usize,
    pub header_missing: usize,
    pub header_copy_failed: usize,
    pub unpack_failed: usize,
}

impl FetchSummary {
    pub fn from_items(items: &[FetchItem]) -> Self {
        let mut summary = Self {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            match item.outcome {
                FetchOutcome::Staged => summary.staged += 1,
                FetchOutcome::HeaderMissing => summary.header_missing += 1,
                FetchOutcome::HeaderCopyFailed(_) => summary.header_copy_failed += 1,
                FetchOutcome::UnpackFailed(_) => summary.unpack_failed += 1,
                FetchOutcome::Pending => {}
            }
        }
        summary
    }

    pub fn images_staged(&self) -> usize {
        self.staged + self.header_missing + self.header_copy_failed
    }
}
