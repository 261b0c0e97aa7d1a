use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::batch::BatchTarget;
use crate::catalog::{ChipCatalog, ChipRecord};
use crate::config::ResolvedConfig;
use crate::domain::ChipId;
use crate::error::StampError;
use crate::executor::{FetchExecutor, FetchSummary};
use crate::plan::{ArchiveLayout, FetchItem, expand};
use crate::query::{QueryMode, QueryWindow, RegionQuery};
use crate::store::{Manifest, Store};
use crate::unpack::Unpacker;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedChip {
    pub pointing: String,
    pub extension: String,
    #[serde(flatten)]
    pub record: ChipRecord,
    #[serde(skip)]
    pub id: ChipId,
}

impl SelectedChip {
    fn from_record(record: &ChipRecord) -> Result<Self, StampError> {
        let id = record.chip_id()?;
        Ok(Self {
            pointing: id.pointing(),
            extension: id.extension_label(),
            record: *record,
            id,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FindResult {
    pub query: RegionQuery,
    pub window: Option<QueryWindow>,
    pub chips: Vec<SelectedChip>,
}

impl FindResult {
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn chip_ids(&self) -> Vec<ChipId> {
        self.chips.iter().map(|chip| chip.id).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub query: Option<RegionQuery>,
    pub chips: Vec<String>,
    pub dry_run: bool,
    pub out_dir: Utf8PathBuf,
    pub manifest: Option<Utf8PathBuf>,
    pub summary: FetchSummary,
    pub items: Vec<FetchItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Fetched { summary: FetchSummary },
    NoChips,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub name: String,
    pub out_dir: Utf8PathBuf,
    #[serde(flatten)]
    pub status: TargetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub targets: Vec<TargetResult>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App<U: Unpacker> {
    config: ResolvedConfig,
    executor: FetchExecutor<U>,
}

impl<U: Unpacker> App<U> {
    pub fn new(config: ResolvedConfig, unpacker: U) -> Result<Self, StampError> {
        let executor = FetchExecutor::new(unpacker, config.jobs)?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn load_catalog(&self, sink: &dyn ProgressSink) -> Result<ChipCatalog, StampError> {
        sink.event(ProgressEvent {
            message: format!("phase=Load; reading catalog {}", self.config.catalog),
            elapsed: None,
        });
        match self.config.catalog_delimiter {
            Some(delimiter) => ChipCatalog::load_with_delimiter(&self.config.catalog, delimiter),
            None => ChipCatalog::load(&self.config.catalog),
        }
    }

    /// Selects the chips covering the query. An empty selection is a valid result.
    pub fn find(
        &self,
        catalog: &ChipCatalog,
        query: RegionQuery,
        sink: &dyn ProgressSink,
    ) -> Result<FindResult, StampError> {
        query.validate()?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Query; RA={} Dec={} radius={}' mode={:?}",
                query.ra_deg, query.dec_deg, query.radius_arcmin, query.mode
            ),
            elapsed: None,
        });

        let started = Instant::now();
        let chips = query
            .select(catalog)
            .into_iter()
            .map(SelectedChip::from_record)
            .collect::<Result<Vec<_>, StampError>>()?;
        sink.event(ProgressEvent {
            message: format!("phase=Query; {} chip(s) selected", chips.len()),
            elapsed: Some(started.elapsed()),
        });
        tracing::info!(
            chips = ?chips.iter().map(|chip| chip.id.to_string()).collect::<Vec<_>>(),
            "selected chips"
        );

        let window = matches!(query.mode, QueryMode::OverlapsWindow).then(|| query.window());
        Ok(FindResult {
            query,
            window,
            chips,
        })
    }

    /// Plans and stages stamps for the given chips into `layout.out_dir`.
    pub fn fetch(
        &self,
        chips: &[ChipId],
        query: Option<RegionQuery>,
        layout: &ArchiveLayout,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, StampError> {
        let items = expand(chips, &self.config.filters, layout);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Plan; {} item(s) for {} chip(s)",
                items.len(),
                chips.len()
            ),
            elapsed: None,
        });
        let chip_labels = chips.iter().map(ToString::to_string).collect::<Vec<_>>();

        if options.dry_run {
            return Ok(FetchResult {
                query,
                chips: chip_labels,
                dry_run: true,
                out_dir: layout.out_dir.clone(),
                manifest: None,
                summary: FetchSummary::from_items(&items),
                items,
            });
        }

        let store = Store::new(layout.out_dir.clone());
        store.ensure_out_dir()?;
        sink.event(ProgressEvent {
            message: format!("phase=Unpack; {} worker(s)", self.executor.jobs()),
            elapsed: None,
        });
        let started = Instant::now();
        let items = self.executor.run(items, sink);
        let summary = FetchSummary::from_items(&items);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Unpack; {} of {} image(s) staged",
                summary.images_staged(),
                summary.total
            ),
            elapsed: Some(started.elapsed()),
        });

        let manifest = store.write_manifest(&Manifest::new(query, items.clone()))?;
        Ok(FetchResult {
            query,
            chips: chip_labels,
            dry_run: false,
            out_dir: layout.out_dir.clone(),
            manifest: Some(manifest),
            summary,
            items,
        })
    }

    /// Runs every target independently; one target's failure is recorded and
    /// the rest still run.
    pub fn batch(
        &self,
        catalog: &ChipCatalog,
        targets: &[BatchTarget],
        mode: QueryMode,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> BatchResult {
        let results = targets
            .iter()
            .map(|target| {
                let out_dir = self.config.layout.out_dir.join(target.out_name());
                sink.event(ProgressEvent {
                    message: format!("phase=Batch; target {}", target.name),
                    elapsed: None,
                });
                let status = self.run_target(catalog, target, mode, &out_dir, options, sink);
                if let TargetStatus::Failed { reason } = &status {
                    tracing::error!(target = %target.name, %reason, "target failed");
                }
                TargetResult {
                    name: target.name.clone(),
                    out_dir,
                    status,
                }
            })
            .collect();
        BatchResult { targets: results }
    }

    fn run_target(
        &self,
        catalog: &ChipCatalog,
        target: &BatchTarget,
        mode: QueryMode,
        out_dir: &Utf8Path,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> TargetStatus {
        let query = target.query(mode);
        let found = match self.find(catalog, query, sink) {
            Ok(found) => found,
            Err(err) => {
                return TargetStatus::Failed {
                    reason: err.to_string(),
                };
            }
        };
        if found.is_empty() {
            tracing::warn!(target = %target.name, "no chips cover target");
            return TargetStatus::NoChips;
        }

        let layout = self.config.layout.with_out_dir(out_dir.to_owned());
        match self.fetch(&found.chip_ids(), Some(query), &layout, options, sink) {
            Ok(result) => TargetStatus::Fetched {
                summary: result.summary,
            },
            Err(err) => TargetStatus::Failed {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::{Config, ConfigLoader, ConfigOverrides};
    use crate::output::JsonOutput;
    use crate::plan::FetchOutcome;

    struct NeverUnpacker;

    impl Unpacker for NeverUnpacker {
        fn unpack(
            &self,
            _source: &Utf8Path,
            _extension: &str,
            _destination: &Utf8Path,
        ) -> Result<(), StampError> {
            Err(StampError::Unpack("not expected".to_string()))
        }
    }

    fn app(out_dir: Utf8PathBuf) -> App<NeverUnpacker> {
        let config = ConfigLoader::resolve_config(Config::default())
            .unwrap()
            .apply(ConfigOverrides {
                out_dir: Some(out_dir),
                ..ConfigOverrides::default()
            })
            .unwrap();
        App::new(config, NeverUnpacker).unwrap()
    }

    fn catalog() -> ChipCatalog {
        ChipCatalog::from_records(vec![ChipRecord {
            patch: 47,
            chip_code: 9_000,
            ra_min: 10.0,
            ra_max: 20.0,
            dec_min: -1.0,
            dec_max: 1.0,
        }])
        .unwrap()
    }

    #[test]
    fn dry_run_touches_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let out_dir = Utf8PathBuf::from_path_buf(temp.path().join("stamps")).unwrap();
        let app = app(out_dir.clone());
        let found = app
            .find(
                &catalog(),
                RegionQuery::from_field_size(15.0, 0.0, 2.0, QueryMode::OverlapsWindow),
                &JsonOutput,
            )
            .unwrap();
        assert_eq!(found.chips[0].pointing, "0047J0");

        let result = app
            .fetch(
                &found.chip_ids(),
                Some(found.query),
                &app.config().layout,
                FetchOptions { dry_run: true },
                &JsonOutput,
            )
            .unwrap();
        assert_eq!(result.items.len(), 4);
        assert!(result.items.iter().all(|item| item.outcome == FetchOutcome::Pending));
        assert!(result.manifest.is_none());
        assert!(!out_dir.as_std_path().exists());
    }

    #[test]
    fn corrupt_chip_code_aborts_the_query() {
        let temp = tempfile::tempdir().unwrap();
        let app = app(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let catalog = ChipCatalog::from_records(vec![ChipRecord {
            patch: 47,
            chip_code: 12_000,
            ra_min: 10.0,
            ra_max: 20.0,
            dec_min: -1.0,
            dec_max: 1.0,
        }])
        .unwrap();
        let err = app
            .find(
                &catalog,
                RegionQuery::from_field_size(15.0, 0.0, 2.0, QueryMode::ContainsCenter),
                &JsonOutput,
            )
            .unwrap_err();
        assert!(matches!(err, StampError::InvalidChipCode { code: 12_000, .. }));
    }

    #[test]
    fn failed_unpacks_are_reported_not_raised() {
        let temp = tempfile::tempdir().unwrap();
        let out_dir = Utf8PathBuf::from_path_buf(temp.path().join("stamps")).unwrap();
        let app = app(out_dir.clone());
        let chip = ChipId::from_code(47, 0).unwrap();
        let result = app
            .fetch(
                &[chip],
                None,
                &app.config().layout,
                FetchOptions::default(),
                &JsonOutput,
            )
            .unwrap();
        assert_eq!(result.summary.unpack_failed, 4);
        let manifest = result.manifest.unwrap();
        assert!(fs::metadata(manifest.as_std_path()).unwrap().is_file());
    }
}
