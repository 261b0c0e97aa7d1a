use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{ChipId, Filter};

pub const PACKED_EXTENSION: &str = "fz";

/// Where the archive keeps images and headers, and where stamps are staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveLayout {
    pub images_root: Utf8PathBuf,
    pub headers_root: Utf8PathBuf,
    pub out_dir: Utf8PathBuf,
}

impl ArchiveLayout {
    pub fn new(images_root: Utf8PathBuf, headers_root: Utf8PathBuf, out_dir: Utf8PathBuf) -> Self {
        Self {
            images_root,
            headers_root,
            out_dir,
        }
    }

    pub fn with_out_dir(&self, out_dir: Utf8PathBuf) -> Self {
        Self {
            out_dir,
            ..self.clone()
        }
    }

    pub fn archive_path(&self, chip: &ChipId, filter: Filter) -> Utf8PathBuf {
        let pointing = chip.pointing();
        self.images_root
            .join(chip.patch_label())
            .join(&pointing)
            .join(format!(
                "{}{pointing}_{filter}.{PACKED_EXTENSION}",
                filter.archive_prefix()
            ))
    }

    pub fn header_candidates(&self, chip: &ChipId, filter: Filter) -> HeaderCandidates {
        let pointing = chip.pointing();
        let ext = chip.extension_label();
        let patch_dir = self.headers_root.join(chip.patch_label());
        HeaderCandidates {
            per_pointing: patch_dir.join(&pointing).join(format!("{filter}{ext}.hdr")),
            per_patch: patch_dir.join(format!("{pointing}_{filter}_{ext}.hdr")),
        }
    }

    pub fn dest_image_path(&self, chip: &ChipId, filter: Filter) -> Utf8PathBuf {
        self.out_dir.join(format!("{}.fits", stamp_stem(chip, filter)))
    }

    pub fn dest_header_path(&self, chip: &ChipId, filter: Filter) -> Utf8PathBuf {
        self.out_dir.join(format!("{}.hdr", stamp_stem(chip, filter)))
    }
}

fn stamp_stem(chip: &ChipId, filter: Filter) -> String {
    format!("{}_{filter}_{}", chip.pointing(), chip.extension_label())
}

/// Header locations in order of preference. Existence is checked at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderCandidates {
    pub per_pointing: Utf8PathBuf,
    pub per_patch: Utf8PathBuf,
}

impl HeaderCandidates {
    pub fn resolve(&self) -> Option<&Utf8Path> {
        [&self.per_pointing, &self.per_patch]
            .into_iter()
            .find(|path| path.as_std_path().is_file())
            .map(|path| path.as_path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FetchOutcome {
    Pending,
    /// Image unpacked and header staged.
    Staged,
    /// Image unpacked; neither header candidate exists.
    HeaderMissing,
    HeaderCopyFailed(String),
    UnpackFailed(String),
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FetchOutcome::UnpackFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchItem {
    pub pointing: String,
    pub filter: Filter,
    pub extension: String,
    pub source_archive_path: Utf8PathBuf,
    pub header_candidates: HeaderCandidates,
    pub dest_image_path: Utf8PathBuf,
    pub dest_header_path: Utf8PathBuf,
    pub outcome: FetchOutcome,
}

impl FetchItem {
    pub fn new(chip: &ChipId, filter: Filter, layout: &ArchiveLayout) -> Self {
        Self {
            pointing: chip.pointing(),
            filter,
            extension: chip.extension_label(),
            source_archive_path: layout.archive_path(chip, filter),
            header_candidates: layout.header_candidates(chip, filter),
            dest_image_path: layout.dest_image_path(chip, filter),
            dest_header_path: layout.dest_header_path(chip, filter),
            outcome: FetchOutcome::Pending,
        }
    }
}

/// One item per distinct chip and filter, chip-major in first-seen order.
/// Touches no files.
pub fn expand(chips: &[ChipId], filters: &[Filter], layout: &ArchiveLayout) -> Vec<FetchItem> {
    let mut seen = HashSet::with_capacity(chips.len());
    chips
        .iter()
        .filter(|chip| seen.insert(**chip))
        .flat_map(|chip| {
            filters
                .iter()
                .map(move |filter| FetchItem::new(chip, *filter, layout))
        })
        .collect()
}
