use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::error::StampError;
use crate::plan::FetchItem;
use crate::query::RegionQuery;

pub const MANIFEST_FILE: &str = "manifest.json";

/// The output directory stamps are staged into.
#[derive(Debug, Clone)]
pub struct Store {
    out_dir: Utf8PathBuf,
}

impl Store {
    pub fn new(out_dir: Utf8PathBuf) -> Self {
        Self { out_dir }
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.out_dir.join(MANIFEST_FILE)
    }

    pub fn ensure_out_dir(&self) -> Result<(), StampError> {
        fs::create_dir_all(self.out_dir.as_std_path())
            .map_err(|err| StampError::Filesystem(format!("create {}: {err}", self.out_dir)))
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<Utf8PathBuf, StampError> {
        let path = self.manifest_path();
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), StampError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| StampError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Copies through a temp file in the destination directory so a reader
    /// never sees a half-written file.
    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), StampError> {
        let parent = dest
            .parent()
            .ok_or_else(|| StampError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("rcs2-stamps-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| StampError::Filesystem(format!("copy {source}: {err}")))?;
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path())
                .map_err(|err| StampError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest.as_std_path())
            .map_err(|err| StampError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Record of one staging run, written next to the stamps.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub tool: String,
    pub created_at: String,
    pub query: Option<RegionQuery>,
    pub items: Vec<FetchItem>,
}

impl Manifest {
    pub fn new(query: Option<RegionQuery>, items: Vec<FetchItem>) -> Self {
        Self {
            tool: format!("rcs2-stamps/{}", env!("CARGO_PKG_VERSION")),
            created_at: chrono::Utc::now().to_rfc3339(),
            query,
            items,
        }
    }
}
