use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::Filter;
use crate::error::StampError;
use crate::plan::ArchiveLayout;

pub const DEFAULT_CONFIG_FILE: &str = "rcs2-stamps.json";
pub const DEFAULT_CATALOG: &str = "/data/data1/RCS2/software/rcs2map_chip.csv";
pub const DEFAULT_IMAGES_ROOT: &str = "/data/data1/RCS2/megacam/Patches";
pub const DEFAULT_HEADERS_ROOT: &str = "/data/data1/RCS2/HEADERS";
pub const DEFAULT_OUT_DIR: &str = "output_fits";
pub const DEFAULT_UNPACK_PROGRAM: &str = "funpack";
pub const DEFAULT_UNPACK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub catalog: Option<Utf8PathBuf>,
    #[serde(default)]
    pub catalog_delimiter: Option<char>,
    #[serde(default)]
    pub images_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub headers_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub out_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub filters: Option<Vec<Filter>>,
    #[serde(default)]
    pub unpack_program: Option<String>,
    #[serde(default)]
    pub unpack_args: Option<Vec<String>>,
    #[serde(default)]
    pub unpack_timeout_secs: Option<u64>,
    #[serde(default)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub catalog: Utf8PathBuf,
    pub catalog_delimiter: Option<u8>,
    pub layout: ArchiveLayout,
    pub filters: Vec<Filter>,
    pub unpack_program: String,
    pub unpack_args: Vec<String>,
    pub unpack_timeout: Duration,
    pub jobs: usize,
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub catalog: Option<Utf8PathBuf>,
    pub images_root: Option<Utf8PathBuf>,
    pub headers_root: Option<Utf8PathBuf>,
    pub out_dir: Option<Utf8PathBuf>,
    pub filters: Option<Vec<Filter>>,
    pub unpack_timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
}

impl ResolvedConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, StampError> {
        if let Some(catalog) = overrides.catalog {
            self.catalog = catalog;
        }
        if let Some(images_root) = overrides.images_root {
            self.layout.images_root = images_root;
        }
        if let Some(headers_root) = overrides.headers_root {
            self.layout.headers_root = headers_root;
        }
        if let Some(out_dir) = overrides.out_dir {
            self.layout.out_dir = out_dir;
        }
        if let Some(filters) = overrides.filters {
            self.filters = dedup_filters(filters)?;
        }
        if let Some(secs) = overrides.unpack_timeout_secs {
            self.unpack_timeout = timeout_from_secs(secs)?;
        }
        if let Some(jobs) = overrides.jobs {
            self.jobs = jobs.max(1);
        }
        Ok(self)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `rcs2-stamps.json` in the working directory when it
    /// exists. Without either, the built-in defaults apply.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, StampError> {
        let config_path = match path {
            Some(path) => path.to_owned(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| StampError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| StampError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %config_path, "loaded config");

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, StampError> {
        let catalog_delimiter = config
            .catalog_delimiter
            .map(|ch| {
                u8::try_from(ch)
                    .ok()
                    .filter(u8::is_ascii)
                    .ok_or_else(|| {
                        StampError::ConfigParse(format!("catalog_delimiter {ch:?} is not ASCII"))
                    })
            })
            .transpose()?;

        let filters = match config.filters {
            Some(filters) => dedup_filters(filters)?,
            None => Filter::ALL.to_vec(),
        };

        Ok(ResolvedConfig {
            catalog: config
                .catalog
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CATALOG)),
            catalog_delimiter,
            layout: ArchiveLayout::new(
                config
                    .images_root
                    .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_IMAGES_ROOT)),
                config
                    .headers_root
                    .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_HEADERS_ROOT)),
                config
                    .out_dir
                    .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUT_DIR)),
            ),
            filters,
            unpack_program: config
                .unpack_program
                .unwrap_or_else(|| DEFAULT_UNPACK_PROGRAM.to_string()),
            unpack_args: config.unpack_args.unwrap_or_default(),
            unpack_timeout: timeout_from_secs(
                config
                    .unpack_timeout_secs
                    .unwrap_or(DEFAULT_UNPACK_TIMEOUT_SECS),
            )?,
            jobs: config.jobs.unwrap_or(1).max(1),
        })
    }
}

fn dedup_filters(filters: Vec<Filter>) -> Result<Vec<Filter>, StampError> {
    let mut unique = Vec::with_capacity(filters.len());
    for filter in filters {
        if !unique.contains(&filter) {
            unique.push(filter);
        }
    }
    if unique.is_empty() {
        return Err(StampError::InvalidFilter("no filters requested".to_string()));
    }
    Ok(unique)
}

fn timeout_from_secs(secs: u64) -> Result<Duration, StampError> {
    if secs == 0 {
        return Err(StampError::ConfigParse(
            "unpack timeout must be at least one second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_follow_archive_layout() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.catalog, DEFAULT_CATALOG);
        assert_eq!(resolved.layout.images_root, DEFAULT_IMAGES_ROOT);
        assert_eq!(resolved.filters, Filter::ALL.to_vec());
        assert_eq!(resolved.unpack_program, "funpack");
        assert_eq!(resolved.unpack_timeout, Duration::from_secs(300));
        assert_eq!(resolved.jobs, 1);
        assert_eq!(resolved.catalog_delimiter, None);
    }

    #[test]
    fn parse_json_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "catalog": "/srv/rcs2/chips.tsv",
                "catalog_delimiter": "\t",
                "filters": ["r", "z", "r"],
                "jobs": 4
            }"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.catalog, "/srv/rcs2/chips.tsv");
        assert_eq!(resolved.catalog_delimiter, Some(b'\t'));
        assert_eq!(resolved.filters, vec![Filter::R, Filter::Z]);
        assert_eq!(resolved.jobs, 4);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_json::from_str::<Config>(r#"{"catalogue": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn overrides_win() {
        let resolved = ConfigLoader::resolve_config(Config::default())
            .unwrap()
            .apply(ConfigOverrides {
                out_dir: Some(Utf8PathBuf::from("stamps")),
                jobs: Some(0),
                unpack_timeout_secs: Some(10),
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(resolved.layout.out_dir, "stamps");
        assert_eq!(resolved.jobs, 1);
        assert_eq!(resolved.unpack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            unpack_timeout_secs: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(StampError::ConfigParse(_))
        );
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::resolve(Some(Utf8Path::new("/nonexistent/rcs2-stamps.json")))
            .unwrap_err();
        assert_matches!(err, StampError::ConfigRead(_));
    }
}
