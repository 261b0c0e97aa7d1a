use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StampError {
    #[error("failed to read chip catalog at {path}: {message}")]
    CatalogRead { path: Utf8PathBuf, message: String },

    #[error("malformed chip catalog: {0}")]
    CatalogParse(String),

    #[error("chip catalog is empty")]
    EmptyCatalog,

    #[error("invalid chip code {code}: row index {row} has no letter (expected 0..=9)")]
    #[diagnostic(help("the catalog CHIP column is corrupt"))]
    InvalidChipCode { code: u32, row: u32 },

    #[error("invalid pointing identifier: {0}")]
    #[diagnostic(help("expected a patch, row letter and column with an extension, e.g. 0047A0:00"))]
    InvalidPointing(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no chips cover RA={ra} Dec={dec}")]
    NoChipsFound { ra: f64, dec: f64 },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read target list: {0}")]
    Batch(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("install CFITSIO's funpack or point `unpack_program` at it"))]
    MissingTool(String),

    #[error("unpack failed: {0}")]
    Unpack(String),
}
