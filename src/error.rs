use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::DataType;

#[derive(Debug, Error, Diagnostic)]
pub enum DenoiseError {
    #[error("path not found: {0}")]
    MissingPath(Utf8PathBuf),

    #[error("not an N5 container: {0}")]
    NotN5(String),

    #[error("axes {axes:?} do not match a volume of rank {rank}")]
    AxesMismatch { axes: String, rank: usize },

    #[error("unsupported volume rank {0} (expected 2 or 3)")]
    UnsupportedRank(usize),

    #[error("invalid tile counts: {0}")]
    InvalidTileCounts(String),

    #[error("invalid setup selection: {0}")]
    InvalidSelection(String),

    #[error("no setups selected: {0}")]
    NoSetups(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    #[error("store opened read-only: {0}")]
    ReadOnly(String),

    #[error("unsupported data type: {0} (64-bit integers are not supported)")]
    UnsupportedDataType(String),

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("corrupt block {path}: {reason}")]
    CorruptBlock { path: String, reason: String },

    #[error("region {region:?} out of bounds for shape {shape:?}")]
    RegionOutOfBounds {
        region: Vec<(usize, usize)>,
        shape: Vec<usize>,
    },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("inversion requires an integer data type, got {0}")]
    InvertUnsupported(DataType),

    #[error("unexpected lazy view access: {0}")]
    AccessPattern(String),

    #[error("patch shape {patch:?} does not fit volume shape {volume:?}")]
    PatchTooLarge {
        patch: Vec<usize>,
        volume: Vec<usize>,
    },

    #[error("patch augmentation is not supported for lazily read volumes")]
    AugmentUnsupported,

    #[error("patch generation produced no patches")]
    NoPatches,

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("model runner failed: {0}")]
    Model(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
