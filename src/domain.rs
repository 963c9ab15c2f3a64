use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DenoiseError;

/// Name of the single timepoint group holding a setup's resolution pyramid.
pub const TIMEPOINT: &str = "timepoint0";

/// Key of the full-resolution level inside a pyramid.
pub const BASE_LEVEL: &str = "s0";

static SETUP_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^setup(\d+)$").expect("static regex"));
static LEVEL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^s(\d+)$").expect("static regex"));

/// Element type of an N5 dataset.
///
/// Samples travel as `f64`, so only types it holds exactly are supported;
/// `uint64` and `int64` datasets are rejected when their metadata is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Largest representable value, or `None` for floating point types.
    pub fn max_value(self) -> Option<f64> {
        match self {
            DataType::Uint8 => Some(u8::MAX as f64),
            DataType::Uint16 => Some(u16::MAX as f64),
            DataType::Uint32 => Some(u32::MAX as f64),
            DataType::Int8 => Some(i8::MAX as f64),
            DataType::Int16 => Some(i16::MAX as f64),
            DataType::Int32 => Some(i32::MAX as f64),
            DataType::Float32 | DataType::Float64 => None,
        }
    }

    /// Converts a sample to the nearest value this type can hold.
    ///
    /// Integer types truncate toward zero and saturate at their range,
    /// `float32` rounds to single precision.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DataType::Uint8 => value as u8 as f64,
            DataType::Uint16 => value as u16 as f64,
            DataType::Uint32 => value as u32 as f64,
            DataType::Int8 => value as i8 as f64,
            DataType::Int16 => value as i16 as f64,
            DataType::Int32 => value as i32 as f64,
            DataType::Float32 => value as f32 as f64,
            DataType::Float64 => value,
        }
    }

    /// Appends `value` in big-endian byte order.
    pub fn encode(self, value: f64, out: &mut Vec<u8>) {
        match self {
            DataType::Uint8 => out.push(value as u8),
            DataType::Uint16 => out.extend_from_slice(&(value as u16).to_be_bytes()),
            DataType::Uint32 => out.extend_from_slice(&(value as u32).to_be_bytes()),
            DataType::Int8 => out.extend_from_slice(&(value as i8).to_be_bytes()),
            DataType::Int16 => out.extend_from_slice(&(value as i16).to_be_bytes()),
            DataType::Int32 => out.extend_from_slice(&(value as i32).to_be_bytes()),
            DataType::Float32 => out.extend_from_slice(&(value as f32).to_be_bytes()),
            DataType::Float64 => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    /// Decodes one big-endian element; `bytes` must be exactly `size()` long.
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            DataType::Uint8 => bytes[0] as f64,
            DataType::Uint16 => u16::from_be_bytes(array(bytes)) as f64,
            DataType::Uint32 => u32::from_be_bytes(array(bytes)) as f64,
            DataType::Int8 => i8::from_be_bytes(array(bytes)) as f64,
            DataType::Int16 => i16::from_be_bytes(array(bytes)) as f64,
            DataType::Int32 => i32::from_be_bytes(array(bytes)) as f64,
            DataType::Float32 => f32::from_be_bytes(array(bytes)) as f64,
            DataType::Float64 => f64::from_be_bytes(array(bytes)),
        }
    }
}

impl FromStr for DataType {
    type Err = DenoiseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "uint8" => Ok(DataType::Uint8),
            "uint16" => Ok(DataType::Uint16),
            "uint32" => Ok(DataType::Uint32),
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            other => Err(DenoiseError::UnsupportedDataType(other.to_string())),
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        write!(f, "{name}")
    }
}

/// Block compression of an N5 dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Compression {
    Raw,
    Gzip {
        #[serde(default = "default_gzip_level")]
        level: i32,
        #[serde(default, rename = "useZlib")]
        use_zlib: bool,
    },
    Bzip2 {
        #[serde(default = "default_bzip2_block_size", rename = "blockSize")]
        block_size: u32,
    },
    Xz {
        #[serde(default = "default_xz_preset")]
        preset: u32,
    },
    Lz4 {
        #[serde(default = "default_lz4_block_size", rename = "blockSize")]
        block_size: u32,
    },
}

impl Compression {
    /// Codec named by the legacy `compressionType` key, with default parameters.
    pub fn from_legacy_name(name: &str) -> Option<Self> {
        match name {
            "raw" => Some(Compression::Raw),
            "gzip" => Some(Compression::Gzip {
                level: default_gzip_level(),
                use_zlib: false,
            }),
            "bzip2" => Some(Compression::Bzip2 {
                block_size: default_bzip2_block_size(),
            }),
            "xz" => Some(Compression::Xz {
                preset: default_xz_preset(),
            }),
            "lz4" => Some(Compression::Lz4 {
                block_size: default_lz4_block_size(),
            }),
            _ => None,
        }
    }
}

fn default_gzip_level() -> i32 {
    -1
}

fn default_bzip2_block_size() -> u32 {
    9
}

fn default_xz_preset() -> u32 {
    6
}

fn default_lz4_block_size() -> u32 {
    1 << 16
}

/// Identifier of one imaging series ("setup") in a BigDataViewer container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SetupId(u32);

impl SetupId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// Parses a root group name such as `setup3`.
    pub fn from_group_name(name: &str) -> Option<Self> {
        SETUP_GROUP
            .captures(name)
            .and_then(|caps| caps[1].parse().ok())
            .map(Self)
    }

    pub fn group(self) -> String {
        format!("setup{}", self.0)
    }

    pub fn timepoint(self) -> String {
        format!("setup{}/{TIMEPOINT}", self.0)
    }

    pub fn level(self, level: &str) -> String {
        format!("setup{}/{TIMEPOINT}/{level}", self.0)
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup{}", self.0)
    }
}

/// Sort key for pyramid level names: `s<N>` by number, anything else after.
pub fn level_order(name: &str) -> (usize, String) {
    let index = LEVEL_KEY
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(usize::MAX);
    (index, name.to_string())
}

/// Axis labels for a volume of the given rank, a suffix of `ZYX`.
pub fn axes_for_rank(rank: usize) -> Result<&'static str, DenoiseError> {
    match rank {
        2 | 3 => Ok(&"ZYX"[3 - rank..]),
        other => Err(DenoiseError::UnsupportedRank(other)),
    }
}

/// Every index combination of the given per-axis ranges, last axis fastest.
pub fn grid_positions(ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
    let mut positions = vec![Vec::with_capacity(ranges.len())];
    for range in ranges {
        positions = positions
            .into_iter()
            .flat_map(|prefix: Vec<usize>| {
                range.clone().map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    positions
}

/// Number of tiles per `Z`, `Y`, `X` axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileCounts([usize; 3]);

impl TileCounts {
    pub fn new(counts: [usize; 3]) -> Result<Self, DenoiseError> {
        if counts.contains(&0) {
            return Err(DenoiseError::InvalidTileCounts(format!(
                "{counts:?} contains zero"
            )));
        }
        Ok(Self(counts))
    }

    pub fn single() -> Self {
        Self([1, 1, 1])
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// The trailing `rank` counts, one per volume axis.
    pub fn for_rank(&self, rank: usize) -> Result<&[usize], DenoiseError> {
        if rank == 0 || rank > 3 {
            return Err(DenoiseError::UnsupportedRank(rank));
        }
        Ok(&self.0[3 - rank..])
    }
}

impl Default for TileCounts {
    fn default() -> Self {
        Self([8, 8, 8])
    }
}

/// A `start:stop:step` selection over the setups of a container.
///
/// Empty fields are unbounded; indices follow Python slice rules, so
/// negative values count from the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupSelection {
    raw: String,
    start: Option<isize>,
    stop: Option<isize>,
    step: Option<isize>,
}

impl SetupSelection {
    pub fn all() -> Self {
        Self {
            raw: ":".to_string(),
            start: None,
            stop: None,
            step: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn bounds(&self) -> (Option<isize>, Option<isize>, Option<isize>) {
        (self.start, self.stop, self.step)
    }

    /// Indices into a sequence of length `len` picked by this selection.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let len = len as isize;
        let step = self.step.unwrap_or(1);
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |value: Option<isize>, default: isize| match value {
            None => default,
            Some(v) if v < 0 => (v + len).max(lower),
            Some(v) => v.min(upper),
        };
        let (start, stop) = if step < 0 {
            (clamp(self.start, upper), clamp(self.stop, lower))
        } else {
            (clamp(self.start, lower), clamp(self.stop, upper))
        };

        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        out
    }

    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.indices(items.len())
            .into_iter()
            .map(|i| items[i].clone())
            .collect()
    }
}

impl fmt::Display for SetupSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for SetupSelection {
    type Err = DenoiseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parts = trimmed.split(':').collect::<Vec<_>>();
        if parts.len() > 3 {
            return Err(DenoiseError::InvalidSelection(value.to_string()));
        }
        let field = |idx: usize| -> Result<Option<isize>, DenoiseError> {
            match parts.get(idx).map(|part| part.trim()) {
                None | Some("") => Ok(None),
                Some(text) => text
                    .parse()
                    .map(Some)
                    .map_err(|_| DenoiseError::InvalidSelection(value.to_string())),
            }
        };
        let selection = Self {
            raw: trimmed.to_string(),
            start: field(0)?,
            stop: field(1)?,
            step: field(2)?,
        };
        if selection.step == Some(0) {
            return Err(DenoiseError::InvalidSelection(format!(
                "{value}: step cannot be zero"
            )));
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn selection_defaults_to_everything() {
        let sel: SetupSelection = ":".parse().unwrap();
        assert_eq!(sel.indices(4), vec![0, 1, 2, 3]);
        assert_eq!(sel.bounds(), (None, None, None));
    }

    #[test]
    fn selection_negative_step() {
        let sel: SetupSelection = "::-2".parse().unwrap();
        assert_eq!(sel.indices(5), vec![4, 2, 0]);
    }

    #[test]
    fn selection_rejects_zero_step() {
        let err = "0:4:0".parse::<SetupSelection>().unwrap_err();
        assert_matches!(err, DenoiseError::InvalidSelection(_));
    }

    #[test]
    fn grid_positions_are_row_major() {
        let positions = grid_positions(&[0..2, 1..3]);
        assert_eq!(
            positions,
            vec![vec![0, 1], vec![0, 2], vec![1, 1], vec![1, 2]]
        );
    }

    #[test]
    fn cast_truncates_and_saturates() {
        assert_eq!(DataType::Uint8.cast(3.9), 3.0);
        assert_eq!(DataType::Uint8.cast(300.0), 255.0);
        assert_eq!(DataType::Uint16.cast(-4.0), 0.0);
        assert_eq!(DataType::Int16.cast(-4.7), -4.0);
    }

    #[test]
    fn encode_decode_big_endian() {
        let mut buf = Vec::new();
        DataType::Uint16.encode(258.0, &mut buf);
        assert_eq!(buf, vec![1, 2]);
        assert_eq!(DataType::Uint16.decode(&buf), 258.0);
    }

    #[test]
    fn names_parse_and_display_alike() {
        for name in ["uint8", "uint16", "uint32", "int8", "int16", "int32", "float32", "float64"] {
            assert_eq!(name.parse::<DataType>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn wide_integers_are_unsupported() {
        for name in ["uint64", "int64", "complex64"] {
            assert_matches!(
                name.parse::<DataType>(),
                Err(DenoiseError::UnsupportedDataType(found)) if found == name
            );
        }
    }
}
