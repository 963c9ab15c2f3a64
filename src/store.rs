use std::fs;
use std::ops::Range;

use camino::{Utf8Path, Utf8PathBuf};
use ndarray::{ArrayD, ArrayViewD, IxDyn, Slice};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::codec::{compress, decompress};
use crate::domain::{Compression, DataType, SetupId, grid_positions};
use crate::error::DenoiseError;
use crate::fs_util::{read_json_optional, write_json_atomic};

/// Free-form JSON attributes attached to a group or dataset.
pub type Attributes = Map<String, Value>;

pub const N5_VERSION: &str = "2.5.1";

const ATTRIBUTES_FILE: &str = "attributes.json";
const MODE_DEFAULT: u16 = 0;
const MODE_VARLENGTH: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Read-write; the container is created when missing.
    Append,
}

/// Layout of a dataset, with `shape` and `chunks` in C order (slowest axis first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetAttributes {
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub data_type: DataType,
    pub compression: Compression,
}

impl DatasetAttributes {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn grid_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(len, chunk)| len.div_ceil(*chunk))
            .collect()
    }

    fn validate(&self, key: &str) -> Result<(), DenoiseError> {
        if self.shape.len() != self.chunks.len() {
            return Err(DenoiseError::Store(format!(
                "{key}: block size rank {} does not match shape rank {}",
                self.chunks.len(),
                self.shape.len()
            )));
        }
        if self.chunks.contains(&0) {
            return Err(DenoiseError::Store(format!("{key}: zero block size")));
        }
        Ok(())
    }

    fn to_json(&self) -> Attributes {
        let reversed = |values: &[usize]| values.iter().rev().copied().collect::<Vec<_>>();
        let mut map = Attributes::new();
        map.insert("dimensions".to_string(), Value::from(reversed(&self.shape)));
        map.insert("blockSize".to_string(), Value::from(reversed(&self.chunks)));
        map.insert(
            "dataType".to_string(),
            Value::String(self.data_type.to_string()),
        );
        let compression = match self.compression {
            Compression::Raw => serde_json::json!({"type": "raw"}),
            Compression::Gzip { level, use_zlib } => {
                serde_json::json!({"type": "gzip", "level": level, "useZlib": use_zlib})
            }
            Compression::Bzip2 { block_size } => {
                serde_json::json!({"type": "bzip2", "blockSize": block_size})
            }
            Compression::Xz { preset } => serde_json::json!({"type": "xz", "preset": preset}),
            Compression::Lz4 { block_size } => {
                serde_json::json!({"type": "lz4", "blockSize": block_size})
            }
        };
        map.insert("compression".to_string(), compression);
        map
    }

    fn from_json(key: &str, attributes: &Attributes) -> Result<Option<Self>, DenoiseError> {
        if !attributes.contains_key("dimensions") {
            return Ok(None);
        }
        let raw: RawDatasetAttributes = serde_json::from_value(Value::Object(attributes.clone()))
            .map_err(|err| DenoiseError::Store(format!("{key}: {err}")))?;

        let compression = match (raw.compression, raw.compression_type) {
            (Some(value), _) => serde_json::from_value(value.clone())
                .map_err(|_| DenoiseError::UnsupportedCompression(value.to_string()))?,
            (None, Some(kind)) => Compression::from_legacy_name(&kind)
                .ok_or(DenoiseError::UnsupportedCompression(kind))?,
            (None, None) => Compression::Raw,
        };

        let attrs = Self {
            shape: raw.dimensions.into_iter().rev().collect(),
            chunks: raw.block_size.into_iter().rev().collect(),
            data_type: raw.data_type.parse()?,
            compression,
        };
        attrs.validate(key)?;
        Ok(Some(attrs))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDatasetAttributes {
    dimensions: Vec<usize>,
    block_size: Vec<usize>,
    data_type: String,
    #[serde(default)]
    compression: Option<Value>,
    #[serde(default)]
    compression_type: Option<String>,
}

/// Operations the pipeline needs from a chunked, hierarchical array store.
pub trait ChunkedStore {
    /// Child group and dataset names of `group`, sorted lexicographically.
    fn list(&self, group: &str) -> Result<Vec<String>, DenoiseError>;

    fn attributes(&self, group: &str) -> Result<Attributes, DenoiseError>;

    /// Merges `attributes` into the existing attributes of `group`, key by key.
    fn set_attributes(&self, group: &str, attributes: &Attributes) -> Result<(), DenoiseError>;

    fn dataset(&self, key: &str) -> Result<DatasetAttributes, DenoiseError>;

    fn read_region(&self, key: &str, region: &[Range<usize>])
    -> Result<ArrayD<f64>, DenoiseError>;

    fn read(&self, key: &str) -> Result<ArrayD<f64>, DenoiseError> {
        let attrs = self.dataset(key)?;
        let region = attrs.shape.iter().map(|len| 0..*len).collect::<Vec<_>>();
        self.read_region(key, &region)
    }

    fn create_dataset(&self, key: &str, attributes: &DatasetAttributes)
    -> Result<(), DenoiseError>;

    /// Overwrites the whole dataset; `n_threads` bounds the block encoders.
    fn write(&self, key: &str, data: ArrayViewD<'_, f64>, n_threads: usize)
    -> Result<(), DenoiseError>;
}

/// Setups present at the root of a container, in numeric order.
pub fn list_setups<S: ChunkedStore + ?Sized>(store: &S) -> Result<Vec<SetupId>, DenoiseError> {
    let mut setups = store
        .list("")?
        .iter()
        .filter_map(|name| SetupId::from_group_name(name))
        .collect::<Vec<_>>();
    setups.sort();
    Ok(setups)
}

/// Filesystem N5 container as written by BigDataViewer and z5.
#[derive(Debug, Clone)]
pub struct N5Store {
    root: Utf8PathBuf,
    mode: OpenMode,
}

impl N5Store {
    pub fn open(root: impl Into<Utf8PathBuf>, mode: OpenMode) -> Result<Self, DenoiseError> {
        let root = root.into();
        match mode {
            OpenMode::Read => {
                if !root.as_std_path().is_dir() {
                    return Err(DenoiseError::MissingPath(root));
                }
            }
            OpenMode::Append => {
                fs::create_dir_all(root.as_std_path())
                    .map_err(|err| DenoiseError::Filesystem(format!("create {root}: {err}")))?;
                let attrs_path = root.join(ATTRIBUTES_FILE);
                let mut attrs: Attributes = read_json_optional(&attrs_path)?.unwrap_or_default();
                if !attrs.contains_key("n5") {
                    attrs.insert("n5".to_string(), Value::String(N5_VERSION.to_string()));
                    write_json_atomic(&attrs_path, &attrs)?;
                }
            }
        }
        tracing::debug!(root = %root, ?mode, "opened n5 container");
        Ok(Self { root, mode })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key)
            .map(|path| path.as_std_path().exists())
            .unwrap_or(false)
    }

    fn path(&self, key: &str) -> Result<Utf8PathBuf, DenoiseError> {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|part| !part.is_empty()) {
            if part == "." || part == ".." || part.contains('\\') {
                return Err(DenoiseError::InvalidKey(key.to_string()));
            }
            path.push(part);
        }
        Ok(path)
    }

    fn ensure_writable(&self, key: &str) -> Result<(), DenoiseError> {
        match self.mode {
            OpenMode::Append => Ok(()),
            OpenMode::Read => Err(DenoiseError::ReadOnly(format!("{}:{key}", self.root))),
        }
    }

    fn read_attributes(&self, path: &Utf8Path) -> Result<Option<Attributes>, DenoiseError> {
        read_json_optional(&path.join(ATTRIBUTES_FILE))
    }

    fn block_path(dataset: &Utf8Path, position: &[usize]) -> Utf8PathBuf {
        let mut path = dataset.to_path_buf();
        for index in position.iter().rev() {
            path.push(index.to_string());
        }
        path
    }

    fn read_block(
        &self,
        path: &Utf8Path,
        attrs: &DatasetAttributes,
    ) -> Result<Option<ArrayD<f64>>, DenoiseError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| DenoiseError::Filesystem(format!("read {path}: {err}")))?;
        let corrupt = |reason: String| DenoiseError::CorruptBlock {
            path: path.to_string(),
            reason,
        };

        let mut cursor = BlockCursor::new(&bytes);
        let mode = cursor.u16().ok_or_else(|| corrupt("truncated header".into()))?;
        let ndim = cursor.u16().ok_or_else(|| corrupt("truncated header".into()))? as usize;
        if ndim != attrs.ndim() {
            return Err(corrupt(format!(
                "block rank {ndim} does not match dataset rank {}",
                attrs.ndim()
            )));
        }
        let mut sizes = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            let size = cursor.u32().ok_or_else(|| corrupt("truncated header".into()))?;
            sizes.push(size as usize);
        }
        let mut num_elements = sizes.iter().product::<usize>();
        match mode {
            MODE_DEFAULT => {}
            MODE_VARLENGTH => {
                num_elements = cursor
                    .u32()
                    .ok_or_else(|| corrupt("truncated header".into()))?
                    as usize;
            }
            other => return Err(corrupt(format!("unsupported block mode {other}"))),
        }

        let payload = decompress(attrs.compression, cursor.rest())
            .map_err(|err| corrupt(format!("decompression failed: {err}")))?;
        let width = attrs.data_type.size();
        if payload.len() < num_elements * width {
            return Err(corrupt(format!(
                "payload holds {} bytes, expected {}",
                payload.len(),
                num_elements * width
            )));
        }
        let values = payload
            .chunks_exact(width)
            .take(num_elements)
            .map(|chunk| attrs.data_type.decode(chunk))
            .collect::<Vec<_>>();

        let shape = sizes.iter().rev().copied().collect::<Vec<_>>();
        let block = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|err| corrupt(err.to_string()))?;
        Ok(Some(block))
    }

    fn write_block(
        path: &Utf8Path,
        attrs: &DatasetAttributes,
        block: ArrayViewD<'_, f64>,
    ) -> Result<(), DenoiseError> {
        let ndim = block.ndim();
        let width = attrs.data_type.size();
        let mut raw = Vec::with_capacity(block.len() * width);
        for value in block.iter() {
            attrs.data_type.encode(*value, &mut raw);
        }

        let mut bytes = Vec::with_capacity(4 + 4 * ndim + raw.len());
        bytes.extend_from_slice(&MODE_DEFAULT.to_be_bytes());
        bytes.extend_from_slice(&(ndim as u16).to_be_bytes());
        for len in block.shape().iter().rev() {
            bytes.extend_from_slice(&(*len as u32).to_be_bytes());
        }
        bytes.extend(
            compress(attrs.compression, &raw)
                .map_err(|err| DenoiseError::Store(format!("compression failed: {err}")))?,
        );

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DenoiseError::Filesystem(format!("create {parent}: {err}")))?;
        }
        fs::write(path.as_std_path(), &bytes)
            .map_err(|err| DenoiseError::Filesystem(format!("write {path}: {err}")))
    }
}

impl ChunkedStore for N5Store {
    fn list(&self, group: &str) -> Result<Vec<String>, DenoiseError> {
        let path = self.path(group)?;
        if !path.as_std_path().is_dir() {
            return Err(DenoiseError::GroupNotFound(group.to_string()));
        }
        let entries = fs::read_dir(path.as_std_path())
            .map_err(|err| DenoiseError::Filesystem(format!("list {path}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| DenoiseError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn attributes(&self, group: &str) -> Result<Attributes, DenoiseError> {
        let path = self.path(group)?;
        if !path.as_std_path().is_dir() {
            return Err(DenoiseError::GroupNotFound(group.to_string()));
        }
        Ok(self.read_attributes(&path)?.unwrap_or_default())
    }

    fn set_attributes(&self, group: &str, attributes: &Attributes) -> Result<(), DenoiseError> {
        self.ensure_writable(group)?;
        let path = self.path(group)?;
        let mut merged = self.read_attributes(&path)?.unwrap_or_default();
        for (key, value) in attributes {
            merged.insert(key.clone(), value.clone());
        }
        write_json_atomic(&path.join(ATTRIBUTES_FILE), &merged)
    }

    fn dataset(&self, key: &str) -> Result<DatasetAttributes, DenoiseError> {
        let path = self.path(key)?;
        let attributes = self
            .read_attributes(&path)?
            .ok_or_else(|| DenoiseError::DatasetNotFound(key.to_string()))?;
        DatasetAttributes::from_json(key, &attributes)?
            .ok_or_else(|| DenoiseError::DatasetNotFound(key.to_string()))
    }

    fn read_region(
        &self,
        key: &str,
        region: &[Range<usize>],
    ) -> Result<ArrayD<f64>, DenoiseError> {
        let attrs = self.dataset(key)?;
        let in_bounds = region.len() == attrs.ndim()
            && region
                .iter()
                .zip(&attrs.shape)
                .all(|(range, len)| range.start <= range.end && range.end <= *len);
        if !in_bounds {
            return Err(DenoiseError::RegionOutOfBounds {
                region: region.iter().map(|r| (r.start, r.end)).collect(),
                shape: attrs.shape.clone(),
            });
        }

        let out_shape = region.iter().map(|r| r.len()).collect::<Vec<_>>();
        let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));
        if out.is_empty() {
            return Ok(out);
        }

        let grid = region
            .iter()
            .zip(&attrs.chunks)
            .map(|(range, chunk)| range.start / chunk..(range.end - 1) / chunk + 1)
            .collect::<Vec<_>>();
        let dataset_path = self.path(key)?;
        let mut blocks_read = 0usize;
        for position in grid_positions(&grid) {
            let block_path = Self::block_path(&dataset_path, &position);
            let Some(block) = self.read_block(&block_path, &attrs)? else {
                continue;
            };
            blocks_read += 1;
            let origin = position
                .iter()
                .zip(&attrs.chunks)
                .map(|(index, chunk)| index * chunk)
                .collect::<Vec<_>>();
            let lo = (0..region.len())
                .map(|axis| region[axis].start.max(origin[axis]))
                .collect::<Vec<_>>();
            let hi = (0..region.len())
                .map(|axis| region[axis].end.min(origin[axis] + block.shape()[axis]))
                .collect::<Vec<_>>();
            if lo.iter().zip(&hi).any(|(lo, hi)| lo >= hi) {
                continue;
            }
            let source = block.slice_each_axis(|desc| {
                let axis = desc.axis.index();
                Slice::from(lo[axis] - origin[axis]..hi[axis] - origin[axis])
            });
            out.slice_each_axis_mut(|desc| {
                let axis = desc.axis.index();
                Slice::from(lo[axis] - region[axis].start..hi[axis] - region[axis].start)
            })
            .assign(&source);
        }
        tracing::trace!(key, blocks_read, "read region");
        Ok(out)
    }

    fn create_dataset(
        &self,
        key: &str,
        attributes: &DatasetAttributes,
    ) -> Result<(), DenoiseError> {
        self.ensure_writable(key)?;
        attributes.validate(key)?;
        let path = self.path(key)?;
        let mut merged = self.read_attributes(&path)?.unwrap_or_default();
        if merged.contains_key("dimensions") {
            return Err(DenoiseError::DatasetExists(key.to_string()));
        }
        merged.extend(attributes.to_json());
        write_json_atomic(&path.join(ATTRIBUTES_FILE), &merged)
    }

    fn write(
        &self,
        key: &str,
        data: ArrayViewD<'_, f64>,
        n_threads: usize,
    ) -> Result<(), DenoiseError> {
        self.ensure_writable(key)?;
        let attrs = self.dataset(key)?;
        if data.shape() != attrs.shape.as_slice() {
            return Err(DenoiseError::ShapeMismatch {
                expected: attrs.shape.clone(),
                actual: data.shape().to_vec(),
            });
        }

        let dataset_path = self.path(key)?;
        let grid = attrs
            .grid_shape()
            .into_iter()
            .map(|len| 0..len)
            .collect::<Vec<_>>();
        let positions = grid_positions(&grid);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads.max(1))
            .build()
            .map_err(|err| DenoiseError::Store(err.to_string()))?;

        pool.install(|| {
            positions.par_iter().try_for_each(|position| {
                let block = data.slice_each_axis(|desc| {
                    let axis = desc.axis.index();
                    let start = position[axis] * attrs.chunks[axis];
                    let end = (start + attrs.chunks[axis]).min(attrs.shape[axis]);
                    Slice::from(start..end)
                });
                Self::write_block(&Self::block_path(&dataset_path, position), &attrs, block)
            })
        })?;
        tracing::debug!(key, blocks = positions.len(), n_threads, "wrote dataset");
        Ok(())
    }
}

struct BlockCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlockCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.offset..self.offset + len)?;
        self.offset += len;
        Some(slice)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }
}
