//! Array-like stand-in for a stored volume, read only where a patch is taken.
//!
//! Patch generators expect an in-memory batch shaped `(1, spatial..., 1)` and
//! index it in exactly one way:
//!
//! ```text
//! image[s]           -> Access::Index(0)    (drop the batch axis)
//! image[s][None]     -> Access::NewAxis     (re-add it)
//! data[0, z, y, x]   -> Access::Tuple(..)   (read one patch)
//! ```
//!
//! [`LazyView`] accepts those three shapes and nothing else. Only the last
//! one touches the backing store, and only for the requested region.

use std::fmt;
use std::ops::Range;

use ndarray::{ArrayD, Axis};

use crate::error::DenoiseError;
use crate::store::ChunkedStore;

/// A volume that can be read one rectangular region at a time.
pub trait VolumeSource {
    fn shape(&self) -> &[usize];

    fn read_region(&self, region: &[Range<usize>]) -> Result<ArrayD<f64>, DenoiseError>;
}

/// A dataset inside a [`ChunkedStore`], read on demand.
pub struct StoreVolume<'s, S: ?Sized> {
    store: &'s S,
    key: String,
    shape: Vec<usize>,
}

impl<'s, S: ChunkedStore + ?Sized> StoreVolume<'s, S> {
    pub fn open(store: &'s S, key: &str) -> Result<Self, DenoiseError> {
        let attrs = store.dataset(key)?;
        Ok(Self {
            store,
            key: key.to_string(),
            shape: attrs.shape,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S: ChunkedStore + ?Sized> VolumeSource for StoreVolume<'_, S> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn read_region(&self, region: &[Range<usize>]) -> Result<ArrayD<f64>, DenoiseError> {
        self.store.read_region(&self.key, region)
    }
}

/// One element of a tuple index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisIndex {
    Index(usize),
    Slice(Range<usize>),
}

/// An indexing operation as issued by a patch generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// `view[i]`
    Index(usize),
    /// `view[None]`
    NewAxis,
    /// `view[a, b, ...]`
    Tuple(Vec<AxisIndex>),
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Index(i) => write!(f, "[{i}]"),
            Access::NewAxis => write!(f, "[None]"),
            Access::Tuple(items) => {
                let parts = items
                    .iter()
                    .map(|item| match item {
                        AxisIndex::Index(i) => i.to_string(),
                        AxisIndex::Slice(r) => format!("{}:{}", r.start, r.end),
                    })
                    .collect::<Vec<_>>();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Result of indexing: either another indexable view or materialized data.
#[derive(Debug)]
pub enum Indexed<V> {
    View(V),
    Data(ArrayD<f64>),
}

impl<V> Indexed<V> {
    pub fn into_view(self) -> Result<V, DenoiseError> {
        match self {
            Indexed::View(view) => Ok(view),
            Indexed::Data(_) => Err(DenoiseError::AccessPattern(
                "expected a view, got materialized data".to_string(),
            )),
        }
    }

    pub fn into_data(self) -> Result<ArrayD<f64>, DenoiseError> {
        match self {
            Indexed::Data(data) => Ok(data),
            Indexed::View(_) => Err(DenoiseError::AccessPattern(
                "expected data, got a view".to_string(),
            )),
        }
    }
}

/// Batch-of-images interface consumed by patch generators.
pub trait Indexable: Sized {
    fn shape(&self) -> Vec<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, access: &Access) -> Result<Indexed<Self>, DenoiseError>;
}

/// Presents a volume of shape `S` as a batch of shape `(1,) + S + (1,)`.
pub struct LazyView<'v, V: ?Sized> {
    backing: &'v V,
}

impl<V: ?Sized> Clone for LazyView<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: ?Sized> Copy for LazyView<'_, V> {}

impl<V: VolumeSource + ?Sized> fmt::Debug for LazyView<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyView")
            .field("shape", &self.backing.shape())
            .finish()
    }
}

impl<'v, V: VolumeSource + ?Sized> LazyView<'v, V> {
    pub fn new(backing: &'v V) -> Self {
        Self { backing }
    }

    pub fn backing(&self) -> &'v V {
        self.backing
    }

    fn read(&self, items: &[AxisIndex]) -> Result<ArrayD<f64>, DenoiseError> {
        let shape = self.backing.shape();
        if items.len() > shape.len() {
            return Err(DenoiseError::AccessPattern(format!(
                "{} indices for a volume of rank {}",
                items.len(),
                shape.len()
            )));
        }

        let mut region = Vec::with_capacity(shape.len());
        let mut dropped = Vec::new();
        for (axis, len) in shape.iter().enumerate() {
            let range = match items.get(axis) {
                None => 0..*len,
                Some(AxisIndex::Slice(range)) => range.clone(),
                Some(AxisIndex::Index(i)) => {
                    dropped.push(axis);
                    *i..*i + 1
                }
            };
            if range.start > range.end || range.end > *len {
                return Err(DenoiseError::RegionOutOfBounds {
                    region: items
                        .iter()
                        .map(|item| match item {
                            AxisIndex::Index(i) => (*i, *i + 1),
                            AxisIndex::Slice(r) => (r.start, r.end),
                        })
                        .collect(),
                    shape: shape.to_vec(),
                });
            }
            region.push(range);
        }

        let mut data = self.backing.read_region(&region)?;
        for axis in dropped.into_iter().rev() {
            data = data.index_axis_move(Axis(axis), 0);
        }
        Ok(data)
    }
}

impl<V: VolumeSource + ?Sized> Indexable for LazyView<'_, V> {
    fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.backing.shape().len() + 2);
        shape.push(1);
        shape.extend_from_slice(self.backing.shape());
        shape.push(1);
        shape
    }

    fn len(&self) -> usize {
        1
    }

    fn get(&self, access: &Access) -> Result<Indexed<Self>, DenoiseError> {
        match access {
            Access::Index(0) => Ok(Indexed::View(Self::new(self.backing))),
            Access::NewAxis => Ok(Indexed::View(*self)),
            Access::Tuple(items) if items.len() > 1 && items[0] == AxisIndex::Index(0) => {
                self.read(&items[1..]).map(Indexed::Data)
            }
            other => Err(DenoiseError::AccessPattern(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    struct Zeros(Vec<usize>);

    impl VolumeSource for Zeros {
        fn shape(&self) -> &[usize] {
            &self.0
        }

        fn read_region(&self, region: &[Range<usize>]) -> Result<ArrayD<f64>, DenoiseError> {
            let shape = region.iter().map(|r| r.len()).collect::<Vec<_>>();
            Ok(ArrayD::zeros(IxDyn(&shape)))
        }
    }

    #[test]
    fn scalar_index_in_tuple_drops_axis() {
        let backing = Zeros(vec![4, 5, 6]);
        let view = LazyView::new(&backing);
        let data = view
            .get(&Access::Tuple(vec![
                AxisIndex::Index(0),
                AxisIndex::Index(2),
                AxisIndex::Slice(1..3),
            ]))
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(data.shape(), &[2, 6]);
    }

    #[test]
    fn access_display_reads_like_python() {
        let access = Access::Tuple(vec![AxisIndex::Index(0), AxisIndex::Slice(1..3)]);
        assert_eq!(access.to_string(), "[0, 1:3]");
    }

    #[test]
    fn debug_shows_backing_shape() {
        let backing = Zeros(vec![4, 5, 6]);
        let view = LazyView::new(&backing);
        assert_eq!(format!("{view:?}"), "LazyView { shape: [4, 5, 6] }");
    }
}
