//! Tiled inference over whole volumes.
//!
//! The volume is split into an even grid of tiles, each tile (plus an
//! optional halo of context voxels) goes through the denoiser on its own, and
//! the tile interiors are stitched back together. The denoised result is then
//! rounded into the source sample type and optionally inverted.

use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, IxDyn, Slice};
use serde::Serialize;

use crate::domain::{DataType, TileCounts, axes_for_rank, grid_positions};
use crate::error::DenoiseError;
use crate::model::Denoiser;

#[derive(Debug, Clone, Serialize)]
pub struct InferenceOptions {
    pub n_tiles: TileCounts,
    /// Context voxels read around each tile and cropped after prediction.
    pub halo: usize,
    pub invert: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            n_tiles: TileCounts::default(),
            halo: 0,
            invert: false,
        }
    }
}

/// Splits `len` into `count` contiguous ranges whose sizes differ by at most one.
///
/// `count` is clamped to `1..=len`.
pub fn split_axis(len: usize, count: usize) -> Vec<Range<usize>> {
    let count = count.clamp(1, len.max(1));
    let base = len / count;
    let remainder = len % count;
    let mut ranges = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let size = base + usize::from(i < remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Runs `denoiser` over `volume` tile by tile and returns the raw prediction.
///
/// `axes` must be the label matching the volume rank (`YX` or `ZYX`).
pub fn predict_tiled<D: Denoiser + ?Sized>(
    denoiser: &D,
    volume: ArrayViewD<'_, f64>,
    axes: &str,
    n_tiles: &TileCounts,
    halo: usize,
) -> Result<ArrayD<f64>, DenoiseError> {
    let rank = volume.ndim();
    if axes_for_rank(rank)? != axes {
        return Err(DenoiseError::AxesMismatch {
            axes: axes.to_string(),
            rank,
        });
    }
    let counts = n_tiles.for_rank(rank)?;

    if denoiser.tiles_internally() {
        let prediction = denoiser.predict(volume.view(), axes, counts)?;
        ensure_shape(volume.shape(), prediction.shape())?;
        return Ok(prediction);
    }

    let per_axis = volume
        .shape()
        .iter()
        .zip(counts)
        .map(|(len, count)| split_axis(*len, *count))
        .collect::<Vec<_>>();
    let tile_grid = per_axis.iter().map(|ranges| 0..ranges.len()).collect::<Vec<_>>();
    let single = vec![1; rank];

    let mut out = ArrayD::<f64>::zeros(IxDyn(volume.shape()));
    for position in grid_positions(&tile_grid) {
        let tile = (0..rank)
            .map(|axis| per_axis[axis][position[axis]].clone())
            .collect::<Vec<_>>();
        let padded = tile
            .iter()
            .zip(volume.shape())
            .map(|(range, len)| range.start.saturating_sub(halo)..(range.end + halo).min(*len))
            .collect::<Vec<_>>();

        let input = volume.slice_each_axis(|desc| Slice::from(padded[desc.axis.index()].clone()));
        let prediction = denoiser.predict(input.view(), axes, &single)?;
        ensure_shape(input.shape(), prediction.shape())?;

        let interior = prediction.slice_each_axis(|desc| {
            let axis = desc.axis.index();
            Slice::from(tile[axis].start - padded[axis].start..tile[axis].end - padded[axis].start)
        });
        out.slice_each_axis_mut(|desc| Slice::from(tile[desc.axis.index()].clone()))
            .assign(&interior);
    }
    Ok(out)
}

fn ensure_shape(expected: &[usize], actual: &[usize]) -> Result<(), DenoiseError> {
    if expected != actual {
        return Err(DenoiseError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Converts a raw prediction into samples of `data_type`.
///
/// Integer types get `+0.5` before truncation, i.e. round-half-up for
/// non-negative values. With `invert_output`, every sample `v` becomes `max - v`.
pub fn postprocess(
    mut prediction: ArrayD<f64>,
    data_type: DataType,
    invert_output: bool,
) -> Result<ArrayD<f64>, DenoiseError> {
    if invert_output && !data_type.is_integer() {
        return Err(DenoiseError::InvertUnsupported(data_type));
    }
    let offset = if data_type.is_integer() { 0.5 } else { 0.0 };
    prediction.mapv_inplace(|value| data_type.cast(value + offset));
    if invert_output {
        invert(&mut prediction, data_type)?;
    }
    Ok(prediction)
}

/// Inverts already-cast samples: `v -> max - v`, saturating at the type range.
///
/// Negative samples of signed types would otherwise land above `max`.
pub fn invert(volume: &mut ArrayD<f64>, data_type: DataType) -> Result<(), DenoiseError> {
    let max = data_type
        .max_value()
        .ok_or(DenoiseError::InvertUnsupported(data_type))?;
    volume.mapv_inplace(|value| data_type.cast(max - value));
    Ok(())
}

/// Full inference step: rank check, tiled prediction, rounding and inversion.
pub fn denoise_volume<D: Denoiser + ?Sized>(
    denoiser: &D,
    volume: ArrayViewD<'_, f64>,
    data_type: DataType,
    options: &InferenceOptions,
) -> Result<ArrayD<f64>, DenoiseError> {
    let axes = axes_for_rank(volume.ndim())?;
    if options.invert && !data_type.is_integer() {
        return Err(DenoiseError::InvertUnsupported(data_type));
    }
    let prediction = predict_tiled(denoiser, volume, axes, &options.n_tiles, options.halo)?;
    postprocess(prediction, data_type, options.invert)
}
