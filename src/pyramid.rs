use ndarray::ArrayD;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{SetupId, level_order};
use crate::error::DenoiseError;
use crate::resample::resize_linear;
use crate::store::ChunkedStore;

/// Lower-resolution levels of a setup's pyramid in processing order, `s0` excluded.
pub fn sibling_levels<S: ChunkedStore + ?Sized>(
    store: &S,
    setup: SetupId,
) -> Result<Vec<String>, DenoiseError> {
    let mut levels = store.list(&setup.timepoint())?;
    levels.sort_by_key(|name| level_order(name));
    Ok(levels.into_iter().skip(1).collect())
}

/// Rebuilds the lower pyramid levels of `setup` in `output` from a denoised base.
///
/// Each level is resampled from the previously reconstructed level, never
/// from the base directly, and written with the layout of the matching level
/// in `input`. Returns the level names in the order they were written.
pub fn reconstruct_pyramid<S, T>(
    input: &S,
    output: &T,
    setup: SetupId,
    base: ArrayD<f64>,
    sink: &dyn ProgressSink,
) -> Result<Vec<String>, DenoiseError>
where
    S: ChunkedStore + ?Sized,
    T: ChunkedStore + ?Sized,
{
    let levels = sibling_levels(input, setup)?;

    let mut current = base;
    for level in &levels {
        let key = setup.level(level);
        let attrs = input.dataset(&key)?;

        current = resize_linear(current.view(), &attrs.shape)?;
        let samples = current.mapv(|value| attrs.data_type.cast(value));

        output.create_dataset(&key, &attrs)?;
        output.write(&key, samples.view(), 1)?;
        sink.event(ProgressEvent::LevelWritten {
            setup,
            level: level.clone(),
            shape: attrs.shape.clone(),
        });
    }
    Ok(levels)
}

/// Copies every attribute of `group` from `source` into `destination`.
pub fn copy_attributes<S, T>(source: &S, destination: &T, group: &str) -> Result<usize, DenoiseError>
where
    S: ChunkedStore + ?Sized,
    T: ChunkedStore + ?Sized,
{
    let attributes = source.attributes(group)?;
    destination.set_attributes(group, &attributes)?;
    Ok(attributes.len())
}
