use ndarray::{ArrayD, Axis, IxDyn, Slice};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::DenoiseError;
use crate::lazy_view::{Access, AxisIndex, Indexable};

/// Produces a stack of patches `(n, spatial...)` from a list of images.
pub trait PatchGenerator {
    fn generate_from_list<I: Indexable>(
        &mut self,
        images: &[I],
        patches_per_image: usize,
        shape: &[usize],
        augment: bool,
    ) -> Result<ArrayD<f64>, DenoiseError>;
}

/// Uniformly positioned patches, taken with the `image[s][None][0, slices...]`
/// access sequence so lazily read images only load the patch regions.
#[derive(Debug)]
pub struct RandomPatchGenerator<R> {
    rng: R,
}

impl<R: Rng> RandomPatchGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn extract<I: Indexable>(
        &mut self,
        data: &I,
        count: usize,
        patch_shape: &[usize],
        out: &mut Vec<f64>,
    ) -> Result<usize, DenoiseError> {
        let full = data.shape();
        let spatial = full
            .get(1..full.len().saturating_sub(1))
            .unwrap_or_default();
        let fits = spatial.len() == patch_shape.len()
            && spatial
                .iter()
                .zip(patch_shape)
                .all(|(dim, patch)| *patch > 0 && patch <= dim);
        if !fits {
            return Err(DenoiseError::PatchTooLarge {
                patch: patch_shape.to_vec(),
                volume: spatial.to_vec(),
            });
        }

        for _ in 0..count {
            let mut items = Vec::with_capacity(patch_shape.len() + 1);
            items.push(AxisIndex::Index(0));
            for (dim, patch) in spatial.iter().zip(patch_shape) {
                let start = self.rng.random_range(0..=dim - patch);
                items.push(AxisIndex::Slice(start..start + patch));
            }
            let patch = data.get(&Access::Tuple(items))?.into_data()?;
            if patch.shape() != patch_shape {
                return Err(DenoiseError::ShapeMismatch {
                    expected: patch_shape.to_vec(),
                    actual: patch.shape().to_vec(),
                });
            }
            out.extend(patch.iter().copied());
        }
        Ok(count)
    }
}

impl<R: Rng> PatchGenerator for RandomPatchGenerator<R> {
    fn generate_from_list<I: Indexable>(
        &mut self,
        images: &[I],
        patches_per_image: usize,
        shape: &[usize],
        augment: bool,
    ) -> Result<ArrayD<f64>, DenoiseError> {
        if augment {
            return Err(DenoiseError::AugmentUnsupported);
        }

        let mut values = Vec::new();
        let mut total = 0;
        for image in images {
            for s in 0..image.len() {
                let data = image
                    .get(&Access::Index(s))?
                    .into_view()?
                    .get(&Access::NewAxis)?
                    .into_view()?;
                total += self.extract(&data, patches_per_image, shape, &mut values)?;
            }
        }

        let mut stack_shape = vec![total];
        stack_shape.extend_from_slice(shape);
        let len = values.len();
        ArrayD::from_shape_vec(IxDyn(&stack_shape), values).map_err(|_| {
            DenoiseError::ShapeMismatch {
                expected: stack_shape.clone(),
                actual: vec![len],
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub patches_per_image: usize,
    pub shape: Vec<usize>,
}

/// Training and validation patches, each shaped `(n, spatial..., 1)`.
#[derive(Debug, Clone)]
pub struct PatchSet {
    pub train: ArrayD<f64>,
    pub validation: ArrayD<f64>,
}

impl PatchSet {
    pub fn train_len(&self) -> usize {
        self.train.len_of(Axis(0))
    }

    pub fn validation_len(&self) -> usize {
        self.validation.len_of(Axis(0))
    }
}

/// Number of patches that go to training: `floor(0.9 * total)`.
pub fn split_index(total: usize) -> usize {
    total * 9 / 10
}

/// Generates patches from `images`, appends a channel axis, shuffles and splits.
pub fn harvest<G, I, R>(
    generator: &mut G,
    images: &[I],
    request: &PatchRequest,
    rng: &mut R,
) -> Result<PatchSet, DenoiseError>
where
    G: PatchGenerator,
    I: Indexable,
    R: Rng + ?Sized,
{
    let patches =
        generator.generate_from_list(images, request.patches_per_image, &request.shape, false)?;
    let channel = Axis(patches.ndim());
    shuffle_and_split(patches.insert_axis(channel), rng)
}

/// Applies one random permutation along the first axis, then splits 90/10.
pub fn shuffle_and_split<R: Rng + ?Sized>(
    patches: ArrayD<f64>,
    rng: &mut R,
) -> Result<PatchSet, DenoiseError> {
    if patches.ndim() == 0 || patches.len_of(Axis(0)) == 0 {
        return Err(DenoiseError::NoPatches);
    }
    let total = patches.len_of(Axis(0));
    let mut order = (0..total).collect::<Vec<_>>();
    order.shuffle(rng);
    let shuffled = patches.select(Axis(0), &order);

    let split = split_index(total);
    Ok(PatchSet {
        train: shuffled
            .slice_axis(Axis(0), Slice::from(0..split))
            .to_owned(),
        validation: shuffled
            .slice_axis(Axis(0), Slice::from(split..total))
            .to_owned(),
    })
}
