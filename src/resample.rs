//! Linear resampling of n-dimensional volumes onto a new grid.
//!
//! Samples are treated as pixel centres: output index `i` along an axis maps
//! to input coordinate `(i + 0.5) * in_len / out_len - 0.5`, mirrored back
//! into the input extent. Before an axis shrinks by a factor `f`, it is
//! smoothed with a Gaussian of sigma `(f - 1) / 2` (mirror boundary, kernel
//! truncated at four sigma) so that downsampled levels do not alias.
//! Intensities are interpolated as-is, never rescaled.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};

use crate::error::DenoiseError;

const KERNEL_TRUNCATE: f64 = 4.0;

/// Resizes `input` to `shape` with separable linear interpolation.
pub fn resize_linear(
    input: ArrayViewD<'_, f64>,
    shape: &[usize],
) -> Result<ArrayD<f64>, DenoiseError> {
    if input.ndim() != shape.len() || shape.contains(&0) || input.is_empty() {
        return Err(DenoiseError::ShapeMismatch {
            expected: input.shape().to_vec(),
            actual: shape.to_vec(),
        });
    }

    let mut current = input.to_owned();
    for (axis, &target) in shape.iter().enumerate() {
        let source_len = current.shape()[axis];
        if source_len == target {
            continue;
        }
        if target < source_len {
            let sigma = (source_len as f64 / target as f64 - 1.0) / 2.0;
            current = smooth_axis(current.view(), Axis(axis), sigma);
        }
        current = resize_axis(current.view(), Axis(axis), target);
    }
    Ok(current)
}

/// Normalized Gaussian weights over `-radius..=radius`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (KERNEL_TRUNCATE * sigma + 0.5) as isize;
    let weights = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect::<Vec<_>>();
    let total = weights.iter().sum::<f64>();
    weights.into_iter().map(|w| w / total).collect()
}

/// Reflects `index` about the first and last sample (`d c b | a b c d | c b a`).
fn mirror_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let folded = index.rem_euclid(period);
    if folded >= len as isize {
        (period - folded) as usize
    } else {
        folded as usize
    }
}

fn mirror_coordinate(coord: f64, last: f64) -> f64 {
    if last == 0.0 {
        0.0
    } else if coord < 0.0 {
        (-coord).min(last)
    } else if coord > last {
        (2.0 * last - coord).max(0.0)
    } else {
        coord
    }
}

fn smooth_axis(input: ArrayViewD<'_, f64>, axis: Axis, sigma: f64) -> ArrayD<f64> {
    let len = input.len_of(axis);
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let mut out = ArrayD::<f64>::zeros(input.raw_dim());
    for index in 0..len {
        let mut lane = out.index_axis_mut(axis, index);
        for (offset, weight) in kernel.iter().enumerate() {
            let source = mirror_index(index as isize + offset as isize - radius, len);
            Zip::from(&mut lane)
                .and(&input.index_axis(axis, source))
                .for_each(|out, &value| *out += weight * value);
        }
    }
    out
}

fn resize_axis(input: ArrayViewD<'_, f64>, axis: Axis, target: usize) -> ArrayD<f64> {
    let source_len = input.len_of(axis);
    let mut out_shape = input.shape().to_vec();
    out_shape[axis.index()] = target;
    let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));

    let scale = source_len as f64 / target as f64;
    let last = (source_len - 1) as f64;
    for index in 0..target {
        let coord = mirror_coordinate((index as f64 + 0.5) * scale - 0.5, last);
        let lower = coord.floor() as usize;
        let upper = (lower + 1).min(source_len - 1);
        let weight = coord - lower as f64;

        let lo = input.index_axis(axis, lower);
        let hi = input.index_axis(axis, upper);
        Zip::from(out.index_axis_mut(axis, index))
            .and(&lo)
            .and(&hi)
            .for_each(|out, &lo, &hi| *out = lo + (hi - lo) * weight);
    }
    out
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, ArrayD, IxDyn};

    use super::*;

    fn assert_close(actual: &ArrayD<f64>, expected: &[f64]) {
        let actual = actual.as_slice().unwrap();
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn halving_smooths_before_sampling() {
        let input = Array1::from(vec![0.0, 1.0, 4.0, 9.0, 16.0, 25.0, 36.0, 49.0]).into_dyn();
        let out = resize_linear(input.view(), &[4]).unwrap();
        assert_close(
            &out,
            &[0.7150124646090817, 6.715012464609082, 20.71501246460908, 41.213619323503835],
        );
    }

    #[test]
    fn smoothing_mirrors_at_the_edges() {
        let input = Array1::from(vec![0.0, 2.0, 4.0, 6.0]).into_dyn();
        let out = resize_linear(input.view(), &[2]).unwrap();
        assert_close(&out, &[1.2144847344436072, 4.785515265556392]);
    }

    #[test]
    fn upsampling_is_not_smoothed() {
        let input = Array1::from(vec![0.0, 10.0, 20.0, 30.0]).into_dyn();
        let out = resize_linear(input.view(), &[8]).unwrap();
        assert_close(&out, &[2.5, 2.5, 7.5, 12.5, 17.5, 22.5, 27.5, 27.5]);
    }

    #[test]
    fn kernel_is_normalized_and_truncated() {
        let kernel = gaussian_kernel(0.5);
        assert_eq!(kernel.len(), 5);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(mirror_index(-2, 4), 2);
        assert_eq!(mirror_index(5, 4), 1);
        assert_eq!(mirror_index(-3, 1), 0);
    }

    #[test]
    fn same_shape_is_identity() {
        let input = ArrayD::from_shape_fn(IxDyn(&[3, 4, 5]), |idx| {
            (idx[0] * 20 + idx[1] * 5 + idx[2]) as f64
        });
        let out = resize_linear(input.view(), &[3, 4, 5]).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn preserves_value_range() {
        let input = ArrayD::from_shape_fn(IxDyn(&[8, 8]), |idx| {
            if (idx[0] + idx[1]) % 2 == 0 { 1000.0 } else { 3000.0 }
        });
        let out = resize_linear(input.view(), &[3, 5]).unwrap();
        assert!(out.iter().all(|v| (1000.0 - 1e-6..=3000.0 + 1e-6).contains(v)));
    }

    #[test]
    fn rank_mismatch_is_rejected() {
        let input = ArrayD::<f64>::zeros(IxDyn(&[4, 4]));
        assert!(resize_linear(input.view(), &[2, 2, 2]).is_err());
    }
}
