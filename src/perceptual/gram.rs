//! Gram matrices over feature maps.
//!
//! The Gram matrix of a stage's activations captures which channels
//! fire together, discarding where in the image they fired. Matching
//! Gram matrices instead of raw activations is what makes the style
//! term insensitive to the layout of the style image.

use burn::prelude::*;

/// Gram matrix of a batch of feature maps.
///
/// Flattens the spatial grid, then takes channel-by-channel inner
/// products, normalised by the full activation count.
///
/// - `features`: [b, c, h, w] — activations of one stage
///
/// Returns: [b, c, c] — symmetric co-activation matrix, divided by `c * h * w`
pub fn gram<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 3> {
    let [b, c, h, w] = features.dims();
    let flat = features.reshape([b, c, h * w]); // [b, c, h*w]
    let transposed = flat.clone().swap_dims(1, 2); // [b, h*w, c]
    flat.matmul(transposed) / (c * h * w) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn two_pixel_single_channel() {
        let device = Default::default();
        // One channel holding [3, 4]: gram = (9 + 16) / (1 * 1 * 2)
        let features = Tensor::<B, 4>::from_floats([[[[3.0, 4.0]]]], &device);

        let g = gram(features);
        assert_eq!(g.dims(), [1, 1, 1]);
        let data = g.to_data();
        let vals = data.as_slice::<f32>().unwrap();
        assert!((vals[0] - 12.5).abs() < 1e-6, "gram value: {}", vals[0]);
    }

    #[test]
    fn constant_map_gives_uniform_entries() {
        let device = Default::default();
        // All-ones [1, 3, 2, 2]: every channel pair dots to h*w = 4,
        // so each entry is 4 / (3 * 4) = 1/3.
        let features = Tensor::<B, 4>::ones([1, 3, 2, 2], &device);

        let g = gram(features);
        let data = g.to_data();
        for &v in data.as_slice::<f32>().unwrap() {
            assert!((v - 1.0 / 3.0).abs() < 1e-6, "entry: {}", v);
        }
    }

    #[test]
    fn all_zero_single_channel_gives_zero_matrix() {
        let device = Default::default();
        let features = Tensor::<B, 4>::zeros([1, 1, 4, 4], &device);

        let g = gram(features);
        assert_eq!(g.dims(), [1, 1, 1]);
        let data = g.to_data();
        assert_eq!(data.as_slice::<f32>().unwrap()[0], 0.0);
    }

    #[test]
    fn result_is_symmetric() {
        let device = Default::default();
        let features = Tensor::<B, 4>::from_floats(
            [[
                [[1.0, -2.0], [0.5, 3.0]],
                [[0.0, 1.5], [-1.0, 2.0]],
                [[2.0, 2.0], [0.0, -0.5]],
            ]],
            &device,
        );

        let g = gram(features);
        assert_eq!(g.dims(), [1, 3, 3]);
        let data = g.to_data();
        let vals = data.as_slice::<f32>().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let a = vals[i * 3 + j];
                let b = vals[j * 3 + i];
                assert!((a - b).abs() < 1e-6, "asymmetry at ({}, {})", i, j);
            }
        }
    }

    #[test]
    fn scaling_input_scales_gram_quadratically() {
        let device = Default::default();
        let features = Tensor::<B, 4>::from_floats(
            [[[[0.5, 1.0], [1.5, -1.0]], [[2.0, 0.0], [1.0, 1.0]]]],
            &device,
        );

        let g1 = gram(features.clone());
        let g2 = gram(features * 2.0);
        let d1 = g1.to_data();
        let d2 = g2.to_data();
        let v1 = d1.as_slice::<f32>().unwrap();
        let v2 = d2.as_slice::<f32>().unwrap();
        for (a, b) in v1.iter().zip(v2) {
            assert!((b - 4.0 * a).abs() < 1e-5, "expected {} got {}", 4.0 * a, b);
        }
    }

    #[test]
    fn batch_dimension_is_preserved() {
        let device = Default::default();
        let features = Tensor::<B, 4>::ones([2, 5, 3, 4], &device);
        assert_eq!(gram(features).dims(), [2, 5, 5]);
    }
}
