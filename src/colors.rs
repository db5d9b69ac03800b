//! Color handling: ImageNet normalisation and chroma transfer.

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::RgbImage;
use rayon::prelude::*;

/// Per-channel mean of the ImageNet training set, RGB order.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Shift `[0, 1]` pixels into the distribution VGG19 was trained on.
/// Runs before every feature extraction.
///
/// - `image`: [b, 3, h, w]
pub fn normalize<B: Backend>(image: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = image.device();
    let mean: Tensor<B, 4> =
        Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
    let std: Tensor<B, 4> =
        Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
    (image - mean) / std
}

/// Recolor `stylized` with the chroma of `content`, keeping the
/// stylized luminance. Works in BT.601 YCbCr: Y comes from the
/// stylized image, Cb/Cr from the content image.
///
/// If the two images disagree in size, the content image is resampled
/// to the stylized geometry first.
pub fn transfer_colors(content: &RgbImage, stylized: &RgbImage) -> RgbImage {
    let (w, h) = stylized.dimensions();
    let resized;
    let chroma: &RgbImage = if content.dimensions() == (w, h) {
        content
    } else {
        resized = imageops::resize(content, w, h, FilterType::Triangle);
        &resized
    };

    let mut out = RgbImage::new(w, h);
    out.par_chunks_mut(w as usize * 3)
        .enumerate()
        .for_each(|(row_idx, row)| {
            let y = row_idx as u32;
            for x in 0..w {
                let lum = stylized.get_pixel(x, y).0;
                let col = chroma.get_pixel(x, y).0;

                let luma =
                    0.299 * lum[0] as f32 + 0.587 * lum[1] as f32 + 0.114 * lum[2] as f32;
                let cb = 128.0 - 0.168736 * col[0] as f32 - 0.331264 * col[1] as f32
                    + 0.5 * col[2] as f32;
                let cr = 128.0 + 0.5 * col[0] as f32
                    - 0.418688 * col[1] as f32
                    - 0.081312 * col[2] as f32;

                let r = luma + 1.402 * (cr - 128.0);
                let g = luma - 0.344136 * (cb - 128.0) - 0.714136 * (cr - 128.0);
                let b = luma + 1.772 * (cb - 128.0);

                let base = x as usize * 3;
                row[base] = r.round().clamp(0.0, 255.0) as u8;
                row[base + 1] = g.round().clamp(0.0, 255.0) as u8;
                row[base + 2] = b.round().clamp(0.0, 255.0) as u8;
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn luma_of(px: [u8; 3]) -> f32 {
        0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
    }

    #[test]
    fn normalize_maps_zero_to_negative_mean_over_std() {
        let device = Default::default();
        let image = Tensor::<B, 4>::zeros([1, 3, 2, 2], &device);

        let normed = normalize(image);
        let data = normed.to_data();
        let vals = data.as_slice::<f32>().unwrap();

        for (c, chunk) in vals.chunks(4).enumerate() {
            let expected = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
            for &v in chunk {
                assert!((v - expected).abs() < 1e-5, "channel {c}: {v} vs {expected}");
            }
        }
    }

    #[test]
    fn normalize_is_affine_per_channel() {
        let device = Default::default();
        let ones = Tensor::<B, 4>::ones([1, 3, 1, 1], &device);

        let normed = normalize(ones);
        let data = normed.to_data();
        let vals = data.as_slice::<f32>().unwrap();
        for (c, &v) in vals.iter().enumerate() {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((v - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn transfer_from_self_is_near_identity() {
        let img = RgbImage::from_fn(8, 8, |x, y| {
            image::Rgb([(x * 30) as u8, (y * 30) as u8, 120])
        });

        let out = transfer_colors(&img, &img);
        for (a, b) in img.pixels().zip(out.pixels()) {
            for c in 0..3 {
                let delta = (a.0[c] as i16 - b.0[c] as i16).abs();
                assert!(delta <= 2, "channel drift {delta} at {:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn keeps_stylized_luminance_and_content_hue() {
        let content = RgbImage::from_pixel(4, 4, image::Rgb([180, 60, 60]));
        let stylized = RgbImage::from_pixel(4, 4, image::Rgb([100, 100, 100]));

        let out = transfer_colors(&content, &stylized);
        let px = out.get_pixel(0, 0).0;

        assert!(px[0] > px[1], "red cast expected: {px:?}");
        assert!(px[0] > px[2], "red cast expected: {px:?}");
        assert!(
            (luma_of(px) - 100.0).abs() < 1.5,
            "luminance should follow the stylized image: {px:?}"
        );
    }

    #[test]
    fn resamples_content_on_size_mismatch() {
        let content = RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]));
        let stylized = RgbImage::from_pixel(4, 4, image::Rgb([90, 90, 90]));

        let out = transfer_colors(&content, &stylized);
        assert_eq!(out.dimensions(), (4, 4));
    }
}
