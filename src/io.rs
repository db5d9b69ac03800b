//! Image files in and out of CHW tensors.
//!
//! Pixels cross this boundary exactly once in each direction: files
//! decode to `[3, h, w]` float tensors in `[0, 1]`, and the finished
//! canvas quantizes back to 8-bit RGB.

use std::path::Path;

use burn::prelude::*;
use burn::tensor::TensorData;
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use rayon::prelude::*;

use crate::error::{StyleError, StyleResult};

/// Decode an image file to RGB.
pub fn load_image(path: &Path) -> StyleResult<RgbImage> {
    let img = ImageReader::open(path)?.decode()?;
    Ok(img.into_rgb8())
}

/// Encode to disk; the format follows the file extension.
pub fn save_image(img: &RgbImage, path: &Path) -> StyleResult<()> {
    img.save(path)?;
    Ok(())
}

/// Shrink to fit inside a `max` by `max` box, keeping aspect ratio.
/// Never upscales; `max == 0` means no bound.
pub fn fit_within(img: &RgbImage, max: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let long = w.max(h);
    if max == 0 || long <= max {
        return img.clone();
    }
    let scale = max as f32 / long as f32;
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);
    imageops::resize(img, nw, nh, FilterType::Triangle)
}

/// Resample by a scale factor, bilinear. Factor 1 is a no-op.
pub fn rescale(img: &RgbImage, factor: f32) -> RgbImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let nw = ((w as f32 * factor).round() as u32).max(1);
    let nh = ((h as f32 * factor).round() as u32).max(1);
    imageops::resize(img, nw, nh, FilterType::Triangle)
}

/// Planar CHW float tensor in `[0, 1]` from an RGB image.
///
/// Returns: [3, h, w]
pub fn to_tensor<B: Backend>(img: &RgbImage, device: &B::Device) -> Tensor<B, 3> {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);

    let mut data = vec![0.0_f32; 3 * h * w];
    data.par_chunks_mut(w).enumerate().for_each(|(chunk, row)| {
        let channel = chunk / h;
        let y = (chunk % h) as u32;
        for (x, v) in row.iter_mut().enumerate() {
            *v = img.get_pixel(x as u32, y).0[channel] as f32 / 255.0;
        }
    });

    Tensor::from_data(TensorData::new(data, [3, h, w]), device)
}

/// Quantize a `[0, 1]` CHW tensor back to 8-bit RGB.
///
/// - `tensor`: [3, h, w]
pub fn to_image<B: Backend>(tensor: Tensor<B, 3>) -> StyleResult<RgbImage> {
    let [c, h, w] = tensor.dims();
    if c != 3 {
        return Err(StyleError::ChannelMismatch { expected: 3, got: c });
    }

    let data = tensor.into_data();
    let values = data
        .to_vec::<f32>()
        .map_err(|e| StyleError::Internal(format!("tensor data: {e:?}")))?;

    let mut out = RgbImage::new(w as u32, h as u32);
    out.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            for ch in 0..3 {
                let v = values[ch * h * w + y * w + x];
                row[x * 3 + ch] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn tensor_layout_is_planar_chw() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 51]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 102]));

        let device = Default::default();
        let tensor = to_tensor::<B>(&img, &device);
        assert_eq!(tensor.dims(), [3, 1, 2]);

        let data = tensor.to_data();
        let vals = data.as_slice::<f32>().unwrap();
        let expected = [1.0, 0.0, 0.0, 1.0, 0.2, 0.4];
        for (v, e) in vals.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6, "layout mismatch: {vals:?}");
        }
    }

    #[test]
    fn image_survives_the_tensor_round_trip() {
        let img = RgbImage::from_fn(5, 3, |x, y| {
            image::Rgb([(x * 50) as u8, (y * 80) as u8, 200])
        });

        let device = Default::default();
        let back = to_image(to_tensor::<B>(&img, &device)).unwrap();
        assert_eq!(back.dimensions(), (5, 3));
        for (a, b) in img.pixels().zip(back.pixels()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn to_image_rejects_wrong_channel_count() {
        let device = Default::default();
        let tensor = Tensor::<B, 3>::zeros([2, 4, 4], &device);
        assert!(matches!(
            to_image(tensor),
            Err(StyleError::ChannelMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn fit_within_shrinks_but_never_grows() {
        let img = RgbImage::new(100, 50);
        assert_eq!(fit_within(&img, 50).dimensions(), (50, 25));
        assert_eq!(fit_within(&img, 200).dimensions(), (100, 50));
        assert_eq!(fit_within(&img, 0).dimensions(), (100, 50));

        let square = RgbImage::new(64, 64);
        assert_eq!(fit_within(&square, 32).dimensions(), (32, 32));
    }

    #[test]
    fn rescale_follows_the_factor() {
        let img = RgbImage::new(64, 32);
        assert_eq!(rescale(&img, 0.5).dimensions(), (32, 16));
        assert_eq!(rescale(&img, 2.0).dimensions(), (128, 64));
        assert_eq!(rescale(&img, 1.0).dimensions(), (64, 32));
    }

    #[test]
    fn png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.png");

        let img = RgbImage::from_fn(4, 4, |x, y| {
            image::Rgb([(x * 60) as u8, (y * 60) as u8, 30])
        });
        save_image(&img, &path).unwrap();

        let back = load_image(&path).unwrap();
        assert_eq!(back.dimensions(), (4, 4));
        for (a, b) in img.pixels().zip(back.pixels()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn missing_file_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing-here.png");
        assert!(matches!(load_image(&path), Err(StyleError::Io(_))));
    }
}
