use burn::prelude::*;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("unsupported channel count {0}, expected 1 (grayscale) or 3 (RGB)")]
    UnsupportedChannels(usize),

    #[error("target size must be positive")]
    EmptyTarget,
}

/// Scales the image so its longer side equals `target_size`, keeping the
/// aspect ratio, and centres it on a black square canvas.
pub fn img_resize_with_pad(
    img: &DynamicImage,
    target_size: u32,
) -> Result<DynamicImage, TransformError> {
    if target_size == 0 {
        return Err(TransformError::EmptyTarget);
    }

    let (width, height) = img.dimensions();

    let (new_width, new_height) = if width >= height {
        let scaled = (height as u64 * target_size as u64 / width.max(1) as u64) as u32;
        (target_size, scaled.max(1))
    } else {
        let scaled = (width as u64 * target_size as u64 / height.max(1) as u64) as u32;
        (scaled.max(1), target_size)
    };

    let resized = img
        .resize_exact(new_width, new_height, FilterType::Triangle)
        .to_rgb8();

    let mut canvas = RgbImage::new(target_size, target_size);
    let offset_x = (target_size - new_width) / 2;
    let offset_y = (target_size - new_height) / 2;
    image::imageops::overlay(
        &mut canvas,
        &resized,
        offset_x as i64,
        offset_y as i64,
    );

    return Ok(DynamicImage::ImageRgb8(canvas));
}

/// Channel-first pixels scaled to `[0, 1]`: luma for one channel, RGB for
/// three.
pub fn img_to_pixels(
    img: &DynamicImage,
    channels: usize,
) -> Result<Vec<f32>, TransformError> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;

    match channels {
        1 => {
            return Ok(img
                .to_luma8()
                .into_raw()
                .into_iter()
                .map(|p| p as f32 / 255.0)
                .collect());
        }
        3 => {
            // [H, W, C] -> [C, H, W]
            let raw = img.to_rgb8().into_raw();
            let mut pixels = vec![0.0; raw.len()];
            for (i, value) in raw.into_iter().enumerate() {
                let channel = i % 3;
                let position = i / 3;
                pixels[channel * plane + position] = value as f32 / 255.0;
            }
            return Ok(pixels);
        }
        other => return Err(TransformError::UnsupportedChannels(other)),
    }
}

pub fn img_to_tensor<B: Backend>(
    img: &DynamicImage,
    channels: usize,
    device: &Device<B>,
) -> Result<Tensor<B, 3>, TransformError> {
    let (width, height) = img.dimensions();
    let pixels = img_to_pixels(img, channels)?;

    return Ok(Tensor::<B, 3>::from_data(
        TensorData::new(pixels, [channels, height as usize, width as usize])
            .convert::<B::FloatElem>(),
        device,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgba, RgbaImage};

    /// Helper function to create a sample image
    fn create_test_image(
        width: u32,
        height: u32,
        color: Rgba<u8>,
    ) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, color))
    }

    /// Resampling may be off by a rounding step on uniform images.
    fn assert_rgb_near(actual: [u8; 3], expected: [u8; 3]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(a.abs_diff(*e) <= 2, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_resize_with_pad_tall_image() {
        let img = create_test_image(100, 200, Rgba([255, 0, 0, 255])); // R

        let output = img_resize_with_pad(&img, 64).unwrap();
        assert_eq!(output.dimensions(), (64, 64));

        let rgb = output.to_rgb8();
        // left and right borders are padding, the centre is the image
        assert_eq!(rgb.get_pixel(0, 32).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(63, 32).0, [0, 0, 0]);
        assert_rgb_near(rgb.get_pixel(32, 32).0, [255, 0, 0]);
    }

    #[test]
    fn test_resize_with_pad_wide_image() {
        let img = create_test_image(120, 40, Rgba([0, 255, 0, 255])); // G

        let output = img_resize_with_pad(&img, 30).unwrap().to_rgb8();
        assert_eq!(output.dimensions(), (30, 30));
        assert_eq!(output.get_pixel(15, 0).0, [0, 0, 0]);
        assert_rgb_near(output.get_pixel(15, 15).0, [0, 255, 0]);
    }

    #[test]
    fn test_resize_with_pad_upscales_small_image() {
        let img = create_test_image(28, 28, Rgba([0, 0, 255, 255])); // B

        let output = img_resize_with_pad(&img, 32).unwrap().to_rgb8();
        assert_eq!(output.dimensions(), (32, 32));
        assert_rgb_near(output.get_pixel(16, 16).0, [0, 0, 255]);
    }

    #[test]
    fn test_resize_with_pad_rejects_zero_target() {
        let img = create_test_image(10, 10, Rgba([0, 0, 0, 255]));
        assert_eq!(
            img_resize_with_pad(&img, 0).err(),
            Some(TransformError::EmptyTarget)
        );
    }

    #[test]
    fn test_pixels_are_channel_first() {
        let img = create_test_image(2, 3, Rgba([255, 51, 0, 255]));

        let pixels = img_to_pixels(&img, 3).unwrap();
        assert_eq!(pixels.len(), 3 * 2 * 3);
        assert!(pixels[..6].iter().all(|p| *p == 1.0));
        assert!(pixels[6..12].iter().all(|p| (*p - 0.2).abs() < 1e-6));
        assert!(pixels[12..].iter().all(|p| *p == 0.0));
    }

    #[test]
    fn test_grayscale_pixels() {
        let img = create_test_image(4, 4, Rgba([255, 255, 255, 255]));

        let pixels = img_to_pixels(&img, 1).unwrap();
        assert_eq!(pixels.len(), 16);
        assert!(pixels.iter().all(|p| *p == 1.0));

        assert_eq!(
            img_to_pixels(&img, 4).err(),
            Some(TransformError::UnsupportedChannels(4))
        );
    }

    #[test]
    fn test_img_to_tensor_shape() {
        let device = Default::default();
        let img = create_test_image(5, 7, Rgba([10, 20, 30, 255]));

        let tensor = img_to_tensor::<NdArray<f32>>(&img, 3, &device).unwrap();
        assert_eq!(tensor.dims(), [3, 7, 5]);
    }
}
