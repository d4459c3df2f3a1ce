use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB images to model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    mean: f32,
    scale: f32,
}

impl Preprocessor {
    /// Normalizes channels to [0, 1]
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            mean: 0.0,
            scale: 255.0,
        }
    }

    /// Normalize each channel as `(value - mean) / scale`
    pub fn with_normalization(mut self, mean: f32, scale: f32) -> Self {
        self.mean = mean;
        self.scale = scale;
        self
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = (pixel[channel] as f32 - self.mean) / self.scale;
            }
        }

        tensor
    }

    /// Resize a row-major confidence map to the given frame dimensions
    pub fn resize_matte(
        matte: Vec<f32>,
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Vec<f32> {
        let _span = tracing::debug_span!("postprocess").entered();

        if matte_width == target_width && matte_height == target_height {
            return matte;
        }

        let gray = image::GrayImage::from_fn(matte_width, matte_height, |x, y| {
            let value = matte[(y * matte_width + x) as usize];
            image::Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        let resized = imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        resized.pixels().map(|p| p[0] as f32 / 255.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_normalization_by_default() {
        let image = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(4, 2).preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 1, 3]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn mean_scale_normalization() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([255, 127, 0]));
        let tensor = Preprocessor::new(2, 2)
            .with_normalization(127.0, 128.0)
            .preprocess(&image);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] + 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_model_input() {
        let image = RgbImage::new(64, 48);
        let tensor = Preprocessor::new(32, 16).preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 16, 32]);
    }

    #[test]
    fn matte_resized_to_frame() {
        let matte = vec![1.0; 8 * 8];
        let resized = Preprocessor::resize_matte(matte, 8, 8, 16, 12);
        assert_eq!(resized.len(), 16 * 12);
        assert!(resized.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }
}
