mod assets;

pub use assets::{AssetLoader, UrlAssetLoader};

use crate::config::BackgroundSource;
use crate::crop::CropRectangle;
use crate::error::{PipelineError, Result};
use image::{imageops, Rgb, RgbImage};

/// Which buffer [`BackgroundCompositor::render`] hands out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundKind {
    Blur,
    Image,
    Fill,
}

/// Produces the canvas-sized buffer drawn behind the subject
pub struct BackgroundCompositor {
    canvas_width: u32,
    canvas_height: u32,
    fill: Rgb<u8>,
    kind: BackgroundKind,
    buffer: RgbImage,
}

impl BackgroundCompositor {
    /// Starts as a solid fill until [`prepare`](Self::prepare) is called
    pub fn new(canvas_size: (u32, u32), fill: [u8; 3]) -> Self {
        let (canvas_width, canvas_height) = canvas_size;
        Self {
            canvas_width,
            canvas_height,
            fill: Rgb(fill),
            kind: BackgroundKind::Fill,
            buffer: RgbImage::from_pixel(canvas_width, canvas_height, Rgb(fill)),
        }
    }

    pub fn kind(&self) -> &BackgroundKind {
        &self.kind
    }

    /// One-shot setup for a background source
    ///
    /// On `AssetLoadFailed` the compositor has already switched to solid fill.
    pub fn prepare(&mut self, source: &BackgroundSource, loader: &dyn AssetLoader) -> Result<()> {
        let _span = tracing::debug_span!("background_prepare").entered();

        match source {
            BackgroundSource::Blur => {
                self.kind = BackgroundKind::Blur;
                Ok(())
            }
            BackgroundSource::None => {
                self.use_fill();
                Ok(())
            }
            BackgroundSource::Image { url } => match loader.load(url) {
                Ok(image) => {
                    // Center-crop to the canvas while preserving the image's aspect ratio
                    self.buffer = image
                        .resize_to_fill(self.canvas_width, self.canvas_height, imageops::FilterType::Triangle)
                        .to_rgb8();
                    self.kind = BackgroundKind::Image;
                    tracing::info!(
                        "Background image {} prepared at {}x{}",
                        url,
                        self.canvas_width,
                        self.canvas_height
                    );
                    Ok(())
                }
                Err(e) => {
                    self.use_fill();
                    Err(PipelineError::AssetLoadFailed {
                        url: url.clone(),
                        reason: format!("{e:#}"),
                    })
                }
            },
        }
    }

    pub fn set_fill(&mut self, fill: [u8; 3]) {
        self.fill = Rgb(fill);
        if self.kind == BackgroundKind::Fill {
            self.use_fill();
        }
    }

    fn use_fill(&mut self) {
        self.kind = BackgroundKind::Fill;
        self.buffer = RgbImage::from_pixel(self.canvas_width, self.canvas_height, self.fill);
    }

    /// Background for the current frame
    pub fn render(&mut self, frame: &RgbImage, crop: &CropRectangle, blur_radius_px: u32) -> &RgbImage {
        if self.kind == BackgroundKind::Blur {
            let _span = tracing::debug_span!("background_blur", blur_radius_px).entered();

            let (x, y, width, height) = crop.pixel_bounds(frame.width(), frame.height());
            let mut region = imageops::crop_imm(frame, x, y, width, height).to_image();
            if region.dimensions() != (self.canvas_width, self.canvas_height) {
                region = imageops::resize(
                    &region,
                    self.canvas_width,
                    self.canvas_height,
                    imageops::FilterType::Triangle,
                );
            }
            self.buffer = if blur_radius_px > 0 {
                imageops::blur(&region, blur_radius_px as f32)
            } else {
                region
            };
        }
        &self.buffer
    }
}
