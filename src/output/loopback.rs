use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the frame format so readers of the loopback device see YUYV
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let applied = Output::set_format(&device, &Format::new(width, height, FourCC::new(b"YUYV")))
            .context("Failed to set v4l2loopback output format")?;
        if (applied.width, applied.height) != (width, height) {
            tracing::warn!(
                "Loopback device chose {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width: applied.width,
            height: applied.height,
            scratch: Vec::with_capacity((applied.width * applied.height * 2) as usize),
        })
    }
}

/// Pack an RGB frame as YUYV (4:2:2) into `yuyv`
///
/// Odd widths repeat the last pixel of each row.
fn rgb_to_yuyv(rgb_image: &RgbImage, yuyv: &mut Vec<u8>) {
    let width = rgb_image.width() as usize;
    yuyv.clear();
    if width == 0 {
        return;
    }

    for row in rgb_image.as_raw().chunks_exact(width * 3) {
        for pair in row.chunks(6) {
            let first = [pair[0], pair[1], pair[2]];
            let second = if pair.len() == 6 {
                [pair[3], pair[4], pair[5]]
            } else {
                first
            };

            let (y0, u0, v0) = rgb_to_yuv(first);
            let (y1, u1, v1) = rgb_to_yuv(second);
            let u = ((u0 as u16 + u1 as u16) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y0, u, y1, v]);
        }
    }
}

/// Full-range BT.601 in 8.8 fixed point
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;

    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let _span = tracing::debug_span!("loopback_write").entered();

        let frame = if frame.dimensions() != (self.width, self.height) {
            Cow::Owned(image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            ))
        } else {
            Cow::Borrowed(frame)
        };

        rgb_to_yuyv(&frame, &mut self.scratch);

        self.file
            .write_all(&self.scratch)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
