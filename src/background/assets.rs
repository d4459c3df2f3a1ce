use anyhow::{Context, Result};
use image::DynamicImage;
use std::time::Duration;

/// Fetches and decodes background images
pub trait AssetLoader {
    fn load(&self, url: &str) -> Result<DynamicImage>;
}

/// Loads `http(s)://` URLs over the network, `file://` URLs and plain paths from disk
pub struct UrlAssetLoader {
    client: reqwest::blocking::Client,
}

impl UrlAssetLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    fn fetch(&self, url: &str) -> Result<DynamicImage> {
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to fetch {url}"))?
            .bytes()
            .with_context(|| format!("Failed to read body of {url}"))?;
        image::load_from_memory(&bytes).with_context(|| format!("Failed to decode image from {url}"))
    }
}

impl AssetLoader for UrlAssetLoader {
    fn load(&self, url: &str) -> Result<DynamicImage> {
        tracing::info!("Loading background image {}", url);
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch(url);
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        image::open(path).with_context(|| format!("Failed to open image {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn loads_plain_and_file_url_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        RgbImage::from_pixel(6, 3, Rgb([10, 20, 30])).save(&path).unwrap();

        let loader = UrlAssetLoader::new().unwrap();
        let plain = loader.load(path.to_str().unwrap()).unwrap();
        assert_eq!((plain.width(), plain.height()), (6, 3));

        let url = format!("file://{}", path.display());
        let via_url = loader.load(&url).unwrap();
        assert_eq!(via_url.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn missing_file_is_an_error() {
        let loader = UrlAssetLoader::new().unwrap();
        assert!(loader.load("/definitely/not/here.png").is_err());
    }
}
