use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Compute backend used for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    Cpu,
    #[default]
    Gpu,
}

impl Delegate {
    /// The delegate tried when this one fails to initialize
    pub fn fallback(self) -> Self {
        match self {
            Self::Cpu => Self::Gpu,
            Self::Gpu => Self::Cpu,
        }
    }
}

impl FromStr for Delegate {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown delegate '{other}', expected cpu or gpu"
            ))),
        }
    }
}

/// What is drawn behind the segmented subject
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackgroundSource {
    /// Blur of the current frame
    #[default]
    Blur,
    /// Still image loaded once per prepare
    Image { url: String },
    /// Solid fill with the configured color
    None,
}

impl FromStr for BackgroundSource {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(PipelineError::InvalidConfig("empty background".into())),
            "blur" => Ok(Self::Blur),
            "none" | "fill" => Ok(Self::None),
            url => Ok(Self::Image { url: url.to_string() }),
        }
    }
}

/// Target width / height of the displayed crop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RatioValue", into = "String")]
pub struct AspectRatio(f64);

impl AspectRatio {
    pub const SQUARE: Self = Self(1.0);

    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "aspect ratio must be positive and finite, got {value}"
            )))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl FromStr for AspectRatio {
    type Err = PipelineError;

    /// Accepts presets (`square`, `landscape`, `portrait`), `W:H` pairs and decimals
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "square" => return Ok(Self(1.0)),
            "landscape" => return Ok(Self(16.0 / 9.0)),
            "portrait" => return Ok(Self(9.0 / 16.0)),
            _ => {}
        }

        let invalid = || PipelineError::InvalidConfig(format!("invalid aspect ratio '{s}'"));
        let value = match trimmed.split_once(':') {
            Some((w, h)) => {
                let w: f64 = w.trim().parse().map_err(|_| invalid())?;
                let h: f64 = h.trim().parse().map_err(|_| invalid())?;
                w / h
            }
            None => trimmed.parse().map_err(|_| invalid())?,
        };
        Self::new(value)
    }
}

/// Config-file form of an aspect ratio: `1.5` or `"16:9"`
#[derive(Deserialize)]
#[serde(untagged)]
enum RatioValue {
    Number(f64),
    Text(String),
}

impl TryFrom<RatioValue> for AspectRatio {
    type Error = PipelineError;

    fn try_from(value: RatioValue) -> Result<Self> {
        match value {
            RatioValue::Number(ratio) => Self::new(ratio),
            RatioValue::Text(text) => text.parse(),
        }
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse `RRGGBB` (optionally prefixed with `#`) into an RGB triple
pub fn parse_hex_color(s: &str) -> Result<[u8; 3]> {
    let hex = s.trim().trim_start_matches('#');
    let invalid = || PipelineError::InvalidConfig(format!("invalid color '{s}', expected RRGGBB"));
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Session configuration for the background processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub background: BackgroundSource,
    pub blur_radius_px: u32,
    /// Pixels with a confidence above this are foreground
    pub mask_threshold: f32,
    pub aspect_ratio: AspectRatio,
    pub delegate: Delegate,
    pub fill_color: [u8; 3],
    /// Output the grayscale mask instead of the composite
    pub show_matte: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            background: BackgroundSource::Blur,
            blur_radius_px: 1,
            mask_threshold: 0.5,
            aspect_ratio: AspectRatio::SQUARE,
            delegate: Delegate::Gpu,
            fill_color: [0, 0, 0],
            show_matte: false,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "mask threshold must be within [0, 1], got {}",
                self.mask_threshold
            )));
        }
        AspectRatio::new(self.aspect_ratio.value())?;
        if let BackgroundSource::Image { url } = &self.background {
            if url.trim().is_empty() {
                return Err(PipelineError::InvalidConfig("background image url is empty".into()));
            }
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded processor config from {}", path.display());
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProcessorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.background, BackgroundSource::Blur);
        assert_eq!(config.mask_threshold, 0.5);
        assert_eq!(config.aspect_ratio.value(), 1.0);
    }

    #[test]
    fn aspect_presets_parse() {
        assert_eq!("square".parse::<AspectRatio>().unwrap().value(), 1.0);
        assert_eq!("landscape".parse::<AspectRatio>().unwrap().value(), 16.0 / 9.0);
        assert_eq!("portrait".parse::<AspectRatio>().unwrap().value(), 9.0 / 16.0);
        assert_eq!("3:4".parse::<AspectRatio>().unwrap().value(), 0.75);
        assert_eq!("8:9".parse::<AspectRatio>().unwrap().value(), 8.0 / 9.0);
        assert_eq!("1.5".parse::<AspectRatio>().unwrap().value(), 1.5);
    }

    #[test]
    fn bad_aspect_ratios_rejected() {
        assert!("0".parse::<AspectRatio>().is_err());
        assert!("-1".parse::<AspectRatio>().is_err());
        assert!("4:0".parse::<AspectRatio>().is_err());
        assert!("wide".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn toml_sets_every_field() {
        let text = r#"
            blur_radius_px = 6
            mask_threshold = 0.4
            aspect_ratio = "16:9"
            delegate = "cpu"
            fill_color = [10, 20, 30]
            show_matte = true

            [background]
            kind = "image"
            url = "https://example.com/bg.jpg"
        "#;
        let config = ProcessorConfig::from_toml_str(text).unwrap();
        assert_eq!(config.blur_radius_px, 6);
        assert_eq!(config.delegate, Delegate::Cpu);
        assert_eq!(config.fill_color, [10, 20, 30]);
        assert!(config.show_matte);
        assert_eq!(
            config.background,
            BackgroundSource::Image {
                url: "https://example.com/bg.jpg".into()
            }
        );
        assert!((config.aspect_ratio.value() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn numeric_aspect_ratio_loads() {
        let config = ProcessorConfig::from_toml_str("aspect_ratio = 1.5").unwrap();
        assert_eq!(config.aspect_ratio.value(), 1.5);

        let config = ProcessorConfig::from_toml_str("aspect_ratio = 2").unwrap();
        assert_eq!(config.aspect_ratio.value(), 2.0);

        assert!(ProcessorConfig::from_toml_str("aspect_ratio = -0.5").is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = ProcessorConfig::from_toml_str("blur_radius_px = 2\nfeather = 3\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let err = ProcessorConfig::from_toml_str("mask_threshold = 1.5").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.toml");
        std::fs::write(&path, "[background]\nkind = \"none\"\n").unwrap();
        let config = ProcessorConfig::load(&path).unwrap();
        assert_eq!(config.background, BackgroundSource::None);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#00ff80").unwrap(), [0, 255, 128]);
        assert_eq!(parse_hex_color("102030").unwrap(), [16, 32, 48]);
        assert!(parse_hex_color("12345").is_err());
        assert!(parse_hex_color("zzzzzz").is_err());
    }

    #[test]
    fn delegate_fallback_swaps() {
        assert_eq!(Delegate::Gpu.fallback(), Delegate::Cpu);
        assert_eq!(Delegate::Cpu.fallback(), Delegate::Gpu);
    }

    #[test]
    fn background_from_cli_string() {
        assert_eq!("blur".parse::<BackgroundSource>().unwrap(), BackgroundSource::Blur);
        assert_eq!("none".parse::<BackgroundSource>().unwrap(), BackgroundSource::None);
        assert_eq!(
            "bg.png".parse::<BackgroundSource>().unwrap(),
            BackgroundSource::Image { url: "bg.png".into() }
        );
    }
}
