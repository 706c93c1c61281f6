//! Image identity and extracted-candidate types.
//!
//! An [`ImageLocator`] is discovered once per embedded image and never
//! changes afterwards; the orchestrator keys every attempt, outcome and
//! report row on it. An [`ImageCandidate`] is what a strategy hands back:
//! encoded bytes plus the pixel metadata the validator checks.

use crate::error::StrategyError;
use image::{ColorType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Stable identifier of one embedded image within a source document.
///
/// Ordering is page first, then per-page index, which is also the order in
/// which the orchestrator processes images and the report lists them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageLocator {
    /// Page number, 1-based.
    pub page: usize,
    /// Position of the image among the page's images, 1-based.
    pub index: usize,
    /// Internal cross-reference used to re-extract the object.
    pub xref: u32,
    /// Identifier of the owning document.
    pub document: String,
}

impl ImageLocator {
    pub fn new(document: impl Into<String>, page: usize, index: usize, xref: u32) -> Self {
        Self {
            page,
            index,
            xref,
            document: document.into(),
        }
    }
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} image {} (xref {})",
            self.page, self.index, self.xref
        )
    }
}

/// Colour model of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColorMode {
    L,
    LA,
    RGB,
    RGBA,
    L16,
    LA16,
    RGB16,
    RGBA16,
    RGB32F,
    RGBA32F,
    Unknown,
}

impl ColorMode {
    /// The short label used in reports and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::L => "L",
            ColorMode::LA => "LA",
            ColorMode::RGB => "RGB",
            ColorMode::RGBA => "RGBA",
            ColorMode::L16 => "L16",
            ColorMode::LA16 => "LA16",
            ColorMode::RGB16 => "RGB16",
            ColorMode::RGBA16 => "RGBA16",
            ColorMode::RGB32F => "RGB32F",
            ColorMode::RGBA32F => "RGBA32F",
            ColorMode::Unknown => "unknown",
        }
    }
}

impl From<ColorType> for ColorMode {
    fn from(c: ColorType) -> Self {
        match c {
            ColorType::L8 => ColorMode::L,
            ColorType::La8 => ColorMode::LA,
            ColorType::Rgb8 => ColorMode::RGB,
            ColorType::Rgba8 => ColorMode::RGBA,
            ColorType::L16 => ColorMode::L16,
            ColorType::La16 => ColorMode::LA16,
            ColorType::Rgb16 => ColorMode::RGB16,
            ColorType::Rgba16 => ColorMode::RGBA16,
            ColorType::Rgb32F => ColorMode::RGB32F,
            ColorType::Rgba32F => ColorMode::RGBA32F,
            _ => ColorMode::Unknown,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" | "GRAY" | "GREY" => Ok(ColorMode::L),
            "LA" => Ok(ColorMode::LA),
            "RGB" => Ok(ColorMode::RGB),
            "RGBA" => Ok(ColorMode::RGBA),
            "L16" => Ok(ColorMode::L16),
            "LA16" => Ok(ColorMode::LA16),
            "RGB16" => Ok(ColorMode::RGB16),
            "RGBA16" => Ok(ColorMode::RGBA16),
            "RGB32F" => Ok(ColorMode::RGB32F),
            "RGBA32F" => Ok(ColorMode::RGBA32F),
            other => Err(format!(
                "unknown colour mode '{other}' (expected L, LA, RGB, RGBA, L16, LA16, RGB16, RGBA16, RGB32F or RGBA32F)"
            )),
        }
    }
}

/// Image produced by one strategy, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCandidate {
    /// Encoded image bytes as they would be written to disk.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_mode: ColorMode,
    /// File extension matching `bytes`, without the dot.
    pub extension: String,
    /// Free-form remark carried into the attempt record.
    pub note: Option<String>,
}

impl ImageCandidate {
    /// PNG-encode `img` into a candidate.
    pub fn encode_png(img: &DynamicImage, note: Option<String>) -> Result<Self, StrategyError> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| StrategyError::Encode {
                detail: e.to_string(),
            })?;
        Ok(Self {
            bytes,
            width: img.width(),
            height: img.height(),
            color_mode: img.color().into(),
            extension: "png".to_string(),
            note,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn locators_order_by_page_then_index() {
        let mut v = vec![
            ImageLocator::new("d", 2, 1, 7),
            ImageLocator::new("d", 1, 2, 9),
            ImageLocator::new("d", 1, 1, 30),
        ];
        v.sort();
        let order: Vec<(usize, usize)> = v.iter().map(|l| (l.page, l.index)).collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn color_mode_from_str_is_case_insensitive() {
        assert_eq!("rgb".parse::<ColorMode>().unwrap(), ColorMode::RGB);
        assert_eq!(" l ".parse::<ColorMode>().unwrap(), ColorMode::L);
        assert!("CMYK".parse::<ColorMode>().is_err());
    }

    #[test]
    fn encode_png_keeps_dimensions_and_mode() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 7, Rgb([10, 20, 30])));
        let c = ImageCandidate::encode_png(&img, Some("note".into())).unwrap();
        assert_eq!((c.width, c.height), (12, 7));
        assert_eq!(c.color_mode, ColorMode::RGB);
        assert_eq!(c.extension, "png");
        assert_eq!(&c.bytes[1..4], b"PNG");
        assert_eq!(c.byte_size(), c.bytes.len());
    }
}
