//! Optional relevance filter for accepted images.
//!
//! Runs after validation, on images that already passed every quality rule,
//! and separates content (diagrams, photographs) from page furniture: blank
//! spacers, small icons, thin decorative banners and flat low-detail fills.
//! A filtered image still counts as succeeded; it is only kept out of the
//! asset directory. In diagnostic mode nothing is filtered, but every image
//! that would have been is recorded with its reasons.
//!
//! All measurements come from decoded pixels:
//!
//! | Measure | Definition |
//! |---|---|
//! | luminance spread | standard deviation of the 8-bit grey channel |
//! | edge density | share of pixels whose central-difference gradient `|gx| + |gy|` exceeds 100 |
//! | colour complexity | distinct RGB triples divided by pixel count |

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Grey standard deviation below which an image is blank.
const BLANK_STD_DEV: f64 = 5.0;
/// Gradient magnitude that counts as an edge.
const EDGE_THRESHOLD: i32 = 100;
/// Long side over short side at which an image reads as a banner.
const BANNER_ASPECT_RATIO: f64 = 6.0;

/// Thresholds and switches for [`RelevanceFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Keep every image but record what would have been filtered. Default: false.
    pub diagnostic: bool,
    /// Smallest meaningful width in pixels. Default: 50.
    pub min_width: u32,
    /// Smallest meaningful height in pixels. Default: 50.
    pub min_height: u32,
    /// Icons below this area (pixels) are filtered. Default: 4096 (64x64).
    pub max_icon_area: u64,
    pub filter_blank: bool,
    pub filter_icons: bool,
    pub filter_banners: bool,
    pub filter_low_complexity: bool,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            diagnostic: false,
            min_width: 50,
            min_height: 50,
            max_icon_area: 4096,
            filter_blank: true,
            filter_icons: true,
            filter_banners: true,
            filter_low_complexity: true,
        }
    }
}

/// Coarse content class derived from pixel statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Blank,
    Icon,
    Diagram,
    Photograph,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Blank => "blank",
            ContentType::Icon => "icon",
            ContentType::Diagram => "diagram",
            ContentType::Photograph => "photograph",
            ContentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an image is (or would be) filtered. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    TooSmall,
    Blank,
    DecorativeBanner,
    Icon,
    LowComplexity,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::TooSmall => "too_small",
            FilterReason::Blank => "blank",
            FilterReason::DecorativeBanner => "decorative_banner",
            FilterReason::Icon => "icon",
            FilterReason::LowComplexity => "low_complexity",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel statistics of one decoded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub content_type: ContentType,
    pub is_blank: bool,
    pub is_likely_icon: bool,
    pub edge_density: f64,
    pub color_complexity: f64,
}

impl ImageAnalysis {
    pub fn of(image: &DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let grey = image.to_luma8();
        let is_blank = luminance_std_dev(grey.as_raw()) < BLANK_STD_DEV;
        let edge_density = edge_density(&grey);
        let color_complexity = color_complexity(image);

        let is_likely_icon = width < 80 && height < 80 && color_complexity < 0.1;
        let content_type = if is_blank {
            ContentType::Blank
        } else if is_likely_icon {
            ContentType::Icon
        } else if edge_density > 0.05 && color_complexity < 0.2 {
            ContentType::Diagram
        } else if color_complexity > 0.2 {
            ContentType::Photograph
        } else {
            ContentType::Unknown
        };

        Self {
            width,
            height,
            content_type,
            is_blank,
            is_likely_icon,
            edge_density,
            color_complexity,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn aspect_ratio(&self) -> f64 {
        let (long, short) = if self.width >= self.height {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        };
        if short == 0 {
            return f64::INFINITY;
        }
        long as f64 / short as f64
    }
}

fn luminance_std_dev(pixels: &[u8]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let var = pixels
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}

fn edge_density(grey: &image::GrayImage) -> f64 {
    let (w, h) = grey.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| grey.get_pixel(x, y).0[0] as i32;
    let mut edges = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = at(x + 1, y) - at(x - 1, y);
            let gy = at(x, y + 1) - at(x, y - 1);
            if gx.abs() + gy.abs() > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }
    edges as f64 / (w as u64 * h as u64) as f64
}

fn color_complexity(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let total = rgb.width() as usize * rgb.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let distinct: HashSet<[u8; 3]> = rgb.pixels().map(|p| p.0).collect();
    distinct.len() as f64 / total as f64
}

/// Result of filtering one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub analysis: ImageAnalysis,
    /// Every rule the image tripped, in check order.
    pub reasons: Vec<FilterReason>,
    /// True when the image is kept out of the asset directory. Always false
    /// in diagnostic mode.
    pub filtered: bool,
}

impl RelevanceVerdict {
    /// The image tripped at least one rule, whether or not it was dropped.
    pub fn would_filter(&self) -> bool {
        !self.reasons.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    config: RelevanceConfig,
}

impl RelevanceFilter {
    pub fn new(config: RelevanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    /// Decode `bytes` and evaluate them. `None` when the bytes do not decode.
    pub fn evaluate_encoded(&self, bytes: &[u8]) -> Option<RelevanceVerdict> {
        let image = image::load_from_memory(bytes).ok()?;
        Some(self.evaluate(ImageAnalysis::of(&image)))
    }

    pub fn evaluate(&self, analysis: ImageAnalysis) -> RelevanceVerdict {
        let c = &self.config;
        let mut reasons = Vec::new();

        if analysis.width < c.min_width || analysis.height < c.min_height {
            reasons.push(FilterReason::TooSmall);
        }
        if c.filter_blank && analysis.is_blank {
            reasons.push(FilterReason::Blank);
        }
        if c.filter_banners
            && analysis.aspect_ratio() >= BANNER_ASPECT_RATIO
            && analysis.color_complexity < 0.05
        {
            reasons.push(FilterReason::DecorativeBanner);
        }
        if c.filter_icons && analysis.is_likely_icon && analysis.area() < c.max_icon_area {
            reasons.push(FilterReason::Icon);
        }
        // Medium-sized but flat: roughly 140x140 up to 316x316.
        let area = analysis.area();
        if c.filter_low_complexity
            && area > 20_000
            && area < 100_000
            && analysis.color_complexity < 0.05
            && analysis.edge_density < 0.02
        {
            reasons.push(FilterReason::LowComplexity);
        }

        let filtered = !c.diagnostic && !reasons.is_empty();
        RelevanceVerdict {
            analysis,
            reasons,
            filtered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn flat(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([200])))
    }

    /// Every pixel a different colour.
    fn noisy(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    /// Black and white vertical stripes, two pixels wide.
    fn stripes(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, _| {
            Luma([if (x / 2) % 2 == 0 { 0 } else { 255 }])
        }))
    }

    #[test]
    fn flat_fill_is_blank() {
        let a = ImageAnalysis::of(&flat(200, 200));
        assert!(a.is_blank);
        assert_eq!(a.content_type, ContentType::Blank);
        assert_eq!(a.edge_density, 0.0);
    }

    #[test]
    fn distinct_colours_read_as_photograph() {
        let a = ImageAnalysis::of(&noisy(120, 120));
        assert!(!a.is_blank);
        assert!(a.color_complexity > 0.2, "{}", a.color_complexity);
        assert_eq!(a.content_type, ContentType::Photograph);
    }

    #[test]
    fn stripes_read_as_diagram() {
        let a = ImageAnalysis::of(&stripes(120, 120));
        assert!(a.edge_density > 0.05, "{}", a.edge_density);
        assert_eq!(a.content_type, ContentType::Diagram);
    }

    #[test]
    fn blank_spacer_is_filtered() {
        let f = RelevanceFilter::default();
        let v = f.evaluate(ImageAnalysis::of(&flat(200, 200)));
        assert!(v.filtered);
        assert_eq!(v.reasons[0], FilterReason::Blank);
    }

    #[test]
    fn thin_banner_is_filtered() {
        let f = RelevanceFilter::default();
        let v = f.evaluate(ImageAnalysis::of(&stripes(600, 60)));
        assert!(v.reasons.contains(&FilterReason::DecorativeBanner), "{:?}", v.reasons);
        assert!(v.filtered);
    }

    #[test]
    fn small_icon_trips_size_and_icon_rules() {
        let f = RelevanceFilter::default();
        let v = f.evaluate(ImageAnalysis::of(&stripes(32, 32)));
        assert_eq!(v.reasons[0], FilterReason::TooSmall);
        assert!(v.reasons.contains(&FilterReason::Icon));
    }

    #[test]
    fn photograph_is_kept() {
        let f = RelevanceFilter::default();
        let v = f.evaluate(ImageAnalysis::of(&noisy(120, 120)));
        assert!(!v.filtered);
        assert!(!v.would_filter());
    }

    #[test]
    fn diagnostic_mode_keeps_but_records() {
        let f = RelevanceFilter::new(RelevanceConfig {
            diagnostic: true,
            ..RelevanceConfig::default()
        });
        let v = f.evaluate(ImageAnalysis::of(&flat(200, 200)));
        assert!(!v.filtered);
        assert!(v.would_filter());
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let f = RelevanceFilter::new(RelevanceConfig {
            filter_blank: false,
            filter_low_complexity: false,
            ..RelevanceConfig::default()
        });
        let v = f.evaluate(ImageAnalysis::of(&flat(200, 200)));
        assert!(v.reasons.is_empty(), "{:?}", v.reasons);
    }

    #[test]
    fn undecodable_bytes_give_no_verdict() {
        assert!(RelevanceFilter::default().evaluate_encoded(b"nope").is_none());
    }
}
