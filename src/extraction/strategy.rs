//! Extraction strategies and the ordered registry that holds them.
//!
//! Strategies are stateless: each one receives the open document and a
//! locator, and either returns a candidate or a typed [`StrategyError`].
//! The orchestrator walks the registry front to back and never needs to
//! know which concrete strategies it contains.

use crate::error::StrategyError;
use crate::extraction::document::SourceDocument;
use crate::extraction::locator::{ImageCandidate, ImageLocator};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One procedure for pulling an image out of a document.
pub trait ExtractionStrategy: Send + Sync {
    /// Stable name recorded in every attempt.
    fn name(&self) -> &str;

    fn attempt(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
    ) -> Result<ImageCandidate, StrategyError>;

    /// Whether this strategy can do anything for `locator`. Skipped
    /// strategies leave no attempt in the history.
    fn applies_to(&self, document: &dyn SourceDocument, locator: &ImageLocator) -> bool {
        let _ = (document, locator);
        true
    }
}

/// Decode the image as stored and write it losslessly.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardStrategy;

impl ExtractionStrategy for StandardStrategy {
    fn name(&self) -> &str {
        StrategyKind::Standard.as_str()
    }

    fn attempt(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
    ) -> Result<ImageCandidate, StrategyError> {
        let img = document.raw_image(locator)?;
        ImageCandidate::encode_png(&img, None)
    }
}

/// Re-read the stored image and force it into RGB.
///
/// Rescues CMYK, indexed and 16-bit images whose native mode is not in the
/// allowed set.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlternateColorspaceStrategy;

impl ExtractionStrategy for AlternateColorspaceStrategy {
    fn name(&self) -> &str {
        StrategyKind::AlternateColorspace.as_str()
    }

    fn attempt(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
    ) -> Result<ImageCandidate, StrategyError> {
        let img = document.raw_image(locator)?;
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        ImageCandidate::encode_png(&rgb, Some("converted to RGB".into()))
    }
}

/// Ask the engine for the image with its masks and filters applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessedStrategy;

impl ExtractionStrategy for ProcessedStrategy {
    fn name(&self) -> &str {
        StrategyKind::Processed.as_str()
    }

    fn attempt(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
    ) -> Result<ImageCandidate, StrategyError> {
        let img = document.processed_image(locator)?;
        let normalised = if img.color().has_alpha() {
            DynamicImage::ImageRgba8(img.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
        };
        ImageCandidate::encode_png(&normalised, None)
    }
}

/// Render the whole page the image sits on.
///
/// Last resort: always yields pixels when the page renders, but the result
/// includes surrounding content.
#[derive(Debug, Clone, Copy)]
pub struct PageRenderStrategy {
    pub dpi: u32,
    pub max_pixels: u32,
}

impl Default for PageRenderStrategy {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_pixels: 2000,
        }
    }
}

impl ExtractionStrategy for PageRenderStrategy {
    fn name(&self) -> &str {
        StrategyKind::PageRender.as_str()
    }

    fn attempt(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
    ) -> Result<ImageCandidate, StrategyError> {
        let img = document.render_page(locator.page, self.dpi, self.max_pixels)?;
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        ImageCandidate::encode_png(&rgb, Some("whole page rendered".into()))
    }
}

/// The built-in strategies, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Standard,
    AlternateColorspace,
    Processed,
    PageRender,
}

impl StrategyKind {
    /// Default registry order, cheapest and most faithful first.
    pub const DEFAULT_ORDER: [StrategyKind; 4] = [
        StrategyKind::Standard,
        StrategyKind::AlternateColorspace,
        StrategyKind::Processed,
        StrategyKind::PageRender,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Standard => "standard",
            StrategyKind::AlternateColorspace => "alternate_colorspace",
            StrategyKind::Processed => "processed",
            StrategyKind::PageRender => "page_render",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(StrategyKind::Standard),
            "alternate_colorspace" | "rgb" => Ok(StrategyKind::AlternateColorspace),
            "processed" => Ok(StrategyKind::Processed),
            "page_render" | "render" => Ok(StrategyKind::PageRender),
            other => Err(format!(
                "unknown strategy '{}' (expected standard, alternate_colorspace, processed or page_render)",
                other
            )),
        }
    }
}

/// Ordered, enumerable sequence of strategies.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of built-in strategies in the given order.
    ///
    /// Duplicate kinds are dropped so a strategy can never run twice on the
    /// same image.
    pub fn from_kinds(kinds: &[StrategyKind], dpi: u32, max_pixels: u32) -> Self {
        let mut registry = Self::new();
        let mut seen = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            if seen.contains(&kind) {
                continue;
            }
            seen.push(kind);
            let strategy: Arc<dyn ExtractionStrategy> = match kind {
                StrategyKind::Standard => Arc::new(StandardStrategy),
                StrategyKind::AlternateColorspace => Arc::new(AlternateColorspaceStrategy),
                StrategyKind::Processed => Arc::new(ProcessedStrategy),
                StrategyKind::PageRender => Arc::new(PageRenderStrategy { dpi, max_pixels }),
            };
            registry.strategies.push(strategy);
        }
        registry
    }

    /// Append a strategy at the lowest priority.
    pub fn push(&mut self, strategy: Arc<dyn ExtractionStrategy>) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Arc<dyn ExtractionStrategy>> {
        self.strategies.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ExtractionStrategy>> {
        self.strategies.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }
}
