//! Quality rules applied to every extracted candidate.
//!
//! Rules run in a fixed order and the first violation wins:
//!
//! 1. the bytes must decode (`corrupt_data`)
//! 2. byte size must reach `min_file_size` (`size_issues`)
//! 3. width and height must reach their minimums (`dimension_issues`)
//! 4. the colour mode must be allowed (`mode_issues`)
//!
//! Dimensions and mode are read from the decoded pixels, not from what the
//! strategy claimed, so a strategy cannot talk its way past the checks.

use crate::extraction::locator::{ColorMode, ImageCandidate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Thresholds for [`Validator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Smallest accepted encoded size in bytes. Default: 1024.
    pub min_file_size: usize,
    /// Smallest accepted width in pixels. Default: 50.
    pub min_width: u32,
    /// Smallest accepted height in pixels. Default: 50.
    pub min_height: u32,
    /// Colour modes accepted as-is. Default: L, RGB, RGBA.
    pub allowed_modes: Vec<ColorMode>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_file_size: 1024,
            min_width: 50,
            min_height: 50,
            allowed_modes: vec![ColorMode::L, ColorMode::RGB, ColorMode::RGBA],
        }
    }
}

/// Classification of a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    SizeIssues,
    DimensionIssues,
    ModeIssues,
    CorruptData,
    Other,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::SizeIssues => "size_issues",
            IssueType::DimensionIssues => "dimension_issues",
            IssueType::ModeIssues => "mode_issues",
            IssueType::CorruptData => "corrupt_data",
            IssueType::Other => "other",
        }
    }

    /// Whether this issue comes from a quality rule rather than exhaustion.
    pub fn is_validation(&self) -> bool {
        !matches!(self, IssueType::Other)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified defect with a message and structured detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub message: String,
    pub detail: BTreeMap<String, Value>,
}

impl ValidationIssue {
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            message: message.into(),
            detail: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.issue_type, self.message)
    }
}

/// Applies [`ValidationConfig`] to candidates.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(&self, candidate: &ImageCandidate) -> Result<(), ValidationIssue> {
        let decoded = image::load_from_memory(&candidate.bytes).map_err(|e| {
            ValidationIssue::new(IssueType::CorruptData, "image data cannot be decoded")
                .with_detail("error", e.to_string())
        })?;

        let file_size = candidate.byte_size();
        if file_size < self.config.min_file_size {
            return Err(ValidationIssue::new(
                IssueType::SizeIssues,
                format!(
                    "file size {} bytes is below the minimum of {} bytes",
                    file_size, self.config.min_file_size
                ),
            )
            .with_detail("file_size", file_size));
        }

        let (width, height) = (decoded.width(), decoded.height());
        if width < self.config.min_width || height < self.config.min_height {
            return Err(ValidationIssue::new(
                IssueType::DimensionIssues,
                format!(
                    "dimensions {}x{} are below the minimum of {}x{}",
                    width, height, self.config.min_width, self.config.min_height
                ),
            )
            .with_detail("width", width)
            .with_detail("height", height));
        }

        let mode = ColorMode::from(decoded.color());
        if !self.config.allowed_modes.contains(&mode) {
            return Err(ValidationIssue::new(
                IssueType::ModeIssues,
                format!("colour mode {} is not supported", mode),
            )
            .with_detail("mode", mode.as_str()));
        }

        Ok(())
    }
}
