//! Source-document access: the capability the extraction core reads from.
//!
//! The orchestrator and every strategy see only [`SourceDocument`], so tests
//! can substitute in-memory documents. [`PdfiumDocument`] is the production
//! implementation over `pdfium-render`.
//!
//! pdfium handles are not `Send`; everything in here is blocking and must be
//! driven from `spawn_blocking` (see [`crate::convert`]).

use crate::error::{ExtractError, PageError, StrategyError};
use crate::extraction::locator::ImageLocator;
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read access to one open source document.
///
/// Page numbers are 1-based throughout. Implementations must not let one
/// call change what a later call on the same locator returns.
pub trait SourceDocument {
    /// Identifier used in locators and reports (usually the file path).
    fn identifier(&self) -> &str;

    fn page_count(&self) -> usize;

    /// Cross-references of the embedded images on `page`, in page order.
    fn image_xrefs(&self, page: usize) -> Result<Vec<u32>, StrategyError>;

    /// The image decoded as stored, without masks or filters applied.
    fn raw_image(&self, locator: &ImageLocator) -> Result<DynamicImage, StrategyError>;

    /// The image as the engine would paint it (masks and filters applied).
    fn processed_image(&self, locator: &ImageLocator) -> Result<DynamicImage, StrategyError>;

    /// Rasterise a whole page at `dpi`, capping both edges at `max_pixels`.
    fn render_page(
        &self,
        page: usize,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<DynamicImage, StrategyError>;

    /// Plain text of `page`.
    fn page_text(&self, page: usize) -> Result<String, PageError>;
}

/// Bind to a pdfium library.
///
/// `PDFIUM_LIB_PATH` (a library file or the directory holding it) wins;
/// otherwise the system library search path is used.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(raw) => {
            let path = PathBuf::from(raw);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// A PDF opened through pdfium.
pub struct PdfiumDocument<'a> {
    id: String,
    document: PdfDocument<'a>,
}

impl<'a> PdfiumDocument<'a> {
    /// Open `path`, classifying failures into the fatal input/PDF errors.
    pub fn open(
        pdfium: &'a Pdfium,
        path: &Path,
        password: Option<&'a str>,
    ) -> Result<Self, ExtractError> {
        if let Err(e) = std::fs::metadata(path) {
            return Err(ExtractError::from_open_io(path.to_path_buf(), &e));
        }

        let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    ExtractError::WrongPassword {
                        path: path.to_path_buf(),
                    }
                } else {
                    ExtractError::PasswordRequired {
                        path: path.to_path_buf(),
                    }
                }
            } else {
                ExtractError::CorruptPdf {
                    path: path.to_path_buf(),
                    detail: err_str,
                }
            }
        })?;

        info!(
            "PDF loaded: {} ({} pages)",
            path.display(),
            document.pages().len()
        );

        Ok(Self {
            id: path.display().to_string(),
            document,
        })
    }

    /// Report under `id` (e.g. the URL a temp file was downloaded from)
    /// instead of the on-disk path.
    pub fn identified_as(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn page(&self, page: usize) -> Result<PdfPage<'a>, StrategyError> {
        if page == 0 || page > self.page_count() {
            return Err(StrategyError::PageUnavailable {
                page,
                detail: format!("out of range (1..={})", self.page_count()),
            });
        }
        self.document
            .pages()
            .get((page - 1) as u16)
            .map_err(|e| StrategyError::PageUnavailable {
                page,
                detail: format!("{:?}", e),
            })
    }

    fn with_image_object<T>(
        &self,
        locator: &ImageLocator,
        f: impl FnOnce(&PdfPageImageObject) -> Result<T, PdfiumError>,
    ) -> Result<T, StrategyError> {
        let page = self.page(locator.page)?;
        let objects = page.objects();
        let object =
            objects
                .get(locator.xref as usize)
                .map_err(|_| StrategyError::ObjectNotFound {
                    page: locator.page,
                    xref: locator.xref,
                })?;
        let image = object
            .as_image_object()
            .ok_or(StrategyError::NotAnImage {
                page: locator.page,
                xref: locator.xref,
            })?;
        f(image).map_err(classify_image_error)
    }

    /// Document info dictionary plus per-page image counts.
    pub fn metadata(&self) -> DocumentMetadata {
        let metadata = self.document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        let page_count = self.page_count();
        let images_per_page = (1..=page_count)
            .map(|p| self.image_xrefs(p).map(|x| x.len()).unwrap_or(0))
            .collect();

        DocumentMetadata {
            source: self.id.clone(),
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
            page_count,
            images_per_page,
            pdf_version: format!("{:?}", self.document.version()),
        }
    }
}

impl SourceDocument for PdfiumDocument<'_> {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn image_xrefs(&self, page: usize) -> Result<Vec<u32>, StrategyError> {
        let pdf_page = self.page(page)?;
        let xrefs = pdf_page
            .objects()
            .iter()
            .enumerate()
            .filter(|(_, object)| object.as_image_object().is_some())
            .map(|(i, _)| i as u32)
            .collect();
        Ok(xrefs)
    }

    fn raw_image(&self, locator: &ImageLocator) -> Result<DynamicImage, StrategyError> {
        self.with_image_object(locator, |image| image.get_raw_image())
    }

    fn processed_image(&self, locator: &ImageLocator) -> Result<DynamicImage, StrategyError> {
        self.with_image_object(locator, |image| image.get_processed_image(&self.document))
    }

    fn render_page(
        &self,
        page: usize,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<DynamicImage, StrategyError> {
        let pdf_page = self.page(page)?;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let bitmap =
            pdf_page
                .render_with_config(&render_config)
                .map_err(|e| StrategyError::PageUnavailable {
                    page,
                    detail: format!("{:?}", e),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page,
            image.width(),
            image.height()
        );
        Ok(image)
    }

    fn page_text(&self, page: usize) -> Result<String, PageError> {
        let pdf_page = self.page(page).map_err(|e| PageError::TextFailed {
            page,
            detail: e.to_string(),
        })?;
        let text = pdf_page.text().map_err(|e| PageError::TextFailed {
            page,
            detail: format!("{:?}", e),
        })?;
        Ok(text.all())
    }
}

fn classify_image_error(e: PdfiumError) -> StrategyError {
    let detail = format!("{:?}", e);
    if detail.contains("Unsupported") || detail.contains("ColorSpace") {
        StrategyError::UnsupportedEncoding { detail }
    } else {
        StrategyError::CorruptStream { detail }
    }
}
