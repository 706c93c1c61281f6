//! Output writing: figure files, diagnostic reports and the Markdown itself.
//!
//! Every file goes through [`write_atomic`] (temp file in the same directory,
//! then rename) so a crash never leaves a half-written figure or report that
//! a later run would mistake for a complete one.

use crate::error::ExtractError;
use crate::extraction::orchestrator::DocumentExtraction;
use crate::extraction::report::{self, DocumentReport};
use crate::output::AssetFile;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const REPORT_MARKDOWN: &str = "extraction-report.md";
pub const REPORT_JSON: &str = "extraction-report.json";

/// `<output_dir>/<stem>-img-assets`.
pub fn asset_dir_for(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(asset_dir_name(stem))
}

pub fn asset_dir_name(stem: &str) -> String {
    format!("{}-img-assets", stem)
}

/// `fig{n}-page{p}-img{i}.{ext}`.
pub fn figure_file_name(figure: usize, page: usize, index: usize, ext: &str) -> String {
    format!("fig{}-page{}-img{}.{}", figure, page, index, ext)
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let write_err = |e| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}

/// Write every accepted image of `extraction` into `asset_dir`, numbering
/// figures in document order. Images the relevance filter dropped are skipped
/// and do not consume a figure number.
pub async fn write_figures(
    extraction: &DocumentExtraction,
    asset_dir: &Path,
) -> Result<Vec<AssetFile>, ExtractError> {
    let dir_name = asset_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut assets = Vec::new();

    for (i, accepted) in extraction.kept().enumerate() {
        let figure = i + 1;
        let loc = &accepted.locator;
        let name = figure_file_name(figure, loc.page, loc.index, &accepted.candidate.extension);
        let path = asset_dir.join(&name);
        write_atomic(&path, &accepted.candidate.bytes).await?;
        debug!("Wrote {}", path.display());

        assets.push(AssetFile {
            figure,
            page: loc.page,
            index: loc.index,
            relative_path: format!("{}/{}", dir_name, name),
            path,
            width: accepted.candidate.width,
            height: accepted.candidate.height,
            byte_size: accepted.candidate.byte_size(),
            strategy: accepted.strategy.clone(),
        });
    }

    info!(
        "{}: wrote {} figures to {}",
        extraction.source,
        assets.len(),
        asset_dir.display()
    );
    Ok(assets)
}

/// Write `extraction-report.md` and `extraction-report.json` into `asset_dir`.
pub async fn write_reports(report: &DocumentReport, asset_dir: &Path) -> Result<(), ExtractError> {
    let json = report::render_json(report).map_err(|e| ExtractError::ReportFailed {
        source_id: report.source.clone(),
        detail: e.to_string(),
    })?;
    let markdown = report::render_markdown(report);

    write_atomic(&asset_dir.join(REPORT_MARKDOWN), markdown.as_bytes()).await?;
    write_atomic(&asset_dir.join(REPORT_JSON), json.as_bytes()).await?;
    Ok(())
}

/// Image files currently in `asset_dir`, as `<dir name>/<file>` paths,
/// sorted. Reports and temp files are skipped.
pub async fn list_asset_images(asset_dir: &Path) -> Vec<String> {
    let dir_name = asset_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut out = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(asset_dir).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_image = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        if is_image {
            out.push(format!("{}/{}", dir_name, name));
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn figure_names_encode_page_and_index() {
        assert_eq!(figure_file_name(3, 7, 2, "png"), "fig3-page7-img2.png");
        assert_eq!(
            asset_dir_for(Path::new("/out"), "paper"),
            PathBuf::from("/out/paper-img-assets")
        );
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.png");
        write_atomic(&path, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!dir.path().join("nested").join("a.png.tmp").exists());
    }

    #[tokio::test]
    async fn listing_skips_reports() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("doc-img-assets");
        write_atomic(&assets.join("fig2-page1-img2.png"), b"x").await.unwrap();
        write_atomic(&assets.join("fig1-page1-img1.png"), b"x").await.unwrap();
        write_reports(&DocumentReport::default(), &assets).await.unwrap();

        assert_eq!(
            list_asset_images(&assets).await,
            vec![
                "doc-img-assets/fig1-page1-img1.png".to_string(),
                "doc-img-assets/fig2-page1-img2.png".to_string(),
            ]
        );
        assert!(assets.join(REPORT_MARKDOWN).exists());
        assert!(assets.join(REPORT_JSON).exists());
    }
}
