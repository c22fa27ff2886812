//! PDF conversion through external tools.
//!
//! Rendering locates the first of `pdftoppm`, `mutool`, or `magick` on the
//! PATH and rasterizes each page to PNG at a fixed DPI inside a scoped temp
//! directory; text extraction uses `pdftotext` and splits pages on form
//! feeds. The temp directory is removed on every exit path.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

/// Rasterization density for page rendering.
pub const RENDER_DPI: u32 = 150;

/// Errors from PDF conversion.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("no pdf conversion tool installed (pdftoppm, mutool, or magick)")]
    NoRenderTool,
    #[error("pdftotext is not installed")]
    NoTextTool,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("conversion failed: {0}")]
    Failed(String),
}

enum Renderer {
    Pdftoppm(std::path::PathBuf),
    Mutool(std::path::PathBuf),
    Magick(std::path::PathBuf),
}

fn find_renderer() -> Option<Renderer> {
    if let Ok(p) = which::which("pdftoppm") {
        return Some(Renderer::Pdftoppm(p));
    }
    if let Ok(p) = which::which("mutool") {
        return Some(Renderer::Mutool(p));
    }
    if let Ok(p) = which::which("magick") {
        return Some(Renderer::Magick(p));
    }
    None
}

/// Renders each page of a PDF to a PNG image.
pub async fn render_pages(data: &[u8]) -> Result<Vec<Vec<u8>>, PdfError> {
    let renderer = find_renderer().ok_or(PdfError::NoRenderTool)?;

    // Dropped on every exit path, removing the scratch files.
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.pdf");
    tokio::fs::write(&input, data).await?;

    let dpi = RENDER_DPI.to_string();
    let output = match renderer {
        Renderer::Pdftoppm(bin) => {
            Command::new(bin)
                .arg("-png")
                .arg("-r")
                .arg(&dpi)
                .arg(&input)
                .arg(dir.path().join("page"))
                .output()
                .await?
        }
        Renderer::Mutool(bin) => {
            Command::new(bin)
                .arg("draw")
                .arg("-r")
                .arg(&dpi)
                .arg("-o")
                .arg(dir.path().join("page-%d.png"))
                .arg(&input)
                .output()
                .await?
        }
        Renderer::Magick(bin) => {
            Command::new(bin)
                .arg("-density")
                .arg(&dpi)
                .arg(&input)
                .arg(dir.path().join("page-%d.png"))
                .output()
                .await?
        }
    };
    if !output.status.success() {
        return Err(PdfError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let pages = read_pages(dir.path()).await?;
    if pages.is_empty() {
        return Err(PdfError::Failed("no pages rendered".to_string()));
    }
    Ok(pages)
}

/// Reads rendered `page*.png` files in page order. Tools differ on zero
/// padding, so ordering is by the embedded page number.
async fn read_pages(dir: &Path) -> Result<Vec<Vec<u8>>, PdfError> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("page") && name.ends_with(".png") {
            let number: u64 = name
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(u64::MAX);
            entries.push((number, entry.path()));
        }
    }
    entries.sort();

    let mut pages = Vec::with_capacity(entries.len());
    for (_, path) in entries {
        pages.push(tokio::fs::read(path).await?);
    }
    Ok(pages)
}

/// Extracts per-page text from a PDF. Pages are split on the form feeds
/// `pdftotext` writes between pages.
pub async fn extract_text(data: &[u8]) -> Result<Vec<String>, PdfError> {
    let bin = which::which("pdftotext").map_err(|_| PdfError::NoTextTool)?;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.pdf");
    let out = dir.path().join("out.txt");
    tokio::fs::write(&input, data).await?;

    let output = Command::new(bin)
        .arg("-layout")
        .arg(&input)
        .arg(&out)
        .output()
        .await?;
    if !output.status.success() {
        return Err(PdfError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let text = tokio::fs::read_to_string(&out).await?;
    let mut pages: Vec<String> = text.split('\x0c').map(|p| p.trim().to_string()).collect();
    while pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    if pages.is_empty() {
        return Err(PdfError::Failed("no text extracted".to_string()));
    }
    Ok(pages)
}

/// Joins per-page text with `## Page N` headers and `---` separators.
pub fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("## Page {}\n\n{}", i + 1, page))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_pages_formats_headers_and_separators() {
        let pages = vec!["first".to_string(), "second".to_string()];
        let joined = join_pages(&pages);
        assert_eq!(joined, "## Page 1\n\nfirst\n\n---\n\n## Page 2\n\nsecond");
    }

    #[test]
    fn join_single_page_has_no_separator() {
        let joined = join_pages(&["only".to_string()]);
        assert_eq!(joined, "## Page 1\n\nonly");
        assert!(!joined.contains("---"));
    }

    #[tokio::test]
    async fn render_fails_cleanly_on_garbage_input() {
        // Whichever path is taken (no tool installed, or the tool rejecting
        // the input), the call must error rather than hang or leak files.
        let result = render_pages(b"not a pdf").await;
        assert!(result.is_err());
    }
}
