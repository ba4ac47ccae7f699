//! PDF text: embedded text when it is usable, page-by-page OCR otherwise.

use std::path::Path;
use std::process::Command;

use crate::error::ProcessError;
use crate::processor::ocr::OcrEngine;

pub fn pdf_text(pdf_bytes: &[u8], engine: &dyn OcrEngine, dpi: u32) -> Result<String, ProcessError> {
    let _span = tracing::info_span!("processor.pdf").entered();

    match lopdf::Document::load_mem(pdf_bytes) {
        Ok(doc) => {
            let text = extract_embedded_text(&doc);
            if should_use_ocr(&text) {
                let _ocr_span =
                    tracing::info_span!("processor.ocr_fallback", reason = "text_quality")
                        .entered();
                ocr_pages(pdf_bytes, doc.get_pages().len(), engine, dpi)
            } else {
                Ok(text)
            }
        }
        Err(e) => {
            tracing::warn!("lopdf failed to parse PDF: {}. Falling back to OCR.", e);
            let _ocr_span =
                tracing::info_span!("processor.ocr_fallback", reason = "lopdf_parse_failed")
                    .entered();
            let page_count = count_pdf_pages(pdf_bytes)?;
            ocr_pages(pdf_bytes, page_count, engine, dpi)
        }
    }
}

fn extract_embedded_text(doc: &lopdf::Document) -> String {
    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    text
}

fn ocr_pages(
    pdf_bytes: &[u8],
    page_count: usize,
    engine: &dyn OcrEngine,
    dpi: u32,
) -> Result<String, ProcessError> {
    let mut all_text = String::new();
    let mut last_error = None;

    for page_num in 1..=page_count as u32 {
        match render_pdf_page_to_image(pdf_bytes, page_num, dpi)
            .and_then(|image| engine.recognize_image(&image))
        {
            Ok(page_text) => {
                all_text.push_str(&page_text);
                all_text.push('\n');
            }
            Err(e) => {
                tracing::debug!("OCR of page {} failed: {}", page_num, e);
                last_error = Some(e);
            }
        }
    }

    // A document where every page failed is an error, not an empty text.
    match last_error {
        Some(e) if all_text.is_empty() => Err(e),
        _ => Ok(all_text),
    }
}

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Below this many characters the alphanumeric ratio is not checked.
const MIN_TOTAL_CHARS: usize = 50;

/// Embedded text with a lower alphanumeric share than this is treated as garbled.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// True when embedded text is empty, only font-encoding markers, or garbled.
fn should_use_ocr(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    total_chars > MIN_TOTAL_CHARS && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}

/// Writes the PDF to a temp file for the poppler tools. Removed on drop.
struct TempPdf(tempfile::TempPath);

impl TempPdf {
    fn write(pdf_bytes: &[u8]) -> Result<Self, ProcessError> {
        let file = tempfile::Builder::new()
            .prefix("mailgraph_")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to create temp PDF: {}", e)))?;
        std::fs::write(file.path(), pdf_bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self(file.into_temp_path()))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

/// Page count via `pdfinfo`, for PDFs lopdf cannot parse.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ProcessError> {
    let pdf = TempPdf::write(pdf_bytes)?;

    let output = Command::new("pdfinfo").arg(pdf.path()).output().map_err(|e| {
        ProcessError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(parse_page_count(&String::from_utf8_lossy(&output.stdout)).unwrap_or(1))
}

fn parse_page_count(pdfinfo_output: &str) -> Option<usize> {
    pdfinfo_output
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

fn render_pdf_page_to_image(pdf_bytes: &[u8], page_num: u32, dpi: u32) -> Result<Vec<u8>, ProcessError> {
    let pdf = TempPdf::write(pdf_bytes)?;
    let out_dir = tempfile::tempdir()
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to create temp dir: {}", e)))?;
    let output_prefix = out_dir.path().join("page");

    let output = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string()])
        .args(["-f", &page_num.to_string(), "-l", &page_num.to_string()])
        .arg(pdf.path())
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm zero-pads the page suffix depending on the page count
    let image_path = std::fs::read_dir(out_dir.path())
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to list rendered pages: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|p| p.extension().is_some_and(|ext| ext == "png"))
        .ok_or_else(|| {
            ProcessError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    std::fs::read(&image_path)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object, Stream};

    struct NoOcr;

    impl OcrEngine for NoOcr {
        fn recognize_image(&self, _image_data: &[u8]) -> Result<String, ProcessError> {
            Err(ProcessError::OcrFailed("no OCR in tests".to_string()))
        }
    }

    /// Builds a one-page PDF with `content` drawn in Courier.
    pub(crate) fn pdf_with_text(content: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let stream = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", content);
        let content_id = doc.add_object(Stream::new(dictionary! {}, stream.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_embedded_text_is_used_without_ocr() {
        let bytes = pdf_with_text("Devis 269 pour Mr Hillmann");
        let text = pdf_text(&bytes, &NoOcr, 300).unwrap();
        assert!(text.contains("Devis 269"));
    }

    #[test]
    fn test_parse_page_count() {
        let output = "Title:  x\nPages:          3\nEncrypted:      no\n";
        assert_eq!(parse_page_count(output), Some(3));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn test_should_use_ocr_empty_and_identity_h() {
        assert!(should_use_ocr("  \n "));
        assert!(should_use_ocr(
            "?Identity-H Unimplemented?\n?Identity-H Unimplemented?"
        ));
        assert!(!should_use_ocr("Invoice #123 ?Identity-H Unimplemented? Total: $500"));
    }

    #[test]
    fn test_should_use_ocr_garbled_threshold() {
        let mut readable = String::from("abcdef");
        readable.push_str(&"!".repeat(45));
        assert!(!should_use_ocr(&readable));

        let mut garbled = String::from("abcd");
        garbled.push_str(&"!".repeat(47));
        assert!(should_use_ocr(&garbled));

        assert!(!should_use_ocr(&"!".repeat(MIN_TOTAL_CHARS)));
    }
}
