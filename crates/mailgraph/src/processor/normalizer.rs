//! Replaces scanned documents in a directory tree with plain-text siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use walkdir::WalkDir;

use crate::config::OcrConfig;
use crate::error::ProcessError;
use crate::processor::ocr::OcrEngine;
use crate::processor::pdf::pdf_text;
use crate::storage::{remove_file, write_new_file};

/// What happened to a single candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Text was written to the path and the original was deleted.
    Converted(PathBuf),
    /// Recognition produced too little text; the original is kept.
    NoText,
    /// Recognition failed; the original is kept.
    Failed(String),
}

#[derive(Debug, Default, Clone)]
pub struct NormalizeReport {
    pub converted: Vec<PathBuf>,
    pub no_text: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl NormalizeReport {
    pub fn candidates(&self) -> usize {
        self.converted.len() + self.no_text.len() + self.failed.len()
    }
}

pub struct OcrNormalizer {
    engine: Arc<dyn OcrEngine>,
    dpi: u32,
    min_text_chars: usize,
    extensions: Vec<String>,
}

impl OcrNormalizer {
    pub fn new(engine: Arc<dyn OcrEngine>, config: &OcrConfig) -> Self {
        Self {
            engine,
            dpi: config.dpi,
            min_text_chars: config.min_text_chars,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Walks `dir` recursively and normalizes every candidate file. A failure
    /// on one file never stops the walk.
    pub fn normalize_dir(&self, dir: &Path) -> NormalizeReport {
        let _span = tracing::info_span!("processor.normalize_dir").entered();

        let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_candidate(path))
            .collect();
        candidates.sort();

        let mut report = NormalizeReport::default();
        for path in candidates {
            match self.normalize_file(&path) {
                NormalizeOutcome::Converted(txt) => report.converted.push(txt),
                NormalizeOutcome::NoText => {
                    info!("No text found in {}", path.display());
                    report.no_text.push(path);
                }
                NormalizeOutcome::Failed(reason) => {
                    warn!("OCR failed for {}: {}", path.display(), reason);
                    report.failed.push(path);
                }
            }
        }
        report
    }

    pub fn normalize_file(&self, path: &Path) -> NormalizeOutcome {
        let text = match self.recognize(path) {
            Ok(text) => text,
            Err(e) => return NormalizeOutcome::Failed(e.to_string()),
        };

        if text.trim().chars().count() <= self.min_text_chars {
            return NormalizeOutcome::NoText;
        }

        // an existing sibling (attached text, another scan's output) is kept
        let sibling = text_path_for(path);
        let directory = sibling.parent().unwrap_or_else(|| Path::new("."));
        let file_name = sibling
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.txt".to_string());

        let written = write_new_file(directory, &file_name, text.as_bytes())
            .and_then(|txt_path| remove_file(path).map(|_| txt_path));
        match written {
            Ok(txt_path) => NormalizeOutcome::Converted(txt_path),
            Err(e) => NormalizeOutcome::Failed(e.to_string()),
        }
    }

    fn recognize(&self, path: &Path) -> Result<String, ProcessError> {
        let bytes = std::fs::read(path).map_err(|source| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source,
        })?;

        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            pdf_text(&bytes, self.engine.as_ref(), self.dpi)
        } else {
            self.engine.recognize_image(&bytes)
        }
    }
}

/// `scan 01.pdf` becomes `scan_01.txt` in the same directory.
pub fn text_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(' ', "_"))
        .unwrap_or_default();
    path.with_file_name(format!("{}.txt", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::pdf::tests::pdf_with_text;
    use tempfile::TempDir;

    /// Treats the image bytes as the recognized text.
    struct EchoEngine;

    impl OcrEngine for EchoEngine {
        fn recognize_image(&self, image_data: &[u8]) -> Result<String, ProcessError> {
            if image_data.starts_with(b"FAIL") {
                return Err(ProcessError::OcrFailed("engine crashed".to_string()));
            }
            Ok(String::from_utf8_lossy(image_data).into_owned())
        }
    }

    fn normalizer() -> OcrNormalizer {
        OcrNormalizer::new(Arc::new(EchoEngine), &OcrConfig::default())
    }

    #[test]
    fn test_text_path_for_replaces_spaces_in_name() {
        assert_eq!(
            text_path_for(Path::new("/data/t1/m1/scan 01.pdf")),
            PathBuf::from("/data/t1/m1/scan_01.txt")
        );
        assert_eq!(
            text_path_for(Path::new("photo.final.PNG")),
            PathBuf::from("photo.final.txt")
        );
    }

    #[test]
    fn test_converts_image_with_enough_text() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("quote request.png");
        std::fs::write(&image, "Demande de devis pour un demenagement").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        let txt = dir.path().join("quote_request.txt");
        assert_eq!(report.converted, vec![txt.clone()]);
        assert!(!image.exists());
        assert_eq!(
            std::fs::read_to_string(txt).unwrap(),
            "Demande de devis pour un demenagement"
        );
    }

    #[test]
    fn test_short_text_keeps_original() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("logo.jpg");
        // exactly twenty characters after trimming
        std::fs::write(&image, "  ACME Moving Company.  ").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        assert_eq!(report.no_text, vec![image.clone()]);
        assert!(image.exists());
        assert!(!dir.path().join("logo.txt").exists());
    }

    #[test]
    fn test_engine_failure_keeps_original_and_continues() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("a.png");
        let good = dir.path().join("b.png");
        std::fs::write(&broken, "FAIL").unwrap();
        std::fs::write(&good, "This attachment has readable content").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        assert_eq!(report.failed, vec![broken.clone()]);
        assert_eq!(report.converted, vec![dir.path().join("b.txt")]);
        assert!(broken.exists());
        assert!(!good.exists());
    }

    #[test]
    fn test_walks_subdirectories_and_ignores_other_extensions() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("t1").join("m1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("SCAN.PNG"), "Adresse de chargement: 12 rue Victor Hugo").unwrap();
        std::fs::write(nested.join("notes.docx"), "Adresse de chargement: 12 rue Victor Hugo").unwrap();
        std::fs::write(nested.join("body.txt"), "hello").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        assert_eq!(report.candidates(), 1);
        assert!(nested.join("SCAN.txt").exists());
        assert!(nested.join("notes.docx").exists());
    }

    #[test]
    fn test_pdf_with_embedded_text_is_converted() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("devis.pdf");
        std::fs::write(&pdf, pdf_with_text("Devis 269 pour le demenagement de Mr Hillmann")).unwrap();

        let report = normalizer().normalize_dir(dir.path());

        assert_eq!(report.converted, vec![dir.path().join("devis.txt")]);
        let text = std::fs::read_to_string(dir.path().join("devis.txt")).unwrap();
        assert!(text.contains("Devis 269"));
        assert!(!pdf.exists());
    }

    #[test]
    fn test_existing_text_sibling_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let attached = dir.path().join("contrat.txt");
        std::fs::write(&attached, "Contrat joint par le client").unwrap();
        std::fs::write(dir.path().join("contrat.png"), "Contrat scanne, page une sur deux").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        let written = dir.path().join("contrat_2.txt");
        assert_eq!(report.converted, vec![written.clone()]);
        assert_eq!(
            std::fs::read_to_string(&attached).unwrap(),
            "Contrat joint par le client"
        );
        assert_eq!(
            std::fs::read_to_string(written).unwrap(),
            "Contrat scanne, page une sur deux"
        );
    }

    #[test]
    fn test_scans_sharing_a_stem_keep_both_texts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("scan.jpg"), "Inventaire du salon et de la cuisine").unwrap();
        std::fs::write(dir.path().join("scan.png"), "Inventaire de la cave et du garage").unwrap();

        let report = normalizer().normalize_dir(dir.path());

        assert_eq!(report.converted.len(), 2);
        let mut texts: Vec<String> = report
            .converted
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        texts.sort();
        assert_eq!(
            texts,
            vec![
                "Inventaire de la cave et du garage",
                "Inventaire du salon et de la cuisine"
            ]
        );
    }

    #[test]
    fn test_custom_extensions_are_normalized() {
        let config = OcrConfig {
            extensions: vec![".TIFF".to_string()],
            ..OcrConfig::default()
        };
        let normalizer = OcrNormalizer::new(Arc::new(EchoEngine), &config);
        assert!(normalizer.is_candidate(Path::new("x.tiff")));
        assert!(!normalizer.is_candidate(Path::new("x.png")));
    }
}
