//! Text recognition for scanned attachments and uploads.

pub mod normalizer;
pub mod ocr;
pub mod pdf;

pub use normalizer::{text_path_for, NormalizeOutcome, NormalizeReport, OcrNormalizer};
pub use ocr::{OcrEngine, TesseractEngine};
