use std::fmt;

use serde::Serialize;

/// Phase the polling driver is in. A cycle walks the phases in declaration
/// order and always ends back in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Retrieving,
    OcrNormalizing,
    Uploading,
    Extracting,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Idle => "idle",
            DriverState::Retrieving => "retrieving",
            DriverState::OcrNormalizing => "ocr-normalizing",
            DriverState::Uploading => "uploading",
            DriverState::Extracting => "extracting",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tally of one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// The mailbox was not authorized yet, so retrieval was skipped.
    pub mailbox_skipped: bool,
    pub messages_retrieved: usize,
    pub documents_converted: usize,
    pub files_uploaded: usize,
    pub uploads_failed: usize,
    pub extractions_succeeded: usize,
    pub extractions_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(DriverState::OcrNormalizing.to_string(), "ocr-normalizing");
        assert_eq!(
            serde_json::to_string(&DriverState::OcrNormalizing).unwrap(),
            "\"ocr_normalizing\""
        );
    }
}
