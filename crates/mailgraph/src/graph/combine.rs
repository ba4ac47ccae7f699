//! Text chunking for graph extraction.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub id: String,
    pub text: String,
}

/// Several consecutive chunks sent in one transformer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedChunk {
    pub text: String,
    pub chunk_ids: Vec<String>,
}

/// Splits `text` into chunks of at most `max_chars` characters, preferring to
/// break after whitespace in the last fifth of a chunk. Ids are
/// `<source>-<position>`, starting at 1.
pub fn split_text(source: &str, text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            let floor = end - max_chars / 5;
            if let Some(pos) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = pos + 1;
            }
        }

        chunks.push(TextChunk {
            id: format!("{}-{}", source, chunks.len() + 1),
            text: chars[start..end].iter().collect(),
        });
        start = end;
    }

    chunks
}

/// Joins every `per_request` consecutive chunks. The final group may be
/// shorter.
pub fn combine_chunks(chunks: &[TextChunk], per_request: usize) -> Vec<CombinedChunk> {
    chunks
        .chunks(per_request.max(1))
        .map(|group| CombinedChunk {
            text: group.iter().map(|c| c.text.as_str()).collect(),
            chunk_ids: group.iter().map(|c| c.id.clone()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_preserves_text() {
        let text = "Bonjour, je souhaite un devis pour un demenagement de Zurich a Meyrin.";
        let chunks = split_text("mail", text, 16);

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 16));
        assert_eq!(chunks[0].id, "mail-1");
    }

    #[test]
    fn test_split_prefers_whitespace_breaks() {
        let chunks = split_text("m", "aaaaaaaa bbbbbbbbbb", 10);
        assert_eq!(chunks[0].text, "aaaaaaaa ");
        assert_eq!(chunks[1].text, "bbbbbbbbbb");
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        let chunks = split_text("m", "éééééé", 3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "ééé");
    }

    #[test]
    fn test_split_empty_text() {
        assert!(split_text("m", "", 10).is_empty());
    }

    #[test]
    fn test_combine_groups_ids_and_text() {
        let chunks = split_text("m", "aaaabbbbcccc", 4);
        let combined = combine_chunks(&chunks, 2);

        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].text, "aaaabbbb");
        assert_eq!(combined[0].chunk_ids, vec!["m-1", "m-2"]);
        assert_eq!(combined[1].chunk_ids, vec!["m-3"]);
    }

    #[test]
    fn test_combine_zero_is_treated_as_one() {
        let chunks = split_text("m", "aabb", 2);
        assert_eq!(combine_chunks(&chunks, 0).len(), 2);
    }
}
