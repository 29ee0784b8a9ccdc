use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("invalid sentence regex"));

/// Fragments this short (in characters) carry no usable content.
const MIN_CHUNK_CHARS: usize = 10;

/// A sentence-level fragment of one documentation file.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    /// Always has `filename` and `chunk_id`; `page` for paged formats.
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, filename: &str, chunk_id: usize) -> Self {
        let metadata = HashMap::from([
            ("filename".to_string(), filename.to_string()),
            ("chunk_id".to_string(), chunk_id.to_string()),
        ]);
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn filename(&self) -> &str {
        self.metadata.get("filename").map_or("", String::as_str)
    }

    pub fn chunk_id(&self) -> &str {
        self.metadata.get("chunk_id").map_or("", String::as_str)
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.metadata.insert("page".to_string(), page.to_string());
        self
    }

    pub fn page(&self) -> Option<&str> {
        self.metadata.get("page").map(String::as_str)
    }
}

/// Splits on runs of `.`, `!`, `?`. `chunk_id` is the fragment's position in
/// the split, so ids skip over dropped fragments.
pub fn split_into_chunks(text: &str, filename: &str) -> Vec<DocumentChunk> {
    SENTENCE_END
        .split(text)
        .enumerate()
        .filter_map(|(i, fragment)| {
            let sentence = fragment.trim();
            (sentence.chars().count() > MIN_CHUNK_CHARS)
                .then(|| DocumentChunk::new(sentence, filename, i))
        })
        .collect()
}
