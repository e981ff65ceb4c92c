use crate::models::{Chunk, DocumentKey};

/// Greedily packs whitespace-separated words into chunks of at most `max_chars`
/// characters. Words are never split, so a single word longer than `max_chars`
/// becomes its own oversized chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let extra = if current.is_empty() {
            word_len
        } else {
            word_len + 1
        };

        if current_len + extra > max_chars && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current.push(word);
            current_len = word_len;
        } else {
            current.push(word);
            current_len += extra;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

pub fn build_chunks(document: &DocumentKey, text: &str, max_chars: usize) -> Vec<Chunk> {
    chunk_text(text, max_chars)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            document_id: document.paper_id.clone(),
            user_id: document.user_id.clone(),
            sequence_index: index as u64,
            char_length: text.chars().count(),
            text,
        })
        .collect()
}
