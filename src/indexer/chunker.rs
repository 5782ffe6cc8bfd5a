//! Sentence-boundary chunking of long text.
//!
//! Long documents are split into overlapping chunks so matches deep in
//! the text still score well. Packing is greedy: sentences accumulate
//! until the byte budget is hit, each new chunk seeded with the tail of
//! the previous one (snapped to whole words). A sentence longer than
//! the budget becomes its own chunk, never split mid-sentence.

/// Split text into sentences at `.`/`!`/`?` followed by whitespace.
///
/// The terminator stays with its sentence. Text without terminators is
/// a single sentence.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut iter = text.char_indices().peekable();
    while let Some((_, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((next_i, next_c)) = iter.peek().copied() {
                if next_c.is_whitespace() {
                    let sentence = text[start..next_i].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = next_i;
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Greedy sentence packing with word-snapped overlap seeding.
pub(crate) fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String, chunks: &mut Vec<String>| {
        if !current.is_empty() {
            chunks.push(std::mem::take(current));
        }
    };

    for sentence in sentences {
        // Oversized sentences stand alone.
        if sentence.len() > chunk_size {
            flush(&mut current, &mut chunks);
            chunks.push(sentence.to_string());
            continue;
        }

        if current.is_empty() {
            current = seed_from_previous(chunks.last(), chunk_overlap);
        }
        let needed = if current.is_empty() {
            sentence.len()
        } else {
            current.len() + 1 + sentence.len()
        };
        if needed > chunk_size && !current.is_empty() {
            flush(&mut current, &mut chunks);
            current = seed_from_previous(chunks.last(), chunk_overlap);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    flush(&mut current, &mut chunks);
    chunks
}

/// The last `overlap` bytes of the previous chunk, snapped forward to a
/// word boundary.
fn seed_from_previous(previous: Option<&String>, overlap: usize) -> String {
    let Some(prev) = previous else {
        return String::new();
    };
    if overlap == 0 || prev.len() <= overlap {
        return String::new();
    }
    let mut cut = prev.len() - overlap;
    while cut < prev.len() && !prev.is_char_boundary(cut) {
        cut += 1;
    }
    // Snap forward past the partial word.
    let tail = &prev[cut..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start().to_string(),
        None => tail.to_string(),
    }
}
