//! Sentence/segment splitting for documents before embedding.
//!
//! Documents are cut at sentence ends and line breaks, and neighboring
//! sentences are packed greedily into chunks of at most `max_chars`
//! characters. Chunks tile the text without gaps, so every token offset
//! the embedding service reports lands inside exactly one chunk.

/// Approximate characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Document length, in tokens, the embedding model is comfortable with.
const DEFAULT_DOCUMENT_TOKENS: usize = 512;

/// Default chunk size in characters (roughly 512 tokens).
pub const DEFAULT_CHUNK_SIZE: usize = DEFAULT_DOCUMENT_TOKENS * CHARS_PER_TOKEN;

use crate::records::Span;

/// Split `text` into chunk spans of at most `max_chars` characters.
///
/// Whitespace-only chunks are dropped. Byte offsets always fall on UTF-8
/// character boundaries.
///
/// # Examples
///
/// ```
/// use colsearch::chunking::split_segments;
///
/// let spans = split_segments("One. Two. Three.", 10);
/// assert_eq!(spans.len(), 2);
/// assert_eq!(spans[0].start, 0);
/// assert_eq!(spans[1].end, 16);
/// ```
pub fn split_segments(text: &str, max_chars: usize) -> Vec<Span> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current: Option<(usize, usize, usize)> = None; // (start, end, chars)

    for sentence in sentences(text) {
        let chars = text[sentence.start..sentence.end].chars().count();

        if let Some((start, end, count)) = current {
            if count + chars <= max_chars {
                current = Some((start, sentence.end, count + chars));
                continue;
            }
            chunks.push(Span::new(start, end));
            current = None;
        }

        if chars <= max_chars {
            current = Some((sentence.start, sentence.end, chars));
        } else {
            chunks.extend(split_long(text, sentence, max_chars));
        }
    }
    if let Some((start, end, _)) = current {
        chunks.push(Span::new(start, end));
    }

    chunks.retain(|span| !text[span.start..span.end].trim().is_empty());
    chunks
}

/// Contiguous sentence spans covering the whole text. A sentence ends
/// after a line break, or after `.`, `!` or `?` followed by whitespace.
fn sentences(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let end = idx + c.len_utf8();
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars
                .peek()
                .is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            // Keep trailing spaces with the sentence they follow.
            let mut stop = end;
            while let Some(&(ws_idx, ws)) = chars.peek() {
                if ws == '\n' || !ws.is_whitespace() {
                    break;
                }
                stop = ws_idx + ws.len_utf8();
                chars.next();
            }
            spans.push(Span::new(start, stop));
            start = stop;
        }
    }
    if start < text.len() {
        spans.push(Span::new(start, text.len()));
    }
    spans
}

/// Cut an over-long sentence into windows of at most `max_chars`
/// characters, preferring to break after whitespace.
fn split_long(text: &str, span: Span, max_chars: usize) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut start = span.start;

    while start < span.end {
        let window = &text[start..span.end];
        let Some((limit, _)) = window.char_indices().nth(max_chars) else {
            pieces.push(Span::new(start, span.end));
            break;
        };
        let cut = window[..limit]
            .rfind(char::is_whitespace)
            .map(|ws| {
                let ws_len = window[ws..].chars().next().map_or(1, char::len_utf8);
                ws + ws_len
            })
            .filter(|&cut| cut > 0)
            .unwrap_or(limit);
        pieces.push(Span::new(start, start + cut));
        start += cut;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(text: &'a str, spans: &[Span]) -> Vec<&'a str> {
        spans.iter().map(|s| &text[s.start..s.end]).collect()
    }

    #[test]
    fn short_text_single_chunk() {
        let spans = split_segments("Hello, world!", DEFAULT_CHUNK_SIZE);
        assert_eq!(spans, vec![Span::new(0, 13)]);
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert!(split_segments("", 100).is_empty());
        assert!(split_segments("   \n\n  ", 100).is_empty());
    }

    #[test]
    fn packs_sentences_greedily() {
        let text = "The cat sat. On the mat. It purred.";
        let spans = split_segments(text, 25);
        assert_eq!(texts(text, &spans), vec!["The cat sat. On the mat. ", "It purred."]);
    }

    #[test]
    fn line_breaks_end_sentences() {
        let text = "first line\nsecond line\nthird";
        let spans = split_segments(text, 12);
        assert_eq!(
            texts(text, &spans),
            vec!["first line\n", "second line\n", "third"]
        );
    }

    #[test]
    fn decimals_do_not_split() {
        let text = "Pi is 3.14 roughly.";
        let spans = sentences(text);
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn long_sentence_breaks_at_whitespace() {
        let text = "word ".repeat(50);
        let spans = split_segments(&text, 22);
        for span in &spans {
            assert!(text[span.start..span.end].chars().count() <= 22);
        }
        assert_eq!(&text[spans[0].start..spans[0].end], "word word word word ");
    }

    #[test]
    fn chunks_tile_text_without_gaps() {
        let text = "Alpha beta. Gamma delta!\nEpsilon zeta? Eta theta iota kappa lambda mu.";
        let spans = split_segments(text, 16);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn handles_multibyte_characters() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(30);
        let spans = split_segments(&text, 17);
        assert!(!spans.is_empty());
        for span in &spans {
            assert!(text.is_char_boundary(span.start));
            assert!(text.is_char_boundary(span.end));
            assert!(text[span.start..span.end].chars().count() <= 17);
        }
    }
}
