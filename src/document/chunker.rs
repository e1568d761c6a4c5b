//! Paragraph-aware text chunking with a hard size bound.

/// Split text into chunks of at most `chunk_size` characters (`char` count).
///
/// Paragraphs (blank-line separated) are packed greedily; a paragraph that
/// is too large on its own is cut at sentence boundaries where possible.
pub fn split_into_chunks(content: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let char_count = content.chars().count();

    if char_count <= chunk_size {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_len = 0;

    for para in content.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_len = para.chars().count();

        // Flush when this paragraph would not fit
        if current_len > 0 && current_len + para_len + 2 > chunk_size {
            chunks.push(std::mem::take(&mut current_chunk));
            current_len = 0;
        }

        if para_len > chunk_size {
            chunks.extend(split_large_paragraph(para, chunk_size));
        } else {
            if current_len > 0 {
                current_chunk.push_str("\n\n");
                current_len += 2;
            }
            current_chunk.push_str(para);
            current_len += para_len;
        }
    }

    if !current_chunk.is_empty() {
        chunks.push(current_chunk);
    }

    chunks
}

/// Split one oversized paragraph, preferring to cut just after a sentence end
/// in the second half of the window.
fn split_large_paragraph(para: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chars: Vec<char> = para.chars().collect();

    while chars.len() > chunk_size {
        let min_search = chunk_size / 2;
        let cut_point = (min_search..chunk_size)
            .rev()
            .find(|&i| matches!(chars[i], '.' | '!' | '?' | '\n' | '。'))
            .map_or(chunk_size, |i| i + 1);

        let piece: String = chars[..cut_point].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        let remaining: String = chars[cut_point..].iter().collect();
        chars = remaining.trim().chars().collect();
    }

    if !chars.is_empty() {
        chunks.push(chars.into_iter().collect());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(chunks: &[String], size: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(!chunk.is_empty(), "chunk {i} is empty");
            let len = chunk.chars().count();
            assert!(len <= size, "chunk {i} has {len} chars, limit {size}");
        }
    }

    #[test]
    fn test_split_short_text() {
        let content = "Paragraph 1\n\nParagraph 2\n\nParagraph 3";
        let chunks = split_into_chunks(content, 500);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Paragraph 3"));
    }

    #[test]
    fn test_split_long_text_respects_limit() {
        let para = "Test paragraph. ".repeat(20);
        let content = vec![para; 10].join("\n\n");
        let chunks = split_into_chunks(&content, 500);

        assert!(chunks.len() >= 2);
        assert_bounded(&chunks, 500);
    }

    #[test]
    fn test_split_empty_text() {
        assert!(split_into_chunks("", 500).is_empty());
        assert!(split_into_chunks("   \n\n   \n\n   ", 500).is_empty());
    }

    #[test]
    fn test_sentence_boundary_at_window_edge() {
        // A '.' exactly at index chunk_size must not produce an oversized chunk.
        let text = format!("{}.{}", "a".repeat(10), "b".repeat(30));
        let chunks = split_large_paragraph(&text, 10);
        assert_bounded(&chunks, 10);
        assert_eq!(chunks.concat().replace('.', ""), text.replace('.', ""));
    }

    #[test]
    fn test_split_large_paragraph_prefers_sentences() {
        let long_para = "This is a long sentence. ".repeat(100);
        let chunks = split_large_paragraph(&long_para, 500);

        assert!(chunks.len() >= 2);
        assert_bounded(&chunks, 500);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_split_korean_without_spaces() {
        let long_para = "비즈니스모델캔버스분석".repeat(100);
        let chunks = split_into_chunks(&long_para, 300);
        assert_bounded(&chunks, 300);
        assert_eq!(chunks.concat(), long_para);
    }

    #[test]
    fn test_tiny_chunk_size() {
        let chunks = split_into_chunks("abc def", 1);
        assert_bounded(&chunks, 1);
        assert_eq!(chunks.concat(), "abcdef");
        assert_eq!(split_into_chunks("xy", 0), vec!["x", "y"]);
    }
}
