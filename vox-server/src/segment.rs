//! Incremental sentence segmentation for streamed model output.
//!
//! Tokens arrive as arbitrary text fragments, not aligned to word or
//! sentence boundaries. The segmenter buffers fragments and emits each
//! complete sentence as soon as its boundary is visible, so synthesis can
//! start on the first sentence while the model is still generating the
//! rest.

/// Splits an incrementally arriving token stream into sentences.
///
/// A sentence ends at `.`, `!` or `?` immediately followed by whitespace,
/// or at a literal newline. Punctuation with no following whitespace yet
/// (decimals, abbreviations, a period at the very end of the received
/// text) stays buffered until the next fragment or [`finish`] decides it.
///
/// [`finish`]: SentenceSegmenter::finish
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence completed by it.
    ///
    /// Emitted sentences are trimmed; empty or whitespace-only candidates
    /// are dropped, never emitted.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut sentences = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer.drain(..end);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Flush the trailing fragment at stream end.
    ///
    /// Returns the remaining buffered text as a final sentence, or `None`
    /// if nothing but whitespace is left. Resets the segmenter for the
    /// next turn.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    /// Text accumulated since the last boundary.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Byte offset one past the first sentence boundary in `text`, if any.
///
/// Sentence punctuation at the very end of `text` is not a boundary here;
/// the next fragment may continue the token (`"3."` then `"5"`).
fn find_boundary(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\n' {
            return Some(i + 1);
        }
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(i + 1);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Run a whole string through push + finish and collect all sentences.
    fn segment_all(text: &str) -> Vec<String> {
        let mut seg = SentenceSegmenter::new();
        let mut out = seg.push(text);
        out.extend(seg.finish());
        out
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        assert_eq!(
            segment_all("That's $3.5, right? Yes."),
            vec!["That's $3.5, right?", "Yes."]
        );
    }

    #[test]
    fn test_boundary_needs_following_whitespace() {
        let mut seg = SentenceSegmenter::new();
        // Trailing period stays buffered until more text or finish.
        assert!(seg.push("Version 2.").is_empty());
        assert!(seg.push("1 shipped today.").is_empty());
        assert_eq!(seg.push(" More soon."), vec!["Version 2.1 shipped today."]);
        assert_eq!(seg.finish(), Some("More soon.".to_string()));
    }

    #[test]
    fn test_newline_is_always_a_boundary() {
        assert_eq!(
            segment_all("First line\nSecond line"),
            vec!["First line", "Second line"]
        );
    }

    #[test]
    fn test_multiple_sentences_in_one_fragment() {
        assert_eq!(
            segment_all("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
    }

    #[test]
    fn test_fragments_split_mid_sentence() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("Hel").is_empty());
        assert!(seg.push("lo the").is_empty());
        assert_eq!(seg.push("re. How"), vec!["Hello there."]);
        assert_eq!(seg.push(" are you? "), vec!["How are you?"]);
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_empty_sentences_never_emitted() {
        assert!(segment_all("").is_empty());
        assert!(segment_all("   ").is_empty());
        assert!(segment_all("\n\n\n").is_empty());

        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("\n  \n").is_empty());
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_question_and_exclamation_runs() {
        assert_eq!(segment_all("Really?! Yes"), vec!["Really?!", "Yes"]);
    }

    #[test]
    fn test_finish_resets_for_next_turn() {
        let mut seg = SentenceSegmenter::new();
        seg.push("partial thought");
        assert_eq!(seg.finish(), Some("partial thought".to_string()));
        assert_eq!(seg.pending(), "");
        assert_eq!(seg.push("Fresh turn. "), vec!["Fresh turn."]);
    }

    proptest! {
        /// Sentences never gain or lose non-whitespace content, in order.
        #[test]
        fn prop_content_preserved(input in "[ -~\\n]{0,200}") {
            let joined: String = segment_all(&input).concat();
            let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            prop_assert_eq!(squash(&joined), squash(&input));
        }

        /// Fragmentation does not change the emitted sentence sequence.
        #[test]
        fn prop_split_point_irrelevant(input in "[ -~\\n]{0,200}", split in 0usize..200) {
            let whole = segment_all(&input);

            let cut = input
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(input.len()))
                .nth(split.min(input.chars().count()))
                .unwrap_or(input.len());
            let mut seg = SentenceSegmenter::new();
            let mut split_run = seg.push(&input[..cut]);
            split_run.extend(seg.push(&input[cut..]));
            split_run.extend(seg.finish());

            prop_assert_eq!(whole, split_run);
        }
    }
}
