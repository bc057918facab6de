//! Reassembles streamed LLM text into speakable sentences.
//!
//! A `.` preceded by a digit does not end a sentence, so decimal numbers
//! like "3.14" are preserved whole instead of being split at the point.

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Accumulates streamed text and emits complete sentences as soon as they
/// can be identified. State is local to one reply turn; discard and
/// recreate per turn.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buffer: String,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text from a non-code reply chunk, returning any sentences
    /// that became complete as a result.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = Vec::new();

        loop {
            match self.find_terminator() {
                Some(end) => {
                    let sentence = self.buffer[..end].trim().to_string();
                    self.buffer.drain(..end);
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                }
                None => break,
            }
        }

        sentences
    }

    /// Flush any trailing partial sentence at the end of a reply.
    pub fn finish(&mut self) -> Option<String> {
        let remainder = self.buffer.trim().to_string();
        self.buffer.clear();
        if remainder.is_empty() { None } else { Some(remainder) }
    }

    /// Finds the byte offset just past the first valid sentence terminator
    /// in the buffer, skipping `.` characters that follow a digit.
    fn find_terminator(&self) -> Option<usize> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        for (i, &(byte_idx, ch)) in chars.iter().enumerate() {
            if !TERMINATORS.contains(&ch) {
                continue;
            }
            if ch == '.' {
                let preceding_digit = chars[..i].iter().rev().map(|&(_, c)| c).find(|c| !c.is_whitespace()).map(|c| c.is_ascii_digit()).unwrap_or(false);
                if preceding_digit {
                    continue;
                }
            }
            let next_byte = chars.get(i + 1).map(|&(b, _)| b).unwrap_or(self.buffer.len());
            return Some(next_byte.max(byte_idx + ch.len_utf8()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_sentence_on_terminator() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("Hello there").is_empty());
        let sentences = chunker.push(". How are you?");
        assert_eq!(sentences, vec!["Hello there."]);
    }

    #[test]
    fn preserves_decimal_numbers() {
        let mut chunker = SentenceChunker::new();
        chunker.push("The ratio is ");
        chunker.push("3");
        chunker.push(".");
        let mid = chunker.push("14");
        assert!(mid.is_empty(), "decimal point must not terminate a sentence");
        let sentences = chunker.push(" exactly.");
        assert_eq!(sentences, vec!["The ratio is 3.14 exactly."]);
    }

    #[test]
    fn flushes_remainder_on_finish() {
        let mut chunker = SentenceChunker::new();
        chunker.push("no terminator here");
        assert_eq!(chunker.finish(), Some("no terminator here".to_string()));
        assert_eq!(chunker.finish(), None);
    }

    #[test]
    fn multiple_sentences_in_one_push() {
        let mut chunker = SentenceChunker::new();
        let sentences = chunker.push("One. Two! Three?");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
    }
}
