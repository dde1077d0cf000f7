//! The tokenizer contract: token counts as the currency of size budgets.
//!
//! Chunkers never inspect token IDs themselves. They ask a tokenizer how
//! many tokens a piece of text costs and pack text against that budget.
//! Two optional capabilities extend the contract:
//!
//! - `encode`/`decode`: required by the token chunker, which slides a
//!   window over token IDs and decodes each window back to text.
//! - `token_spans`: byte range per token, required by the late chunker to
//!   align token embeddings with chunk boundaries.
//!
//! A tokenizer that only counts is still a valid tokenizer; chunkers that
//! need more declare so and fail fast with a typed error.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

/// Counts tokens and, optionally, encodes/decodes token IDs.
///
/// Token counts are the sole currency of chunk size budgets. All chunkers
/// treat the tokenizer as opaque and share it by reference across a run,
/// so implementations must be safe for concurrent reads.
pub trait Tokenizer: Send + Sync {
    /// A short name used in diagnostics and error messages.
    fn name(&self) -> &str;

    /// Count the tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;

    /// Count tokens for each text in a batch.
    fn count_tokens_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.count_tokens(t)).collect()
    }

    /// Encode `text` into token IDs, if this tokenizer supports it.
    fn encode(&self, text: &str) -> Option<Vec<u32>> {
        let _ = text;
        None
    }

    /// Decode token IDs back into text, if this tokenizer supports it.
    fn decode(&self, ids: &[u32]) -> Option<String> {
        let _ = ids;
        None
    }

    /// Byte range of each token in `text`, if this tokenizer can report it.
    ///
    /// Spans are returned in order. A tokenizer whose spans tile the text
    /// (no gaps, no overlap) supports exact offset recovery in the token
    /// chunker and alignment in the late chunker.
    fn token_spans(&self, text: &str) -> Option<Vec<(usize, usize)>> {
        let _ = text;
        None
    }
}

/// One token per Unicode scalar value.
///
/// The simplest possible tokenizer: `count_tokens(text) == text.chars().count()`.
/// Fully capable — it encodes, decodes, and reports spans losslessly — so
/// every chunker in the crate works with it. Useful for tests and for
/// byte-budget use cases where model tokenization doesn't matter.
///
/// ```rust
/// use quarry::{CharacterTokenizer, Tokenizer};
///
/// let tok = CharacterTokenizer;
/// assert_eq!(tok.count_tokens("héllo"), 5);
/// let ids = tok.encode("héllo").unwrap();
/// assert_eq!(tok.decode(&ids).unwrap(), "héllo");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn name(&self) -> &str {
        "character"
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn encode(&self, text: &str) -> Option<Vec<u32>> {
        Some(text.chars().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Option<String> {
        ids.iter().map(|&id| char::from_u32(id)).collect()
    }

    fn token_spans(&self, text: &str) -> Option<Vec<(usize, usize)>> {
        Some(
            text.char_indices()
                .map(|(start, c)| (start, start + c.len_utf8()))
                .collect(),
        )
    }
}

/// One token per word, using Unicode word boundaries (UAX #29).
///
/// Counting-only: words don't round-trip (inter-word whitespace is lost),
/// so `encode`/`decode`/`token_spans` stay unavailable and the token and
/// late chunkers reject this tokenizer with a typed error.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "word"
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.unicode_words().count()
    }
}

/// Adapter over an external encoder (BPE, WordPiece, ...).
///
/// Wraps caller-supplied closures so any third-party tokenizer can plug in
/// without this crate depending on it:
///
/// ```rust
/// use quarry::{FnTokenizer, Tokenizer};
///
/// // A toy external tokenizer: one token per byte.
/// let tok = FnTokenizer::new("byte", |text: &str| text.len())
///     .with_encode(|text| text.bytes().map(u32::from).collect())
///     .with_decode(|ids| {
///         let bytes: Vec<u8> = ids.iter().map(|&id| id as u8).collect();
///         String::from_utf8(bytes).unwrap_or_default()
///     });
///
/// assert_eq!(tok.count_tokens("abc"), 3);
/// assert!(tok.encode("abc").is_some());
/// ```
#[derive(Clone)]
pub struct FnTokenizer {
    name: String,
    count: Arc<dyn Fn(&str) -> usize + Send + Sync>,
    encode: Option<Arc<dyn Fn(&str) -> Vec<u32> + Send + Sync>>,
    decode: Option<Arc<dyn Fn(&[u32]) -> String + Send + Sync>>,
    spans: Option<Arc<dyn Fn(&str) -> Vec<(usize, usize)> + Send + Sync>>,
}

impl FnTokenizer {
    /// Create a counting-only adapter.
    pub fn new(name: impl Into<String>, count: impl Fn(&str) -> usize + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            count: Arc::new(count),
            encode: None,
            decode: None,
            spans: None,
        }
    }

    /// Attach an encode capability.
    #[must_use]
    pub fn with_encode(mut self, encode: impl Fn(&str) -> Vec<u32> + Send + Sync + 'static) -> Self {
        self.encode = Some(Arc::new(encode));
        self
    }

    /// Attach a decode capability.
    #[must_use]
    pub fn with_decode(mut self, decode: impl Fn(&[u32]) -> String + Send + Sync + 'static) -> Self {
        self.decode = Some(Arc::new(decode));
        self
    }

    /// Attach a token-span capability.
    #[must_use]
    pub fn with_token_spans(
        mut self,
        spans: impl Fn(&str) -> Vec<(usize, usize)> + Send + Sync + 'static,
    ) -> Self {
        self.spans = Some(Arc::new(spans));
        self
    }
}

impl Tokenizer for FnTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, text: &str) -> usize {
        (self.count)(text)
    }

    fn encode(&self, text: &str) -> Option<Vec<u32>> {
        self.encode.as_ref().map(|f| f(text))
    }

    fn decode(&self, ids: &[u32]) -> Option<String> {
        self.decode.as_ref().map(|f| f(ids))
    }

    fn token_spans(&self, text: &str) -> Option<Vec<(usize, usize)>> {
        self.spans.as_ref().map(|f| f(text))
    }
}

impl std::fmt::Debug for FnTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTokenizer")
            .field("name", &self.name)
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_counts_scalars() {
        let tok = CharacterTokenizer;
        assert_eq!(tok.count_tokens(""), 0);
        assert_eq!(tok.count_tokens("abc"), 3);
        assert_eq!(tok.count_tokens("日本語"), 3);
    }

    #[test]
    fn test_character_round_trip() {
        let tok = CharacterTokenizer;
        let text = "Hello 世界!";
        let ids = tok.encode(text).unwrap();
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }

    #[test]
    fn test_character_spans_tile() {
        let tok = CharacterTokenizer;
        let text = "a日b";
        let spans = tok.token_spans(text).unwrap();
        assert_eq!(spans, vec![(0, 1), (1, 4), (4, 5)]);
        // Spans tile the text with no gaps
        let mut cursor = 0;
        for (start, end) in spans {
            assert_eq!(start, cursor);
            cursor = end;
        }
        assert_eq!(cursor, text.len());
    }

    #[test]
    fn test_word_counts() {
        let tok = WordTokenizer;
        assert_eq!(tok.count_tokens("Hello World!"), 2);
        assert_eq!(tok.count_tokens("  spaced   out  "), 2);
        assert_eq!(tok.count_tokens(""), 0);
    }

    #[test]
    fn test_word_is_counting_only() {
        let tok = WordTokenizer;
        assert!(tok.encode("hello").is_none());
        assert!(tok.token_spans("hello").is_none());
    }

    #[test]
    fn test_batch_matches_scalar() {
        let tok = CharacterTokenizer;
        let texts = ["one", "two words", ""];
        let counts = tok.count_tokens_batch(&texts);
        assert_eq!(counts, vec![3, 9, 0]);
    }
}
