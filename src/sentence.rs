//! Sentence splitting and sentence-based chunking.
//!
//! ## The Hard Part: Finding Sentences
//!
//! Sentence detection seems simple until you encounter:
//!
//! ```text
//! "Dr. Smith went to Washington D.C. on Jan. 15th."
//!     ^                          ^       ^
//!     Not a sentence end (abbreviation / initial)
//! ```
//!
//! The splitter here is rule-based: `.`, `!`, `?` and blank lines end a
//! sentence, except when the period belongs to a known abbreviation, an
//! initial, a decimal number, or an unspaced token like a URL.
//!
//! ## Tiling Spans
//!
//! Every sentence keeps its trailing whitespace, so the spans tile the
//! source: concatenating sentence texts in order reproduces the input
//! byte-for-byte. Chunkers built on top of the splitter inherit lossless
//! coverage for free.

use std::sync::Arc;

use crate::{Chunk, Chunker, Result, Tokenizer};

/// A sentence span produced by [`SentenceSplitter`].
///
/// Used internally by the sentence, semantic, and late chunkers; never part
/// of a chunker's public output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// The sentence text, including trailing whitespace.
    pub text: String,
    /// Byte offset where this sentence starts.
    pub start_index: usize,
    /// Byte offset where this sentence ends (exclusive).
    pub end_index: usize,
    /// Token count over `text`.
    pub token_count: usize,
}

/// Rule-based sentence splitter with a configurable abbreviation list.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    abbreviations: Vec<String>,
}

/// Abbreviations that do not terminate a sentence, lowercase, dot included.
const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "no.", "etc.", "e.g.", "i.e.",
    "vs.", "cf.", "inc.", "ltd.", "co.", "jan.", "feb.", "mar.", "apr.", "jun.", "jul.", "aug.",
    "sep.", "sept.", "oct.", "nov.", "dec.",
];

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self {
            abbreviations: DEFAULT_ABBREVIATIONS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl SentenceSplitter {
    /// Create a splitter with the default abbreviation list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the abbreviation list. Entries are matched case-insensitively
    /// and must include the trailing dot (e.g. `"approx."`).
    #[must_use]
    pub fn with_abbreviations<I, S>(mut self, abbreviations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abbreviations = abbreviations
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        self
    }

    /// Split `text` into tiling sentence spans.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut spans = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;

        while i < chars.len() {
            let (_, c) = chars[i];

            if c == '.' || c == '!' || c == '?' {
                // Consume the whole terminator run ("?!", "...", ...)
                let mut j = i;
                while j + 1 < chars.len() && matches!(chars[j + 1].1, '.' | '!' | '?') {
                    j += 1;
                }

                if self.terminates(text, &chars, i, j) {
                    // Trailing whitespace belongs to the preceding sentence
                    let mut k = j;
                    while k + 1 < chars.len() && chars[k + 1].1.is_whitespace() {
                        k += 1;
                    }
                    let end = char_end(&chars, k);
                    spans.push((start, end));
                    start = end;
                    i = k + 1;
                } else {
                    i = j + 1;
                }
                continue;
            }

            if c.is_whitespace() {
                // A whitespace run containing two or more line breaks ends
                // the sentence even without punctuation.
                let run_start = i;
                let mut newlines = 0usize;
                let mut j = i;
                while j < chars.len() && chars[j].1.is_whitespace() {
                    if chars[j].1 == '\n' {
                        newlines += 1;
                    }
                    j += 1;
                }
                let run_first_byte = chars[run_start].0;
                if newlines >= 2 && !text[start..run_first_byte].trim().is_empty() {
                    let end = char_end(&chars, j - 1);
                    spans.push((start, end));
                    start = end;
                }
                i = j;
                continue;
            }

            i += 1;
        }

        if start < text.len() {
            spans.push((start, text.len()));
        }

        spans
    }

    /// Split `text` into [`Sentence`] values with token counts.
    #[must_use]
    pub fn sentences(&self, text: &str, tokenizer: &dyn Tokenizer) -> Vec<Sentence> {
        let spans = self.split(text);
        let texts: Vec<&str> = spans.iter().map(|&(s, e)| &text[s..e]).collect();
        let counts = tokenizer.count_tokens_batch(&texts);

        spans
            .iter()
            .zip(counts)
            .map(|(&(start, end), token_count)| Sentence {
                text: text[start..end].to_string(),
                start_index: start,
                end_index: end,
                token_count,
            })
            .collect()
    }

    /// Decide whether the terminator run `chars[i..=j]` ends a sentence.
    fn terminates(&self, text: &str, chars: &[(usize, char)], i: usize, j: usize) -> bool {
        // The run must be followed by whitespace or end-of-text. This keeps
        // URLs, "3.14", and quoted punctuation from splitting mid-token.
        if j + 1 < chars.len() && !chars[j + 1].1.is_whitespace() {
            return false;
        }

        let dots = chars[i..=j].iter().filter(|(_, c)| *c == '.').count();
        let run_len = j - i + 1;

        // Suspension points ("...") continue the sentence when the next
        // word starts lowercase.
        if dots == run_len && dots >= 3 {
            let next = chars[j + 1..]
                .iter()
                .map(|(_, c)| *c)
                .find(|c| !c.is_whitespace());
            return match next {
                Some(c) => !c.is_lowercase(),
                None => true,
            };
        }

        // Plain '!'/'?' always end. A single '.' needs the abbreviation and
        // initial checks.
        if dots == 0 || run_len > 1 {
            return true;
        }

        let token = token_before(text, chars[i].0);
        if token.is_empty() {
            return true;
        }

        let with_dot = format!("{}.", token.to_lowercase());
        if self.abbreviations.contains(&with_dot) {
            return false;
        }

        // Initials: "D.C.", "J. Smith". The segment after the last interior
        // dot is a single uppercase letter.
        let last_segment = token.rsplit('.').next().unwrap_or(token.as_str());
        let mut seg_chars = last_segment.chars();
        if let (Some(c), None) = (seg_chars.next(), seg_chars.next()) {
            if c.is_uppercase() {
                return false;
            }
        }

        true
    }
}

/// Walk back from `byte_pos` over word characters and interior dots,
/// returning the token that precedes the period at `byte_pos`.
fn token_before(text: &str, byte_pos: usize) -> String {
    text[..byte_pos]
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric() || *c == '.')
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect()
}

fn char_end(chars: &[(usize, char)], idx: usize) -> usize {
    let (pos, c) = chars[idx];
    pos + c.len_utf8()
}

/// Sentence-based chunker: packs whole sentences up to a token budget.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use quarry::{CharacterTokenizer, Chunker, SentenceChunker};
///
/// let chunker = SentenceChunker::new(Arc::new(CharacterTokenizer), 12).unwrap();
/// let text = "One. Two. Three. Four.";
/// let chunks = chunker.chunk(text).unwrap();
///
/// // Two sentences fit in 12 characters; chunks stay contiguous
/// assert_eq!(chunks[0].text, "One. Two. ");
/// assert_eq!(chunks[0].start_index, 0);
/// ```
///
/// A single sentence longer than the budget is emitted whole as its own
/// oversized chunk and reported through a `tracing` warning; nothing is
/// ever truncated.
#[derive(Clone)]
pub struct SentenceChunker {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    min_sentences: usize,
    approximate: bool,
    splitter: SentenceSplitter,
}

impl SentenceChunker {
    /// Create a sentence chunker with a token budget per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChunkSize`](crate::Error::ChunkSize) if
    /// `chunk_size == 0`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(crate::Error::ChunkSize(chunk_size));
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            min_sentences: 1,
            approximate: true,
            splitter: SentenceSplitter::default(),
        })
    }

    /// Require at least `min` sentences per chunk (except possibly the
    /// last). Takes precedence over the token budget; a forced overflow is
    /// reported as a warning.
    #[must_use]
    pub fn with_min_sentences(mut self, min: usize) -> Self {
        self.min_sentences = min.max(1);
        self
    }

    /// Pack by summed per-sentence counts (`true`, the default) or re-count
    /// the joined text on every candidate addition (`false`). Exact packing
    /// matters for tokenizers where counts aren't additive across
    /// concatenation; emitted chunks always carry an exact count either way.
    #[must_use]
    pub fn approximate(mut self, approximate: bool) -> Self {
        self.approximate = approximate;
        self
    }

    /// Use a custom sentence splitter.
    #[must_use]
    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Pack tiling sentences into contiguous chunks. Shared with the
    /// semantic and late chunkers, which pack per sentence group.
    pub(crate) fn pack(&self, text: &str, sentences: &[Sentence]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut group_start = 0usize;

        while group_start < sentences.len() {
            let mut end = group_start + 1;
            let mut running = sentences[group_start].token_count;

            while end < sentences.len() {
                let fits = if end - group_start < self.min_sentences {
                    true
                } else if self.approximate {
                    running + sentences[end].token_count <= self.chunk_size
                } else {
                    let candidate =
                        &text[sentences[group_start].start_index..sentences[end].end_index];
                    self.tokenizer.count_tokens(candidate) <= self.chunk_size
                };
                if !fits {
                    break;
                }
                running += sentences[end].token_count;
                end += 1;
            }

            let start_byte = sentences[group_start].start_index;
            let end_byte = sentences[end - 1].end_index;
            let chunk_text = &text[start_byte..end_byte];
            let token_count = self.tokenizer.count_tokens(chunk_text);

            if token_count > self.chunk_size {
                tracing::warn!(
                    token_count,
                    chunk_size = self.chunk_size,
                    sentences = end - group_start,
                    "chunk exceeds token budget; emitting whole rather than truncating"
                );
            }

            chunks.push(Chunk::new(chunk_text, start_byte, end_byte, token_count));
            group_start = end;
        }

        chunks
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }
        if text.trim().is_empty() {
            tracing::warn!(len = text.len(), "input is whitespace-only");
        }

        let sentences = self.splitter.sentences(text, self.tokenizer.as_ref());
        Ok(self.pack(text, &sentences))
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        // Rough estimate: ~4 bytes per token
        (text_len / (self.chunk_size.saturating_mul(4)).max(1)).max(1)
    }
}

impl std::fmt::Debug for SentenceChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceChunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("chunk_size", &self.chunk_size)
            .field("min_sentences", &self.min_sentences)
            .finish()
    }
}
