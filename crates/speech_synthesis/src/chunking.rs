//! Text chunking for engines with request size limits
//!
//! Long chapters are split at the most natural boundary that keeps every
//! chunk within the engine's limit: sentence terminators first, then clause
//! separators, then whitespace, and as a last resort a hard cut at a
//! character boundary.

use std::mem;

/// Unit a [`ChunkLimit`] is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    /// Unicode scalar values
    Chars,
    /// UTF-8 bytes
    Bytes,
}

/// Maximum size of a single engine request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimit {
    max: usize,
    unit: LengthUnit,
    max_sentence_chars: Option<usize>,
}

impl ChunkLimit {
    /// Limit measured in characters
    #[must_use]
    pub const fn chars(max: usize) -> Self {
        Self {
            max,
            unit: LengthUnit::Chars,
            max_sentence_chars: None,
        }
    }

    /// Limit measured in UTF-8 bytes
    #[must_use]
    pub const fn bytes(max: usize) -> Self {
        Self {
            max,
            unit: LengthUnit::Bytes,
            max_sentence_chars: None,
        }
    }

    /// Additionally cap every sentence at `max` characters
    #[must_use]
    pub const fn with_max_sentence_chars(mut self, max: usize) -> Self {
        self.max_sentence_chars = Some(max);
        self
    }

    /// Lower the limit to at most `chars` characters
    ///
    /// A byte limit is lowered to `chars` bytes, which is never looser.
    #[must_use]
    pub fn tightened(mut self, chars: usize) -> Self {
        self.max = self.max.min(chars);
        self
    }

    /// Maximum size
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Unit of [`Self::max`]
    #[must_use]
    pub const fn unit(&self) -> LengthUnit {
        self.unit
    }

    /// Size of `text` in this limit's unit
    #[must_use]
    pub fn measure(&self, text: &str) -> usize {
        match self.unit {
            LengthUnit::Chars => text.chars().count(),
            LengthUnit::Bytes => text.len(),
        }
    }

    /// Whether `text` fits in one request
    #[must_use]
    pub fn fits(&self, text: &str) -> bool {
        self.measure(text) <= self.max
    }

    fn fits_unit(&self, text: &str, reserve: usize) -> bool {
        self.measure(text) + reserve <= self.max
            && self
                .max_sentence_chars
                .is_none_or(|max| text.chars().count() + reserve <= max)
    }

    const fn char_len(&self, ch: char) -> usize {
        match self.unit {
            LengthUnit::Chars => 1,
            LengthUnit::Bytes => ch.len_utf8(),
        }
    }
}

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？', '\n'];
const CLAUSE_SEPARATORS: &[char] = &[',', ';', ':', '，', '；', '：'];

/// Splits text into engine-sized chunks
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    limit: ChunkLimit,
}

impl TextChunker {
    /// Create a chunker for `limit`
    #[must_use]
    pub const fn new(limit: ChunkLimit) -> Self {
        Self { limit }
    }

    /// Split `text` into ordered chunks that each fit the limit
    ///
    /// Text that already fits is returned as a single chunk. Whitespace-only
    /// text yields no chunks.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let sentences_fit = self.limit.max_sentence_chars.is_none()
            || sentences(text).all(|s| self.limit.fits_unit(s, 0));
        if self.limit.fits(text) && sentences_fit {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for unit in self.units(text) {
            if current.is_empty() {
                current = unit;
                continue;
            }

            if self.limit.measure(&current) + 1 + self.limit.measure(&unit) <= self.limit.max {
                current.push(' ');
                current.push_str(&unit);
            } else {
                chunks.push(mem::replace(&mut current, unit));
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Sentences, or sentence pieces when a sentence alone is too long
    fn units(&self, text: &str) -> Vec<String> {
        // Pieces of a broken sentence get a terminator when sentences are capped
        let reserve = usize::from(self.limit.max_sentence_chars.is_some());
        let mut units = Vec::new();

        for sentence in sentences(text) {
            if self.limit.fits_unit(sentence, 0) {
                units.push(sentence.to_string());
                continue;
            }

            let mut piece = String::new();
            for atom in self.atoms(sentence, reserve) {
                if piece.is_empty() {
                    piece = atom;
                    continue;
                }
                let candidate = format!("{piece} {atom}");
                if self.limit.fits_unit(&candidate, reserve) {
                    piece = candidate;
                } else {
                    units.push(self.close(mem::replace(&mut piece, atom)));
                }
            }
            if !piece.is_empty() {
                units.push(self.close(piece));
            }
        }

        units
    }

    /// Clauses, words or hard-cut fragments of an oversized sentence
    fn atoms(&self, sentence: &str, reserve: usize) -> Vec<String> {
        let mut atoms = Vec::new();
        for clause in split_after(sentence, CLAUSE_SEPARATORS) {
            if self.limit.fits_unit(clause, reserve) {
                atoms.push(clause.to_string());
                continue;
            }
            for word in clause.split_whitespace() {
                if self.limit.fits_unit(word, reserve) {
                    atoms.push(word.to_string());
                } else {
                    atoms.extend(self.hard_cut(word, reserve));
                }
            }
        }
        atoms
    }

    fn hard_cut(&self, word: &str, reserve: usize) -> Vec<String> {
        let sentence_cap = self.limit.max_sentence_chars.unwrap_or(usize::MAX);
        let mut pieces = Vec::new();
        let mut current = String::new();
        let (mut size, mut count) = (0, 0);

        for ch in word.chars() {
            let ch_len = self.limit.char_len(ch);
            let fits = size + ch_len + reserve <= self.limit.max && count + 1 + reserve <= sentence_cap;
            // Always take at least one char per piece so the cut makes progress
            if !fits && !current.is_empty() {
                pieces.push(mem::take(&mut current));
                size = 0;
                count = 0;
            }
            current.push(ch);
            size += ch_len;
            count += 1;
        }

        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn close(&self, mut piece: String) -> String {
        if self.limit.max_sentence_chars.is_some() && !piece.ends_with(SENTENCE_TERMINATORS) {
            piece.push('.');
        }
        piece
    }
}

fn split_after<'a>(text: &'a str, separators: &'a [char]) -> impl Iterator<Item = &'a str> {
    text.split_inclusive(separators)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    split_after(text, SENTENCE_TERMINATORS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn text_exactly_at_limit_is_one_chunk() {
        let text = "a".repeat(20);
        let chunks = TextChunker::new(ChunkLimit::chars(20)).split(&text);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn text_one_over_limit_is_split() {
        let text = "a".repeat(21);
        let chunks = TextChunker::new(ChunkLimit::chars(20)).split(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(TextChunker::new(ChunkLimit::chars(10)).split("  \n\t ").is_empty());
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text = "Mot hai ba. Bon nam sau! Bay tam chin?";
        let chunks = TextChunker::new(ChunkLimit::chars(25)).split(text);
        assert_eq!(
            chunks,
            vec!["Mot hai ba. Bon nam sau!", "Bay tam chin?"]
        );
    }

    #[test]
    fn falls_back_to_clauses_then_words() {
        let text = "first clause here, second clause here, third";
        let chunks = TextChunker::new(ChunkLimit::chars(20)).split(text);
        assert_eq!(
            chunks,
            vec!["first clause here,", "second clause here,", "third"]
        );

        let chunks = TextChunker::new(ChunkLimit::chars(10)).split("alpha beta gamma delta");
        assert_eq!(chunks, vec!["alpha beta", "gamma", "delta"]);
    }

    #[test]
    fn byte_limit_respects_multibyte_characters() {
        let text = "Xin chào các bạn. Hôm nay trời đẹp quá.";
        let limit = ChunkLimit::bytes(24);
        let chunks = TextChunker::new(limit).split(text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 24, "chunk too large: {chunk:?}");
        }
        assert_eq!(strip_ws(&chunks.concat()), strip_ws(text));
    }

    #[test]
    fn hard_cut_never_splits_a_char() {
        let text = "ạạạạạạạạạạ";
        let chunks = TextChunker::new(ChunkLimit::bytes(7)).split(text);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn long_sentences_are_capped() {
        let sentence = "word ".repeat(40);
        let limit = ChunkLimit::bytes(4500).with_max_sentence_chars(50);
        let chunks = TextChunker::new(limit).split(&sentence);

        for chunk in &chunks {
            for s in sentences(chunk) {
                assert!(s.chars().count() <= 50, "sentence too long: {s:?}");
            }
        }
    }

    #[test]
    fn tightened_only_lowers() {
        assert_eq!(ChunkLimit::chars(100).tightened(50).max(), 50);
        assert_eq!(ChunkLimit::chars(100).tightened(500).max(), 100);
        assert_eq!(ChunkLimit::bytes(100).tightened(50).unit(), LengthUnit::Bytes);
    }
}
