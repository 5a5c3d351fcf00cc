//! Symbol vocabularies shared by encoder training and synthesis.
//!
//! [`Encodings`] holds three bijective tables (characters, context tags, speakers). The
//! tables only grow while a fresh encoder is being trained; everywhere else they are
//! loaded from `encoder.encodings` and treated as read-only.

use crate::conditioner::text::PhoneInfo;
use crate::error::{Result, TtsError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// File name of the persisted vocabulary inside the model directory.
pub const ENCODINGS_FILE: &str = "encoder.encodings";

/// Bijective symbol <-> id table. Ids are dense and assigned in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(symbols: Vec<String>) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (symbol.clone(), id))
            .collect();
        Self { symbols, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.symbols
    }
}

impl Vocabulary {
    /// Insert a symbol if absent and return its id.
    pub fn insert(&mut self, symbol: &str) -> usize {
        if let Some(id) = self.index.get(symbol) {
            return *id;
        }
        let id = self.symbols.len();
        self.symbols.push(symbol.to_string());
        self.index.insert(symbol.to_string(), id);
        id
    }

    /// Id of a symbol.
    pub fn id(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// Symbol with a given id.
    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when no symbol has been inserted.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }
}

/// Token sequence converted to ids, ready for the encoder.
///
/// Context ids are offset by one so that 0 means "no tag" (sentinels).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInput {
    /// Character ids, one per token.
    pub symbols: Vec<i64>,
    /// Speaker context tag ids (0 = none).
    pub speaker_tags: Vec<i64>,
    /// Casing context tag ids (0 = none).
    pub case_tags: Vec<i64>,
    /// Global speaker id.
    pub speaker: i64,
}

impl EncodedInput {
    /// Number of encoder positions.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True for a zero-length sequence.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Character, context-tag and speaker vocabularies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Encodings {
    /// Lower-cased characters plus sentinels.
    pub characters: Vocabulary,
    /// `SPEAKER:*` and `CASE:*` tags.
    pub context: Vocabulary,
    /// Bare speaker identities.
    pub speakers: Vocabulary,
}

impl Encodings {
    /// Grow every table with the symbols used by `tokens`.
    pub fn update(&mut self, tokens: &[PhoneInfo]) {
        for token in tokens {
            self.characters.insert(&token.symbol);
            for tag in token.context_tags() {
                self.context.insert(&tag);
            }
            if let Some(speaker) = token
                .speaker_tag
                .as_deref()
                .and_then(|tag| tag.strip_prefix("SPEAKER:"))
            {
                self.speakers.insert(speaker);
            }
        }
    }

    /// Look up ids for a token sequence spoken by `speaker`.
    ///
    /// # Errors
    ///
    /// [`TtsError::UnknownSpeaker`] when the speaker was never seen in training and
    /// [`TtsError::UnknownSymbol`] for any unseen character or casing tag.
    pub fn encode_tokens(&self, tokens: &[PhoneInfo], speaker: &str) -> Result<EncodedInput> {
        let speaker_id = self
            .speakers
            .id(speaker)
            .ok_or_else(|| TtsError::UnknownSpeaker(speaker.to_string()))?;

        let mut input = EncodedInput {
            symbols: Vec::with_capacity(tokens.len()),
            speaker_tags: Vec::with_capacity(tokens.len()),
            case_tags: Vec::with_capacity(tokens.len()),
            speaker: speaker_id as i64,
        };
        for token in tokens {
            let symbol = self
                .characters
                .id(&token.symbol)
                .ok_or_else(|| TtsError::UnknownSymbol(token.symbol.clone()))?;
            input.symbols.push(symbol as i64);

            let speaker_tag = match &token.speaker_tag {
                Some(tag) => self.context_id(tag, || TtsError::UnknownSpeaker(tag.clone()))?,
                None => 0,
            };
            input.speaker_tags.push(speaker_tag);

            let case_tag = match token.case_tag {
                Some(case) => self.context_id(case.as_tag(), || {
                    TtsError::UnknownSymbol(case.as_tag().to_string())
                })?,
                None => 0,
            };
            input.case_tags.push(case_tag);
        }
        Ok(input)
    }

    fn context_id(&self, tag: &str, missing: impl FnOnce() -> TtsError) -> Result<i64> {
        self.context
            .id(tag)
            .map(|id| id as i64 + 1)
            .ok_or_else(missing)
    }

    /// Embedding rows needed for the context table (including the "none" row).
    pub fn context_rows(&self) -> usize {
        self.context.len() + 1
    }

    /// Persist as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Load a previously saved vocabulary.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TtsError::ModelLoad(format!(
                "encodings not found at {}",
                path.display()
            )));
        }
        let data = fs::read_to_string(path)?;
        let encodings: Encodings = serde_json::from_str(&data)?;
        for (name, vocab) in [
            ("characters", &encodings.characters),
            ("context", &encodings.context),
            ("speakers", &encodings.speakers),
        ] {
            if vocab.index.len() != vocab.symbols.len() {
                return Err(TtsError::DataIntegrity(format!(
                    "duplicate symbols in the {name} table of {}",
                    path.display()
                )));
            }
        }
        Ok(encodings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioner::text::encode_text;
    use tempfile::tempdir;

    fn trained() -> Encodings {
        let mut encodings = Encodings::default();
        encodings.update(&encode_text("Hello there!", "S1").expect("encode"));
        encodings.update(&encode_text("ok", "S2").expect("encode"));
        encodings
    }

    #[test]
    fn save_load_preserves_both_directions() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(ENCODINGS_FILE);
        let encodings = trained();
        encodings.save(&path).expect("save");
        let loaded = Encodings::load(&path).expect("load");
        assert_eq!(loaded, encodings);
        for vocab in [&loaded.characters, &loaded.context, &loaded.speakers] {
            for (id, symbol) in vocab.iter().enumerate() {
                assert_eq!(vocab.id(symbol), Some(id));
                assert_eq!(vocab.symbol(id), Some(symbol));
            }
        }
    }

    #[test]
    fn unknown_speaker_is_reported() {
        let tokens = encode_text("hello", "S9").expect("encode");
        let err = trained().encode_tokens(&tokens, "S9").unwrap_err();
        assert!(matches!(err, TtsError::UnknownSpeaker(s) if s == "S9"));
    }

    #[test]
    fn unknown_character_is_reported() {
        let tokens = encode_text("xyz", "S1").expect("encode");
        let err = trained().encode_tokens(&tokens, "S1").unwrap_err();
        assert!(matches!(err, TtsError::UnknownSymbol(_)));
    }

    #[test]
    fn sentinels_have_no_context() {
        let encodings = trained();
        let tokens = encode_text("Ho", "S1").expect("encode");
        let input = encodings.encode_tokens(&tokens, "S1").expect("ids");
        assert_eq!(input.len(), 4);
        assert_eq!(input.speaker_tags[0], 0);
        assert_eq!(input.case_tags[3], 0);
        assert!(input.case_tags[1] > 0 && input.speaker_tags[1] > 0);
        assert_eq!(input.speaker, 0);
    }

    #[test]
    fn update_is_idempotent() {
        let mut encodings = trained();
        let before = encodings.clone();
        encodings.update(&encode_text("Hello", "S1").expect("encode"));
        assert_eq!(encodings, before);
    }
}
