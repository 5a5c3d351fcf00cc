//! Text preparation and context encoding.
//!
//! Every input character becomes one [`PhoneInfo`] carrying its lower-cased symbol plus
//! context tags (speaker identity and casing class). The sequence is framed by `START`
//! and `STOP` sentinels that carry no tags.

use crate::error::{Result, TtsError};
use std::fmt;
use std::fs;
use std::path::Path;

/// Symbol of the leading sentinel token.
pub const START: &str = "START";
/// Symbol of the trailing sentinel token.
pub const STOP: &str = "STOP";

/// Casing class of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseTag {
    /// Caseless character (digits, punctuation, whitespace, most non-Latin scripts).
    Symb,
    /// Upper-case letter.
    Upper,
    /// Lower-case letter.
    Lower,
}

impl CaseTag {
    /// Classify a character by comparing it to its own case-folded forms.
    pub fn classify(c: char) -> Self {
        let lower: String = c.to_lowercase().collect();
        let upper_of_lower: String = lower.to_uppercase();
        if lower == upper_of_lower {
            CaseTag::Symb
        } else if lower != c.to_string() {
            CaseTag::Upper
        } else {
            CaseTag::Lower
        }
    }

    /// Context tag string, e.g. `CASE:upper`.
    pub fn as_tag(self) -> &'static str {
        match self {
            CaseTag::Symb => "CASE:symb",
            CaseTag::Upper => "CASE:upper",
            CaseTag::Lower => "CASE:lower",
        }
    }

    /// Parse a context tag string back into a casing class.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CASE:symb" => Some(CaseTag::Symb),
            "CASE:upper" => Some(CaseTag::Upper),
            "CASE:lower" => Some(CaseTag::Lower),
            _ => None,
        }
    }
}

impl fmt::Display for CaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One element of an encoded input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneInfo {
    /// Lower-cased character, or a sentinel symbol.
    pub symbol: String,
    /// `SPEAKER:<identity>` tag; absent on sentinels.
    pub speaker_tag: Option<String>,
    /// Casing tag; absent on sentinels.
    pub case_tag: Option<CaseTag>,
    /// Reserved alignment offset, always 0.
    pub start: usize,
    /// Reserved alignment offset, always 0.
    pub end: usize,
}

impl PhoneInfo {
    /// Untagged sentinel token.
    pub fn sentinel(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            speaker_tag: None,
            case_tag: None,
            start: 0,
            end: 0,
        }
    }

    /// Token for a single input character spoken by `speaker`.
    pub fn from_char(c: char, speaker: &str) -> Self {
        Self {
            symbol: c.to_lowercase().collect(),
            speaker_tag: Some(speaker_tag(speaker)),
            case_tag: Some(CaseTag::classify(c)),
            start: 0,
            end: 0,
        }
    }

    /// True for `START` and `STOP`.
    pub fn is_sentinel(&self) -> bool {
        self.speaker_tag.is_none() && self.case_tag.is_none() && (self.symbol == START || self.symbol == STOP)
    }

    /// Context tags in the order they are persisted.
    pub fn context_tags(&self) -> Vec<String> {
        let mut tags = Vec::with_capacity(2);
        if let Some(speaker) = &self.speaker_tag {
            tags.push(speaker.clone());
        }
        if let Some(case) = self.case_tag {
            tags.push(case.as_tag().to_string());
        }
        tags
    }
}

/// Format the context tag for a speaker identity.
pub fn speaker_tag(speaker: &str) -> String {
    format!("SPEAKER:{speaker}")
}

/// Speaker identity of a labelled utterance, taken from its first speaker tag.
pub fn utterance_speaker(tokens: &[PhoneInfo]) -> Option<&str> {
    tokens
        .iter()
        .find_map(|token| token.speaker_tag.as_deref())
        .and_then(|tag| tag.strip_prefix("SPEAKER:"))
}

/// Collapse whitespace runs to single spaces and trim.
///
/// # Errors
///
/// Returns [`TtsError::EmptyInput`] when nothing but whitespace remains.
pub fn prepare_text(text: &str) -> Result<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(TtsError::EmptyInput);
    }
    Ok(collapsed)
}

/// Encode raw text for a speaker into a framed token sequence.
pub fn encode_text(text: &str, speaker: &str) -> Result<Vec<PhoneInfo>> {
    let prepared = prepare_text(text)?;
    let mut tokens = Vec::with_capacity(prepared.chars().count() + 2);
    tokens.push(PhoneInfo::sentinel(START));
    tokens.extend(prepared.chars().map(|c| PhoneInfo::from_char(c, speaker)));
    tokens.push(PhoneInfo::sentinel(STOP));
    Ok(tokens)
}

/// Read a text file, joining all of its lines into one utterance.
pub fn read_text_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TtsError::MissingPath(path.to_path_buf()));
    }
    let data = fs::read_to_string(path)?;
    Ok(data.lines().collect::<Vec<_>>().join(" "))
}

/// First line of a corpus transcript; later lines are not labelled.
pub fn read_transcript_line(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TtsError::MissingPath(path.to_path_buf()));
    }
    let data = fs::read_to_string(path)?;
    Ok(data.lines().next().unwrap_or_default().to_string())
}

/// Infer a speaker identity from a corpus file name (`<speaker>_<rest>`).
pub fn speaker_from_file_name(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split_once('_') {
        Some((speaker, _)) if !speaker.is_empty() => speaker.to_string(),
        _ => "none".to_string(),
    }
}

/// Serialize tokens into label-file text, one row per token.
pub fn format_lab(tokens: &[PhoneInfo]) -> String {
    let mut output = String::new();
    for token in tokens {
        output.push_str(&token.symbol);
        for tag in token.context_tags() {
            output.push('\t');
            output.push_str(&tag);
        }
        output.push('\n');
    }
    output
}

/// Write a label file.
pub fn write_lab(path: impl AsRef<Path>, tokens: &[PhoneInfo]) -> Result<()> {
    fs::write(path, format_lab(tokens))?;
    Ok(())
}

/// Parse label-file text.
///
/// Rows are tab-separated; the first column is the symbol, remaining columns are
/// context tags. A space symbol survives because only `\n` terminates a row.
pub fn parse_lab(data: &str) -> Result<Vec<PhoneInfo>> {
    let mut tokens = Vec::new();
    for (line_no, line) in data.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split('\t');
        let symbol = columns.next().unwrap_or_default().to_string();
        let mut token = PhoneInfo::sentinel(&symbol);
        for tag in columns {
            if tag.starts_with("SPEAKER:") {
                token.speaker_tag = Some(tag.to_string());
            } else if let Some(case) = CaseTag::from_tag(tag) {
                token.case_tag = Some(case);
            } else {
                return Err(TtsError::DataIntegrity(format!(
                    "label row {} has unknown context tag '{tag}'",
                    line_no + 1
                )));
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Read a label file.
pub fn read_lab(path: impl AsRef<Path>) -> Result<Vec<PhoneInfo>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TtsError::MissingPath(path.to_path_buf()));
    }
    parse_lab(&fs::read_to_string(path)?)
}
