//! Best-effort extraction of human-readable text from raw page bytes.

use std::char::REPLACEMENT_CHARACTER;

/// Candidate encodings for freed page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Ascii,
    Latin1,
}

impl TextEncoding {
    /// Maps the text encoding field of the database header (offset 56).
    pub fn from_header_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Utf8),
            2 => Some(Self::Utf16Le),
            3 => Some(Self::Utf16Be),
            _ => None,
        }
    }

    /// Decodes `bytes`, replacing anything undecodable with U+FFFD.
    pub fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { REPLACEMENT_CHARACTER })
                .collect(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    // Single-byte fallbacks map every high byte to some character; only the
    // ASCII range is trusted for those.
    fn is_printable(self, c: char) -> bool {
        if c == ' ' || c.is_ascii_graphic() {
            return true;
        }
        match self {
            Self::Utf8 | Self::Utf16Le | Self::Utf16Be => {
                !c.is_ascii() && c != REPLACEMENT_CHARACTER && c.is_alphanumeric()
            }
            Self::Ascii | Self::Latin1 => false,
        }
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| read([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
        .collect()
}

/// Extracts printable runs of at least `min_len` characters that contain at
/// least one alphanumeric character.
///
/// Encodings are tried in order and the first one yielding any run wins, so
/// the caller's ordering decides how ambiguous bytes are read.
pub fn extract_text_runs(buf: &[u8], encodings: &[TextEncoding], min_len: usize) -> Vec<String> {
    let min_len = min_len.max(1);
    for &encoding in encodings {
        let runs = runs_in(&encoding.decode_lossy(buf), encoding, min_len);
        if !runs.is_empty() {
            return runs;
        }
    }
    Vec::new()
}

fn runs_in(text: &str, encoding: TextEncoding, min_len: usize) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut len = 0usize;
    for c in text.chars() {
        if encoding.is_printable(c) {
            current.push(c);
            len += 1;
            continue;
        }
        flush(&mut runs, &mut current, &mut len, min_len);
    }
    flush(&mut runs, &mut current, &mut len, min_len);
    runs
}

fn flush(runs: &mut Vec<String>, current: &mut String, len: &mut usize, min_len: usize) {
    if *len >= min_len && current.chars().any(char::is_alphanumeric) {
        runs.push(std::mem::take(current));
    } else {
        current.clear();
    }
    *len = 0;
}

/// Deduplicates fragments, orders them longest first (in characters) and caps
/// the list.
pub fn rank_fragments<I>(fragments: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<String> = fragments
        .into_iter()
        .filter(|f| seen.insert(f.clone()))
        .collect();
    // stable sort keeps discovery order among equal lengths
    unique.sort_by_key(|f| std::cmp::Reverse(f.chars().count()));
    unique.truncate(cap);
    unique
}
