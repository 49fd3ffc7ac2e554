//! UTF-16 string values and their conversion to UTF-8.
//!
//! Script strings are sequences of UTF-16 code units and may contain lone
//! surrogates, so they cannot be stored as Rust `String`s directly.

use std::fmt;

use serde::{Deserialize, Serialize};

const REPLACEMENT_UTF8: [u8; 3] = [0xEF, 0xBF, 0xBD];

/// An immutable script string stored as UTF-16 code units.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct JsString(Box<[u16]>);

impl JsString {
    #[must_use]
    pub fn from_units(units: impl Into<Box<[u16]>>) -> Self {
        Self(units.into())
    }

    #[must_use]
    pub fn as_units(&self) -> &[u16] {
        &self.0
    }

    /// Number of UTF-16 code units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts to UTF-8, replacing lone surrogates with U+FFFD.
    #[must_use]
    pub fn to_utf8_lossy(&self) -> String {
        utf16_to_utf8_with_replacements(&self.0)
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in char::decode_utf16(self.0.iter().copied()) {
            fmt::Write::write_char(f, c.unwrap_or(char::REPLACEMENT_CHARACTER))?;
        }
        Ok(())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_utf8_lossy())
    }
}

/// Returns true if every element is below 0x80.
///
/// Works for both byte strings and UTF-16 code units.
#[must_use]
pub fn is_all_ascii<C: Copy + Into<u32>>(chars: &[C]) -> bool {
    chars.iter().all(|&c| c.into() < 0x80)
}

/// Converts UTF-16 to UTF-8, replacing each unpaired surrogate with U+FFFD.
///
/// Surrogate pairs become a single four byte sequence.
#[must_use]
pub fn utf16_to_utf8_with_replacements(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Converts UTF-16 to UTF-8 bytes, replacing unpaired surrogates and stopping
/// after `max_chars` code points.
#[must_use]
pub fn utf16_to_utf8_with_replacements_limited(units: &[u16], max_chars: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len().min(max_chars) * 3);
    for c in char::decode_utf16(units.iter().copied()).take(max_chars) {
        match c {
            Ok(c) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Err(_) => out.extend_from_slice(&REPLACEMENT_UTF8),
        }
    }
    out
}

/// Converts UTF-16 to UTF-8 bytes, encoding each unpaired surrogate as its own
/// three byte sequence (`ED A0 80`..`ED BF BF`).
///
/// The output is not valid UTF-8 when the input has lone surrogates, but it is
/// lossless: every input code unit can be recovered.
#[must_use]
pub fn utf16_to_utf8_with_single_surrogates(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() * 3);
    for c in char::decode_utf16(units.iter().copied()) {
        match c {
            Ok(c) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Err(err) => {
                let unit = err.unpaired_surrogate();
                out.extend_from_slice(&[
                    0xE0 | (unit >> 12) as u8,
                    0x80 | ((unit >> 6) & 0x3F) as u8,
                    0x80 | (unit & 0x3F) as u8,
                ]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// U+1F639 as a surrogate pair.
    const CAT_FACE: [u16; 2] = [0xD83D, 0xDE39];

    #[test]
    fn pair_encodes_as_four_bytes() {
        assert_eq!(utf16_to_utf8_with_single_surrogates(&CAT_FACE), vec![0xF0, 0x9F, 0x98, 0xB9]);
        assert_eq!(utf16_to_utf8_with_replacements(&CAT_FACE), "\u{1F639}");
    }

    #[test]
    fn lone_surrogates_encode_individually() {
        let reversed = [CAT_FACE[1], CAT_FACE[0]];
        assert_eq!(
            utf16_to_utf8_with_single_surrogates(&reversed),
            vec![0xED, 0xB8, 0xB9, 0xED, 0xA0, 0xBD]
        );
        assert_eq!(utf16_to_utf8_with_replacements(&reversed), "\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn limited_conversion_stops_at_char_count() {
        let units: Vec<u16> = "hello".encode_utf16().chain([0xDC00]).collect();
        assert_eq!(utf16_to_utf8_with_replacements_limited(&units, 3), b"hel".to_vec());
        assert_eq!(
            utf16_to_utf8_with_replacements_limited(&units, 10),
            [b"hello".as_slice(), &REPLACEMENT_UTF8].concat()
        );
    }

    #[test]
    fn ascii_detection() {
        assert!(is_all_ascii(b"plain text".as_slice()));
        assert!(!is_all_ascii("caf\u{e9}".as_bytes()));
        assert!(is_all_ascii::<u16>(&[]));
        assert!(!is_all_ascii(&CAT_FACE));
    }

    #[test]
    fn display_replaces_lone_surrogates() {
        let s = JsString::from_units(vec![0x61, 0xD800, 0x62]);
        assert_eq!(s.to_string(), "a\u{FFFD}b");
        assert_eq!(JsString::from("abc").len(), 3);
    }
}
