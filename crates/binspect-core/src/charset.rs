//! Text charsets, printable rendering and charset guessing

use std::fmt;

use encoding_rs::{Encoding, ISO_8859_15, ISO_8859_7, MACINTOSH, UTF_16BE, UTF_16LE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Charsets understood by string fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Charset {
    Ascii,
    Iso8859_1,
    Iso8859_15,
    Iso8859_7,
    MacRoman,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Charset {
    /// Canonical name, as accepted by [`str::parse`]
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Ascii => "ASCII",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::Iso8859_15 => "ISO-8859-15",
            Charset::Iso8859_7 => "ISO-8859-7",
            Charset::MacRoman => "MacRoman",
            Charset::Utf8 => "UTF-8",
            Charset::Utf16Le => "UTF-16-LE",
            Charset::Utf16Be => "UTF-16-BE",
        }
    }

    /// Width of one code unit in bytes
    pub fn unit_size(&self) -> usize {
        match self {
            Charset::Utf16Le | Charset::Utf16Be => 2,
            _ => 1,
        }
    }

    fn encoding(&self) -> Option<&'static Encoding> {
        match self {
            Charset::Iso8859_15 => Some(ISO_8859_15),
            Charset::Iso8859_7 => Some(ISO_8859_7),
            Charset::MacRoman => Some(MACINTOSH),
            Charset::Utf16Le => Some(UTF_16LE),
            Charset::Utf16Be => Some(UTF_16BE),
            _ => None,
        }
    }

    /// Decode bytes, replacing invalid sequences with U+FFFD
    pub fn decode(&self, data: &[u8]) -> String {
        match self {
            Charset::Ascii => data
                .iter()
                .map(|&b| if b < 0x80 { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            // Code points 0-255 are the ISO-8859-1 bytes
            Charset::Iso8859_1 => data.iter().map(|&b| b as char).collect(),
            Charset::Utf8 => String::from_utf8_lossy(data).into_owned(),
            _ => match self.encoding() {
                Some(encoding) => encoding.decode_without_bom_handling(data).0.into_owned(),
                None => String::from_utf8_lossy(data).into_owned(),
            },
        }
    }

    /// Encode text, failing on characters the charset can't represent
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let unmappable = |c: char| {
            Error::editor(format!("character {:?} can't be encoded in {}", c, self.name()))
        };
        match self {
            Charset::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { Ok(c as u8) } else { Err(unmappable(c)) })
                .collect(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| unmappable(c)))
                .collect(),
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Charset::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Charset::Iso8859_15 | Charset::Iso8859_7 | Charset::MacRoman => {
                let encoding = self.encoding().ok_or_else(|| Error::internal("no encoder"))?;
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    let bad = text.chars().find(|c| {
                        let mut buf = [0u8; 4];
                        encoding.encode(c.encode_utf8(&mut buf)).2
                    });
                    return Err(unmappable(bad.unwrap_or(char::REPLACEMENT_CHARACTER)));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.to_ascii_uppercase().replace('_', "-");
        match key.as_str() {
            "ASCII" | "US-ASCII" => Ok(Charset::Ascii),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(Charset::Iso8859_1),
            "ISO-8859-15" | "LATIN9" => Ok(Charset::Iso8859_15),
            "ISO-8859-7" | "GREEK" => Ok(Charset::Iso8859_7),
            "MACROMAN" | "MAC-ROMAN" | "MACINTOSH" => Ok(Charset::MacRoman),
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "UTF-16-LE" | "UTF-16LE" => Ok(Charset::Utf16Le),
            "UTF-16-BE" | "UTF-16BE" => Ok(Charset::Utf16Be),
            _ => Err(format!("Unknown charset: {}", s)),
        }
    }
}

fn control_escape(c: char) -> Option<&'static str> {
    Some(match c {
        '\0' => "\\0",
        '\x07' => "\\a",
        '\x08' => "\\b",
        '\t' => "\\t",
        '\n' => "\\n",
        '\x0B' => "\\v",
        '\x0C' => "\\f",
        '\r' => "\\r",
        _ => return None,
    })
}

fn is_control(c: char) -> bool {
    (c as u32) < 0x20 || c == '\x7F'
}

/// Escape control characters of `text` and optionally quote it
///
/// Control characters use their C escape (`\n`, `\0`, ...) or `\xHH`. A
/// `\x0N` escape shortens to `\N` when the next character is not an octal
/// digit. With a quote, the quote character is backslash-escaped and empty
/// text renders as `(empty)`.
pub fn escape_text(text: &str, quote: Option<char>) -> String {
    if text.is_empty() {
        return if quote.is_some() { "(empty)".to_string() } else { String::new() };
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 2);
    if let Some(q) = quote {
        out.push(q);
    }
    for (index, &c) in chars.iter().enumerate() {
        if is_control(c) {
            if let Some(escape) = control_escape(c) {
                out.push_str(escape);
                continue;
            }
            let code = c as u32;
            let next_is_octal = chars.get(index + 1).is_some_and(|n| ('0'..='7').contains(n));
            if code < 8 && !next_is_octal {
                out.push_str(&format!("\\{}", code));
            } else {
                out.push_str(&format!("\\x{:02X}", code));
            }
        } else if Some(c) == quote {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    if let Some(q) = quote {
        out.push(q);
    }
    out
}

/// Render possibly non-UTF bytes as printable text
///
/// The bytes are decoded with `charset`. In smart mode control characters
/// get short escapes and printable Unicode is kept; otherwise every control
/// character becomes `\xHH` and the output is restricted to ASCII.
pub fn make_printable(data: &[u8], charset: Charset, smart: bool) -> String {
    let text = charset.decode(data);
    if smart {
        return escape_text(&text, None);
    }
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        if is_control(c) {
            out.push_str(&format!("\\x{:02X}", code));
        } else if c.is_ascii() {
            out.push(c);
        } else if code <= 0xFF {
            out.push_str(&format!("\\x{:02x}", code));
        } else {
            out.push_str(&format!("\\u{:04x}", code));
        }
    }
    out
}

/// Non-ASCII bytes each single-byte charset is expected to use
const CHARSET_WHITELIST: &[(u8, u8, Charset)] = &[
    (0xA0, 0xFF, Charset::Iso8859_1),
    (0x80, 0xFF, Charset::MacRoman),
];

/// Guess the charset of raw text
///
/// Checks, in order: a UTF byte order mark, pure ASCII, strict UTF-8, then the
/// first single-byte charset whose whitelist covers every non-ASCII byte.
pub fn guess_bytes_charset(data: &[u8], default: Charset) -> Charset {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Charset::Utf8;
    }
    if data.starts_with(&[0xFF, 0xFE]) {
        return Charset::Utf16Le;
    }
    if data.starts_with(&[0xFE, 0xFF]) {
        return Charset::Utf16Be;
    }
    if data.is_ascii() {
        return Charset::Ascii;
    }
    if std::str::from_utf8(data).is_ok() {
        return Charset::Utf8;
    }
    let non_ascii: Vec<u8> = data.iter().copied().filter(|&b| b >= 0x80).collect();
    for &(low, high, charset) in CHARSET_WHITELIST {
        if non_ascii.iter().all(|&b| (low..=high).contains(&b)) {
            return charset;
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_byte() {
        assert_eq!(Charset::Iso8859_1.decode(b"caf\xE9"), "café");
        assert_eq!(Charset::Iso8859_15.decode(b"\xA4"), "€");
        assert_eq!(Charset::MacRoman.decode(b"\x8E"), "é");
        assert_eq!(Charset::Iso8859_7.decode(b"\xE1"), "α");
        assert_eq!(Charset::Ascii.decode(b"a\xE9"), "a\u{FFFD}");
    }

    #[test]
    fn test_decode_utf16() {
        assert_eq!(Charset::Utf16Le.decode(b"h\0i\0"), "hi");
        assert_eq!(Charset::Utf16Be.decode(b"\0h\0i"), "hi");
    }

    #[test]
    fn test_encode() {
        assert_eq!(Charset::Iso8859_1.encode("café").unwrap(), b"caf\xE9".to_vec());
        assert_eq!(Charset::Utf16Le.encode("hi").unwrap(), b"h\0i\0".to_vec());
        assert_eq!(Charset::MacRoman.encode("é").unwrap(), vec![0x8E]);
        assert!(Charset::Ascii.encode("é").is_err());
        assert!(Charset::Iso8859_1.encode("€").is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("iso-8859-1".parse::<Charset>().unwrap(), Charset::Iso8859_1);
        assert_eq!("UTF_16_LE".parse::<Charset>().unwrap(), Charset::Utf16Le);
        assert!("EBCDIC".parse::<Charset>().is_err());
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a\nb", None), "a\\nb");
        assert_eq!(escape_text("\x01x", None), "\\1x");
        assert_eq!(escape_text("\x017", None), "\\x017");
        assert_eq!(escape_text("\x1F", None), "\\x1F");
        assert_eq!(escape_text("say \"hi\"", Some('"')), "\"say \\\"hi\\\"\"");
        assert_eq!(escape_text("", Some('"')), "(empty)");
        assert_eq!(escape_text("", None), "");
    }

    #[test]
    fn test_make_printable() {
        assert_eq!(make_printable(b"abc\0", Charset::Ascii, true), "abc\\0");
        assert_eq!(make_printable(b"abc\0", Charset::Ascii, false), "abc\\x00");
        assert_eq!(make_printable(b"caf\xE9", Charset::Iso8859_1, true), "café");
        assert_eq!(make_printable(b"caf\xE9", Charset::Iso8859_1, false), "caf\\xe9");
    }

    #[test]
    fn test_guess_bytes_charset() {
        assert_eq!(guess_bytes_charset(b"\xEF\xBB\xBFabc", Charset::Ascii), Charset::Utf8);
        assert_eq!(guess_bytes_charset(b"\xFF\xFEa\0", Charset::Ascii), Charset::Utf16Le);
        assert_eq!(guess_bytes_charset(b"plain", Charset::Utf8), Charset::Ascii);
        assert_eq!(guess_bytes_charset("café".as_bytes(), Charset::Ascii), Charset::Utf8);
        assert_eq!(guess_bytes_charset(b"caf\xE9", Charset::Ascii), Charset::Iso8859_1);
        assert_eq!(guess_bytes_charset(b"caf\x8E", Charset::Ascii), Charset::MacRoman);
    }
}
