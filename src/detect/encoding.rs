use std::fmt;
use std::str::FromStr;

/// Text encodings a log file can be read in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Latin1,
}

/// Byte order marks, longest first so UTF-32LE is not taken for UTF-16LE
const PREAMBLES: [(Encoding, &[u8]); 5] = [
    (Encoding::Utf32Le, &[0xFF, 0xFE, 0x00, 0x00]),
    (Encoding::Utf32Be, &[0x00, 0x00, 0xFE, 0xFF]),
    (Encoding::Utf8, &[0xEF, 0xBB, 0xBF]),
    (Encoding::Utf16Le, &[0xFF, 0xFE]),
    (Encoding::Utf16Be, &[0xFE, 0xFF]),
];

impl Encoding {
    /// Canonical names, as accepted in configuration
    pub const NAMES: [&'static str; 6] = ["utf-8", "utf-16le", "utf-16be", "utf-32le", "utf-32be", "latin1"];

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Utf16Be => "utf-16be",
            Encoding::Utf32Le => "utf-32le",
            Encoding::Utf32Be => "utf-32be",
            Encoding::Latin1 => "latin1",
        }
    }

    /// Byte order mark written at the start of a file in this encoding
    pub fn preamble(self) -> &'static [u8] {
        PREAMBLES
            .iter()
            .find(|(encoding, _)| *encoding == self)
            .map(|(_, bytes)| *bytes)
            .unwrap_or(&[])
    }

    /// Encoding announced by the byte order mark at the start of `header`
    pub fn sniff(header: &[u8]) -> Option<Encoding> {
        PREAMBLES
            .iter()
            .find(|(_, preamble)| header.starts_with(preamble))
            .map(|(encoding, _)| *encoding)
    }

    /// Bytes per code unit; newlines are only looked for at multiples of it
    pub fn unit_width(self) -> usize {
        match self {
            Encoding::Utf8 | Encoding::Latin1 => 1,
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            Encoding::Utf32Le | Encoding::Utf32Be => 4,
        }
    }

    /// The encoded `\n`
    pub fn newline(self) -> &'static [u8] {
        match self {
            Encoding::Utf8 | Encoding::Latin1 => b"\n",
            Encoding::Utf16Le => &[0x0A, 0x00],
            Encoding::Utf16Be => &[0x00, 0x0A],
            Encoding::Utf32Le => &[0x0A, 0x00, 0x00, 0x00],
            Encoding::Utf32Be => &[0x00, 0x00, 0x00, 0x0A],
        }
    }

    /// The encoded `\r`
    pub fn carriage_return(self) -> &'static [u8] {
        match self {
            Encoding::Utf8 | Encoding::Latin1 => b"\r",
            Encoding::Utf16Le => &[0x0D, 0x00],
            Encoding::Utf16Be => &[0x00, 0x0D],
            Encoding::Utf32Le => &[0x0D, 0x00, 0x00, 0x00],
            Encoding::Utf32Be => &[0x00, 0x00, 0x00, 0x0D],
        }
    }

    /// Drop a trailing `\n` or `\r\n`.
    pub fn strip_line_terminator(self, bytes: &[u8]) -> &[u8] {
        let Some(rest) = bytes.strip_suffix(self.newline()) else {
            return bytes;
        };
        rest.strip_suffix(self.carriage_return()).unwrap_or(rest)
    }

    /// Decode, replacing invalid sequences with U+FFFD.
    ///
    /// A byte order mark is not stripped here; the scanner skips it.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => decode_with(encoding_rs::UTF_8, bytes),
            Encoding::Utf16Le => decode_with(encoding_rs::UTF_16LE, bytes),
            Encoding::Utf16Be => decode_with(encoding_rs::UTF_16BE, bytes),
            // encoding_rs resolves "iso-8859-1" to windows-1252, which
            // differs in 0x80..=0x9F
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Utf32Le => decode_utf32(bytes, u32::from_le_bytes),
            Encoding::Utf32Be => decode_utf32(bytes, u32::from_be_bytes),
        }
    }
}

fn decode_with(encoding: &'static encoding_rs::Encoding, bytes: &[u8]) -> String {
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}

/// Not covered by encoding_rs
fn decode_utf32(bytes: &[u8], unit: fn([u8; 4]) -> u32) -> String {
    bytes
        .chunks_exact(4)
        .map(|c| char::from_u32(unit([c[0], c[1], c[2], c[3]])).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "utf-16le" | "utf-16" | "unicode" => Ok(Encoding::Utf16Le),
            "utf-16be" => Ok(Encoding::Utf16Be),
            "utf-32le" | "utf-32" => Ok(Encoding::Utf32Le),
            "utf-32be" => Ok(Encoding::Utf32Be),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(format!("unknown encoding '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_prefers_longest_preamble() {
        assert_eq!(Encoding::sniff(&[0xFF, 0xFE, 0x00, 0x00, 0x41]), Some(Encoding::Utf32Le));
        assert_eq!(Encoding::sniff(&[0xFF, 0xFE, 0x41, 0x00]), Some(Encoding::Utf16Le));
        assert_eq!(Encoding::sniff(b"\xEF\xBB\xBFhello"), Some(Encoding::Utf8));
        assert_eq!(Encoding::sniff(b"hello"), None);
        assert_eq!(Encoding::sniff(&[]), None);
    }

    #[test]
    fn test_decode_utf16() {
        let le: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(Encoding::Utf16Le.decode(&le), "héllo");

        let be: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_be_bytes).collect();
        assert_eq!(Encoding::Utf16Be.decode(&be), "héllo");
    }

    #[test]
    fn test_decode_utf16_unpaired_surrogate_is_replaced() {
        let bytes = [0x41, 0x00, 0x00, 0xD8, 0x42, 0x00];
        assert_eq!(Encoding::Utf16Le.decode(&bytes), "A\u{FFFD}B");
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(Encoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(Encoding::Latin1.decode(&[0x80]), "\u{80}");
    }

    #[test]
    fn test_decode_utf32() {
        let le: Vec<u8> = "wörld".chars().flat_map(|c| u32::from(c).to_le_bytes()).collect();
        assert_eq!(Encoding::Utf32Le.decode(&le), "wörld");
    }

    #[test]
    fn test_decode_invalid_utf8_is_replaced() {
        assert_eq!(Encoding::Utf8.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_strip_line_terminator() {
        assert_eq!(Encoding::Utf8.strip_line_terminator(b"abc\r\n"), b"abc");
        assert_eq!(Encoding::Utf8.strip_line_terminator(b"abc\n"), b"abc");
        assert_eq!(Encoding::Utf8.strip_line_terminator(b"abc"), b"abc");
        assert_eq!(
            Encoding::Utf16Le.strip_line_terminator(&[0x41, 0x00, 0x0D, 0x00, 0x0A, 0x00]),
            &[0x41u8, 0x00]
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("UTF8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("utf_16le".parse::<Encoding>().unwrap(), Encoding::Utf16Le);
        assert!("ebcdic".parse::<Encoding>().is_err());
        for name in Encoding::NAMES {
            assert_eq!(name.parse::<Encoding>().unwrap().name(), name);
        }
    }
}
