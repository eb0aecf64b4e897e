//! Hex list parsing
//!
//! Pure helpers for the two ASCII encodings the instrument uses: runs of
//! fixed-width hex numbers without separators (spectrum and waveform dumps),
//! and whitespace separated hex fields (status lines).

use thiserror::Error;

/// Errors from the hex list parsers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("item width must be between 1 and 8 digits, got {0}")]
    BadWidth(usize),

    #[error("length {len} is not a multiple of item width {width}")]
    RaggedLength { len: usize, width: usize },

    #[error("'{token}' at offset {offset} is not a hex number")]
    BadDigits { offset: usize, token: String },
}

/// Parse a string of concatenated fixed-width hex numbers.
///
/// `"0001000A000D"` with `width = 4` yields `[1, 10, 13]`.
pub fn parse_fixed_width(text: impl AsRef<[u8]>, width: usize) -> Result<Vec<u32>, HexError> {
    if width == 0 || width > 8 {
        return Err(HexError::BadWidth(width));
    }
    let bytes = text.as_ref();
    if bytes.len() % width != 0 {
        return Err(HexError::RaggedLength {
            len: bytes.len(),
            width,
        });
    }

    bytes
        .chunks(width)
        .enumerate()
        .map(|(i, chunk)| parse_token(chunk, i * width))
        .collect()
}

/// Parse whitespace separated hex numbers.
///
/// `"0001 000A 000D"` yields `[1, 10, 13]`.
pub fn parse_spaced(text: &str) -> Result<Vec<u32>, HexError> {
    let base = text.as_ptr() as usize;
    text.split_whitespace()
        .map(|token| parse_token(token.as_bytes(), token.as_ptr() as usize - base))
        .collect()
}

fn parse_token(token: &[u8], offset: usize) -> Result<u32, HexError> {
    let bad = || HexError::BadDigits {
        offset,
        token: String::from_utf8_lossy(token).into_owned(),
    };
    // from_str_radix tolerates a leading '+', the wire format never has one
    if token.is_empty() || token.len() > 8 || !token.iter().all(u8::is_ascii_hexdigit) {
        return Err(bad());
    }
    let s = std::str::from_utf8(token).map_err(|_| bad())?;
    u32::from_str_radix(s, 16).map_err(|_| bad())
}

/// Format a value as the 4 uppercase hex digits the instrument expects.
pub fn format_word(value: u16) -> String {
    format!("{:04X}", value)
}

/// True when `bytes` are all uppercase hex digits (`0-9`, `A-F`).
pub(crate) fn is_upper_hex(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_four() {
        assert_eq!(parse_fixed_width("0001000A000D", 4).unwrap(), vec![1, 10, 13]);
    }

    #[test]
    fn test_fixed_width_eight() {
        assert_eq!(
            parse_fixed_width("0001000A000D0010", 8).unwrap(),
            vec![0x0001000A, 0x000D0010]
        );
    }

    #[test]
    fn test_fixed_width_empty() {
        assert!(parse_fixed_width("", 4).unwrap().is_empty());
    }

    #[test]
    fn test_fixed_width_ragged() {
        assert_eq!(
            parse_fixed_width("00010", 4),
            Err(HexError::RaggedLength { len: 5, width: 4 })
        );
    }

    #[test]
    fn test_fixed_width_bad_digit_offset() {
        let err = parse_fixed_width("0001zz02", 4).unwrap_err();
        assert_eq!(
            err,
            HexError::BadDigits {
                offset: 4,
                token: "zz02".to_string()
            }
        );
    }

    #[test]
    fn test_fixed_width_rejects_sign() {
        assert!(parse_fixed_width("+001", 4).is_err());
    }

    #[test]
    fn test_bad_width() {
        assert_eq!(parse_fixed_width("00", 0), Err(HexError::BadWidth(0)));
        assert_eq!(parse_fixed_width("00", 9), Err(HexError::BadWidth(9)));
    }

    #[test]
    fn test_spaced() {
        assert_eq!(parse_spaced("0001 000A  000D\r\n").unwrap(), vec![1, 10, 13]);
        assert_eq!(
            parse_spaced("0800 16E3 0001 00000000").unwrap(),
            vec![0x800, 0x16E3, 1, 0]
        );
    }

    #[test]
    fn test_spaced_reports_offset() {
        let err = parse_spaced("0001 XYZ").unwrap_err();
        assert_eq!(
            err,
            HexError::BadDigits {
                offset: 5,
                token: "XYZ".to_string()
            }
        );
    }

    #[test]
    fn test_format_word() {
        assert_eq!(format_word(0x100), "0100");
        assert_eq!(format_word(0x3FFF), "3FFF");
        assert!(is_upper_hex(b"3FFF"));
        assert!(!is_upper_hex(b"3fff"));
    }
}
