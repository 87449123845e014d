//! Hex payload codec used by hex-mode sessions.
//!
//! Input may separate byte pairs with any whitespace (`"12 AB\tcd"`); display
//! form is lowercase pairs joined by single spaces.

use crate::domain::error::{CommHubError, CommHubResult};

/// Parse user supplied hex text into raw bytes
pub fn decode(input: &str) -> CommHubResult<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|e| {
        CommHubError::Protocol(format!("invalid hex string '{}': {}", input, e))
    })
}

/// Render bytes as space separated hex pairs
pub fn encode_spaced(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&hex::encode([*byte]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_separators() {
        assert_eq!(decode("12 AB cd").unwrap(), vec![0x12, 0xab, 0xcd]);
        assert_eq!(decode("0102\n03").unwrap(), vec![1, 2, 3]);
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(decode("12 ZZ"), Err(CommHubError::Protocol(_))));
        assert!(matches!(decode("123"), Err(CommHubError::Protocol(_))));
    }

    #[test]
    fn test_encode_spaced() {
        assert_eq!(encode_spaced(&[0x12, 0xab, 0x00]), "12 ab 00");
        assert_eq!(encode_spaced(&[]), "");
    }
}
