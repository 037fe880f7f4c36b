//! Base-24 codec for the 25-character product key wire format
//!
//! Keys are the base-24 rendering of a 128-bit little-endian payload using
//! a fixed 24-letter alphabet with no confusable characters. A 25-digit
//! base-24 string carries 114 bits of information, so the top 14 bits of
//! the payload are always zero.
//!
//! Decoding historically skips characters outside the alphabet instead of
//! rejecting them. That behavior is preserved in [`decode`]; validators
//! that want strict parsing call [`strip_key`] first and reject anything
//! that does not normalize to exactly 25 alphabet characters.

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::PK_LENGTH;

/// The key alphabet. Order is significant: the index of a character is its
/// base-24 digit value.
pub const KEY_CHARSET: &[u8; 24] = b"BCDFGHJKMPQRTVWXY2346789";

/// Encode a 16-byte little-endian payload as 25 key characters.
pub fn encode(raw: &[u8; 16]) -> String {
    let mut z = BigUint::from_bytes_le(raw);
    let mut out = [0u8; PK_LENGTH];
    let twenty_four = BigUint::from(24u32);
    for slot in out.iter_mut().rev() {
        let rem = (&z % &twenty_four).to_usize().unwrap_or(0);
        z /= &twenty_four;
        *slot = KEY_CHARSET[rem];
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a key string into the 16-byte little-endian payload.
///
/// Characters not in the alphabet (dashes included) are skipped until 25
/// digits have been read; extra characters beyond that are ignored.
pub fn decode(key: &str) -> [u8; 16] {
    let mut y = BigUint::from(0u32);
    let mut digits = 0;
    for c in key.bytes() {
        if digits == PK_LENGTH {
            break;
        }
        if let Some(idx) = KEY_CHARSET.iter().position(|&k| k == c) {
            y = y * 24u32 + BigUint::from(idx);
            digits += 1;
        }
    }
    let mut raw = [0u8; 16];
    for (dst, src) in raw.iter_mut().zip(y.to_bytes_le()) {
        *dst = src;
    }
    raw
}

/// Normalize a user-supplied key for validation.
///
/// Uppercases, drops dashes and whitespace, and returns the bare
/// 25-character key. Returns `None` when any other character appears or
/// the result is not exactly 25 characters long.
pub fn strip_key(input: &str) -> Option<String> {
    let mut out = String::with_capacity(PK_LENGTH);
    for c in input.chars() {
        if c == '-' || c.is_whitespace() {
            continue;
        }
        let c = c.to_ascii_uppercase();
        if !KEY_CHARSET.contains(&(c as u8)) {
            return None;
        }
        out.push(c);
    }
    (out.len() == PK_LENGTH).then_some(out)
}

/// Render a bare 25-character key as five dash-separated groups of five.
pub fn format_key(key: &str) -> String {
    key.as_bytes()
        .chunks(5)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_small_values() {
        for v in [0u128, 1, 24, 0x1234_5678_9abc_def0, u64::MAX as u128] {
            let raw = v.to_le_bytes();
            assert_eq!(decode(&encode(&raw)), raw);
        }
    }

    #[test]
    fn roundtrip_largest_payload() {
        // 24^25 - 1 is the largest encodable value.
        let max = num_bigint::BigUint::from(24u32).pow(25) - 1u32;
        let mut raw = [0u8; 16];
        for (dst, src) in raw.iter_mut().zip(max.to_bytes_le()) {
            *dst = src;
        }
        assert_eq!(decode(&encode(&raw)), raw);
    }

    #[test]
    fn decode_skips_foreign_characters() {
        let with_dashes = "7KWK7-9W7H4-T64D6-DB8V7-BW7MW";
        let bare = "7KWK79W7H4T64D6DB8V7BW7MW";
        assert_eq!(decode(with_dashes), decode(bare));
        // Historical behavior: unknown characters are skipped outright.
        let noisy = "7KWK7*9W7H4 T64D6_DB8V7!BW7MW";
        assert_eq!(decode(noisy), decode(bare));
    }

    #[test]
    fn strip_key_is_strict() {
        assert_eq!(
            strip_key("7KWK7-9W7H4-T64D6-DB8V7-BW7MW").as_deref(),
            Some("7KWK79W7H4T64D6DB8V7BW7MW")
        );
        // Lowercase is accepted and normalized.
        assert_eq!(
            strip_key("7kwk7-9w7h4-t64d6-db8v7-bw7mw").as_deref(),
            Some("7KWK79W7H4T64D6DB8V7BW7MW")
        );
        // 'A' is not in the alphabet, and short keys are rejected.
        assert!(strip_key("AAAAA-AAAAA-AAAAA-AAAAA-AAAAA").is_none());
        assert!(strip_key("7KWK7-9W7H4").is_none());
        assert!(strip_key("7KWK7-9W7H4-T64D6-DB8V7-BW7MW-7").is_none());
    }

    #[test]
    fn format_key_groups_of_five() {
        assert_eq!(
            format_key("7KWK79W7H4T64D6DB8V7BW7MW"),
            "7KWK7-9W7H4-T64D6-DB8V7-BW7MW"
        );
    }

    #[test]
    fn encode_is_always_25_chars() {
        assert_eq!(encode(&[0u8; 16]).len(), 25);
        assert_eq!(encode(&[0u8; 16]), "B".repeat(25));
    }
}
