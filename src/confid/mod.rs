//! Confirmation ID transform
//!
//! Telephone activation maps a 41/45-digit Installation ID (a hardware
//! and product fingerprint emitted by the installer) to a 49-character
//! Confirmation ID. The pipeline:
//!
//! 1. Parse the Installation ID digits, checking every group's weighted
//!    mod-7 check digit, into a 19-byte little-endian integer.
//! 2. Un-mix the bytes with a 4-round SHA-1 Feistel keyed by the 4-byte
//!    `iid_key`, then decode the hardware ID and product ID fields.
//! 3. Derive a divisor on the genus-2 Jacobian from the fields (up to
//!    129 salted attempts until the candidate `u` admits a `v`).
//! 4. Multiply by the 128-bit private scalar and map the result back to
//!    a 128-bit integer.
//! 5. Emit 35 decimal digits as seven dash-separated groups, each with
//!    its own weighted mod-7 check digit.
//!
//! The mixer's round function frames one half of the buffer and the key
//! into a single SHA-1 block; when the half-buffer length is not a
//! multiple of four the digest is realigned before use. That quirk is
//! load-bearing: both sides of the transform must reproduce it exactly.

pub mod divisor;
pub mod poly;
pub mod residue;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::debug;

use crate::pidgen2;
use divisor::{Divisor, Jacobian, BAD};
use residue::Field;

/// Errors surfaced by the Confirmation ID transform.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfidError {
    /// A non-digit appeared inside the Installation ID.
    #[error("invalid character in installation ID")]
    InvalidCharacter,
    /// Fewer payload digits than any accepted length.
    #[error("installation ID is too short")]
    TooShort,
    /// More payload digits than the largest accepted length.
    #[error("installation ID is too long")]
    TooLarge,
    /// A five-digit group failed its weighted mod-7 check.
    #[error("installation ID checksum failed")]
    InvalidCheckDigit,
    /// The decoded Installation ID carries an unexpected version field.
    #[error("unknown installation ID version")]
    UnknownVersion,
    /// The divisor search exhausted all 129 attempts.
    #[error("unable to derive a divisor for this installation ID")]
    Unlucky,
    /// The caller-supplied Product ID string is malformed.
    #[error("product ID is malformed")]
    BadProductId,
}

/// Which message framing the Feistel rounds and field layout use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Branding {
    /// Product-key branded installations (the common case).
    ProductKey,
    /// Office-branded installations: rounds are prefixed with `0x79`
    /// and the product ID arrives out of band.
    Office,
}

/// Parameters of one activation curve, as loaded from the registry.
#[derive(Clone, Copy, Debug)]
pub struct ConfidParams {
    /// Coefficients of the sextic `f`, constant term first.
    pub f: [u64; 6],
    /// The prime field modulus `M`.
    pub modulus: u64,
    /// A quadratic non-residue mod `M`.
    pub non_residue: u64,
    /// The 128-bit private scalar as `(low, high)` words.
    pub private_key: (u64, u64),
    /// The 4-byte Feistel key applied to Installation IDs.
    pub iid_key: [u8; 4],
    /// Message framing variant.
    pub branding: Branding,
    /// Expected Installation ID version; 0 selects the per-length
    /// defaults (9 for 41 digits, 10 for 45).
    pub flag_version: u8,
}

/// The Confirmation ID generator for one activation curve.
pub struct ConfirmationId {
    jacobian: Jacobian,
    private_key: (u64, u64),
    iid_key: [u8; 4],
    branding: Branding,
    flag_version: u8,
}

impl ConfirmationId {
    /// Bind the generator to a parameter set.
    pub fn new(params: ConfidParams) -> Self {
        let field = Field::new(params.modulus, params.non_residue);
        Self {
            jacobian: Jacobian::new(field, params.f),
            private_key: params.private_key,
            iid_key: params.iid_key,
            branding: params.branding,
            flag_version: params.flag_version,
        }
    }

    /// The underlying field, exposed for parameter cross-checks.
    pub fn field(&self) -> &Field {
        self.jacobian.field()
    }

    /// Generate the Confirmation ID for an Installation ID.
    ///
    /// `product_id` is consulted only by Office-branded curves, which
    /// carry the product fields outside the Installation ID.
    pub fn generate(
        &self,
        installation_id: &str,
        product_id: Option<&str>,
    ) -> Result<String, ConfidError> {
        let (mut iid, total) = parse_installation_id(installation_id)?;
        let mixed_len = if total == 41 { 17 } else { 19 };
        self.unmix(&mut iid[..mixed_len]);
        if iid[18] >= 0x10 {
            return Err(ConfidError::UnknownVersion);
        }

        let (hardware_id, pid) = match self.branding {
            Branding::ProductKey => {
                let low = u64::from_le_bytes(iid[8..16].try_into().unwrap_or_default());
                let high = iid[16] as u32;
                let version = ((low >> 51) & 0xF) as u32;
                let expected = match self.flag_version {
                    0 if total == 41 => 9,
                    0 => 10,
                    v => v as u32,
                };
                if version != expected {
                    return Err(ConfidError::UnknownVersion);
                }
                let pid = [
                    (low & 0x1_FFFF) as u32,
                    ((low >> 17) & 0x3FF) as u32,
                    ((low >> 27) & 0xFF_FFFF) as u32,
                    ((low >> 55) as u32) | (high << 9),
                ];
                let hardware_id = u64::from_le_bytes(iid[..8].try_into().unwrap_or_default());
                (hardware_id, pid)
            }
            Branding::Office => {
                let (hardware_id, version) = decode_new_version(&iid);
                if self.flag_version as u32 != version {
                    return Err(ConfidError::UnknownVersion);
                }
                let product_id = product_id.ok_or(ConfidError::BadProductId)?;
                (hardware_id, parse_product_id(product_id)?)
            }
        };
        debug!(hardware_id, ?pid, total, "decoded installation ID");

        // Key material for the divisor search: hardware ID plus the
        // product fields folded into one word (widths 17/10/24 and the
        // remainder).
        let mut key_material = [0u8; 16];
        key_material[..8].copy_from_slice(&hardware_id.to_le_bytes());
        let folded = (pid[0] as u64) << 41
            | ((pid[1] as u64) << 58)
            | (pid[2] as u64) << 17
            | pid[3] as u64;
        key_material[8..].copy_from_slice(&folded.to_le_bytes());

        let divisor = self
            .search_divisor(&key_material)
            .ok_or(ConfidError::Unlucky)?;
        let product = self
            .jacobian
            .mul128(&divisor, self.private_key.0, self.private_key.1);
        Ok(emit(self.encode_divisor(&product)))
    }

    /// Salted search for a divisor whose `u` admits a `v`.
    fn search_divisor(&self, key_material: &[u8; 16]) -> Option<Divisor> {
        let fld = self.jacobian.field();
        let m = fld.modulus();
        for attempt in 0..=0x80u8 {
            let mut buf = [0u8; 14];
            match self.branding {
                Branding::ProductKey => buf[7] = attempt,
                Branding::Office => buf[6] = attempt,
            }
            self.mix(&mut buf, key_material);
            let lo = u64::from_le_bytes(buf[..8].try_into().unwrap_or_default());
            let mut hi_bytes = [0u8; 8];
            hi_bytes[..6].copy_from_slice(&buf[8..14]);
            let hi = u64::from_le_bytes(hi_bytes);

            // Split the 112-bit value as x1 + M*(x2 - 1).
            let x2 = fld.wide_quotient(lo, hi);
            let x1 = lo.wrapping_sub(x2.wrapping_mul(m));
            let x2 = x2 + 1;

            let mut d = Divisor {
                u: [
                    fld.sub(
                        fld.mul(x1, x1),
                        fld.mul(fld.non_residue(), fld.mul(x2, x2)),
                    ),
                    fld.add(x1, x1),
                ],
                v: [0, 0],
            };
            if self.jacobian.find_v(&mut d) {
                debug!(attempt, "divisor found");
                return Some(d);
            }
        }
        None
    }

    /// Map a divisor back to its 128-bit integer encoding.
    fn encode_divisor(&self, d: &Divisor) -> u128 {
        let fld = self.jacobian.field();
        let m = fld.modulus() as u128;
        if d.u[0] == BAD {
            // The zero divisor cannot actually come out of the search.
            return (m + 2) * m;
        }
        if d.u[1] == BAD {
            return (m + 1) * d.u[0] as u128 + m;
        }
        let modulus = fld.modulus();
        let x1 = if d.u[1] % 2 == 1 {
            (d.u[1] + modulus) / 2
        } else {
            d.u[1] / 2
        };
        let x2sqr = fld.sub(fld.mul(x1, x1), d.u[0]);
        match fld.sqrt(x2sqr) {
            None => {
                // u has no roots in F_M; encode via the twist.
                let x2 = fld
                    .sqrt(fld.mul(x2sqr, fld.inv(fld.non_residue())))
                    .unwrap_or(0);
                (m + 1) * (m + x2 as u128) + x1 as u128
            }
            Some(x2) => {
                // Order the two points (-x1 +- x2, v(...)) by coordinate,
                // then by the parity convention on their y values.
                let mut x1a = fld.sub(x1, x2);
                let y1 = fld.sub(d.v[0], fld.mul(d.v[1], x1a));
                let mut x2a = fld.add(x1, x2);
                let y2 = fld.sub(d.v[0], fld.mul(d.v[1], x2a));
                if x1a > x2a {
                    std::mem::swap(&mut x1a, &mut x2a);
                }
                if (y1 ^ y2) & 1 == 1 {
                    std::mem::swap(&mut x1a, &mut x2a);
                }
                (m + 1) * x1a as u128 + x2a as u128
            }
        }
    }

    /// Forward Feistel pass over `buffer` (an even prefix of it).
    fn mix(&self, buffer: &mut [u8], key: &[u8]) {
        let half = buffer.len() / 2;
        for _ in 0..4 {
            let digest = self.round_digest(&buffer[half..2 * half], key);
            for i in 0..half {
                let tmp = buffer[i + half];
                buffer[i + half] = buffer[i] ^ digest[i];
                buffer[i] = tmp;
            }
        }
    }

    /// Inverse Feistel pass; `unmix(mix(b)) == b` under one branding.
    fn unmix(&self, buffer: &mut [u8]) {
        let key = self.iid_key;
        self.unmix_with_key(buffer, &key);
    }

    fn unmix_with_key(&self, buffer: &mut [u8], key: &[u8]) {
        let half = buffer.len() / 2;
        for _ in 0..4 {
            let digest = self.round_digest(&buffer[..half], key);
            for i in 0..half {
                let tmp = buffer[i];
                buffer[i] = buffer[i + half] ^ digest[i];
                buffer[i + half] = tmp;
            }
        }
    }

    /// The round function: SHA-1 over `half || key` (Office framing
    /// prepends `0x79`), with the historical realignment for halves
    /// that are not 4-aligned.
    ///
    /// The wire format is defined in terms of one hand-padded 64-byte
    /// SHA-1 block. Every message here is short enough that SHA-1's own
    /// padding produces exactly that block, so the plain digest is
    /// bit-identical.
    fn round_digest(&self, half_bytes: &[u8], key: &[u8]) -> [u8; 20] {
        let mut msg = Vec::with_capacity(1 + half_bytes.len() + key.len());
        if self.branding == Branding::Office {
            msg.push(0x79);
        }
        msg.extend_from_slice(half_bytes);
        msg.extend_from_slice(key);

        let mut out = [0u8; 20];
        out.copy_from_slice(&Sha1::digest(&msg));
        // Realign the digest when the half length is not 4-aligned.
        let half = half_bytes.len();
        for i in (half & !3)..half {
            out[i] = out[i + 4 - (half & 3)];
        }
        out
    }
}

/// Streaming parse of the Installation ID digits.
///
/// Every sixth digit (and the final digit of the input) is a check
/// digit over the preceding group under the `(1,2,1,2,1)` weighting.
/// Payload digits accumulate into a little-endian 19-byte integer.
fn parse_installation_id(input: &str) -> Result<([u8; 19], usize), ConfidError> {
    let chars: Vec<char> = input.chars().filter(|c| *c != ' ' && *c != '-').collect();
    let mut bytes = [0u8; 19];
    let mut len = 0usize;
    let mut count = 0u32;
    let mut total = 0u32;
    let mut check = 0u32;

    for (idx, ch) in chars.iter().enumerate() {
        let d = ch.to_digit(10).ok_or(ConfidError::InvalidCharacter)?;
        if count == 5 || idx + 1 == chars.len() {
            if count == 0 {
                return Err(if total == 45 {
                    ConfidError::TooLarge
                } else {
                    ConfidError::TooShort
                });
            }
            if d != check % 7 {
                return Err(if count < 5 {
                    ConfidError::TooShort
                } else {
                    ConfidError::InvalidCheckDigit
                });
            }
            check = 0;
            count = 0;
            continue;
        }
        check += if count % 2 == 1 { d * 2 } else { d };
        count += 1;
        total += 1;
        if total > 45 {
            return Err(ConfidError::TooLarge);
        }

        let mut carry = d as u8;
        for byte in bytes.iter_mut().take(len) {
            let x = *byte as u32 * 10 + carry as u32;
            *byte = x as u8;
            carry = (x >> 8) as u8;
        }
        if carry != 0 {
            if len >= bytes.len() {
                return Err(ConfidError::TooLarge);
            }
            bytes[len] = carry;
            len += 1;
        }
    }
    if total != 41 && total < 45 {
        return Err(ConfidError::TooShort);
    }
    Ok((bytes, total as usize))
}

/// Decode the Office-branded ("new version") hardware ID layout.
fn decode_new_version(iid: &[u8; 19]) -> (u64, u32) {
    let b0 = u32::from_le_bytes(iid[0..4].try_into().unwrap_or_default());
    let b2 = u32::from_le_bytes(iid[8..12].try_into().unwrap_or_default());
    let b3 = u32::from_le_bytes(iid[12..16].try_into().unwrap_or_default());
    let v1 = (b3 & 0xFFFF_FFF8) | 2;
    let v2 = ((b3 & 7) << 29) | (b2 >> 3);
    ((v1 as u64) << 32 | v2 as u64, b0 & 7)
}

/// Parse an Office Product ID string (`AAAAA-BBB-CCCCCCC-DDDDD` or the
/// `AAAAA-OEM-...` variant) into the four product fields.
fn parse_product_id(product_id: &str) -> Result<[u32; 4], ConfidError> {
    let digits = |range: std::ops::Range<usize>| -> Result<u32, ConfidError> {
        product_id
            .get(range)
            .and_then(|s| s.parse().ok())
            .ok_or(ConfidError::BadProductId)
    };
    let pid0 = digits(0..5)?;
    let channel = product_id.get(6..9).ok_or(ConfidError::BadProductId)?;
    if channel.eq_ignore_ascii_case("OEM") {
        let pid1 = digits(12..15)?;
        let pid2 = digits(15..16)? * 100_000 + digits(18..23)?;
        let pid2 = (pid2 as u64 * 10 + pidgen2::check_digit(pid2 as u64)) as u32;
        let pid3 = digits(10..12)? * 1000;
        Ok([pid0, pid1, pid2, pid3])
    } else {
        Ok([pid0, digits(6..9)?, digits(10..17)?, digits(18..23)?])
    }
}

/// Render the 128-bit encoding as seven `5 + check` digit groups.
fn emit(mut e: u128) -> String {
    let mut digits = [0u8; 35];
    for slot in digits.iter_mut().rev() {
        *slot = (e % 10) as u8;
        e /= 10;
    }
    debug_assert_eq!(e, 0, "divisor encoding exceeds 35 digits");

    let mut out = String::with_capacity(48);
    for (i, group) in digits.chunks_exact(5).enumerate() {
        if i > 0 {
            out.push('-');
        }
        for d in group {
            out.push((b'0' + d) as char);
        }
        let check =
            (group[0] + group[1] * 2 + group[2] + group[3] * 2 + group[4]) % 7;
        out.push((b'0' + check) as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xp_params() -> ConfidParams {
        ConfidParams {
            f: [
                0,
                0x21840136C85381,
                0x44197B83892AD0,
                0x1400606322B3B04,
                0x1400606322B3B04,
                1,
            ],
            modulus: 0x16A6B036D7F2A79,
            non_residue: 43,
            private_key: (0x04e21b9d10f127c1, 0x40da7c36d44c),
            iid_key: [0x6A, 0xC8, 0x5E, 0xD4],
            branding: Branding::ProductKey,
            flag_version: 0,
        }
    }

    fn generator() -> ConfirmationId {
        ConfirmationId::new(xp_params())
    }

    #[test]
    fn mixer_matches_reference_vectors() {
        let g = generator();
        let key = [0x6Au8, 0xC8, 0x5E, 0xD4];
        let mut buf: Vec<u8> = (0u8..14).collect();
        g.mix(&mut buf, &key);
        assert_eq!(hex::encode(&buf), "c97d17bbb5e11053f331c945c9d8");
        g.unmix_with_key(&mut buf, &key);
        assert_eq!(buf, (0u8..14).collect::<Vec<_>>());

        let mut buf: Vec<u8> = (0u8..17).collect();
        g.mix(&mut buf, &key);
        assert_eq!(hex::encode(&buf), "97154b3bb66e3bf13dd10a4fc99092b010");
    }

    #[test]
    fn office_mixer_framing_differs() {
        let mut params = xp_params();
        params.branding = Branding::Office;
        let g = ConfirmationId::new(params);
        let key = [0x6Au8, 0xC8, 0x5E, 0xD4];
        let mut buf: Vec<u8> = (0u8..14).collect();
        g.mix(&mut buf, &key);
        assert_eq!(hex::encode(&buf), "9d8722e0b72dabd45e8a06946589");
        g.unmix_with_key(&mut buf, &key);
        assert_eq!(buf, (0u8..14).collect::<Vec<_>>());
    }

    #[test]
    fn mixer_roundtrips_all_lengths() {
        let g = generator();
        let key = [1u8, 2, 3, 4];
        for size in [14usize, 17, 19] {
            let original: Vec<u8> = (0..size as u8).map(|i| i.wrapping_mul(37)).collect();
            let mut buf = original.clone();
            g.mix(&mut buf, &key);
            g.unmix_with_key(&mut buf, &key);
            assert_eq!(buf, original, "size {size}");
        }
    }

    #[test]
    fn generates_reference_confirmation_id() {
        let out = generator()
            .generate(
                "014882-122985-710276-775294-626735-149785-514843-955591-137401",
                None,
            )
            .expect("reference installation ID must activate");
        assert_eq!(out, "139196-877216-484441-100515-816185-679461-642783");
    }

    #[test]
    fn output_groups_carry_weighted_check_digits() {
        let out = generator()
            .generate(
                "014882 122985 710276 775294 626735 149785 514843 955591 137401",
                None,
            )
            .unwrap();
        assert_eq!(out.len(), 48);
        for group in out.split('-') {
            let d: Vec<u32> = group.chars().map(|c| c.to_digit(10).unwrap()).collect();
            assert_eq!(d[5], (d[0] + d[1] * 2 + d[2] + d[3] * 2 + d[4]) % 7);
        }
    }

    #[test]
    fn end_to_end_from_constructed_fingerprint() {
        // Build a version-10 fingerprint, mix it the way the installer
        // would, and round-trip it through the generator.
        let g = generator();
        let hardware_id: u64 = 0xDEAD_BEEF_0BAD_F00D;
        let pid_low: u64 = 12345
            | (889u64 << 17)
            | (7_654_321u64 << 27)
            | (10u64 << 51)
            | ((4321u64 & 0x1FF) << 55);
        let mut parsed = [0u8; 19];
        parsed[..8].copy_from_slice(&hardware_id.to_le_bytes());
        parsed[8..16].copy_from_slice(&pid_low.to_le_bytes());
        parsed[16] = (4321u32 >> 9) as u8;
        g.mix(&mut parsed, &[0x6A, 0xC8, 0x5E, 0xD4]);

        let mut value = num_bigint::BigUint::from_bytes_le(&parsed);
        let mut digits = vec![b'0'; 45];
        for slot in digits.iter_mut().rev() {
            let rem = (&value % 10u32).to_string();
            *slot = rem.as_bytes()[0];
            value /= 10u32;
        }
        let payload = String::from_utf8(digits).unwrap();
        let mut iid = String::new();
        for (i, group) in payload.as_bytes().chunks(5).enumerate() {
            if i > 0 {
                iid.push('-');
            }
            let d: Vec<u32> = group.iter().map(|b| (*b - b'0') as u32).collect();
            for b in group {
                iid.push(*b as char);
            }
            iid.push(
                char::from_digit((d[0] + d[1] * 2 + d[2] + d[3] * 2 + d[4]) % 7, 10).unwrap(),
            );
        }

        assert_eq!(
            iid,
            "005075-440031-472721-870275-954013-051201-635153-747526-746263"
        );
        let out = g.generate(&iid, None).expect("constructed ID must activate");
        assert_eq!(out, "054642-041185-076962-267263-449296-683891-166326");
    }

    #[test]
    fn short_input_is_too_short() {
        assert_eq!(
            generator().generate(&"0".repeat(40), None),
            Err(ConfidError::TooShort)
        );
    }

    #[test]
    fn overlong_input_is_too_large() {
        assert_eq!(
            generator().generate(&"0".repeat(60), None),
            Err(ConfidError::TooLarge)
        );
    }

    #[test]
    fn corrupted_group_fails_check_digit() {
        let good = "014882-122985-710276-775294-626735-149785-514843-955591-137401";
        // Flip one payload digit inside the first group.
        let bad = good.replacen("014882", "015882", 1);
        assert_eq!(
            generator().generate(&bad, None),
            Err(ConfidError::InvalidCheckDigit)
        );
    }

    #[test]
    fn non_digit_is_invalid_character() {
        assert_eq!(
            generator().generate("01488A-122985", None),
            Err(ConfidError::InvalidCharacter)
        );
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut params = xp_params();
        params.flag_version = 5;
        let g = ConfirmationId::new(params);
        assert_eq!(
            g.generate(
                "014882-122985-710276-775294-626735-149785-514843-955591-137401",
                None,
            ),
            Err(ConfidError::UnknownVersion)
        );
    }

    #[test]
    fn emit_renders_check_digits() {
        assert_eq!(
            emit(0),
            "000000-000000-000000-000000-000000-000000-000000"
        );
    }
}
