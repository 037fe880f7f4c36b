//! Shared PIDGEN3 surface
//!
//! The two PIDGEN3 key formats share everything except the signature
//! equation and the packing widths: both draw from the same base-24
//! alphabet, both carry an upgrade bit, and both are selected by the size
//! of the SKU's prime field. This module holds the caller-facing
//! [`KeyInfo`] record, the field-size dispatch, and the display helpers.
//!
//! Dispatch rule: a field modulus below `2^385` is a BINK1998 curve, and
//! anything larger is BINK2002. The historical parameter sets sit at 384
//! and 512 bits, so the cutoff has plenty of slack on both sides.

use num_bigint::BigUint;
use rand::RngCore;

use crate::base24;
use crate::bink1998::Bink1998;
use crate::bink2002::Bink2002;
use crate::curve::CurveParams;

/// Caller-supplied inputs for PIDGEN3 key generation.
///
/// BINK1998 packs `channel_id * 1_000_000 + serial` into its 30-bit
/// serial field; BINK2002 packs `channel_id` alone and ignores `serial`.
/// `auth_info` is BINK2002-only.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyInfo {
    /// Upgrade-key flag (bit 0 of the payload in both formats).
    pub upgrade: bool,
    /// Sales-channel ID, 0..=999.
    pub channel_id: u32,
    /// Serial number, 0..=999_999 (BINK1998 only).
    pub serial: u32,
    /// Auxiliary auth value, 10 bits (BINK2002 only).
    pub auth_info: u32,
}

/// Whether a field modulus belongs to the BINK1998 class.
pub fn is_bink1998_field(p: &BigUint) -> bool {
    p.bits() <= 385
}

/// A PIDGEN3 key engine, dispatched on the SKU's field size.
pub enum Pidgen3 {
    /// Schnorr-style scheme on a ~384-bit curve.
    Bink1998(Bink1998),
    /// Quadratic-residue scheme on a ~512-bit curve.
    Bink2002(Bink2002),
}

impl Pidgen3 {
    /// Build the engine matching the bundle's field size.
    pub fn new(params: CurveParams) -> Self {
        if is_bink1998_field(params.curve.modulus()) {
            Pidgen3::Bink1998(Bink1998::new(params))
        } else {
            Pidgen3::Bink2002(Bink2002::new(params))
        }
    }

    /// Whether this engine is the BINK1998 variant.
    pub fn is_bink1998(&self) -> bool {
        matches!(self, Pidgen3::Bink1998(_))
    }

    /// Generate a key, returning the bare 25-character form.
    pub fn generate<R: RngCore + ?Sized>(&self, info: &KeyInfo, rng: &mut R) -> String {
        match self {
            Pidgen3::Bink1998(b) => b.generate(info, rng),
            Pidgen3::Bink2002(b) => b.generate(info, rng),
        }
    }

    /// Validate a bare 25-character key against the loaded parameters.
    pub fn validate(&self, key: &str) -> bool {
        match self {
            Pidgen3::Bink1998(b) => b.validate(key),
            Pidgen3::Bink2002(b) => b.validate(key),
        }
    }
}

/// Normalize a user-supplied key string; see [`base24::strip_key`].
pub fn strip_key(input: &str) -> Option<String> {
    base24::strip_key(input)
}

/// Render a bare key in the dashed display form.
pub fn format_key(key: &str) -> String {
    base24::format_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_size_dispatch() {
        let small: BigUint = BigUint::from(1u32) << 384;
        let large: BigUint = BigUint::from(1u32) << 511;
        assert!(is_bink1998_field(&small));
        assert!(!is_bink1998_field(&large));
    }
}
