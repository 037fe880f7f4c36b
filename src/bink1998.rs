//! BINK1998 key format
//!
//! A Schnorr-style signature over a ~384-bit prime-field curve. The
//! 114-bit payload packs, from bit 0 upward: the upgrade flag, a 30-bit
//! serial field, a 28-bit truncated SHA-1 hash, and the signature
//! scalar. The signing equation is `s = (n - k) * h + c (mod n)` with a
//! fresh random nonce `c`; verification recomputes the hash from
//! `P = s*G + h*K` and compares.
//!
//! The signature scalar is rejection-sampled: anything that does not fit
//! the packing (or would push the packed payload past `24^25`) discards
//! the nonce and retries. Roughly half of all attempts succeed.

use num_bigint::{BigUint, RandBigInt};
use num_traits::ToPrimitive;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::base24;
use crate::curve::{to_le_padded, CurveParams};
use crate::pidgen3::KeyInfo;

/// Width of the random nonce in bits.
const FIELD_BITS: u64 = 384;

const SERIAL_MASK: u64 = (1 << 30) - 1;
const HASH_MASK: u32 = (1 << 28) - 1;
/// The packing carries 5 + 51 signature bits.
const SIG_MASK: u64 = (1 << 56) - 1;

/// Fields of an unpacked BINK1998 key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Decoded {
    upgrade: bool,
    serial: u64,
    hash: u32,
    signature: u64,
}

/// BINK1998 engine bound to one parameter bundle.
pub struct Bink1998 {
    params: CurveParams,
}

impl Bink1998 {
    /// Bind the engine to a validated parameter bundle.
    pub fn new(params: CurveParams) -> Self {
        Self { params }
    }

    /// Generate a key, returning the bare 25-character form.
    pub fn generate<R: RngCore + ?Sized>(&self, info: &KeyInfo, rng: &mut R) -> String {
        loop {
            let nonce = rng.gen_biguint(FIELD_BITS);
            if let Some(key) = self.sign_with_nonce(info, &nonce) {
                return key;
            }
        }
    }

    /// One signing attempt with a caller-chosen nonce.
    ///
    /// Returns `None` when the signature does not fit the packing, in
    /// which case the caller resamples.
    pub(crate) fn sign_with_nonce(&self, info: &KeyInfo, nonce: &BigUint) -> Option<String> {
        let serial = serial_field(info);
        let data = ((serial << 1) | info.upgrade as u64) as u32;

        let r = self.params.curve.scalar_mul(&self.params.gen, nonce);
        let (x, y) = r.xy()?;
        let hash = self.keyed_hash(data, x, y)?;

        // s = (n - k) * h + c (mod n); the complement is computed here so
        // the loaded private key is never mutated.
        let n = &self.params.order;
        let k = n - &self.params.private;
        let s = (k * hash + nonce) % n;
        let signature = s.to_u64()?;
        if signature > SIG_MASK {
            return None;
        }

        let raw = pack(&Decoded { upgrade: info.upgrade, serial, hash, signature })?;
        debug!(upgrade = info.upgrade, serial, hash, signature, "generated bink1998 key");
        Some(base24::encode(&raw))
    }

    /// Validate a bare 25-character key.
    pub fn validate(&self, key: &str) -> bool {
        let raw = base24::decode(key);
        let decoded = unpack(&raw);
        debug!(
            upgrade = decoded.upgrade,
            serial = decoded.serial,
            hash = decoded.hash,
            signature = decoded.signature,
            "validating bink1998 key"
        );

        let data = ((decoded.serial << 1) | decoded.upgrade as u64) as u32;
        let s = BigUint::from(decoded.signature);
        let e = BigUint::from(decoded.hash);

        // P = s*G + h*K
        let curve = &self.params.curve;
        let p = curve.add(
            &curve.scalar_mul(&self.params.gen, &s),
            &curve.scalar_mul(&self.params.public, &e),
        );
        let Some((x, y)) = p.xy() else {
            return false;
        };
        match self.keyed_hash(data, x, y) {
            Some(h) => h == decoded.hash,
            None => false,
        }
    }

    /// `SHA-1(data || x || y)` truncated to 28 bits, with both
    /// coordinates little-endian at the curve's field width.
    fn keyed_hash(&self, data: u32, x: &BigUint, y: &BigUint) -> Option<u32> {
        let width = self.params.curve.field_bytes();
        let mut msg = Vec::with_capacity(4 + 2 * width);
        msg.extend_from_slice(&data.to_le_bytes());
        msg.extend_from_slice(&to_le_padded(x, width)?);
        msg.extend_from_slice(&to_le_padded(y, width)?);
        let digest = Sha1::digest(&msg);
        let word = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Some((word >> 4) & HASH_MASK)
    }
}

fn serial_field(info: &KeyInfo) -> u64 {
    ((info.channel_id as u64 % 1_000) * 1_000_000 + info.serial as u64 % 1_000_000) & SERIAL_MASK
}

/// Pack into the two payload words; `None` when the result would not
/// survive the base-24 encoding.
fn pack(d: &Decoded) -> Option<[u8; 16]> {
    let w0 = (d.signature & 0x1F) << 59
        | (d.hash as u64) << 31
        | (d.serial & SERIAL_MASK) << 1
        | d.upgrade as u64;
    let w1 = (d.signature >> 5) & ((1 << 51) - 1);

    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&w0.to_le_bytes());
    raw[8..].copy_from_slice(&w1.to_le_bytes());

    // A signature in the top of its range can push the payload past what
    // 25 base-24 digits can hold.
    let max = BigUint::from(24u32).pow(25);
    (BigUint::from_bytes_le(&raw) < max).then_some(raw)
}

fn unpack(raw: &[u8; 16]) -> Decoded {
    let w0 = u64::from_le_bytes(raw[..8].try_into().unwrap_or_default());
    let w1 = u64::from_le_bytes(raw[8..].try_into().unwrap_or_default());
    Decoded {
        upgrade: w0 & 1 == 1,
        serial: (w0 >> 1) & SERIAL_MASK,
        hash: ((w0 >> 31) & HASH_MASK as u64) as u32,
        signature: (w1 & ((1 << 51) - 1)) << 5 | (w0 >> 59),
    }
}
