//! BINK2002 key format
//!
//! The larger (~512-bit) curve variant with a quadratic-residue
//! signature. Two SHA-1 passes drive it: the first hashes the channel
//! data with a curve point to produce the packed 31-bit hash, the second
//! hashes the channel data, that hash, and the auth field to produce a
//! 62-bit intermediate `e`. Signing solves
//!
//! ```text
//! s^2 + (e*k)*s - c = 0 (mod n)
//! ```
//!
//! for `s` via a modular square root of the discriminant `(e*k)^2 + 4c`.
//! About half of all discriminants are non-residues and force a fresh
//! nonce, and the resulting root must still halve into 62 bits, so
//! generation averages a few attempts.

use num_bigint::{BigUint, RandBigInt};
use num_traits::ToPrimitive;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::base24;
use crate::curve::{mod_sqrt, to_le_padded, CurveParams};
use crate::pidgen3::KeyInfo;

/// Width of the random nonce in bits.
const FIELD_BITS: u64 = 512;

const CHANNEL_MASK: u32 = (1 << 10) - 1;
const HASH_MASK: u32 = (1 << 31) - 1;
const SIG_MASK: u64 = (1 << 62) - 1;
const AUTH_MASK: u32 = (1 << 10) - 1;

/// Fields of an unpacked BINK2002 key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Decoded {
    upgrade: bool,
    channel_id: u32,
    hash: u32,
    signature: u64,
    auth_info: u32,
}

/// BINK2002 engine bound to one parameter bundle.
pub struct Bink2002 {
    params: CurveParams,
}

impl Bink2002 {
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
    /// Fails (and the caller resamples) when the discriminant has no
    /// square root or the signature overflows its 62 bits.
    pub(crate) fn sign_with_nonce(&self, info: &KeyInfo, nonce: &BigUint) -> Option<String> {
        let channel_id = info.channel_id & CHANNEL_MASK;
        let auth_info = info.auth_info & AUTH_MASK;
        let data = ((channel_id << 1) | info.upgrade as u32) as u16;

        let r = self.params.curve.scalar_mul(&self.params.gen, nonce);
        let (x, y) = r.xy()?;
        let hash = self.point_hash(data, x, y)?;
        let e = intermediate(data, hash, auth_info);

        // s = (sqrt((e*k)^2 + 4c) - e*k) / 2 (mod n), with the halving
        // done over the integers after forcing evenness.
        let n = &self.params.order;
        let ek = (BigUint::from(e) * &self.params.private) % n;
        let disc = (&ek * &ek + nonce * 4u32) % n;
        let root = mod_sqrt(&disc, n)?;
        let mut s = (root + n - &ek) % n;
        if s.bit(0) {
            s += n;
        }
        s >>= 1;
        let signature = s.to_u64()?;
        if signature > SIG_MASK {
            return None;
        }

        let decoded = Decoded { upgrade: info.upgrade, channel_id, hash, signature, auth_info };
        debug!(
            upgrade = info.upgrade,
            channel_id, hash, signature, auth_info, "generated bink2002 key"
        );
        Some(base24::encode(&pack(&decoded)))
    }

    /// Validate a bare 25-character key.
    pub fn validate(&self, key: &str) -> bool {
        let raw = base24::decode(key);
        let decoded = unpack(&raw);
        debug!(
            upgrade = decoded.upgrade,
            channel_id = decoded.channel_id,
            hash = decoded.hash,
            signature = decoded.signature,
            auth_info = decoded.auth_info,
            "validating bink2002 key"
        );

        let data = ((decoded.channel_id << 1) | decoded.upgrade as u32) as u16;
        let e = BigUint::from(intermediate(data, decoded.hash, decoded.auth_info));
        let s = BigUint::from(decoded.signature);

        // P = s * (s*G + e*K)
        let curve = &self.params.curve;
        let inner = curve.add(
            &curve.scalar_mul(&self.params.gen, &s),
            &curve.scalar_mul(&self.params.public, &e),
        );
        let p = curve.scalar_mul(&inner, &s);
        let Some((x, y)) = p.xy() else {
            return false;
        };
        match self.point_hash(data, x, y) {
            Some(h) => h == decoded.hash,
            None => false,
        }
    }

    /// `SHA-1(0x79 || data || x || y)` truncated to 31 bits.
    fn point_hash(&self, data: u16, x: &BigUint, y: &BigUint) -> Option<u32> {
        let width = self.params.curve.field_bytes();
        let mut msg = Vec::with_capacity(3 + 2 * width);
        msg.push(0x79);
        msg.extend_from_slice(&data.to_le_bytes());
        msg.extend_from_slice(&to_le_padded(x, width)?);
        msg.extend_from_slice(&to_le_padded(y, width)?);
        let digest = Sha1::digest(&msg);
        let word = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Some(word & HASH_MASK)
    }
}

/// `SHA-1(0x5D || data || hash || auth || 00 00)` folded into the 62-bit
/// intermediate: the second digest word contributes its top 30 bits, the
/// first contributes all 32.
fn intermediate(data: u16, hash: u32, auth_info: u32) -> u64 {
    let mut msg = [0u8; 11];
    msg[0] = 0x5D;
    msg[1..3].copy_from_slice(&data.to_le_bytes());
    msg[3..7].copy_from_slice(&hash.to_le_bytes());
    msg[7..9].copy_from_slice(&(auth_info as u16).to_le_bytes());
    let digest = Sha1::digest(msg);
    let lo = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let hi = u32::from_le_bytes([digest[4], digest[5], digest[6], digest[7]]);
    (((hi >> 2) & ((1 << 30) - 1)) as u64) << 32 | lo as u64
}

fn pack(d: &Decoded) -> [u8; 16] {
    let w0 = (d.signature & ((1 << 22) - 1)) << 42
        | (d.hash as u64) << 11
        | (d.channel_id as u64) << 1
        | d.upgrade as u64;
    let w1 = (d.auth_info as u64) << 40 | (d.signature >> 22) & ((1 << 40) - 1);
    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&w0.to_le_bytes());
    raw[8..].copy_from_slice(&w1.to_le_bytes());
    raw
}

fn unpack(raw: &[u8; 16]) -> Decoded {
    let w0 = u64::from_le_bytes(raw[..8].try_into().unwrap_or_default());
    let w1 = u64::from_le_bytes(raw[8..].try_into().unwrap_or_default());
    Decoded {
        upgrade: w0 & 1 == 1,
        channel_id: ((w0 >> 1) & CHANNEL_MASK as u64) as u32,
        hash: ((w0 >> 11) & HASH_MASK as u64) as u32,
        signature: ((w1 >> 10) & ((1 << 30) - 1)) << 32
            | (w1 & ((1 << 10) - 1)) << 22
            | (w0 >> 42) & ((1 << 22) - 1),
        auth_info: ((w1 >> 40) & AUTH_MASK as u64) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{Curve, CurveParams, Point};
    use rand::SeedableRng;

    fn fixture() -> Bink2002 {
        let p: BigUint = "12509642519697332596114311053544618620747009389814652225369521188710171926174976419995384745134703589248167610052719613586668754176591418831031596093374569".parse().unwrap();
        let gx: BigUint = "8059057663701168311917532277618827622978515614146963913097592614451721430413021070395782723330339842826599481063797559797462512297834269467666807971588275".parse().unwrap();
        let gy: BigUint = "12239303830174753191779705979220378623394732267536997115625979632402312087683644927405756146495100825573682155171145924668759419114616275413724686284123408".parse().unwrap();
        let kx: BigUint = "4895832170509729140211911021638266775170167022247175324972987673313207244495397975379010973250279668424167408883454560376269866102669741515127286188717976".parse().unwrap();
        let ky: BigUint = "5846013328426281815512452704859777850382010968846722453046994319336479079120767834777937190955827245502389471872759584209649693396095099112777776298051208".parse().unwrap();
        let params = CurveParams::validated(
            Curve::new(p, BigUint::from(1u32), BigUint::from(0u32)),
            Point::Affine { x: gx, y: gy },
            Point::Affine { x: kx, y: ky },
            "5622613991231344109".parse().unwrap(),
            "1285511085175426271".parse().unwrap(),
        )
        .expect("fixture parameters must validate");
        Bink2002::new(params)
    }

    fn fixture_info() -> KeyInfo {
        KeyInfo { upgrade: false, channel_id: 640, serial: 0, auth_info: 701 }
    }

    #[test]
    fn generates_known_key_from_fixed_nonce() {
        let engine = fixture();
        let nonce: BigUint = "2715417548459431244234182116258933974639514924173191881913315754156057922856789413383072541627152533502894944768632184791880876163762899980230935".parse().unwrap();
        let key = engine
            .sign_with_nonce(&fixture_info(), &nonce)
            .expect("fixture nonce must sign");
        assert_eq!(key, "QX7C76668GRHTTC9XXD64QKVM");
        assert_eq!(base24::format_key(&key), "QX7C7-6668G-RHTTC-9XXD6-4QKVM");
    }

    #[test]
    fn validates_known_key() {
        assert!(fixture().validate("QX7C76668GRHTTC9XXD64QKVM"));
    }

    #[test]
    fn rejects_tampered_key() {
        // Last character changed, as in the documented negative vector.
        assert!(!fixture().validate("QX7C76668GRHTTC9XXD64QKV7"));
    }

    #[test]
    fn rejects_zero_signature() {
        // An all-zero payload multiplies into the point at infinity.
        assert!(!fixture().validate(&"B".repeat(25)));
    }

    #[test]
    fn generate_then_validate_roundtrip() {
        let engine = fixture();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let info = KeyInfo { upgrade: false, channel_id: 550, serial: 0, auth_info: 123 };
        let key = engine.generate(&info, &mut rng);
        assert_eq!(key.len(), 25);
        assert!(engine.validate(&key));
    }

    #[test]
    fn unpack_inverts_pack() {
        let d = Decoded {
            upgrade: false,
            channel_id: 640,
            hash: 0x48bf_890b,
            signature: 0x05a0_d775_b335_8308,
            auth_info: 701,
        };
        assert_eq!(unpack(&pack(&d)), d);
    }
}
