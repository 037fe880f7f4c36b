//! Arithmetic in the Confirmation ID's prime field
//!
//! The hyperelliptic curve lives over `F_M` for a fixed prime `M` just
//! under 2^57, so every element fits a `u64` and products fit a `u128`.
//! Reduction avoids division: the 128-bit product is multiplied by the
//! precomputed `ceil(2^170 / M)` and shifted down 170 bits, giving the
//! exact quotient for any product of two reduced elements, and a single
//! multiply-subtract recovers the residue.
//!
//! The square root is Tonelli-Shanks seeded with the curve's configured
//! quadratic non-residue, returning `None` for non-squares so callers
//! can perturb and retry.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

/// `F_M` with its Barrett-style reduction constant.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    modulus: u64,
    non_residue: u64,
    /// `ceil(2^170 / modulus)`, at most 128 bits for the moduli in use.
    quotient: u128,
}

impl Field {
    /// Build the field, deriving the reduction constant from the modulus.
    pub fn new(modulus: u64, non_residue: u64) -> Self {
        let m = BigUint::from(modulus);
        let quotient = ((BigUint::one() << 170u32) + &m - 1u32) / &m;
        let quotient = quotient.to_u128().unwrap_or_default();
        Self { modulus, non_residue, quotient }
    }

    /// The field modulus `M`.
    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// The configured quadratic non-residue.
    pub fn non_residue(&self) -> u64 {
        self.non_residue
    }

    /// The reduction constant `ceil(2^170 / M)`.
    pub fn reduction_constant(&self) -> u128 {
        self.quotient
    }

    /// `floor((hi:lo) / M)` for a 128-bit numerator below `M^2`-ish
    /// range, via the 170-bit shifted multiply.
    pub fn wide_quotient(&self, lo: u64, hi: u64) -> u64 {
        let qlo = self.quotient as u64;
        let qhi = (self.quotient >> 64) as u64;

        let prod1 = ((lo as u128 * qlo as u128) >> 64) as u64;
        let part1 = lo as u128 * qhi as u128;
        let part2 = hi as u128 * qlo as u128;

        let mid = (part1 & 0xFFFF_FFFF_FFFF_FFFF)
            + (part2 & 0xFFFF_FFFF_FFFF_FFFF)
            + prod1 as u128;
        let prod2 = (part1 >> 64) + (part2 >> 64) + (mid >> 64);
        let prod3 = hi as u128 * qhi as u128 + prod2;
        (prod3 >> 42) as u64
    }

    /// Addition in `F_M`.
    pub fn add(&self, x: u64, y: u64) -> u64 {
        let z = x + y;
        if z >= self.modulus {
            z - self.modulus
        } else {
            z
        }
    }

    /// Subtraction in `F_M`.
    pub fn sub(&self, x: u64, y: u64) -> u64 {
        let z = x.wrapping_sub(y);
        if x < y {
            z.wrapping_add(self.modulus)
        } else {
            z
        }
    }

    /// Multiplication in `F_M` via the shifted-quotient reduction.
    pub fn mul(&self, x: u64, y: u64) -> u64 {
        let prod = x as u128 * y as u128;
        let lo = prod as u64;
        let hi = (prod >> 64) as u64;
        let q = self.wide_quotient(lo, hi);
        lo.wrapping_sub(q.wrapping_mul(self.modulus))
    }

    /// Exponentiation by squaring.
    pub fn pow(&self, x: u64, mut y: u64) -> u64 {
        if y == 0 {
            return 1;
        }
        let mut cur = x;
        while y & 1 == 0 {
            cur = self.mul(cur, cur);
            y >>= 1;
        }
        let mut res = cur;
        y >>= 1;
        while y != 0 {
            cur = self.mul(cur, cur);
            if y & 1 == 1 {
                res = self.mul(res, cur);
            }
            y >>= 1;
        }
        res
    }

    /// Multiplicative inverse by the extended Euclidean algorithm.
    ///
    /// Requires `x` nonzero and reduced.
    pub fn inv(&self, x: u64) -> u64 {
        let mut u = x;
        let mut v = self.modulus;
        let mut xu: i64 = 1;
        let mut xv: i64 = 0;
        while u > 1 {
            let d = v / u;
            let rem = v % u;
            v = u;
            u = rem;
            let tmp = xu;
            xu = xv - (d as i64).wrapping_mul(xu);
            xv = tmp;
        }
        if xu < 0 {
            xu += self.modulus as i64;
        }
        xu as u64
    }

    /// Square root via Tonelli-Shanks, or `None` for a non-residue.
    pub fn sqrt(&self, what: u64) -> Option<u64> {
        if what == 0 {
            return Some(0);
        }
        let mut e = 0u32;
        let mut q = self.modulus - 1;
        while q & 1 == 0 {
            e += 1;
            q >>= 1;
        }

        let mut y = self.pow(self.non_residue, q);
        let mut r = e;
        let mut x = self.pow(what, (q - 1) / 2);
        let mut b = self.mul(self.mul(what, x), x);
        x = self.mul(what, x);

        while b != 1 {
            let mut m = 0u32;
            let mut b2 = b;
            loop {
                m += 1;
                b2 = self.mul(b2, b2);
                if b2 == 1 {
                    break;
                }
            }
            if m == r {
                return None;
            }
            let t = self.pow(y, 1u64 << (r - m - 1));
            y = self.mul(t, t);
            r = m;
            x = self.mul(x, t);
            b = self.mul(b, y);
        }
        (self.mul(x, x) == what).then_some(x)
    }
}
