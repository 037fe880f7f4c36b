//! Crate root: public surface and shared invariants
//!
//! This crate implements the cryptographic core of a product-key issuance
//! and validation toolkit for a family of historical key formats:
//!
//! - **PIDGEN3 / BINK1998**: a Schnorr-style signature over a ~384-bit
//!   prime-field elliptic curve, packed into a 25-character base-24 key.
//! - **PIDGEN3 / BINK2002**: a quadratic-residue signature over a ~512-bit
//!   curve with a channel ID and auxiliary auth field in the packing.
//! - **PIDGEN2**: plain decimal keys with mod-7 check digits and channel
//!   and OEM validation rules.
//! - **Confirmation ID**: the telephone-activation transform mapping a
//!   41/45-digit Installation ID to a 49-character Confirmation ID through
//!   divisor arithmetic on a genus-2 hyperelliptic Jacobian and a 4-round
//!   SHA-1 Feistel mixer.
//!
//! ## Invariants
//!
//! - **Parameter hygiene.** Curve bundles are validated at load: the
//!   generator and public key must lie on the curve, and when a private
//!   key is present it must reproduce the public key. Loading fails
//!   loudly; generation and validation never re-check.
//! - **Statelessness.** Every operation is a pure function of its inputs
//!   plus an injected RNG. Nothing in this crate holds shared mutable
//!   state; the [`registry::Registry`] is immutable after construction.
//! - **Bounded retries.** The generators contain rejection-sampling loops
//!   (signature width, square-root existence, divisor search). All other
//!   failures are surfaced to the caller as typed errors; malformed keys
//!   validate as cleanly invalid rather than panicking.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Base-24 codec for the 25-character key wire format.
pub mod base24;
/// BINK1998 key format (Schnorr-style signature, ~384-bit curve).
pub mod bink1998;
/// BINK2002 key format (quadratic-residue signature, ~512-bit curve).
pub mod bink2002;
/// Confirmation ID transform (hyperelliptic Jacobian + Feistel mixer).
pub mod confid;
/// Prime-field short-Weierstrass curve arithmetic on runtime parameters.
pub mod curve;
/// PIDGEN2 decimal key scheme (mod-7 check digits).
pub mod pidgen2;
/// Shared PIDGEN3 surface: key info, variant dispatch, display helpers.
pub mod pidgen3;
/// SKU registry: parameter document model and lookups.
pub mod registry;

pub use crate::confid::{ConfidError, ConfirmationId};
pub use crate::pidgen3::{KeyInfo, Pidgen3};
pub use crate::registry::{Registry, RegistryError};

/// Number of characters in a packed product key.
pub const PK_LENGTH: usize = 25;
