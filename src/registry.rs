//! SKU registry
//!
//! The per-SKU parameter table arrives as a JSON document with three
//! top-level maps: `BINK` (elliptic-curve bundles keyed by a two-digit
//! hex ID), `products` (product codes with flavours, BINK references,
//! and channel-ID ranges), and `activation` (hyperelliptic curves for
//! the Confirmation ID transform). A copy of the document ships embedded
//! in the binary; callers may substitute their own.
//!
//! The registry itself is a passive, immutable lookup table. Conversion
//! into validated cryptographic parameters happens on demand and fails
//! loudly: curve bundles are checked for on-curve points and a matching
//! private key, and activation entries have their reduction constant
//! recomputed from the modulus and cross-checked.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::confid::{Branding, ConfidParams};
use crate::curve::{Curve, CurveError, CurveParams, Point};

/// Errors raised while loading or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested product, flavour, BINK, or activation entry does
    /// not exist.
    #[error("unknown {kind} \"{name}\"")]
    UnknownSku {
        /// Which table was queried.
        kind: &'static str,
        /// The identifier that missed.
        name: String,
    },
    /// A required parameter is absent or not parseable.
    #[error("parameter {0} is missing or malformed")]
    MissingParameter(&'static str),
    /// A supplied parameter disagrees with a value derived from the
    /// others.
    #[error("parameter {0} is inconsistent with the modulus")]
    Inconsistent(&'static str),
    /// The curve bundle failed validation.
    #[error("curve parameters rejected: {0}")]
    BadCurve(#[from] CurveError),
    /// The document is not valid JSON.
    #[error("parameter file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An `(x, y)` coordinate pair of decimal strings.
#[derive(Clone, Debug, Deserialize)]
pub struct PointEntry {
    /// x coordinate.
    pub x: String,
    /// y coordinate.
    pub y: String,
}

/// One BINK parameter bundle, all values decimal strings.
#[derive(Clone, Debug, Deserialize)]
pub struct BinkEntry {
    /// Field modulus.
    pub p: String,
    /// Curve coefficient `a`.
    pub a: String,
    /// Curve coefficient `b`.
    pub b: String,
    /// Generator point.
    pub g: PointEntry,
    /// Public key point.
    #[serde(rename = "pub")]
    pub public: PointEntry,
    /// Order of the generator.
    pub n: String,
    /// Private key.
    #[serde(rename = "priv")]
    pub private: String,
}

/// A channel-ID range attached to a BINK via the DPC table.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct DpcRange {
    /// Lowest channel ID in the range.
    pub min: u32,
    /// Highest channel ID in the range.
    pub max: u32,
    /// Evaluation ranges are skipped when drawing a default channel.
    #[serde(rename = "isEvaluation", default)]
    pub is_evaluation: bool,
}

/// One product flavour: its BINK references and channel ranges.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FlavourEntry {
    /// BINK IDs, index 0 retail and index 1 OEM.
    #[serde(rename = "BINK", default)]
    pub bink: Vec<String>,
    /// Default-channel ranges keyed by BINK ID.
    #[serde(rename = "DPC", default)]
    pub dpc: BTreeMap<String, Vec<DpcRange>>,
}

/// Reference from a product to an activation curve.
#[derive(Clone, Debug, Deserialize)]
pub struct ActivationRef {
    /// Key into the top-level `activation` map.
    pub flavour: String,
    /// Expected Installation ID version (0 selects per-length defaults).
    #[serde(default)]
    pub version: u8,
    /// Branding tags; `xpbrand` and `office` are recognized.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Product metadata.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProductMeta {
    /// Default flavour name.
    #[serde(default)]
    pub default: Option<String>,
    /// Key scheme override; `PIDGEN2` selects the decimal scheme.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Free-form tags (`office`, `oem`).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Telephone-activation parameters, when the product supports them.
    #[serde(default)]
    pub activation: Option<ActivationRef>,
}

/// One product: display name, flavours, metadata.
#[derive(Clone, Debug, Deserialize)]
pub struct ProductEntry {
    /// Human-readable product name.
    pub name: String,
    /// Product-level BINK references (used when there are no flavours).
    #[serde(rename = "BINK", default)]
    pub bink: Vec<String>,
    /// Flavours keyed by name.
    #[serde(default)]
    pub flavours: BTreeMap<String, FlavourEntry>,
    /// Metadata.
    #[serde(default)]
    pub meta: ProductMeta,
}

/// One activation curve, all large values decimal strings.
#[derive(Clone, Debug, Deserialize)]
pub struct ActivationEntry {
    /// Human-readable name.
    pub name: String,
    /// Field modulus `M`.
    pub p: String,
    /// The six sextic coefficients, constant term first.
    pub x: Vec<String>,
    /// `ceil(2^170 / M)`, kept in the document for interoperability and
    /// cross-checked against the modulus at load.
    pub quotient: String,
    /// Quadratic non-residue.
    pub non_residue: String,
    /// 128-bit private scalar.
    #[serde(rename = "priv")]
    pub private: String,
    /// Feistel key as eight hex digits.
    pub iid_key: String,
}

#[derive(Debug, Deserialize)]
struct ParamDoc {
    #[serde(rename = "BINK", default)]
    bink: BTreeMap<String, BinkEntry>,
    #[serde(default)]
    products: BTreeMap<String, ProductEntry>,
    #[serde(default)]
    activation: BTreeMap<String, ActivationEntry>,
}

/// The default parameter document compiled into the binary.
const EMBEDDED_KEYS: &str = include_str!("../data/keys.json");

/// Immutable registry over a parsed parameter document.
pub struct Registry {
    doc: ParamDoc,
}

impl Registry {
    /// Parse a registry from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, RegistryError> {
        let doc: ParamDoc = serde_json::from_str(text)?;
        info!(
            binks = doc.bink.len(),
            products = doc.products.len(),
            activations = doc.activation.len(),
            "loaded parameter document"
        );
        Ok(Self { doc })
    }

    /// The embedded default document.
    pub fn embedded() -> Result<Self, RegistryError> {
        Self::from_json_str(EMBEDDED_KEYS)
    }

    /// Look up a BINK bundle by hex ID.
    pub fn bink(&self, id: &str) -> Result<&BinkEntry, RegistryError> {
        self.doc.bink.get(id).ok_or_else(|| RegistryError::UnknownSku {
            kind: "BINK",
            name: id.to_string(),
        })
    }

    /// Look up a product by code.
    pub fn product(&self, code: &str) -> Result<&ProductEntry, RegistryError> {
        self.doc
            .products
            .get(code)
            .ok_or_else(|| RegistryError::UnknownSku { kind: "product", name: code.to_string() })
    }

    /// Look up an activation curve by flavour name.
    pub fn activation(&self, flavour: &str) -> Result<&ActivationEntry, RegistryError> {
        self.doc.activation.get(flavour).ok_or_else(|| RegistryError::UnknownSku {
            kind: "activation flavour",
            name: flavour.to_string(),
        })
    }

    /// Iterate BINK IDs in order.
    pub fn bink_ids(&self) -> impl Iterator<Item = &str> {
        self.doc.bink.keys().map(String::as_str)
    }

    /// Iterate `(code, product)` pairs in order.
    pub fn products(&self) -> impl Iterator<Item = (&str, &ProductEntry)> {
        self.doc.products.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl ProductEntry {
    /// Resolve a flavour by explicit name or the product default.
    ///
    /// Products without flavours resolve to their own BINK/DPC data.
    pub fn flavour(&self, name: Option<&str>) -> Result<FlavourEntry, RegistryError> {
        if self.flavours.is_empty() {
            return Ok(FlavourEntry { bink: self.bink.clone(), dpc: BTreeMap::new() });
        }
        let name = name
            .or(self.meta.default.as_deref())
            .ok_or(RegistryError::MissingParameter("flavour"))?;
        self.flavours
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSku { kind: "flavour", name: name.to_string() })
    }
}

impl FlavourEntry {
    /// The BINK ID for this flavour; index 0 is retail, 1 is OEM, with
    /// a fallback to retail when no OEM entry exists.
    pub fn bink_id(&self, oem: bool) -> Result<&str, RegistryError> {
        let idx = if oem && self.bink.len() > 1 { 1 } else { 0 };
        self.bink
            .get(idx)
            .map(String::as_str)
            .ok_or(RegistryError::MissingParameter("BINK"))
    }
}

fn parse_big(value: &str, name: &'static str) -> Result<BigUint, RegistryError> {
    value.parse().map_err(|_| RegistryError::MissingParameter(name))
}

fn parse_u64(value: &str, name: &'static str) -> Result<u64, RegistryError> {
    value.parse().map_err(|_| RegistryError::MissingParameter(name))
}

impl BinkEntry {
    /// Parse and validate this bundle into curve parameters.
    pub fn curve_params(&self) -> Result<CurveParams, RegistryError> {
        let curve = Curve::new(
            parse_big(&self.p, "p")?,
            parse_big(&self.a, "a")?,
            parse_big(&self.b, "b")?,
        );
        let gen = Point::Affine {
            x: parse_big(&self.g.x, "g.x")?,
            y: parse_big(&self.g.y, "g.y")?,
        };
        let public = Point::Affine {
            x: parse_big(&self.public.x, "pub.x")?,
            y: parse_big(&self.public.y, "pub.y")?,
        };
        let order = parse_big(&self.n, "n")?;
        let private = parse_big(&self.private, "priv")?;
        Ok(CurveParams::validated(curve, gen, public, order, private)?)
    }
}

impl ActivationEntry {
    /// Parse and validate this entry into Confirmation ID parameters.
    pub fn confid_params(&self, reference: &ActivationRef) -> Result<ConfidParams, RegistryError> {
        if self.x.len() != 6 {
            return Err(RegistryError::MissingParameter("x"));
        }
        let mut f = [0u64; 6];
        for (slot, value) in f.iter_mut().zip(&self.x) {
            *slot = parse_u64(value, "x")?;
        }
        let modulus = parse_u64(&self.p, "p")?;
        let non_residue = parse_u64(&self.non_residue, "non_residue")?;

        let private: u128 = self
            .private
            .parse()
            .map_err(|_| RegistryError::MissingParameter("priv"))?;
        let quotient: u128 = self
            .quotient
            .parse()
            .map_err(|_| RegistryError::MissingParameter("quotient"))?;

        // The reduction constant is fully determined by the modulus;
        // a document that disagrees is corrupt.
        let derived = ((BigUint::from(1u32) << 170u32) + modulus - 1u32) / modulus;
        if derived.to_u128() != Some(quotient) {
            return Err(RegistryError::Inconsistent("quotient"));
        }

        let iid_raw =
            hex::decode(&self.iid_key).map_err(|_| RegistryError::MissingParameter("iid_key"))?;
        let iid_key: [u8; 4] = iid_raw
            .try_into()
            .map_err(|_| RegistryError::MissingParameter("iid_key"))?;

        let branding = if reference.tags.iter().any(|t| t == "office") {
            Branding::Office
        } else {
            Branding::ProductKey
        };
        Ok(ConfidParams {
            f,
            modulus,
            non_residue,
            private_key: (private as u64, (private >> 64) as u64),
            iid_key,
            branding,
            flag_version: reference.version,
        })
    }
}
