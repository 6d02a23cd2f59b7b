//! Public-only BIP-32 derivation.
//!
//! Only non-hardened children can be derived from an extended public key:
//! `K_i = IL·G + K_par`, where `IL ‖ c_i = HMAC-SHA512(c_par, K_par ‖ i)`.

use std::fmt;
use std::str::FromStr;

use crypto_utils::base58;
use crypto_utils::hash::{hash160, hmac_sha512};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, ProjectivePoint, PublicKey, Scalar};

use crate::error::WalletError;

pub const HARDENED_FLAG: u32 = 0x8000_0000;

/// Length of a serialised extended key, without the checksum.
const XPUB_LEN: usize = 78;

/// Extended public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedKey {
    pub depth: u8,
    pub child_number: u32,
    pub chain_code: [u8; 32],
    /// Compressed SEC1 point.
    pub public_key: [u8; 33],
    pub parent_fingerprint: [u8; 4],
}

fn decode_point(bytes: &[u8]) -> Result<PublicKey, WalletError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|e| WalletError::InvalidPoint(e.to_string()))
}

fn compress(point: &PublicKey) -> Result<[u8; 33], WalletError> {
    point
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| WalletError::InvalidPoint("unexpected encoded length".into()))
}

impl ExtendedKey {
    /// Decode a Base58Check extended public key. Returns the version magic
    /// alongside the key.
    pub fn from_xpub(xpub: &str) -> Result<(u32, ExtendedKey), WalletError> {
        let raw = base58::decode_check(xpub)?;
        if raw.len() != XPUB_LEN {
            return Err(WalletError::InvalidExtendedKey(format!(
                "expected {XPUB_LEN} bytes, got {}",
                raw.len()
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&raw[0..4]);
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&raw[5..9]);
        let mut child_number = [0u8; 4];
        child_number.copy_from_slice(&raw[9..13]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&raw[13..45]);
        let mut public_key = [0u8; 33];
        public_key.copy_from_slice(&raw[45..78]);

        if public_key[0] == 0x00 {
            return Err(WalletError::PrivateKeyNotSupported);
        }
        decode_point(&public_key).map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;

        let key = ExtendedKey {
            depth: raw[4],
            child_number: u32::from_be_bytes(child_number),
            chain_code,
            public_key,
            parent_fingerprint,
        };
        Ok((u32::from_be_bytes(version), key))
    }

    pub fn to_xpub(&self, version: u32) -> String {
        let mut raw = Vec::with_capacity(XPUB_LEN);
        raw.extend_from_slice(&version.to_be_bytes());
        raw.push(self.depth);
        raw.extend_from_slice(&self.parent_fingerprint);
        raw.extend_from_slice(&self.child_number.to_be_bytes());
        raw.extend_from_slice(&self.chain_code);
        raw.extend_from_slice(&self.public_key);
        base58::encode_check(&raw)
    }

    /// First four bytes of HASH160 of the public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160(&self.public_key);
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Derive the non-hardened child at `index`.
    pub fn derive_child(&self, index: u32) -> Result<ExtendedKey, WalletError> {
        if index & HARDENED_FLAG != 0 {
            return Err(WalletError::HardenedDerivationUnsupported(index));
        }
        let depth = self.depth.checked_add(1).ok_or(WalletError::MaxDepthExceeded)?;
        let parent = decode_point(&self.public_key)?;

        let i = hmac_sha512(&self.chain_code, &[&self.public_key, &index.to_be_bytes()])?;
        let (il, ir) = i.split_at(32);

        let tweak = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(il)))
            .ok_or_else(|| WalletError::InvalidPoint(format!("tweak out of range at {index}")))?;
        let point = ProjectivePoint::GENERATOR * tweak + parent.to_projective();
        let child = PublicKey::from_affine(point.to_affine())
            .map_err(|_| WalletError::InvalidPoint(format!("child {index} is the identity")))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(ExtendedKey {
            depth,
            child_number: index,
            chain_code,
            public_key: compress(&child)?,
            parent_fingerprint: self.fingerprint(),
        })
    }

    pub fn derive_path(&self, path: &[u32]) -> Result<ExtendedKey, WalletError> {
        path.iter()
            .try_fold(self.clone(), |node, &index| node.derive_child(index))
    }
}

/// Ordered list of BIP-32 child indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self` followed by `tail`.
    pub fn extend(&self, tail: &[u32]) -> DerivationPath {
        let mut indices = self.0.clone();
        indices.extend_from_slice(tail);
        DerivationPath(indices)
    }
}

impl From<Vec<u32>> for DerivationPath {
    fn from(indices: Vec<u32>) -> Self {
        Self(indices)
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    /// Parse `m/84'/0'/15'/0/3`; `h` and `H` are accepted as hardened markers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('m')
            .ok_or_else(|| WalletError::InvalidPath(format!("{s:?} must start with m")))?;
        if rest.is_empty() {
            return Ok(DerivationPath::default());
        }
        let rest = rest
            .strip_prefix('/')
            .ok_or_else(|| WalletError::InvalidPath(s.to_string()))?;

        rest.split('/')
            .map(|component| {
                let (digits, hardened) = match component
                    .strip_suffix('\'')
                    .or_else(|| component.strip_suffix('h'))
                    .or_else(|| component.strip_suffix('H'))
                {
                    Some(digits) => (digits, true),
                    None => (component, false),
                };
                let index: u32 = digits.parse().map_err(|e| {
                    WalletError::InvalidPath(format!("bad component {component:?}: {e}"))
                })?;
                if index & HARDENED_FLAG != 0 {
                    return Err(WalletError::InvalidPath(format!(
                        "component {component:?} out of range"
                    )));
                }
                Ok(if hardened { index | HARDENED_FLAG } else { index })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(DerivationPath)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.0 {
            if index & HARDENED_FLAG != 0 {
                write!(f, "/{}'", index & !HARDENED_FLAG)?;
            } else {
                write!(f, "/{index}")?;
            }
        }
        Ok(())
    }
}
