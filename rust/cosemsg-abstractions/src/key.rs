// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Key model (RFC 9052 section 7, RFC 9053 section 7).
//!
//! Keys travel on the wire inside recipient headers (ephemeral and static sender keys),
//! so a key converts to and from the same map representation header maps use.

use std::collections::{BTreeMap, BTreeSet};

use zeroize::Zeroize;

use crate::algorithms::AlgorithmId;
use crate::error::{CoseError, Result};
use crate::header_map::{HeaderKey, HeaderValue};

const LABEL_KTY: i64 = 1;
const LABEL_KID: i64 = 2;
const LABEL_ALG: i64 = 3;
const LABEL_KEY_OPS: i64 = 4;
const LABEL_BASE_IV: i64 = 5;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_SYMMETRIC_K: i64 = -1;
const LABEL_Y: i64 = -3;
const LABEL_D: i64 = -4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i64)]
pub enum KeyType {
    Okp = 1,
    Ec2 = 2,
    Symmetric = 4,
}

impl KeyType {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(KeyType::Okp),
            2 => Some(KeyType::Ec2),
            4 => Some(KeyType::Symmetric),
            _ => None,
        }
    }
}

/// Elliptic curves (IANA "COSE Elliptic Curves").
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i64)]
pub enum Curve {
    P256 = 1,
    P384 = 2,
    P521 = 3,
    X25519 = 4,
    X448 = 5,
    Ed25519 = 6,
    Ed448 = 7,
}

impl Curve {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Curve::P256),
            2 => Some(Curve::P384),
            3 => Some(Curve::P521),
            4 => Some(Curve::X25519),
            5 => Some(Curve::X448),
            6 => Some(Curve::Ed25519),
            7 => Some(Curve::Ed448),
            _ => None,
        }
    }

    /// Key type that carries this curve.
    pub fn key_type(self) -> KeyType {
        match self {
            Curve::P256 | Curve::P384 | Curve::P521 => KeyType::Ec2,
            _ => KeyType::Okp,
        }
    }

    /// Length in bytes of a coordinate (EC2) or public key (OKP).
    pub fn coordinate_len(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
            Curve::X25519 | Curve::Ed25519 => 32,
            Curve::X448 => 56,
            Curve::Ed448 => 57,
        }
    }
}

/// Key operations (IANA "COSE Key Operation Values").
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i64)]
pub enum KeyOperation {
    Sign = 1,
    Verify = 2,
    Encrypt = 3,
    Decrypt = 4,
    WrapKey = 5,
    UnwrapKey = 6,
    DeriveKey = 7,
    DeriveBits = 8,
    MacCreate = 9,
    MacVerify = 10,
}

impl KeyOperation {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(KeyOperation::Sign),
            2 => Some(KeyOperation::Verify),
            3 => Some(KeyOperation::Encrypt),
            4 => Some(KeyOperation::Decrypt),
            5 => Some(KeyOperation::WrapKey),
            6 => Some(KeyOperation::UnwrapKey),
            7 => Some(KeyOperation::DeriveKey),
            8 => Some(KeyOperation::DeriveBits),
            9 => Some(KeyOperation::MacCreate),
            10 => Some(KeyOperation::MacVerify),
            _ => None,
        }
    }
}

/// A COSE key.
///
/// `key_ops` restricts usage when non-empty; an empty set leaves the key unrestricted.
/// Private material (`d`, `k`) is wiped on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub kty: KeyType,
    pub crv: Option<Curve>,
    pub kid: Option<Vec<u8>>,
    pub alg: Option<AlgorithmId>,
    pub key_ops: BTreeSet<KeyOperation>,
    pub base_iv: Option<Vec<u8>>,
    pub x: Option<Vec<u8>>,
    pub y: Option<Vec<u8>>,
    pub d: Option<Vec<u8>>,
    pub k: Option<Vec<u8>>,
}

impl CoseKey {
    fn empty(kty: KeyType) -> Self {
        Self {
            kty,
            crv: None,
            kid: None,
            alg: None,
            key_ops: BTreeSet::new(),
            base_iv: None,
            x: None,
            y: None,
            d: None,
            k: None,
        }
    }

    pub fn symmetric(k: impl Into<Vec<u8>>) -> Self {
        let mut key = Self::empty(KeyType::Symmetric);
        key.k = Some(k.into());
        key
    }

    pub fn ec2(crv: Curve, x: Vec<u8>, y: Vec<u8>, d: Option<Vec<u8>>) -> Self {
        let mut key = Self::empty(KeyType::Ec2);
        key.crv = Some(crv);
        key.x = Some(x);
        key.y = Some(y);
        key.d = d;
        key
    }

    pub fn okp(crv: Curve, x: Vec<u8>, d: Option<Vec<u8>>) -> Self {
        let mut key = Self::empty(KeyType::Okp);
        key.crv = Some(crv);
        key.x = Some(x);
        key.d = d;
        key
    }

    pub fn with_kid(mut self, kid: impl Into<Vec<u8>>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn with_alg(mut self, alg: AlgorithmId) -> Self {
        self.alg = Some(alg);
        self
    }

    pub fn with_key_ops(mut self, ops: impl IntoIterator<Item = KeyOperation>) -> Self {
        self.key_ops = ops.into_iter().collect();
        self
    }

    pub fn with_base_iv(mut self, base_iv: impl Into<Vec<u8>>) -> Self {
        self.base_iv = Some(base_iv.into());
        self
    }

    pub fn has_private(&self) -> bool {
        match self.kty {
            KeyType::Symmetric => self.k.is_some(),
            _ => self.d.is_some(),
        }
    }

    pub fn permits(&self, op: KeyOperation) -> bool {
        self.key_ops.is_empty() || self.key_ops.contains(&op)
    }

    /// Symmetric key bytes, if this is a symmetric key.
    pub fn symmetric_bytes(&self) -> Option<&[u8]> {
        match self.kty {
            KeyType::Symmetric => self.k.as_deref(),
            _ => None,
        }
    }

    /// The same key with private material and usage restrictions stripped.
    pub fn public_key(&self) -> Self {
        let mut key = Self::empty(self.kty);
        key.crv = self.crv;
        key.kid = self.kid.clone();
        key.alg = self.alg;
        key.x = self.x.clone();
        key.y = self.y.clone();
        key
    }

    /// COSE_Key map representation.
    pub fn to_header_value(&self) -> HeaderValue {
        let mut m = BTreeMap::new();
        m.insert(HeaderKey::Int(LABEL_KTY), HeaderValue::Int(self.kty as i64));
        if let Some(kid) = &self.kid {
            m.insert(HeaderKey::Int(LABEL_KID), HeaderValue::Bytes(kid.clone()));
        }
        if let Some(alg) = self.alg {
            m.insert(HeaderKey::Int(LABEL_ALG), HeaderValue::Int(alg.value()));
        }
        if !self.key_ops.is_empty() {
            let ops = self.key_ops.iter().map(|op| HeaderValue::Int(*op as i64)).collect();
            m.insert(HeaderKey::Int(LABEL_KEY_OPS), HeaderValue::Array(ops));
        }
        if let Some(iv) = &self.base_iv {
            m.insert(HeaderKey::Int(LABEL_BASE_IV), HeaderValue::Bytes(iv.clone()));
        }
        match self.kty {
            KeyType::Symmetric => {
                if let Some(k) = &self.k {
                    m.insert(HeaderKey::Int(LABEL_SYMMETRIC_K), HeaderValue::Bytes(k.clone()));
                }
            }
            KeyType::Ec2 | KeyType::Okp => {
                if let Some(crv) = self.crv {
                    m.insert(HeaderKey::Int(LABEL_CRV), HeaderValue::Int(crv as i64));
                }
                if let Some(x) = &self.x {
                    m.insert(HeaderKey::Int(LABEL_X), HeaderValue::Bytes(x.clone()));
                }
                if let Some(y) = &self.y {
                    m.insert(HeaderKey::Int(LABEL_Y), HeaderValue::Bytes(y.clone()));
                }
                if let Some(d) = &self.d {
                    m.insert(HeaderKey::Int(LABEL_D), HeaderValue::Bytes(d.clone()));
                }
            }
        }
        HeaderValue::Map(m)
    }

    /// Parse a COSE_Key map. Fails with `MalformedHeader` on missing or mistyped members.
    pub fn from_header_value(value: &HeaderValue) -> Result<Self> {
        let HeaderValue::Map(m) = value else {
            return Err(CoseError::MalformedHeader("COSE_Key is not a map".to_string()));
        };

        let int = |label: i64| m.get(&HeaderKey::Int(label));
        let bytes = |label: i64| -> Result<Option<Vec<u8>>> {
            match int(label) {
                None => Ok(None),
                Some(HeaderValue::Bytes(b)) => Ok(Some(b.clone())),
                Some(other) => Err(CoseError::MalformedHeader(format!(
                    "COSE_Key member {label} must be a byte string, got {other:?}"
                ))),
            }
        };

        let kty = match int(LABEL_KTY) {
            Some(HeaderValue::Int(v)) => KeyType::from_i64(*v)
                .ok_or_else(|| CoseError::MalformedHeader(format!("unsupported COSE_Key kty {v}")))?,
            _ => return Err(CoseError::MalformedHeader("COSE_Key kty is missing".to_string())),
        };

        let mut key = Self::empty(kty);
        key.kid = bytes(LABEL_KID)?;
        key.base_iv = bytes(LABEL_BASE_IV)?;
        key.alg = match int(LABEL_ALG) {
            None => None,
            Some(HeaderValue::Int(v)) => Some(AlgorithmId(*v)),
            Some(other) => {
                return Err(CoseError::MalformedHeader(format!("unsupported COSE_Key alg {other:?}")))
            }
        };
        if let Some(ops) = int(LABEL_KEY_OPS) {
            let HeaderValue::Array(items) = ops else {
                return Err(CoseError::MalformedHeader("COSE_Key key_ops must be an array".to_string()));
            };
            for item in items {
                let op = item
                    .as_i64()
                    .and_then(KeyOperation::from_i64)
                    .ok_or_else(|| CoseError::MalformedHeader(format!("unsupported key operation {item:?}")))?;
                key.key_ops.insert(op);
            }
        }

        match kty {
            KeyType::Symmetric => {
                key.k = bytes(LABEL_SYMMETRIC_K)?;
                if key.k.is_none() {
                    return Err(CoseError::MalformedHeader("symmetric COSE_Key has no k".to_string()));
                }
            }
            KeyType::Ec2 | KeyType::Okp => {
                key.crv = match int(LABEL_CRV) {
                    Some(HeaderValue::Int(v)) => Some(
                        Curve::from_i64(*v)
                            .ok_or_else(|| CoseError::MalformedHeader(format!("unsupported curve {v}")))?,
                    ),
                    _ => return Err(CoseError::MalformedHeader("COSE_Key crv is missing".to_string())),
                };
                key.x = bytes(LABEL_X)?;
                key.d = bytes(LABEL_D)?;
                if kty == KeyType::Ec2 {
                    // Point compression (y as bool) is not supported.
                    key.y = bytes(LABEL_Y)?;
                }
                if key.x.is_none() && key.d.is_none() {
                    return Err(CoseError::MalformedHeader("COSE_Key has neither x nor d".to_string()));
                }
            }
        }

        Ok(key)
    }
}

impl std::fmt::Debug for CoseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoseKey")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("key_ops", &self.key_ops)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .field("k", &self.k.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for CoseKey {
    fn drop(&mut self) {
        self.d.zeroize();
        self.k.zeroize();
    }
}
