// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Algorithm registry (IANA "COSE Algorithms").
//!
//! The registry is an immutable table built once on first use. It identifies
//! algorithms and the key contract each one imposes; it never implements them.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::{CoseError, Result};
use crate::key::{CoseKey, Curve, KeyOperation, KeyType};

/// A COSE algorithm identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlgorithmId(pub i64);

impl AlgorithmId {
    /// ECDSA w/ SHA-256 over P-256.
    pub const ES256: Self = Self(-7);
    /// ECDSA w/ SHA-384 over P-384.
    pub const ES384: Self = Self(-35);
    /// ECDSA w/ SHA-512 over P-521.
    pub const ES512: Self = Self(-36);
    pub const EDDSA: Self = Self(-8);

    pub const HMAC_256_64: Self = Self(4);
    pub const HMAC_256_256: Self = Self(5);
    pub const HMAC_384_384: Self = Self(6);
    pub const HMAC_512_512: Self = Self(7);

    pub const A128GCM: Self = Self(1);
    pub const A192GCM: Self = Self(2);
    pub const A256GCM: Self = Self(3);
    pub const AES_CCM_16_64_128: Self = Self(10);
    pub const AES_CCM_16_64_256: Self = Self(11);
    pub const AES_CCM_64_64_128: Self = Self(12);
    pub const AES_CCM_64_64_256: Self = Self(13);
    pub const AES_CCM_16_128_128: Self = Self(30);
    pub const AES_CCM_16_128_256: Self = Self(31);
    pub const AES_CCM_64_128_128: Self = Self(32);
    pub const AES_CCM_64_128_256: Self = Self(33);

    pub const DIRECT: Self = Self(-6);
    pub const DIRECT_HKDF_SHA_256: Self = Self(-10);
    pub const DIRECT_HKDF_SHA_512: Self = Self(-11);
    pub const A128KW: Self = Self(-3);
    pub const A192KW: Self = Self(-4);
    pub const A256KW: Self = Self(-5);
    pub const ECDH_ES_HKDF_256: Self = Self(-25);
    pub const ECDH_ES_HKDF_512: Self = Self(-26);
    pub const ECDH_SS_HKDF_256: Self = Self(-27);
    pub const ECDH_SS_HKDF_512: Self = Self(-28);
    pub const ECDH_ES_A128KW: Self = Self(-29);
    pub const ECDH_ES_A192KW: Self = Self(-30);
    pub const ECDH_ES_A256KW: Self = Self(-31);
    pub const ECDH_SS_A128KW: Self = Self(-32);
    pub const ECDH_SS_A192KW: Self = Self(-33);
    pub const ECDH_SS_A256KW: Self = Self(-34);

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match REGISTRY.get(&self.0) {
            Some(d) => write!(f, "{} ({})", d.name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Which structural context an algorithm is valid in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlgorithmClass {
    Signature,
    Mac,
    ContentEncryption,
    /// The recipient's static key is the layer key.
    Direct,
    /// Layer key = HKDF(shared secret, KDF context).
    DirectHkdf,
    /// Layer key wrapped under the recipient's key (or a nested-recipient key).
    KeyWrap,
    /// Ephemeral-static ECDH; derived key is the layer key.
    EcdhEs,
    /// Static-static ECDH; derived key is the layer key.
    EcdhSs,
    /// Ephemeral-static ECDH; derived key wraps the layer key.
    EcdhEsKeyWrap,
    /// Static-static ECDH; derived key wraps the layer key.
    EcdhSsKeyWrap,
}

impl AlgorithmClass {
    pub const KEY_MANAGEMENT: &'static [AlgorithmClass] = &[
        AlgorithmClass::Direct,
        AlgorithmClass::DirectHkdf,
        AlgorithmClass::KeyWrap,
        AlgorithmClass::EcdhEs,
        AlgorithmClass::EcdhSs,
        AlgorithmClass::EcdhEsKeyWrap,
        AlgorithmClass::EcdhSsKeyWrap,
    ];

    /// The recipient establishes the layer key itself (no wrapped payload).
    pub fn determines_layer_key(self) -> bool {
        matches!(
            self,
            AlgorithmClass::Direct | AlgorithmClass::DirectHkdf | AlgorithmClass::EcdhEs | AlgorithmClass::EcdhSs
        )
    }

    pub fn is_key_agreement(self) -> bool {
        matches!(
            self,
            AlgorithmClass::EcdhEs
                | AlgorithmClass::EcdhSs
                | AlgorithmClass::EcdhEsKeyWrap
                | AlgorithmClass::EcdhSsKeyWrap
        )
    }

    pub fn is_static_static(self) -> bool {
        matches!(self, AlgorithmClass::EcdhSs | AlgorithmClass::EcdhSsKeyWrap)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

/// Registry entry: identification plus the key contract of one algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmDescriptor {
    pub id: AlgorithmId,
    pub name: &'static str,
    pub class: AlgorithmClass,
    pub key_type: KeyType,
    /// Accepted curves; empty for symmetric algorithms.
    pub curves: &'static [Curve],
    /// Required symmetric key length in bytes; 0 when any length is accepted.
    pub key_len: usize,
    /// AEAD or MAC tag length in bytes.
    pub tag_len: usize,
    /// AEAD nonce length in bytes.
    pub nonce_len: usize,
    pub hash: Option<HashAlgorithm>,
    /// Key-wrap algorithm used by ECDH+KW algorithms.
    pub wrap: Option<AlgorithmId>,
}

impl AlgorithmDescriptor {
    const fn new(id: AlgorithmId, name: &'static str, class: AlgorithmClass, key_type: KeyType) -> Self {
        Self {
            id,
            name,
            class,
            key_type,
            curves: &[],
            key_len: 0,
            tag_len: 0,
            nonce_len: 0,
            hash: None,
            wrap: None,
        }
    }

    const fn curves(mut self, curves: &'static [Curve]) -> Self {
        self.curves = curves;
        self
    }

    const fn key_len(mut self, len: usize) -> Self {
        self.key_len = len;
        self
    }

    const fn aead(mut self, tag_len: usize, nonce_len: usize) -> Self {
        self.tag_len = tag_len;
        self.nonce_len = nonce_len;
        self
    }

    const fn tag(mut self, tag_len: usize) -> Self {
        self.tag_len = tag_len;
        self
    }

    const fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = Some(hash);
        self
    }

    const fn wrap(mut self, wrap: AlgorithmId) -> Self {
        self.wrap = Some(wrap);
        self
    }

    /// Fails with `UnknownAlgorithm` unless this algorithm belongs to one of `classes`.
    pub fn expect_class(&self, classes: &[AlgorithmClass]) -> Result<&Self> {
        if classes.contains(&self.class) {
            Ok(self)
        } else {
            Err(CoseError::UnknownAlgorithm(format!(
                "{} is a {:?} algorithm, not valid here",
                self.id, self.class
            )))
        }
    }
}

const EC2_CURVES: &[Curve] = &[Curve::P256, Curve::P384, Curve::P521];

static REGISTRY: Lazy<BTreeMap<i64, AlgorithmDescriptor>> = Lazy::new(|| {
    use AlgorithmClass as C;
    use HashAlgorithm as H;
    type D = AlgorithmDescriptor;
    type A = AlgorithmId;

    let entries = [
        D::new(A::ES256, "ES256", C::Signature, KeyType::Ec2).curves(&[Curve::P256]).hash(H::Sha256),
        D::new(A::ES384, "ES384", C::Signature, KeyType::Ec2).curves(&[Curve::P384]).hash(H::Sha384),
        D::new(A::ES512, "ES512", C::Signature, KeyType::Ec2).curves(&[Curve::P521]).hash(H::Sha512),
        D::new(A::EDDSA, "EdDSA", C::Signature, KeyType::Okp).curves(&[Curve::Ed25519]),
        D::new(A::HMAC_256_64, "HMAC 256/64", C::Mac, KeyType::Symmetric).key_len(32).tag(8).hash(H::Sha256),
        D::new(A::HMAC_256_256, "HMAC 256/256", C::Mac, KeyType::Symmetric).key_len(32).tag(32).hash(H::Sha256),
        D::new(A::HMAC_384_384, "HMAC 384/384", C::Mac, KeyType::Symmetric).key_len(48).tag(48).hash(H::Sha384),
        D::new(A::HMAC_512_512, "HMAC 512/512", C::Mac, KeyType::Symmetric).key_len(64).tag(64).hash(H::Sha512),
        D::new(A::A128GCM, "A128GCM", C::ContentEncryption, KeyType::Symmetric).key_len(16).aead(16, 12),
        D::new(A::A192GCM, "A192GCM", C::ContentEncryption, KeyType::Symmetric).key_len(24).aead(16, 12),
        D::new(A::A256GCM, "A256GCM", C::ContentEncryption, KeyType::Symmetric).key_len(32).aead(16, 12),
        D::new(A::AES_CCM_16_64_128, "AES-CCM-16-64-128", C::ContentEncryption, KeyType::Symmetric).key_len(16).aead(8, 13),
        D::new(A::AES_CCM_16_64_256, "AES-CCM-16-64-256", C::ContentEncryption, KeyType::Symmetric).key_len(32).aead(8, 13),
        D::new(A::AES_CCM_64_64_128, "AES-CCM-64-64-128", C::ContentEncryption, KeyType::Symmetric).key_len(16).aead(8, 7),
        D::new(A::AES_CCM_64_64_256, "AES-CCM-64-64-256", C::ContentEncryption, KeyType::Symmetric).key_len(32).aead(8, 7),
        D::new(A::AES_CCM_16_128_128, "AES-CCM-16-128-128", C::ContentEncryption, KeyType::Symmetric).key_len(16).aead(16, 13),
        D::new(A::AES_CCM_16_128_256, "AES-CCM-16-128-256", C::ContentEncryption, KeyType::Symmetric).key_len(32).aead(16, 13),
        D::new(A::AES_CCM_64_128_128, "AES-CCM-64-128-128", C::ContentEncryption, KeyType::Symmetric).key_len(16).aead(16, 7),
        D::new(A::AES_CCM_64_128_256, "AES-CCM-64-128-256", C::ContentEncryption, KeyType::Symmetric).key_len(32).aead(16, 7),
        D::new(A::DIRECT, "direct", C::Direct, KeyType::Symmetric),
        D::new(A::DIRECT_HKDF_SHA_256, "direct+HKDF-SHA-256", C::DirectHkdf, KeyType::Symmetric).hash(H::Sha256),
        D::new(A::DIRECT_HKDF_SHA_512, "direct+HKDF-SHA-512", C::DirectHkdf, KeyType::Symmetric).hash(H::Sha512),
        D::new(A::A128KW, "A128KW", C::KeyWrap, KeyType::Symmetric).key_len(16),
        D::new(A::A192KW, "A192KW", C::KeyWrap, KeyType::Symmetric).key_len(24),
        D::new(A::A256KW, "A256KW", C::KeyWrap, KeyType::Symmetric).key_len(32),
        D::new(A::ECDH_ES_HKDF_256, "ECDH-ES + HKDF-256", C::EcdhEs, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256),
        D::new(A::ECDH_ES_HKDF_512, "ECDH-ES + HKDF-512", C::EcdhEs, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha512),
        D::new(A::ECDH_SS_HKDF_256, "ECDH-SS + HKDF-256", C::EcdhSs, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256),
        D::new(A::ECDH_SS_HKDF_512, "ECDH-SS + HKDF-512", C::EcdhSs, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha512),
        D::new(A::ECDH_ES_A128KW, "ECDH-ES + A128KW", C::EcdhEsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A128KW),
        D::new(A::ECDH_ES_A192KW, "ECDH-ES + A192KW", C::EcdhEsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A192KW),
        D::new(A::ECDH_ES_A256KW, "ECDH-ES + A256KW", C::EcdhEsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A256KW),
        D::new(A::ECDH_SS_A128KW, "ECDH-SS + A128KW", C::EcdhSsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A128KW),
        D::new(A::ECDH_SS_A192KW, "ECDH-SS + A192KW", C::EcdhSsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A192KW),
        D::new(A::ECDH_SS_A256KW, "ECDH-SS + A256KW", C::EcdhSsKeyWrap, KeyType::Ec2).curves(EC2_CURVES).hash(H::Sha256).wrap(A::A256KW),
    ];

    entries.into_iter().map(|d| (d.id.value(), d)).collect()
});

/// Look up a registered algorithm.
pub fn lookup(id: AlgorithmId) -> Result<&'static AlgorithmDescriptor> {
    REGISTRY
        .get(&id.value())
        .ok_or_else(|| CoseError::UnknownAlgorithm(id.value().to_string()))
}

/// Look up a registered algorithm that must belong to one of `classes`.
pub fn lookup_in(id: AlgorithmId, classes: &[AlgorithmClass]) -> Result<&'static AlgorithmDescriptor> {
    lookup(id)?.expect_class(classes)
}

/// Check `key` against the contract of `desc` for operation `op`.
///
/// Must run before any primitive call: backends are not required to re-validate.
pub fn validate(desc: &AlgorithmDescriptor, key: &CoseKey, op: KeyOperation) -> Result<()> {
    if key.kty != desc.key_type {
        return Err(CoseError::IncompatibleKey(format!(
            "{} requires a {:?} key, got {:?}",
            desc.name, desc.key_type, key.kty
        )));
    }

    if let Some(alg) = key.alg {
        if alg != desc.id {
            return Err(CoseError::IncompatibleKey(format!(
                "key is restricted to algorithm {alg}, cannot be used with {}",
                desc.name
            )));
        }
    }

    if !key.permits(op) {
        return Err(CoseError::IncompatibleKey(format!(
            "key operations {:?} do not allow {op:?}",
            key.key_ops
        )));
    }

    match key.kty {
        KeyType::Symmetric => {
            let k = key
                .k
                .as_deref()
                .ok_or_else(|| CoseError::IncompatibleKey("symmetric key has no key bytes".to_string()))?;
            if desc.key_len != 0 && k.len() != desc.key_len {
                return Err(CoseError::IncompatibleKey(format!(
                    "{} requires a {}-byte key, got {} bytes",
                    desc.name,
                    desc.key_len,
                    k.len()
                )));
            }
        }
        KeyType::Ec2 | KeyType::Okp => {
            let crv = key
                .crv
                .ok_or_else(|| CoseError::IncompatibleKey("key has no curve".to_string()))?;
            if !desc.curves.contains(&crv) {
                return Err(CoseError::IncompatibleKey(format!(
                    "{} does not accept curve {crv:?}",
                    desc.name
                )));
            }
            let needs_private = matches!(op, KeyOperation::Sign);
            if needs_private && key.d.is_none() {
                return Err(CoseError::IncompatibleKey("operation requires a private key".to_string()));
            }
            for coord in [key.x.as_deref(), key.y.as_deref(), key.d.as_deref()].into_iter().flatten() {
                if coord.len() != crv.coordinate_len() {
                    return Err(CoseError::IncompatibleKey(format!(
                        "key material length {} does not match curve {crv:?}",
                        coord.len()
                    )));
                }
            }
        }
    }

    Ok(())
}
