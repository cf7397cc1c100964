// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Elliptic-curve signatures (ECDSA, EdDSA), ECDH and key generation.
//!
//! EC2 keys arrive as raw `x`/`y`/`d` coordinates and are turned into SEC1 points here.
//! ECDSA signatures are the fixed-size `r || s` form COSE uses, computed deterministically
//! (RFC 6979).

use zeroize::Zeroizing;

use cosemsg_abstractions::{AlgorithmDescriptor, AlgorithmId, CoseKey, Curve, PrimitiveError};

fn invalid_key<E: std::fmt::Display>(e: E) -> PrimitiveError {
    PrimitiveError::InvalidKey(e.to_string())
}

fn sec1_uncompressed(x: &[u8], y: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + x.len() + y.len());
    out.push(0x04);
    out.extend_from_slice(x);
    out.extend_from_slice(y);
    out
}

macro_rules! nist_curve {
    ($module:ident, $krate:ident) => {
        mod $module {
            use $krate::elliptic_curve::sec1::ToEncodedPoint;
            use signature::{Signer, Verifier};
            use zeroize::Zeroizing;

            use cosemsg_abstractions::PrimitiveError;

            use super::{invalid_key, sec1_uncompressed};

            pub(super) fn sign(d: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
                let key = $krate::ecdsa::SigningKey::from_slice(d).map_err(invalid_key)?;
                let signature: $krate::ecdsa::Signature =
                    key.try_sign(data).map_err(|e| PrimitiveError::Failed(e.to_string()))?;
                Ok(signature.to_bytes().to_vec())
            }

            pub(super) fn verify(x: &[u8], y: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, PrimitiveError> {
                let key = $krate::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_uncompressed(x, y)).map_err(invalid_key)?;
                let Ok(signature) = $krate::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(key.verify(data, &signature).is_ok())
            }

            pub(super) fn ecdh(d: &[u8], x: &[u8], y: &[u8]) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
                let secret = $krate::SecretKey::from_slice(d).map_err(invalid_key)?;
                let public = $krate::PublicKey::from_sec1_bytes(&sec1_uncompressed(x, y)).map_err(invalid_key)?;
                let shared = $krate::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }

            /// Returns `(d, x, y)`.
            pub(super) fn generate() -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), PrimitiveError> {
                let secret = $krate::SecretKey::random(&mut rand_core::OsRng);
                let point = secret.public_key().to_encoded_point(false);
                let (Some(x), Some(y)) = (point.x(), point.y()) else {
                    return Err(PrimitiveError::Failed("generated point is the identity".to_string()));
                };
                Ok((secret.to_bytes().to_vec(), x.to_vec(), y.to_vec()))
            }
        }
    };
}

nist_curve!(nist_p256, p256);
nist_curve!(nist_p384, p384);
nist_curve!(nist_p521, p521);

fn ed25519_bytes(bytes: &[u8]) -> Result<[u8; 32], PrimitiveError> {
    <[u8; 32]>::try_from(bytes).map_err(|_| PrimitiveError::InvalidKey(format!("Ed25519 key must be 32 bytes, got {}", bytes.len())))
}

fn ed25519_sign(d: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    use ed25519_dalek::Signer;
    let key = ed25519_dalek::SigningKey::from_bytes(&ed25519_bytes(d)?);
    Ok(key.sign(data).to_bytes().to_vec())
}

fn ed25519_verify(x: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, PrimitiveError> {
    use ed25519_dalek::Verifier;
    let key = ed25519_dalek::VerifyingKey::from_bytes(&ed25519_bytes(x)?).map_err(invalid_key)?;
    let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(key.verify(data, &signature).is_ok())
}

fn unsupported(alg: &AlgorithmDescriptor, key: &CoseKey) -> PrimitiveError {
    PrimitiveError::Unsupported(format!("{} with curve {:?}", alg.name, key.crv))
}

fn coordinate<'k>(value: &'k Option<Vec<u8>>, name: &str) -> Result<&'k [u8], PrimitiveError> {
    value
        .as_deref()
        .ok_or_else(|| PrimitiveError::InvalidKey(format!("key has no {name}")))
}

pub(crate) fn sign(alg: &AlgorithmDescriptor, key: &CoseKey, data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let d = coordinate(&key.d, "private key (d)")?;
    match (alg.id, key.crv) {
        (AlgorithmId::ES256, Some(Curve::P256)) => nist_p256::sign(d, data),
        (AlgorithmId::ES384, Some(Curve::P384)) => nist_p384::sign(d, data),
        (AlgorithmId::ES512, Some(Curve::P521)) => nist_p521::sign(d, data),
        (AlgorithmId::EDDSA, Some(Curve::Ed25519)) => ed25519_sign(d, data),
        _ => Err(unsupported(alg, key)),
    }
}

pub(crate) fn verify(alg: &AlgorithmDescriptor, key: &CoseKey, data: &[u8], signature: &[u8]) -> Result<bool, PrimitiveError> {
    let x = coordinate(&key.x, "x coordinate")?;
    match (alg.id, key.crv) {
        (AlgorithmId::ES256, Some(Curve::P256)) => nist_p256::verify(x, coordinate(&key.y, "y coordinate")?, data, signature),
        (AlgorithmId::ES384, Some(Curve::P384)) => nist_p384::verify(x, coordinate(&key.y, "y coordinate")?, data, signature),
        (AlgorithmId::ES512, Some(Curve::P521)) => nist_p521::verify(x, coordinate(&key.y, "y coordinate")?, data, signature),
        (AlgorithmId::EDDSA, Some(Curve::Ed25519)) => ed25519_verify(x, data, signature),
        _ => Err(unsupported(alg, key)),
    }
}

/// Raw ECDH shared secret (the x coordinate of the shared point).
pub(crate) fn agree(private_key: &CoseKey, public_key: &CoseKey) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
    if private_key.crv != public_key.crv {
        return Err(PrimitiveError::InvalidKey(format!(
            "key agreement between curves {:?} and {:?}",
            private_key.crv, public_key.crv
        )));
    }
    let d = coordinate(&private_key.d, "private key (d)")?;
    let x = coordinate(&public_key.x, "x coordinate")?;
    let y = coordinate(&public_key.y, "y coordinate")?;
    match private_key.crv {
        Some(Curve::P256) => nist_p256::ecdh(d, x, y),
        Some(Curve::P384) => nist_p384::ecdh(d, x, y),
        Some(Curve::P521) => nist_p521::ecdh(d, x, y),
        other => Err(PrimitiveError::Unsupported(format!("ECDH on curve {other:?}"))),
    }
}

pub(crate) fn generate(curve: Curve) -> Result<CoseKey, PrimitiveError> {
    let (d, x, y) = match curve {
        Curve::P256 => nist_p256::generate()?,
        Curve::P384 => nist_p384::generate()?,
        Curve::P521 => nist_p521::generate()?,
        other => return Err(PrimitiveError::Unsupported(format!("key generation on curve {other:?}"))),
    };
    Ok(CoseKey::ec2(curve, x, y, Some(d)))
}
