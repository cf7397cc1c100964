// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! HMAC tags and HKDF key derivation.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use cosemsg_abstractions::{AlgorithmDescriptor, DeriveParams, HashAlgorithm, KeyAgreementInput, PrimitiveError};

use crate::ec;

fn hmac_tag<M: Mac>(mut mac: M, data: &[u8]) -> Vec<u8> {
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HMAC over `data`, truncated to the algorithm's tag length.
pub(crate) fn mac(alg: &AlgorithmDescriptor, key: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let invalid = |_| PrimitiveError::InvalidKey("HMAC key rejected".to_string());
    let mut tag = match alg.hash {
        Some(HashAlgorithm::Sha256) => hmac_tag(<Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid)?, data),
        Some(HashAlgorithm::Sha384) => hmac_tag(<Hmac<Sha384> as Mac>::new_from_slice(key).map_err(invalid)?, data),
        Some(HashAlgorithm::Sha512) => hmac_tag(<Hmac<Sha512> as Mac>::new_from_slice(key).map_err(invalid)?, data),
        None => return Err(PrimitiveError::Unsupported(format!("{} has no HMAC hash", alg.name))),
    };
    if alg.tag_len != 0 && alg.tag_len < tag.len() {
        tag.truncate(alg.tag_len);
    }
    Ok(tag)
}

fn expand(hash: HashAlgorithm, salt: Option<&[u8]>, ikm: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), PrimitiveError> {
    let len = okm.len();
    let too_long = |_| PrimitiveError::Failed(format!("HKDF cannot produce {len} bytes"));
    match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::new(salt, ikm).expand(info, okm).map_err(too_long),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::new(salt, ikm).expand(info, okm).map_err(too_long),
        HashAlgorithm::Sha512 => Hkdf::<Sha512>::new(salt, ikm).expand(info, okm).map_err(too_long),
    }
}

/// HKDF extract-and-expand over either supplied bytes or a fresh ECDH shared secret.
pub(crate) fn derive(params: &DeriveParams<'_>) -> Result<Vec<u8>, PrimitiveError> {
    let hash = params
        .algorithm
        .hash
        .ok_or_else(|| PrimitiveError::Unsupported(format!("{} does not specify a KDF hash", params.algorithm.name)))?;

    let shared;
    let ikm: &[u8] = match &params.input {
        KeyAgreementInput::Ecdh { private_key, public_key } => {
            shared = ec::agree(private_key, public_key)?;
            &shared
        }
        KeyAgreementInput::Shared(bytes) => *bytes,
    };

    let mut okm = Zeroizing::new(vec![0u8; params.output_len]);
    let salt = params.salt.filter(|s| !s.is_empty());
    expand(hash, salt, ikm, params.context, &mut okm)?;
    Ok(okm.to_vec())
}
