// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use cosemsg_abstractions::{CoseKey, PrimitiveBackend, Result};

use crate::{CoseEncrypt, CoseEncrypt0, CoseMac, CoseMac0, CoseMessage, CoseSign1, DecodeOptions};

/// Encode a message as tagged CBOR.
pub fn encode(message: &CoseMessage) -> Result<Vec<u8>> {
    message.to_cbor()
}

/// Decode any COSE message accepted by `options`.
pub fn decode(input: &[u8], options: &DecodeOptions) -> Result<CoseMessage> {
    CoseMessage::from_cbor(input, options)
}

/// Decode and verify a COSE_Sign1, returning the payload only once the signature checks out.
///
/// For a detached payload the returned bytes are `options.detached_content`.
pub fn verify_sign1(
    input: &[u8],
    backend: &dyn PrimitiveBackend,
    key: &CoseKey,
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    let message = CoseSign1::from_cbor(input, options)?;
    message.verify(backend, key, options)?;
    match message.payload {
        Some(payload) => Ok(payload),
        None => Ok(options.detached_content.clone().unwrap_or_default()),
    }
}

/// Decode and decrypt a COSE_Encrypt0.
pub fn decrypt_encrypt0(
    input: &[u8],
    backend: &dyn PrimitiveBackend,
    key: &CoseKey,
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    CoseEncrypt0::from_cbor(input, options)?.decrypt(backend, key, options)
}

/// Decode a COSE_Encrypt, resolve its recipients with `keys` and decrypt.
pub fn decrypt_encrypt(
    input: &[u8],
    backend: &dyn PrimitiveBackend,
    keys: &[CoseKey],
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    CoseEncrypt::from_cbor(input, options)?.decrypt(backend, keys, options)
}

/// Decode and verify a COSE_Mac0, returning the authenticated payload.
pub fn verify_mac0(
    input: &[u8],
    backend: &dyn PrimitiveBackend,
    key: &CoseKey,
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    CoseMac0::from_cbor(input, options)?.verify(backend, key, options)
}

/// Decode a COSE_Mac, resolve its recipients with `keys` and verify the tag.
pub fn verify_mac(
    input: &[u8],
    backend: &dyn PrimitiveBackend,
    keys: &[CoseKey],
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    CoseMac::from_cbor(input, options)?.verify(backend, keys, options)
}
