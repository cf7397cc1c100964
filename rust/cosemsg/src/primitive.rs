// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mapping of backend failures into the message-layer error taxonomy.

use cosemsg_abstractions::{CoseError, PrimitiveError};

/// Failure while producing a message (sign, seal, mac, random, key generation).
pub(crate) fn produce_failure(e: PrimitiveError) -> CoseError {
    match e {
        PrimitiveError::Unsupported(m) => CoseError::UnknownAlgorithm(m),
        PrimitiveError::InvalidKey(m) => CoseError::IncompatibleKey(m),
        PrimitiveError::Failed(m) => CoseError::Primitive(m),
    }
}

/// Failure of the final signature, MAC or AEAD check.
pub(crate) fn check_failure(e: PrimitiveError) -> CoseError {
    match e {
        PrimitiveError::Unsupported(m) => CoseError::UnknownAlgorithm(m),
        PrimitiveError::InvalidKey(m) => CoseError::IncompatibleKey(m),
        PrimitiveError::Failed(_) => CoseError::AuthenticationFailure,
    }
}

/// Failure of an unwrap or derivation step of the recipient chain.
pub(crate) fn key_management_failure(e: PrimitiveError) -> CoseError {
    CoseError::KeyManagementFailure(e.to_string())
}
