// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error taxonomy shared by every COSE message operation.
//!
//! Each variant is a distinct, inspectable outcome. Callers (audit code in particular)
//! must be able to tell "malformed message" from "authentication failed" from
//! "no usable key", so nothing here is folded into a generic failure.

/// Errors produced while building, parsing, verifying or decrypting COSE messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoseError {
    /// CBOR-level structural violation (wrong arity, wrong item type, trailing bytes).
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// A header map could not be decoded (non-map input, duplicate keys, bad value types).
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The message tag is missing, unknown, or not one of the expected kinds.
    #[error("tag mismatch: expected {expected}, found {}", describe_tag(.found))]
    TagMismatch { expected: String, found: Option<u64> },

    /// A header parameter violates the header policy (protected-only parameter
    /// found unprotected, conflicting duplicates, unknown critical parameter).
    #[error("header policy violation: {0}")]
    HeaderPolicyViolation(String),

    /// The algorithm identifier is not registered, or not registered for this context.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Key type, curve, size, or allowed operations do not satisfy the algorithm.
    #[error("incompatible key: {0}")]
    IncompatibleKey(String),

    #[error("message has no signers")]
    MissingSigner,

    #[error("message has no recipients")]
    MissingRecipient,

    /// No path in the recipient tree matches the available key material.
    #[error("no recipient matches the available key material")]
    RecipientNotResolvable,

    /// An unwrap or derivation step of the recipient chain failed.
    #[error("key management failure: {0}")]
    KeyManagementFailure(String),

    /// Signature, MAC, or AEAD check failed.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// A primitive backend failed while producing a message (sign, seal, random).
    #[error("primitive failure: {0}")]
    Primitive(String),
}

impl CoseError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CoseError::MalformedEncoding(_) => "MALFORMED_ENCODING",
            CoseError::MalformedHeader(_) => "MALFORMED_HEADER",
            CoseError::TagMismatch { .. } => "TAG_MISMATCH",
            CoseError::HeaderPolicyViolation(_) => "HEADER_POLICY_VIOLATION",
            CoseError::UnknownAlgorithm(_) => "UNKNOWN_ALGORITHM",
            CoseError::IncompatibleKey(_) => "INCOMPATIBLE_KEY",
            CoseError::MissingSigner => "MISSING_SIGNER",
            CoseError::MissingRecipient => "MISSING_RECIPIENT",
            CoseError::RecipientNotResolvable => "RECIPIENT_NOT_RESOLVABLE",
            CoseError::KeyManagementFailure(_) => "KEY_MANAGEMENT_FAILURE",
            CoseError::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            CoseError::Primitive(_) => "PRIMITIVE_FAILURE",
        }
    }

    /// Helper to normalize CBOR decoding failures into `CoseError::MalformedEncoding`.
    pub fn cbor<E: std::fmt::Display>(e: E) -> Self {
        Self::MalformedEncoding(e.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for CoseError {
    fn from(e: minicbor::encode::Error<E>) -> Self {
        Self::MalformedEncoding(format!("failed to encode CBOR: {e}"))
    }
}

fn describe_tag(found: impl std::borrow::Borrow<Option<u64>>) -> String {
    match found.borrow() {
        Some(tag) => format!("tag {tag}"),
        None => "no tag".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, CoseError>;
