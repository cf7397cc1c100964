// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared interfaces and datatypes for the COSE message crates.
//!
//! This crate exists to prevent circular dependencies across:
//! - the message layer (`cosemsg`)
//! - primitive providers (`cosemsg-rustcrypto`, and other future backends)
//!
//! It is intentionally kept small and stable: header maps and the header policy table,
//! the algorithm registry, the COSE_Key model, and the primitive backend trait.

pub mod algorithms;
pub mod error;
pub mod header_map;
pub mod header_params;
pub mod key;
pub mod primitives;

pub use algorithms::{
    lookup, lookup_in, validate, AlgorithmClass, AlgorithmDescriptor, AlgorithmId, HashAlgorithm,
};
pub use error::{CoseError, Result};
pub use header_map::{
    EffectiveHeaders, HeaderKey, HeaderMap, HeaderPair, HeaderValue, ProtectedHeader, MAX_HEADER_NESTING,
};
pub use header_params::{HeaderParam, HeaderPolicy, ParamPolicy};
pub use key::{CoseKey, Curve, KeyOperation, KeyType};
pub use primitives::{constant_time_eq, DeriveParams, KeyAgreementInput, PrimitiveBackend, PrimitiveError};
