// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code)]

use cosemsg_abstractions::{lookup, AlgorithmDescriptor, AlgorithmId};

pub(crate) fn h(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

pub(crate) fn desc(id: AlgorithmId) -> &'static AlgorithmDescriptor {
    lookup(id).unwrap()
}
