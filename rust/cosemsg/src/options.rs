// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use cosemsg_abstractions::HeaderPolicy;

use crate::message::MessageKind;

/// Recipient trees nested deeper than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_RECIPIENT_DEPTH: usize = 8;

/// How the leading CBOR tag of a message is treated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TagPolicy {
    /// The message must carry one of the six COSE message tags.
    #[default]
    Required,
    /// A tag is checked when present. An untagged message is accepted only when
    /// [`DecodeOptions::expected`] names exactly one kind.
    Optional,
    /// The message must be untagged and is decoded as the given kind.
    Untagged(MessageKind),
}

/// Options for decoding and verifying messages.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub tag_policy: TagPolicy,
    /// Accepted message kinds. Empty accepts all six.
    pub expected: Vec<MessageKind>,
    pub header_policy: HeaderPolicy,
    /// External associated data bound into the signature, MAC or AEAD check.
    pub external_aad: Vec<u8>,
    /// Content for messages whose payload or ciphertext slot is `nil`.
    pub detached_content: Option<Vec<u8>>,
    pub max_recipient_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            tag_policy: TagPolicy::default(),
            expected: Vec::new(),
            header_policy: HeaderPolicy::default(),
            external_aad: Vec::new(),
            detached_content: None,
            max_recipient_depth: DEFAULT_MAX_RECIPIENT_DEPTH,
        }
    }
}

impl DecodeOptions {
    pub fn with_tag_policy(mut self, tag_policy: TagPolicy) -> Self {
        self.tag_policy = tag_policy;
        self
    }

    pub fn expecting(mut self, kind: MessageKind) -> Self {
        if !self.expected.contains(&kind) {
            self.expected.push(kind);
        }
        self
    }

    pub fn with_header_policy(mut self, header_policy: HeaderPolicy) -> Self {
        self.header_policy = header_policy;
        self
    }

    pub fn with_external_aad(mut self, external_aad: impl Into<Vec<u8>>) -> Self {
        self.external_aad = external_aad.into();
        self
    }

    pub fn with_detached_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.detached_content = Some(content.into());
        self
    }

    pub fn with_max_recipient_depth(mut self, depth: usize) -> Self {
        self.max_recipient_depth = depth;
        self
    }

    pub(crate) fn accepts(&self, kind: MessageKind) -> bool {
        self.expected.is_empty() || self.expected.contains(&kind)
    }
}
