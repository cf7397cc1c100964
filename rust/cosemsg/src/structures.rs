// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte structures that are actually signed, MACed, used as AEAD associated data, or
//! fed to a key derivation.
//!
//! Encode and decode paths both go through [`StructureBuilder`], so the layout cannot
//! drift between signer and verifier.

use minicbor::Encoder;
use tracing::trace;

use cosemsg_abstractions::{AlgorithmId, CoseError, EffectiveHeaders, HeaderParam, Result};

/// Context string of a structure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StructureContext {
    Signature,
    Signature1,
    Encrypt,
    Encrypt0,
    EncRecipient,
    MacRecipient,
    RecRecipient,
    Mac,
    Mac0,
}

impl StructureContext {
    pub const fn as_str(self) -> &'static str {
        match self {
            StructureContext::Signature => "Signature",
            StructureContext::Signature1 => "Signature1",
            StructureContext::Encrypt => "Encrypt",
            StructureContext::Encrypt0 => "Encrypt0",
            StructureContext::EncRecipient => "Enc_Recipient",
            StructureContext::MacRecipient => "Mac_Recipient",
            StructureContext::RecRecipient => "Rec_Recipient",
            StructureContext::Mac => "MAC",
            StructureContext::Mac0 => "MAC0",
        }
    }
}

impl std::fmt::Display for StructureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn wrong_context(kind: &str, context: StructureContext) -> CoseError {
    CoseError::MalformedEncoding(format!("\"{context}\" is not a {kind} structure context"))
}

/// Builds the canonical structures of RFC 9052 section 4.4, 5.3 and 6.3.
pub struct StructureBuilder;

impl StructureBuilder {
    /// `Sig_structure`.
    ///
    /// `sign_protected` is the signer's protected bucket and must be present exactly when
    /// `context` is [`StructureContext::Signature`].
    pub fn signature(
        context: StructureContext,
        body_protected: &[u8],
        sign_protected: Option<&[u8]>,
        external_aad: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32 + body_protected.len() + external_aad.len() + payload.len());
        let mut enc = Encoder::new(&mut out);
        match (context, sign_protected) {
            (StructureContext::Signature, Some(sign_protected)) => {
                enc.array(5)?;
                enc.str(context.as_str())?;
                enc.bytes(body_protected)?;
                enc.bytes(sign_protected)?;
            }
            (StructureContext::Signature1, None) => {
                enc.array(4)?;
                enc.str(context.as_str())?;
                enc.bytes(body_protected)?;
            }
            (StructureContext::Signature | StructureContext::Signature1, _) => {
                return Err(CoseError::MalformedEncoding(format!(
                    "\"{context}\" structure signer protected header mismatch"
                )))
            }
            _ => return Err(wrong_context("signature", context)),
        }
        enc.bytes(external_aad)?;
        enc.bytes(payload)?;

        trace!(context = context.as_str(), len = out.len(), "built Sig_structure");
        Ok(out)
    }

    /// `Enc_structure`, used as AEAD associated data.
    pub fn encryption(context: StructureContext, protected: &[u8], external_aad: &[u8]) -> Result<Vec<u8>> {
        if !matches!(
            context,
            StructureContext::Encrypt
                | StructureContext::Encrypt0
                | StructureContext::EncRecipient
                | StructureContext::MacRecipient
                | StructureContext::RecRecipient
        ) {
            return Err(wrong_context("encryption", context));
        }

        let mut out = Vec::with_capacity(24 + protected.len() + external_aad.len());
        let mut enc = Encoder::new(&mut out);
        enc.array(3)?;
        enc.str(context.as_str())?;
        enc.bytes(protected)?;
        enc.bytes(external_aad)?;

        trace!(context = context.as_str(), len = out.len(), "built Enc_structure");
        Ok(out)
    }

    /// `MAC_structure`.
    pub fn mac(context: StructureContext, protected: &[u8], external_aad: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
        if !matches!(context, StructureContext::Mac | StructureContext::Mac0) {
            return Err(wrong_context("MAC", context));
        }

        let mut out = Vec::with_capacity(16 + protected.len() + external_aad.len() + payload.len());
        let mut enc = Encoder::new(&mut out);
        enc.array(4)?;
        enc.str(context.as_str())?;
        enc.bytes(protected)?;
        enc.bytes(external_aad)?;
        enc.bytes(payload)?;

        trace!(context = context.as_str(), len = out.len(), "built MAC_structure");
        Ok(out)
    }
}

/// `PartyInfo` of a KDF context. Absent fields encode as `nil`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyInfo {
    pub identity: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub other: Option<Vec<u8>>,
}

/// `COSE_KDF_Context` (RFC 9053 section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfContext {
    pub algorithm: AlgorithmId,
    pub party_u: PartyInfo,
    pub party_v: PartyInfo,
    /// keyDataLength, in bits.
    pub key_data_length: u64,
    /// Protected header bytes of the recipient layer.
    pub protected: Vec<u8>,
}

impl KdfContext {
    /// Context for a recipient layer, with party information read from its headers.
    ///
    /// `algorithm` and `key_len` describe the key being derived: the content or MAC
    /// algorithm for direct derivation, the key-wrap algorithm otherwise.
    pub fn for_recipient(
        algorithm: AlgorithmId,
        key_len: usize,
        protected: &[u8],
        headers: &EffectiveHeaders<'_>,
    ) -> Self {
        let field = |p: HeaderParam| headers.get_bytes(p).map(<[u8]>::to_vec);
        Self {
            algorithm,
            party_u: PartyInfo {
                identity: field(HeaderParam::PartyUIdentity),
                nonce: field(HeaderParam::PartyUNonce),
                other: field(HeaderParam::PartyUOther),
            },
            party_v: PartyInfo {
                identity: field(HeaderParam::PartyVIdentity),
                nonce: field(HeaderParam::PartyVNonce),
                other: field(HeaderParam::PartyVOther),
            },
            key_data_length: key_len as u64 * 8,
            protected: protected.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32 + self.protected.len());
        let mut enc = Encoder::new(&mut out);
        enc.array(4)?;
        enc.i64(self.algorithm.value())?;
        for party in [&self.party_u, &self.party_v] {
            enc.array(3)?;
            for field in [&party.identity, &party.nonce, &party.other] {
                match field {
                    Some(b) => enc.bytes(b)?,
                    None => enc.null()?,
                };
            }
        }
        enc.array(2)?;
        enc.u64(self.key_data_length)?;
        enc.bytes(&self.protected)?;
        Ok(out)
    }
}
