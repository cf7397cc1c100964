// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recipient chains (COSE_recipient trees).
//!
//! A layer key (the content key of an Encrypt/Mac message, or the KEK of a key-wrap
//! recipient) is delivered to each recipient of that layer by one of:
//! - direct: the recipient's key is the layer key
//! - direct+HKDF: the layer key is derived from the recipient's key
//! - key wrap: the layer key is wrapped under the recipient's key, which may itself be
//!   delivered by nested recipients
//! - ECDH-ES/SS: the layer key is derived from a key agreement
//! - ECDH-ES/SS + key wrap: the layer key is wrapped under a key-agreement derived KEK
//!
//! Trees are built top-down and resolved bottom-up: a node's own key is established by
//! its children before the node's unwrap step runs.

use minicbor::Decoder;
use tracing::debug;
use zeroize::Zeroizing;

use cosemsg_abstractions::{
    lookup_in, validate, AlgorithmClass, AlgorithmDescriptor, AlgorithmId, CoseError, CoseKey, DeriveParams,
    EffectiveHeaders, HeaderKey, HeaderMap, HeaderPair, HeaderParam, HeaderPolicy, KeyAgreementInput, KeyOperation,
    KeyType, PrimitiveBackend, Result,
};

use crate::cbor::{self, VecEncoder};
use crate::options::DEFAULT_MAX_RECIPIENT_DEPTH;
use crate::primitive::{key_management_failure, produce_failure};
use crate::structures::KdfContext;

/// Size of generated salts and PartyU nonces.
const GENERATED_NONCE_LEN: usize = 32;

/// One `COSE_recipient`: `[protected, unprotected, ciphertext, ?recipients]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientNode {
    pub headers: HeaderPair,
    /// Wrapped layer key; empty for recipients that establish the key themselves.
    pub ciphertext: Vec<u8>,
    pub recipients: Vec<RecipientNode>,
}

impl RecipientNode {
    pub fn key_id(&self) -> Option<&[u8]> {
        self.headers
            .protected
            .map()
            .key_id()
            .or_else(|| self.headers.unprotected.key_id())
    }

    fn encode(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(if self.recipients.is_empty() { 3 } else { 4 })?;
        cbor::write_header_pair(enc, &self.headers)?;
        enc.bytes(&self.ciphertext)?;
        if !self.recipients.is_empty() {
            encode_recipients(enc, &self.recipients)?;
        }
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, depth: usize, max_depth: usize) -> Result<Self> {
        let len = cbor::read_array(dec, "COSE_recipient", &[3, 4])?;
        let headers = cbor::read_header_pair(dec)?;
        let ciphertext = cbor::read_bstr_or_nil(dec, "recipient ciphertext")?.unwrap_or_default();
        let recipients = if len == 4 {
            let nested = decode_recipients(dec, depth + 1, max_depth)?;
            if nested.is_empty() {
                return Err(CoseError::MalformedEncoding("nested recipients array is empty".to_string()));
            }
            nested
        } else {
            Vec::new()
        };
        Ok(Self {
            headers,
            ciphertext,
            recipients,
        })
    }
}

pub(crate) fn encode_recipients(enc: &mut VecEncoder<'_>, nodes: &[RecipientNode]) -> Result<()> {
    enc.array(nodes.len() as u64)?;
    for node in nodes {
        node.encode(enc)?;
    }
    Ok(())
}

/// Decode a recipients array at tree depth `depth` (top level is 1).
pub(crate) fn decode_recipients(dec: &mut Decoder<'_>, depth: usize, max_depth: usize) -> Result<Vec<RecipientNode>> {
    if depth > max_depth {
        return Err(CoseError::MalformedEncoding(format!(
            "recipient tree is deeper than {max_depth} levels"
        )));
    }
    let len = dec
        .array()
        .map_err(|e| CoseError::MalformedEncoding(format!("recipients is not an array: {e}")))?
        .ok_or_else(|| CoseError::MalformedEncoding("indefinite-length arrays are not supported".to_string()))?;
    let mut out = Vec::with_capacity(len.min(16) as usize);
    for _ in 0..len {
        out.push(RecipientNode::decode(dec, depth, max_depth)?);
    }
    Ok(out)
}

/// How a recipient should be built.
#[derive(Debug, Clone)]
pub struct RecipientSpec {
    pub algorithm: AlgorithmId,
    /// Recipient key: symmetric for direct and key wrap, the recipient's public key
    /// for key agreement.
    pub key: Option<CoseKey>,
    /// Sender static private key, for ECDH-SS.
    pub sender_key: Option<CoseKey>,
    /// Identify the ECDH-SS sender key by kid (-3) instead of embedding it (-2).
    pub sender_key_by_id: bool,
    pub protected: HeaderMap,
    pub unprotected: HeaderMap,
    /// Nested recipients delivering this recipient's key-wrap KEK.
    pub recipients: Vec<RecipientSpec>,
}

impl RecipientSpec {
    pub fn new(algorithm: AlgorithmId) -> Self {
        Self {
            algorithm,
            key: None,
            sender_key: None,
            sender_key_by_id: false,
            protected: HeaderMap::new(),
            unprotected: HeaderMap::new(),
            recipients: Vec::new(),
        }
    }

    pub fn direct(key: CoseKey) -> Self {
        Self::new(AlgorithmId::DIRECT).with_key(key)
    }

    pub fn key_wrap(algorithm: AlgorithmId, kek: CoseKey) -> Self {
        Self::new(algorithm).with_key(kek)
    }

    pub fn ecdh_es(algorithm: AlgorithmId, recipient_public: CoseKey) -> Self {
        Self::new(algorithm).with_key(recipient_public)
    }

    pub fn ecdh_ss(algorithm: AlgorithmId, sender: CoseKey, recipient_public: CoseKey) -> Self {
        Self::new(algorithm).with_key(recipient_public).with_sender_key(sender)
    }

    pub fn with_key(mut self, key: CoseKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_sender_key(mut self, sender: CoseKey) -> Self {
        self.sender_key = Some(sender);
        self
    }

    pub fn with_sender_key_id(mut self) -> Self {
        self.sender_key_by_id = true;
        self
    }

    pub fn with_protected(mut self, protected: HeaderMap) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_unprotected(mut self, unprotected: HeaderMap) -> Self {
        self.unprotected = unprotected;
        self
    }

    pub fn with_recipient(mut self, recipient: RecipientSpec) -> Self {
        self.recipients.push(recipient);
        self
    }

    fn require_key(&self) -> Result<&CoseKey> {
        self.key
            .as_ref()
            .ok_or_else(|| CoseError::IncompatibleKey(format!("recipient {} has no key", self.algorithm)))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    Produce,
    Consume,
}

/// Key operation the layer key is used for.
fn layer_operation(target: &AlgorithmDescriptor, direction: Direction) -> KeyOperation {
    match (target.class, direction) {
        (AlgorithmClass::ContentEncryption, Direction::Produce) => KeyOperation::Encrypt,
        (AlgorithmClass::ContentEncryption, Direction::Consume) => KeyOperation::Decrypt,
        (AlgorithmClass::Mac, Direction::Produce) => KeyOperation::MacCreate,
        (AlgorithmClass::Mac, Direction::Consume) => KeyOperation::MacVerify,
        (_, Direction::Produce) => KeyOperation::WrapKey,
        (_, Direction::Consume) => KeyOperation::UnwrapKey,
    }
}

/// A direct key is the layer key, so it may be bound to either `direct` or the layer algorithm.
fn validate_direct_key<'k>(
    direct: &AlgorithmDescriptor,
    target: &AlgorithmDescriptor,
    key: &'k CoseKey,
    op: KeyOperation,
) -> Result<&'k [u8]> {
    if key.kty != KeyType::Symmetric {
        return Err(CoseError::IncompatibleKey(format!("{} requires a symmetric key", direct.name)));
    }
    if let Some(alg) = key.alg {
        if alg != direct.id && alg != target.id {
            return Err(CoseError::IncompatibleKey(format!(
                "key is restricted to algorithm {alg}, cannot be used with {}",
                direct.name
            )));
        }
    }
    if !key.permits(op) {
        return Err(CoseError::IncompatibleKey(format!(
            "key operations {:?} do not allow {op:?}",
            key.key_ops
        )));
    }
    let k = key
        .symmetric_bytes()
        .ok_or_else(|| CoseError::IncompatibleKey("symmetric key has no key bytes".to_string()))?;
    if target.key_len != 0 && k.len() != target.key_len {
        return Err(CoseError::IncompatibleKey(format!(
            "{} requires a {}-byte key, got {} bytes",
            target.name,
            target.key_len,
            k.len()
        )));
    }
    Ok(k)
}

fn wrap_descriptor(desc: &AlgorithmDescriptor) -> Result<&'static AlgorithmDescriptor> {
    let id = desc
        .wrap
        .ok_or_else(|| CoseError::UnknownAlgorithm(format!("{} has no key wrap algorithm", desc.name)))?;
    lookup_in(id, &[AlgorithmClass::KeyWrap])
}

fn kdf_inputs(
    headers: &HeaderPair,
    policy: &HeaderPolicy,
    algorithm: AlgorithmId,
    key_len: usize,
) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
    let effective = headers.effective(policy)?;
    let context = KdfContext::for_recipient(algorithm, key_len, headers.protected.encoded(), &effective).encode()?;
    let salt = effective.get_bytes(HeaderParam::Salt).map(<[u8]>::to_vec);
    Ok((context, salt))
}

fn has_param(protected: &HeaderMap, unprotected: &HeaderMap, param: HeaderParam) -> bool {
    protected.contains_param(param) || unprotected.contains_param(param)
}

/// Result of building one layer of the recipient tree.
pub(crate) struct EstablishedLayer {
    pub key: Zeroizing<Vec<u8>>,
    pub recipients: Vec<RecipientNode>,
}

/// Establish the key of a layer protected with `target` and build its recipients.
///
/// `supplied` fixes the layer key instead of generating one; it is rejected when the
/// recipient derives the layer key itself.
pub(crate) fn establish_layer_key(
    backend: &dyn PrimitiveBackend,
    target: &AlgorithmDescriptor,
    specs: &[RecipientSpec],
    supplied: Option<&[u8]>,
    depth: usize,
) -> Result<EstablishedLayer> {
    if specs.is_empty() {
        return Err(CoseError::MissingRecipient);
    }
    if depth > DEFAULT_MAX_RECIPIENT_DEPTH {
        return Err(CoseError::MalformedEncoding(format!(
            "recipient tree is deeper than {DEFAULT_MAX_RECIPIENT_DEPTH} levels"
        )));
    }

    let descriptors = specs
        .iter()
        .map(|s| lookup_in(s.algorithm, AlgorithmClass::KEY_MANAGEMENT))
        .collect::<Result<Vec<_>>>()?;

    if let Some(determining) = descriptors.iter().find(|d| d.class.determines_layer_key()) {
        if specs.len() != 1 {
            return Err(CoseError::MalformedEncoding(format!(
                "{} must be the only recipient of its layer",
                determining.name
            )));
        }
        if supplied.is_some() {
            return Err(CoseError::IncompatibleKey(format!(
                "{} establishes the layer key itself; a supplied key cannot be used",
                determining.name
            )));
        }
        let (node, key) = build_determining(backend, target, &specs[0], determining)?;
        debug!(depth, algorithm = determining.name, "layer key established by recipient");
        return Ok(EstablishedLayer {
            key,
            recipients: vec![node],
        });
    }

    let key = match supplied {
        Some(k) => {
            if target.key_len != 0 && k.len() != target.key_len {
                return Err(CoseError::IncompatibleKey(format!(
                    "{} requires a {}-byte key, got {} bytes",
                    target.name,
                    target.key_len,
                    k.len()
                )));
            }
            Zeroizing::new(k.to_vec())
        }
        None => Zeroizing::new(backend.random(target.key_len).map_err(produce_failure)?),
    };

    let recipients = specs
        .iter()
        .zip(descriptors)
        .map(|(spec, desc)| build_wrapping(backend, target, spec, desc, &key, depth))
        .collect::<Result<Vec<_>>>()?;

    debug!(depth, recipients = recipients.len(), target = target.name, "layer key wrapped for recipients");
    Ok(EstablishedLayer { key, recipients })
}

fn prepare_headers(spec: &RecipientSpec, desc: &AlgorithmDescriptor) -> (HeaderMap, HeaderMap) {
    let mut protected = spec.protected.clone();
    let mut unprotected = spec.unprotected.clone();

    if !has_param(&protected, &unprotected, HeaderParam::Algorithm) {
        let alg = (HeaderKey::from(HeaderParam::Algorithm), desc.id.value());
        if matches!(desc.class, AlgorithmClass::Direct | AlgorithmClass::KeyWrap) {
            unprotected.insert(alg.0, alg.1);
        } else {
            protected.insert(alg.0, alg.1);
        }
    }

    if let Some(kid) = spec.key.as_ref().and_then(|k| k.kid.clone()) {
        if !has_param(&protected, &unprotected, HeaderParam::KeyId) {
            unprotected.insert(HeaderParam::KeyId, kid);
        }
    }

    (protected, unprotected)
}

/// Recipients whose algorithm establishes the layer key (direct, direct+HKDF, ECDH direct).
fn build_determining(
    backend: &dyn PrimitiveBackend,
    target: &AlgorithmDescriptor,
    spec: &RecipientSpec,
    desc: &AlgorithmDescriptor,
) -> Result<(RecipientNode, Zeroizing<Vec<u8>>)> {
    if !spec.recipients.is_empty() {
        return Err(CoseError::MalformedEncoding(format!(
            "{} recipients cannot carry nested recipients",
            desc.name
        )));
    }

    let (protected, mut unprotected) = prepare_headers(spec, desc);

    let (headers, key) = match desc.class {
        AlgorithmClass::Direct => {
            let key = validate_direct_key(desc, target, spec.require_key()?, layer_operation(target, Direction::Produce))?;
            (HeaderPair::new(protected, unprotected)?, Zeroizing::new(key.to_vec()))
        }
        AlgorithmClass::DirectHkdf => {
            let key = spec.require_key()?;
            validate(desc, key, KeyOperation::DeriveKey)?;
            let ikm = key
                .symmetric_bytes()
                .ok_or_else(|| CoseError::IncompatibleKey("symmetric key has no key bytes".to_string()))?;
            if !has_param(&protected, &unprotected, HeaderParam::Salt)
                && !has_param(&protected, &unprotected, HeaderParam::PartyUNonce)
            {
                let salt = backend.random(GENERATED_NONCE_LEN).map_err(produce_failure)?;
                unprotected.insert(HeaderParam::Salt, salt);
            }
            let headers = HeaderPair::new(protected, unprotected)?;
            let (context, salt) = kdf_inputs(&headers, &HeaderPolicy::default(), target.id, target.key_len)?;
            let derived = backend
                .derive(&DeriveParams {
                    algorithm: desc,
                    input: KeyAgreementInput::Shared(ikm),
                    salt: salt.as_deref(),
                    context: &context,
                    output_len: target.key_len,
                })
                .map_err(produce_failure)?;
            (headers, Zeroizing::new(derived))
        }
        AlgorithmClass::EcdhEs | AlgorithmClass::EcdhSs => {
            agree(backend, desc, spec, protected, unprotected, target.id, target.key_len)?
        }
        _ => {
            return Err(CoseError::UnknownAlgorithm(format!(
                "{} does not establish a layer key",
                desc.name
            )))
        }
    };

    Ok((
        RecipientNode {
            headers,
            ciphertext: Vec::new(),
            recipients: Vec::new(),
        },
        key,
    ))
}

/// Sender side of ECDH-ES/SS: place the sender key in the headers, seal them, derive.
fn agree(
    backend: &dyn PrimitiveBackend,
    desc: &AlgorithmDescriptor,
    spec: &RecipientSpec,
    protected: HeaderMap,
    mut unprotected: HeaderMap,
    derived_alg: AlgorithmId,
    derived_len: usize,
) -> Result<(HeaderPair, Zeroizing<Vec<u8>>)> {
    let recipient = spec.require_key()?;
    validate(desc, recipient, KeyOperation::DeriveKey)?;
    let crv = recipient
        .crv
        .ok_or_else(|| CoseError::IncompatibleKey("recipient key has no curve".to_string()))?;

    let sender = if desc.class.is_static_static() {
        let sender = spec.sender_key.as_ref().ok_or_else(|| {
            CoseError::IncompatibleKey(format!("{} requires a sender static key", desc.name))
        })?;
        validate(desc, sender, KeyOperation::DeriveKey)?;
        if sender.crv != Some(crv) || !sender.has_private() {
            return Err(CoseError::IncompatibleKey(
                "sender static key must be a private key on the recipient's curve".to_string(),
            ));
        }
        if spec.sender_key_by_id {
            let kid = sender
                .kid
                .clone()
                .ok_or_else(|| CoseError::IncompatibleKey("sender static key has no kid".to_string()))?;
            unprotected.insert(HeaderParam::StaticKeyId, kid);
        } else {
            unprotected.insert(HeaderParam::StaticKey, sender.public_key().to_header_value());
        }
        if !has_param(&protected, &unprotected, HeaderParam::PartyUNonce) {
            let nonce = backend.random(GENERATED_NONCE_LEN).map_err(produce_failure)?;
            unprotected.insert(HeaderParam::PartyUNonce, nonce);
        }
        sender.clone()
    } else {
        if spec.sender_key.is_some() {
            return Err(CoseError::IncompatibleKey(format!(
                "{} generates its own ephemeral sender key",
                desc.name
            )));
        }
        let ephemeral = backend.generate_ephemeral(crv).map_err(produce_failure)?;
        unprotected.insert(HeaderParam::EphemeralKey, ephemeral.public_key().to_header_value());
        ephemeral
    };

    let headers = HeaderPair::new(protected, unprotected)?;
    let (context, salt) = kdf_inputs(&headers, &HeaderPolicy::default(), derived_alg, derived_len)?;
    let derived = backend
        .derive(&DeriveParams {
            algorithm: desc,
            input: KeyAgreementInput::Ecdh {
                private_key: &sender,
                public_key: recipient,
            },
            salt: salt.as_deref(),
            context: &context,
            output_len: derived_len,
        })
        .map_err(produce_failure)?;

    Ok((headers, Zeroizing::new(derived)))
}

/// Recipients that wrap an existing layer key (key wrap, ECDH + key wrap).
fn build_wrapping(
    backend: &dyn PrimitiveBackend,
    target: &AlgorithmDescriptor,
    spec: &RecipientSpec,
    desc: &AlgorithmDescriptor,
    layer_key: &[u8],
    depth: usize,
) -> Result<RecipientNode> {
    let (protected, unprotected) = prepare_headers(spec, desc);

    match desc.class {
        AlgorithmClass::KeyWrap => {
            if !protected.is_empty() {
                return Err(CoseError::HeaderPolicyViolation(
                    "key wrap recipients must have an empty protected header".to_string(),
                ));
            }
            let (kek, recipients) = if spec.recipients.is_empty() {
                let key = spec.require_key()?;
                validate(desc, key, KeyOperation::WrapKey)?;
                let kek = key
                    .symmetric_bytes()
                    .ok_or_else(|| CoseError::IncompatibleKey("symmetric key has no key bytes".to_string()))?;
                (Zeroizing::new(kek.to_vec()), Vec::new())
            } else {
                if spec.key.is_some() {
                    return Err(CoseError::IncompatibleKey(
                        "a key wrap recipient takes its key from a static key or from nested recipients, not both"
                            .to_string(),
                    ));
                }
                let layer = establish_layer_key(backend, desc, &spec.recipients, None, depth + 1)?;
                (layer.key, layer.recipients)
            };
            let ciphertext = backend.wrap(desc, &kek, layer_key).map_err(produce_failure)?;
            Ok(RecipientNode {
                headers: HeaderPair::new(protected, unprotected)?,
                ciphertext,
                recipients,
            })
        }
        AlgorithmClass::EcdhEsKeyWrap | AlgorithmClass::EcdhSsKeyWrap => {
            if !spec.recipients.is_empty() {
                return Err(CoseError::MalformedEncoding(format!(
                    "{} recipients cannot carry nested recipients",
                    desc.name
                )));
            }
            let kw = wrap_descriptor(desc)?;
            let (headers, kek) = agree(backend, desc, spec, protected, unprotected, kw.id, kw.key_len)?;
            let ciphertext = backend.wrap(kw, &kek, layer_key).map_err(produce_failure)?;
            Ok(RecipientNode {
                headers,
                ciphertext,
                recipients: Vec::new(),
            })
        }
        _ => Err(CoseError::UnknownAlgorithm(format!(
            "{} cannot wrap a layer key for {}",
            desc.name, target.name
        ))),
    }
}

/// Decode-side inputs shared by every node of one resolution.
pub(crate) struct ResolveContext<'a> {
    pub backend: &'a dyn PrimitiveBackend,
    pub keys: &'a [CoseKey],
    pub policy: &'a HeaderPolicy,
    pub max_depth: usize,
}

/// Recover the key of a layer protected with `target` from its recipients and hand
/// it to `open`.
///
/// Recipients are tried in order, and within a recipient every matching key is tried.
/// A candidate whose key `open` rejects with `AuthenticationFailure` or
/// `KeyManagementFailure` does not end the search; the first such failure is reported
/// only when no candidate opens the layer.
pub(crate) fn resolve_layer_key<T>(
    ctx: &ResolveContext<'_>,
    target: &AlgorithmDescriptor,
    nodes: &[RecipientNode],
    depth: usize,
    open: &dyn Fn(&[u8]) -> Result<T>,
) -> Result<T> {
    if nodes.is_empty() {
        return Err(CoseError::MissingRecipient);
    }
    if depth > ctx.max_depth {
        return Err(CoseError::MalformedEncoding(format!(
            "recipient tree is deeper than {} levels",
            ctx.max_depth
        )));
    }

    let mut failure = None;
    for (index, node) in nodes.iter().enumerate() {
        match resolve_node(ctx, target, node, depth, open) {
            Ok(Some(opened)) => {
                debug!(depth, index, "recipient resolved");
                return Ok(opened);
            }
            Ok(None) => debug!(depth, index, "recipient does not match available keys"),
            Err(e) if is_candidate_failure(&e) => {
                debug!(depth, index, error = %e, "recipient candidates failed");
                failure.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(failure.unwrap_or(CoseError::RecipientNotResolvable))
}

/// Failures that reject one candidate key without condemning the message.
fn is_candidate_failure(e: &CoseError) -> bool {
    matches!(e, CoseError::KeyManagementFailure(_) | CoseError::AuthenticationFailure)
}

/// Run `open` on a candidate layer key, recording a candidate failure in `failure`.
fn try_candidate<T>(
    open: &dyn Fn(&[u8]) -> Result<T>,
    key: Result<Zeroizing<Vec<u8>>>,
    failure: &mut Option<CoseError>,
) -> Result<Option<T>> {
    match key.and_then(|k| open(k.as_slice())) {
        Ok(opened) => Ok(Some(opened)),
        Err(e) if is_candidate_failure(&e) => {
            failure.get_or_insert(e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Keys matching a recipient: kid must agree when both sides carry one.
fn candidates<'k>(
    keys: &'k [CoseKey],
    kid: Option<&'k [u8]>,
    accept: impl Fn(&CoseKey) -> bool + 'k,
) -> impl Iterator<Item = &'k CoseKey> + 'k {
    keys.iter().filter(move |k| {
        accept(k)
            && match (kid, k.kid.as_deref()) {
                (Some(wanted), Some(have)) => wanted == have,
                _ => true,
            }
    })
}

fn unwrap_layer_key(
    backend: &dyn PrimitiveBackend,
    kw: &AlgorithmDescriptor,
    target: &AlgorithmDescriptor,
    kek: &[u8],
    wrapped: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let key = backend
        .unwrap(kw, kek, wrapped)
        .map(Zeroizing::new)
        .map_err(key_management_failure)?;
    if target.key_len != 0 && key.len() != target.key_len {
        return Err(CoseError::KeyManagementFailure(format!(
            "unwrapped key has {} bytes, {} requires {}",
            key.len(),
            target.name,
            target.key_len
        )));
    }
    Ok(key)
}

fn derive_layer_key(
    ctx: &ResolveContext<'_>,
    desc: &AlgorithmDescriptor,
    headers: &HeaderPair,
    derived_alg: AlgorithmId,
    derived_len: usize,
    input: KeyAgreementInput<'_>,
) -> Result<Zeroizing<Vec<u8>>> {
    let (context, salt) = kdf_inputs(headers, ctx.policy, derived_alg, derived_len)?;
    ctx.backend
        .derive(&DeriveParams {
            algorithm: desc,
            input,
            salt: salt.as_deref(),
            context: &context,
            output_len: derived_len,
        })
        .map(Zeroizing::new)
        .map_err(key_management_failure)
}

/// Sender public key of an ECDH recipient. `None` when a static key id names no known key.
fn sender_public_key(
    ctx: &ResolveContext<'_>,
    desc: &AlgorithmDescriptor,
    headers: &EffectiveHeaders<'_>,
) -> Result<Option<CoseKey>> {
    let sender = if !desc.class.is_static_static() {
        let value = headers
            .get_param(HeaderParam::EphemeralKey)
            .ok_or_else(|| CoseError::MalformedHeader(format!("{} recipient has no ephemeral key", desc.name)))?;
        CoseKey::from_header_value(value)?
    } else if let Some(value) = headers.get_param(HeaderParam::StaticKey) {
        CoseKey::from_header_value(value)?
    } else if let Some(id) = headers.get_bytes(HeaderParam::StaticKeyId) {
        match ctx.keys.iter().find(|k| k.kid.as_deref() == Some(id)) {
            Some(k) => k.public_key(),
            None => return Ok(None),
        }
    } else {
        return Err(CoseError::MalformedHeader(format!(
            "{} recipient has neither a static key nor a static key id",
            desc.name
        )));
    };

    if sender.kty != KeyType::Ec2 || !sender.crv.is_some_and(|c| desc.curves.contains(&c)) {
        return Err(CoseError::IncompatibleKey(format!(
            "sender key is not usable with {}",
            desc.name
        )));
    }
    Ok(Some(sender))
}

fn resolve_node<T>(
    ctx: &ResolveContext<'_>,
    target: &AlgorithmDescriptor,
    node: &RecipientNode,
    depth: usize,
    open: &dyn Fn(&[u8]) -> Result<T>,
) -> Result<Option<T>> {
    let headers = node.headers.effective(ctx.policy)?;
    let alg = headers.require_algorithm()?;
    let desc = match lookup_in(alg, AlgorithmClass::KEY_MANAGEMENT) {
        Ok(desc) => desc,
        Err(CoseError::UnknownAlgorithm(reason)) => {
            debug!(depth, %reason, "skipping recipient with unknown algorithm");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if !node.recipients.is_empty() && desc.class != AlgorithmClass::KeyWrap {
        return Err(CoseError::MalformedEncoding(format!(
            "{} recipients cannot carry nested recipients",
            desc.name
        )));
    }

    let kid = headers.key_id();
    let mut failure = None;

    match desc.class {
        AlgorithmClass::Direct => {
            if !node.ciphertext.is_empty() {
                return Err(CoseError::MalformedEncoding("direct recipient carries a ciphertext".to_string()));
            }
            let op = layer_operation(target, Direction::Consume);
            for key in candidates(ctx.keys, kid, |k| k.kty == KeyType::Symmetric) {
                let Ok(k) = validate_direct_key(desc, target, key, op) else { continue };
                if let Some(opened) = try_candidate(open, Ok(Zeroizing::new(k.to_vec())), &mut failure)? {
                    return Ok(Some(opened));
                }
            }
        }
        AlgorithmClass::DirectHkdf => {
            for key in candidates(ctx.keys, kid, |k| k.kty == KeyType::Symmetric) {
                if validate(desc, key, KeyOperation::DeriveKey).is_err() {
                    continue;
                }
                let Some(ikm) = key.symmetric_bytes() else { continue };
                let input = KeyAgreementInput::Shared(ikm);
                let derived = derive_layer_key(ctx, desc, &node.headers, target.id, target.key_len, input);
                if let Some(opened) = try_candidate(open, derived, &mut failure)? {
                    return Ok(Some(opened));
                }
            }
        }
        AlgorithmClass::KeyWrap if !node.recipients.is_empty() => {
            let unwrap_then_open = |kek: &[u8]| -> Result<T> {
                let key = unwrap_layer_key(ctx.backend, desc, target, kek, &node.ciphertext)?;
                open(key.as_slice())
            };
            return match resolve_layer_key(ctx, desc, &node.recipients, depth + 1, &unwrap_then_open) {
                Ok(opened) => Ok(Some(opened)),
                Err(CoseError::RecipientNotResolvable) => Ok(None),
                Err(e) => Err(e),
            };
        }
        AlgorithmClass::KeyWrap => {
            for key in candidates(ctx.keys, kid, |k| k.kty == KeyType::Symmetric) {
                if validate(desc, key, KeyOperation::UnwrapKey).is_err() {
                    continue;
                }
                let Some(kek) = key.symmetric_bytes() else { continue };
                let unwrapped = unwrap_layer_key(ctx.backend, desc, target, kek, &node.ciphertext);
                if let Some(opened) = try_candidate(open, unwrapped, &mut failure)? {
                    return Ok(Some(opened));
                }
            }
        }
        AlgorithmClass::EcdhEs
        | AlgorithmClass::EcdhSs
        | AlgorithmClass::EcdhEsKeyWrap
        | AlgorithmClass::EcdhSsKeyWrap => {
            let Some(sender) = sender_public_key(ctx, desc, &headers)? else {
                return Ok(None);
            };
            let kw = match desc.class {
                AlgorithmClass::EcdhEsKeyWrap | AlgorithmClass::EcdhSsKeyWrap => Some(wrap_descriptor(desc)?),
                _ => None,
            };
            if kw.is_none() && !node.ciphertext.is_empty() {
                return Err(CoseError::MalformedEncoding(format!(
                    "{} recipient carries a ciphertext",
                    desc.name
                )));
            }
            let (derived_alg, derived_len) = match kw {
                Some(kw) => (kw.id, kw.key_len),
                None => (target.id, target.key_len),
            };

            let matching = candidates(ctx.keys, kid, |k| k.kty == sender.kty && k.crv == sender.crv && k.has_private());
            for key in matching {
                if validate(desc, key, KeyOperation::DeriveKey).is_err() {
                    continue;
                }
                let input = KeyAgreementInput::Ecdh {
                    private_key: key,
                    public_key: &sender,
                };
                let derived = derive_layer_key(ctx, desc, &node.headers, derived_alg, derived_len, input);
                let layer_key = derived.and_then(|derived| match kw {
                    Some(kw) => unwrap_layer_key(ctx.backend, kw, target, &derived, &node.ciphertext),
                    None => Ok(derived),
                });
                if let Some(opened) = try_candidate(open, layer_key, &mut failure)? {
                    return Ok(Some(opened));
                }
            }
        }
        _ => {
            return Err(CoseError::UnknownAlgorithm(format!(
                "{} is not a key management algorithm",
                desc.name
            )))
        }
    }

    failure.map_or(Ok(None), Err)
}
