//! Data model shared by every layer: identities, the invocation envelope,
//! non-functional requirements, transport descriptions and routes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Counter for locally unique invocation ids.
static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Globally unique identifier of a device.
///
/// Serialized as a plain number; on the fragment wire it occupies
/// [`SystemId::WIRE_LEN`] bytes, big-endian.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SystemId(pub u64);

impl SystemId {
    /// Fixed width of a system id in binary headers.
    pub const WIRE_LEN: usize = 8;

    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    /// Big-endian binary form.
    pub fn to_be_bytes(self) -> [u8; Self::WIRE_LEN] {
        self.0.to_be_bytes()
    }

    /// Inverse of [`SystemId::to_be_bytes`].
    pub fn from_be_bytes(bytes: [u8; Self::WIRE_LEN]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{:016x}", self.0)
    }
}

/// Identifies a remotely callable object within one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O-{}", self.0)
    }
}

/// A specific remote endpoint: an object on a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId {
    pub system: SystemId,
    pub object: ObjectId,
}

impl ReferenceId {
    pub fn new(system: SystemId, object: ObjectId) -> Self {
        Self { system, object }
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.object)
    }
}

/// Locally unique id of one invocation, scoped by its source system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub u64);

impl InvocationId {
    /// Allocates the next id for an invocation issued by this process.
    pub fn next() -> Self {
        Self(NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Non-functional requirements
// ---------------------------------------------------------------------------

/// Which invocation semantic terminates a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticKind {
    /// Call and result are marshalled as [`Invocation`] envelopes.
    #[default]
    Marshalled,
    /// The connector itself is handed to the callee as a raw stream.
    Stream,
}

/// Requested qualities of a session (`NFCollection`).
///
/// Only the semantic selector is interpreted by this crate; everything
/// else (encryption, compression, ...) is carried in `properties` for
/// the plug-ins that understand it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NfCollection {
    #[serde(default)]
    pub semantic: SemanticKind,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl NfCollection {
    /// Requirements for a raw stream session.
    pub fn stream() -> Self {
        Self {
            semantic: SemanticKind::Stream,
            ..Self::default()
        }
    }

    /// The same requirements terminated by `semantic`.
    pub fn with_semantic(mut self, semantic: SemanticKind) -> Self {
        self.semantic = semantic;
        self
    }

    /// Adds a free-form requirement.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Whether the caller waits for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    #[default]
    Synchronous,
    /// Fire-and-forget: no result travels back.
    Asynchronous,
}

/// A failure attached to an invocation as data.
///
/// Synchronous and asynchronous callers observe failures the same way:
/// by inspecting [`Invocation::fault`] rather than catching an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationFault {
    /// The retry budget ran out before the call or its result got through.
    #[error("delivery failed: {reason}")]
    Delivery { reason: String },
    /// No usable route to the target, or the hop limit was hit.
    #[error("routing failed: {reason}")]
    Routing { reason: String },
    /// The callee ran and reported an error.
    #[error("remote error: {message}")]
    Remote { message: String },
}

/// Envelope for one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub source: ReferenceId,
    pub target: ReferenceId,
    pub id: InvocationId,
    #[serde(default)]
    pub mode: CallMode,
    /// Method signature. Stripped before the result is sent back.
    #[serde(default)]
    pub signature: Option<String>,
    /// Serialized arguments, opaque to this layer.
    #[serde(default)]
    pub arguments: Vec<Vec<u8>>,
    #[serde(default)]
    pub requirements: NfCollection,
    /// Serialized return value, filled in by the callee.
    #[serde(default)]
    pub result: Option<Vec<u8>>,
    #[serde(default)]
    pub fault: Option<InvocationFault>,
}

impl Invocation {
    /// Creates a synchronous call with a fresh id and no arguments.
    pub fn new(
        source: ReferenceId,
        target: ReferenceId,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            id: InvocationId::next(),
            mode: CallMode::Synchronous,
            signature: Some(signature.into()),
            arguments: Vec::new(),
            requirements: NfCollection::default(),
            result: None,
            fault: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Vec<u8>>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_requirements(mut self, requirements: NfCollection) -> Self {
        self.requirements = requirements;
        self
    }

    /// Turns this into a fire-and-forget call.
    pub fn asynchronous(mut self) -> Self {
        self.mode = CallMode::Asynchronous;
        self
    }

    pub fn is_synchronous(&self) -> bool {
        self.mode == CallMode::Synchronous
    }

    /// Attaches a fault, replacing any result.
    pub fn fail(&mut self, fault: InvocationFault) {
        self.result = None;
        self.fault = Some(fault);
    }

    /// Drops the call payload the caller does not need back.
    pub fn strip_call_payload(&mut self) {
        self.signature = None;
        self.arguments = Vec::new();
        self.requirements = NfCollection::default();
    }

    /// Copies the outcome carried by a reply envelope into this call.
    pub fn absorb_reply(&mut self, reply: Invocation) {
        self.result = reply.result;
        self.fault = reply.fault;
    }
}

// ---------------------------------------------------------------------------
// Transport descriptions and routes
// ---------------------------------------------------------------------------

/// How to reach a system over one concrete transport, e.g.
/// `{ kind: "ws", address: "ws://10.0.0.4:7400" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportDescription {
    pub kind: String,
    pub address: String,
}

impl TransportDescription {
    pub fn new(kind: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for TransportDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.address)
    }
}

/// Ordered hops from the immediate next hop to the final target.
///
/// Never empty: a direct neighbour is a one-hop route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SystemId>", into = "Vec<SystemId>")]
pub struct Route(Vec<SystemId>);

impl TryFrom<Vec<SystemId>> for Route {
    type Error = ProtocolError;

    fn try_from(hops: Vec<SystemId>) -> Result<Self, Self::Error> {
        Self::new(hops).ok_or_else(|| ProtocolError::InvalidMessage("route has no hops".into()))
    }
}

impl From<Route> for Vec<SystemId> {
    fn from(route: Route) -> Self {
        route.0
    }
}

impl Route {
    /// Builds a route, or `None` if `hops` is empty.
    pub fn new(hops: Vec<SystemId>) -> Option<Self> {
        (!hops.is_empty()).then_some(Self(hops))
    }

    /// A one-hop route straight to `target`.
    pub fn direct(target: SystemId) -> Self {
        Self(vec![target])
    }

    pub fn first_hop(&self) -> SystemId {
        self.0[0]
    }

    pub fn target(&self) -> SystemId {
        self.0[self.0.len() - 1]
    }

    pub fn hops(&self) -> &[SystemId] {
        &self.0
    }

    /// Number of hops, at least 1.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_direct(&self) -> bool {
        self.0.len() == 1
    }
}

// =========================================================================
// Tests
// =========================================================================
