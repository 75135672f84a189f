//! Marshalled request/response semantic.
//!
//! ```text
//! caller                                     callee
//!   │ open_session ─────────────────────────▶ │
//!   │ false, Invocation ────────────────────▶ │ register pending, dispatch
//!   │ ◀──────────────────── Invocation(result)│ delivery loop
//!   ╳ connection lost                         │ write fails, wait for resume
//!   │ open_session ─────────────────────────▶ │
//!   │ true, SystemId, InvocationId ─────────▶ │ swap connector into entry
//!   │ ◀──────────────────── Invocation(result)│
//! ```

use std::sync::Arc;

use meshcall_protocol::{
    read_value, write_value, Codec, Invocation, InvocationId, NfCollection, SemanticKind,
    SystemId, NEW_CALL_MARKER, RESUME_MARKER,
};
use meshcall_session::{Registry, SessionOpener};
use meshcall_transport::Connector;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::pending::PendingEntry;
use crate::retry::{retry, RetryOutcome};
use crate::{InvokeConfig, InvokeError, PendingInvocations};

/// Delivers invocations and their results over connectors.
///
/// Cheap to clone; clones share the pending-invocation table.
pub struct InvocationSemantic<O, R, C> {
    inner: Arc<Inner<O, R, C>>,
}

impl<O, R, C> Clone for InvocationSemantic<O, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<O, R, C> {
    local: SystemId,
    opener: O,
    registry: R,
    codec: C,
    config: InvokeConfig,
    pending: PendingInvocations,
}

impl<O, R, C> InvocationSemantic<O, R, C>
where
    O: SessionOpener,
    R: Registry,
    C: Codec,
{
    pub fn new(local: SystemId, opener: O, registry: R, codec: C, config: InvokeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                opener,
                registry,
                codec,
                config,
                pending: PendingInvocations::new(),
            }),
        }
    }

    pub fn local_system(&self) -> SystemId {
        self.inner.local
    }

    /// Results currently waiting to be delivered.
    pub fn pending(&self) -> &PendingInvocations {
        &self.inner.pending
    }

    /// Carries out `invocation` and returns it with its outcome.
    ///
    /// Failures never surface as `Err`: they are attached to the returned
    /// invocation as an [`InvocationFault`](meshcall_protocol::InvocationFault).
    /// Asynchronous calls return as soon as the call is handed off.
    pub async fn invoke(&self, mut invocation: Invocation) -> Invocation {
        let inner = &self.inner;

        if invocation.target.system == inner.local {
            if invocation.is_synchronous() {
                inner.registry.dispatch(&mut invocation).await;
            } else {
                let this = Arc::clone(inner);
                let mut call = invocation.clone();
                tokio::spawn(async move {
                    this.registry.dispatch(&mut call).await;
                });
            }
            return invocation;
        }

        let policy = inner.config.retry_policy();
        let conn = match retry(policy, |_| inner.send_call(&invocation)).await {
            RetryOutcome::Success(conn) => conn,
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                let err = InvokeError::Exhausted {
                    attempts,
                    last: Box::new(last_error),
                };
                warn!(id = %invocation.id, target = %invocation.target, error = %err, "call not delivered");
                invocation.fail(err.to_fault());
                return invocation;
            }
        };

        if !invocation.is_synchronous() {
            conn.release();
            return invocation;
        }

        let reply = match inner.await_result(conn).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                debug!(id = %invocation.id, error = %e, "result read failed, resuming");
                retry(policy, |_| inner.resume(&invocation))
                    .await
                    .into_result()
            }
        };

        match reply {
            Ok(reply) => invocation.absorb_reply(reply),
            Err((last, attempts)) => {
                let err = InvokeError::Exhausted {
                    attempts,
                    last: Box::new(last),
                };
                warn!(id = %invocation.id, error = %err, "result lost");
                invocation.fail(err.to_fault());
            }
        }
        invocation
    }

    /// Serves one incoming connector that terminates at this system.
    pub async fn accept(&self, conn: Connector) {
        let id = conn.id();
        if let Err(e) = self.inner.serve(conn).await {
            // The connector was dropped on the way out.
            debug!(conn_id = %id, error = %e, "incoming invocation ended");
        }
    }
}

/// Requirements for a session this semantic terminates.
fn marshalled(invocation: &Invocation) -> NfCollection {
    invocation
        .requirements
        .clone()
        .with_semantic(SemanticKind::Marshalled)
}

impl<O, R, C> Inner<O, R, C>
where
    O: SessionOpener,
    R: Registry,
    C: Codec,
{
    /// One connect-and-send attempt.
    async fn send_call(&self, invocation: &Invocation) -> Result<Connector, InvokeError> {
        let conn = self
            .opener
            .open_session(invocation.target.system, &marshalled(invocation))
            .await?;
        write_value(&conn, &self.codec, &NEW_CALL_MARKER).await?;
        write_value(&conn, &self.codec, invocation).await?;
        trace!(id = %invocation.id, conn_id = %conn.id(), "call sent");
        Ok(conn)
    }

    async fn await_result(&self, mut conn: Connector) -> Result<Invocation, InvokeError> {
        Ok(read_value(&mut conn, &self.codec).await?)
    }

    /// One recovery attempt: new connector, resume request, read.
    async fn resume(&self, invocation: &Invocation) -> Result<Invocation, InvokeError> {
        let mut conn = self
            .opener
            .open_session(invocation.target.system, &marshalled(invocation))
            .await?;
        write_value(&conn, &self.codec, &RESUME_MARKER).await?;
        write_value(&conn, &self.codec, &invocation.source.system).await?;
        write_value(&conn, &self.codec, &invocation.id).await?;
        Ok(read_value(&mut conn, &self.codec).await?)
    }

    async fn serve(&self, mut conn: Connector) -> Result<(), InvokeError> {
        let marker: bool = read_value(&mut conn, &self.codec).await?;
        if marker == RESUME_MARKER {
            let source: SystemId = read_value(&mut conn, &self.codec).await?;
            let id: InvocationId = read_value(&mut conn, &self.codec).await?;
            if !self.pending.resume(source, id, conn) {
                debug!(%source, %id, "expired resume discarded");
            }
            return Ok(());
        }

        let mut invocation: Invocation = read_value(&mut conn, &self.codec).await?;
        let source = invocation.source.system;
        let id = invocation.id;
        let _entry = PendingEntry::register(&self.pending, source, id, conn);

        self.registry.dispatch(&mut invocation).await;
        if !invocation.is_synchronous() {
            return Ok(());
        }
        invocation.strip_call_payload();
        self.deliver(&invocation).await;
        Ok(())
    }

    /// Writes the result on whichever connector the entry holds, waiting
    /// for resumes until the disposal deadline.
    async fn deliver(&self, reply: &Invocation) {
        let source = reply.source.system;
        let id = reply.id;
        let deadline = Instant::now() + self.config.disposal_timeout;

        while let Some(conn) = self.pending.checkout(source, id, deadline).await {
            match write_value(&conn, &self.codec, reply).await {
                Ok(()) => {
                    trace!(%source, %id, conn_id = %conn.id(), "result delivered");
                    return;
                }
                Err(e) => {
                    debug!(%source, %id, error = %e, "result write failed, waiting for resume");
                    conn.release();
                }
            }
        }
        debug!(%source, %id, "result abandoned after disposal timeout");
    }
}
