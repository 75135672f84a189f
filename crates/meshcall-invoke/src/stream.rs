//! Pass-through semantic for raw stream access.
//!
//! No result is ever read or written. The caller gets a connector whose
//! far end belongs to the target object, together with the invocation
//! that named it.

use std::sync::Arc;

use meshcall_protocol::{
    read_value, write_value, Codec, Invocation, SemanticKind, SystemId, NEW_CALL_MARKER,
    RESUME_MARKER,
};
use meshcall_session::{Registry, SessionOpener};
use meshcall_transport::Connector;
use tracing::{debug, trace};

use crate::retry::{retry, RetryOutcome};
use crate::{InvokeConfig, InvokeError};

/// Opens and accepts raw stream sessions.
pub struct StreamSemantic<O, R, C> {
    inner: Arc<Inner<O, R, C>>,
}

impl<O, R, C> Clone for StreamSemantic<O, R, C> {
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
}

impl<O, R, C> StreamSemantic<O, R, C>
where
    O: SessionOpener,
    R: Registry,
    C: Codec,
{
    pub fn new(
        local: SystemId,
        opener: O,
        registry: R,
        codec: C,
        config: InvokeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                opener,
                registry,
                codec,
                config,
            }),
        }
    }

    /// Opens a stream to the object `invocation` targets.
    ///
    /// A local target is served through an in-memory pipe pair: the
    /// registry receives one end on a background task and the caller gets
    /// the other straight away.
    pub async fn open(&self, invocation: Invocation) -> Result<Connector, InvokeError> {
        let inner = &self.inner;

        if invocation.target.system == inner.local {
            let (caller, callee) = Connector::pair();
            let this = Arc::clone(inner);
            tokio::spawn(async move {
                this.registry.dispatch_stream(invocation, callee).await;
            });
            return Ok(caller);
        }

        match retry(inner.config.retry_policy(), |_| inner.send_header(&invocation)).await {
            RetryOutcome::Success(conn) => Ok(conn),
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(InvokeError::Exhausted {
                attempts,
                last: Box::new(last_error),
            }),
        }
    }

    /// Reads the invocation header and hands the connector to the registry.
    pub async fn accept(&self, mut conn: Connector) {
        let id = conn.id();
        match self.inner.read_header(&mut conn).await {
            Ok(invocation) => {
                trace!(conn_id = %id, target = %invocation.target, "stream accepted");
                self.inner.registry.dispatch_stream(invocation, conn).await;
            }
            Err(e) => debug!(conn_id = %id, error = %e, "stream session refused"),
        }
    }
}

impl<O, R, C> Inner<O, R, C>
where
    O: SessionOpener,
    R: Registry,
    C: Codec,
{
    async fn send_header(&self, invocation: &Invocation) -> Result<Connector, InvokeError> {
        let requirements = invocation
            .requirements
            .clone()
            .with_semantic(SemanticKind::Stream);
        let conn = self
            .opener
            .open_session(invocation.target.system, &requirements)
            .await?;
        write_value(&conn, &self.codec, &NEW_CALL_MARKER).await?;
        write_value(&conn, &self.codec, invocation).await?;
        Ok(conn)
    }

    async fn read_header(&self, conn: &mut Connector) -> Result<Invocation, InvokeError> {
        let marker: bool = read_value(conn, &self.codec).await?;
        if marker == RESUME_MARKER {
            return Err(InvokeError::UnexpectedResume);
        }
        Ok(read_value(conn, &self.codec).await?)
    }
}
