//! Opening sessions toward other systems.

use std::future::Future;
use std::sync::Arc;

use meshcall_protocol::{NfCollection, SystemId};
use meshcall_transport::Connector;

use crate::SessionError;

/// Produces an end-to-end connector to a system.
///
/// How the connector is obtained (a direct link, a forwarded chain of hops
/// or a gateway relay) is the implementor's business. The returned
/// connector is exclusively owned by the caller; dropping it releases it.
pub trait SessionOpener: Send + Sync + 'static {
    /// Opens a session to `target` satisfying `requirements`.
    fn open_session(
        &self,
        target: SystemId,
        requirements: &NfCollection,
    ) -> impl Future<Output = Result<Connector, SessionError>> + Send;
}

impl<T: SessionOpener> SessionOpener for Arc<T> {
    fn open_session(
        &self,
        target: SystemId,
        requirements: &NfCollection,
    ) -> impl Future<Output = Result<Connector, SessionError>> + Send {
        (**self).open_session(target, requirements)
    }
}
