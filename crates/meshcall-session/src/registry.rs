//! Dispatching received calls to local code.
//!
//! The object registry and the proxy/skeleton marshalling layer live
//! outside this workspace. This trait is the seam they plug into.
//!
//! # Example
//!
//! ```rust
//! use meshcall_protocol::{Invocation, InvocationFault};
//! use meshcall_session::Registry;
//! use meshcall_transport::Connector;
//!
//! /// Echoes the first argument back as the result.
//! struct Echo;
//!
//! impl Registry for Echo {
//!     async fn dispatch(&self, invocation: &mut Invocation) {
//!         match invocation.arguments.first() {
//!             Some(arg) => invocation.result = Some(arg.clone()),
//!             None => invocation.fail(InvocationFault::Remote {
//!                 message: "echo needs one argument".into(),
//!             }),
//!         }
//!     }
//!
//!     async fn dispatch_stream(&self, _invocation: Invocation, _stream: Connector) {}
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use meshcall_protocol::Invocation;
use meshcall_transport::Connector;

/// Runs invocations addressed to objects on the local system.
pub trait Registry: Send + Sync + 'static {
    /// Executes the call and records its outcome on the invocation,
    /// either as [`Invocation::result`] or as a
    /// [`Remote`](meshcall_protocol::InvocationFault::Remote) fault.
    fn dispatch(&self, invocation: &mut Invocation) -> impl Future<Output = ()> + Send;

    /// Hands a raw stream to the target object. The registry owns the
    /// connector from here on.
    fn dispatch_stream(
        &self,
        invocation: Invocation,
        stream: Connector,
    ) -> impl Future<Output = ()> + Send;
}

impl<T: Registry> Registry for Arc<T> {
    fn dispatch(&self, invocation: &mut Invocation) -> impl Future<Output = ()> + Send {
        (**self).dispatch(invocation)
    }

    fn dispatch_stream(
        &self,
        invocation: Invocation,
        stream: Connector,
    ) -> impl Future<Output = ()> + Send {
        (**self).dispatch_stream(invocation, stream)
    }
}
