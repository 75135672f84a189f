//! Invocation semantics for meshcall.
//!
//! - [`InvocationSemantic`]: marshalled calls. Connecting is retried,
//!   lost results are recovered with a resume request, and the callee
//!   keeps a computed result in [`PendingInvocations`] until it is
//!   delivered or the disposal timeout passes.
//! - [`StreamSemantic`]: hands a raw connector to the callee instead.
//!
//! Calls to the local system never touch a connector.

mod config;
mod error;
mod pending;
mod retry;
mod semantic;
mod stream;

pub use config::InvokeConfig;
pub use error::InvokeError;
pub use pending::PendingInvocations;
pub use retry::{retry, RetryOutcome, RetryPolicy};
pub use semantic::InvocationSemantic;
pub use stream::StreamSemantic;
