//! Byte forwarding between two connectors.

use meshcall_transport::{Connector, ConnectorReader, ConnectorWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Joins two connectors: whatever arrives on one is sent on the other.
///
/// Each direction runs as its own task. When either direction ends (its
/// source closed, its sink refused a message, or `cancel` fired) the
/// other is stopped too and both connectors are released. The returned
/// handle resolves once both directions are done.
pub fn splice(left: Connector, right: Connector, cancel: &CancellationToken) -> JoinHandle<()> {
    let left_id = left.id();
    let right_id = right.id();
    let (left_tx, left_rx) = left.split();
    let (right_tx, right_rx) = right.split();
    let done = cancel.child_token();

    let forward_right = tokio::spawn(forward(left_rx, right_tx, done.clone()));
    let forward_left = tokio::spawn(forward(right_rx, left_tx, done));

    tokio::spawn(async move {
        let (to_right, to_left) = tokio::join!(forward_right, forward_left);
        trace!(
            left = %left_id,
            right = %right_id,
            to_right = to_right.unwrap_or_default(),
            to_left = to_left.unwrap_or_default(),
            "splice finished"
        );
    })
}

/// Copies messages until either side closes. Returns how many were copied.
async fn forward(mut from: ConnectorReader, to: ConnectorWriter, done: CancellationToken) -> u64 {
    let mut copied = 0u64;
    loop {
        let msg = tokio::select! {
            _ = done.cancelled() => break,
            msg = from.recv() => match msg {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };
        let sent = tokio::select! {
            _ = done.cancelled() => break,
            sent = to.send(msg) => sent,
        };
        if sent.is_err() {
            break;
        }
        copied += 1;
    }
    done.cancel();
    copied
}
