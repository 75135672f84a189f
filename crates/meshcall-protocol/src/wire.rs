//! Messages exchanged on connectors and the helpers that move them.
//!
//! Every value is written as one connector message, encoded with the
//! session's [`Codec`]. The sequences below are fixed by the protocol:
//!
//! ```text
//! invocation semantic   false, Invocation            (new call)
//!                       true, SystemId, InvocationId (resume)
//! forwarded session     ForwardHeader per hop, then the session's own bytes
//! gateway control       GatewayHello, Announcement*
//! gateway route request RouteRequest → u32 count, TransportDescription*
//!                       → bool relay
//! gateway relay         RelayHeader, then the relayed bytes
//! ```

use meshcall_transport::Connector;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Codec, NfCollection, ProtocolError, Route, SystemId, TransportDescription};

/// Marker value announcing a resume request.
pub const RESUME_MARKER: bool = true;
/// Marker value announcing a new call.
pub const NEW_CALL_MARKER: bool = false;

/// Encodes `value` and sends it as one message.
pub async fn write_value<T: Serialize>(
    conn: &Connector,
    codec: &impl Codec,
    value: &T,
) -> Result<(), ProtocolError> {
    let bytes = codec.encode(value)?;
    conn.send(bytes).await?;
    Ok(())
}

/// Receives one message and decodes it as `T`.
pub async fn read_value<T: DeserializeOwned>(
    conn: &mut Connector,
    codec: &impl Codec,
) -> Result<T, ProtocolError> {
    let bytes = conn.recv().await?;
    codec.decode(&bytes)
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Per-hop header at the front of a forwarded session.
///
/// `hops == 0` means the receiver is the final target. Otherwise
/// `next_hop` names the system the receiver must forward to; the header
/// for that system follows in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardHeader {
    pub requirements: NfCollection,
    pub hops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<SystemId>,
}

impl ForwardHeader {
    /// Header telling the receiver the session ends there.
    pub fn terminal(requirements: NfCollection) -> Self {
        Self {
            requirements,
            hops: 0,
            next_hop: None,
        }
    }

    /// The full header chain for `route`, in the order it is written.
    ///
    /// The first header is consumed by `route.first_hop()`, the last by
    /// the target.
    pub fn chain(requirements: &NfCollection, route: &Route) -> Vec<ForwardHeader> {
        let hops = route.hops();
        (0..hops.len())
            .map(|i| {
                let remaining = hops.len() - 1 - i;
                ForwardHeader {
                    requirements: requirements.clone(),
                    hops: remaining as u32,
                    next_hop: hops.get(i + 1).copied(),
                }
            })
            .collect()
    }

    /// Checks that `next_hop` is present exactly when `hops > 0`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match (self.hops, self.next_hop) {
            (0, None) => Ok(()),
            (0, Some(_)) => Err(ProtocolError::InvalidMessage(
                "terminal forward header names a next hop".into(),
            )),
            (_, None) => Err(ProtocolError::InvalidMessage(
                "forward header without next hop".into(),
            )),
            (_, Some(_)) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// First message on a client's control stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHello {
    pub system: SystemId,
    /// How peers may reach this system directly.
    #[serde(default)]
    pub descriptions: Vec<TransportDescription>,
}

/// A change in the set of systems a client can reach directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub added: bool,
    pub system: SystemId,
}

/// Opens a gateway route request stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub requirements: NfCollection,
    pub target: SystemId,
    /// Relays this request has already been through.
    #[serde(default)]
    pub depth: u32,
}

/// Written by the gateway at the front of a relayed stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHeader {
    pub requirements: NfCollection,
    pub target: SystemId,
    #[serde(default)]
    pub depth: u32,
}

/// One frame of the gateway multiplexed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxFrame {
    pub stream: u32,
    pub body: FrameBody,
}

/// What a [`MuxFrame`] does to its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FrameBody {
    Open,
    Data(Vec<u8>),
    Close,
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::JsonCodec;

    fn sys(id: u64) -> SystemId {
        SystemId(id)
    }

    #[test]
    fn test_chain_for_direct_route_is_single_terminal_header() {
        let nfc = NfCollection::default();
        let chain = ForwardHeader::chain(&nfc, &Route::direct(sys(9)));
        assert_eq!(chain, vec![ForwardHeader::terminal(nfc)]);
    }

    #[test]
    fn test_chain_counts_down_and_names_next_hops() {
        let nfc = NfCollection::default();
        let route = Route::new(vec![sys(1), sys(2), sys(3)]).unwrap();

        let chain = ForwardHeader::chain(&nfc, &route);

        let shape: Vec<_> = chain.iter().map(|h| (h.hops, h.next_hop)).collect();
        assert_eq!(
            shape,
            vec![(2, Some(sys(2))), (1, Some(sys(3))), (0, None)]
        );
        assert!(chain.iter().all(|h| h.validate().is_ok()));
    }

    #[test]
    fn test_validate_rejects_missing_next_hop() {
        let header = ForwardHeader {
            requirements: NfCollection::default(),
            hops: 1,
            next_hop: None,
        };
        assert!(matches!(
            header.validate(),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_terminal_header_omits_next_hop_on_the_wire() {
        let json: serde_json::Value =
            serde_json::to_value(ForwardHeader::terminal(NfCollection::default())).unwrap();
        assert_eq!(json["hops"], 0);
        assert!(json.get("next_hop").is_none());
    }

    #[test]
    fn test_mux_frame_json_format() {
        let frame = MuxFrame {
            stream: 3,
            body: FrameBody::Data(vec![1, 2]),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["stream"], 3);
        assert_eq!(json["body"]["type"], "Data");
        assert_eq!(json["body"]["data"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_write_then_read_value_over_connector_pair() {
        let (a, mut b) = Connector::pair();
        let hello = GatewayHello {
            system: sys(4),
            descriptions: vec![TransportDescription::new("ws", "ws://10.0.0.4:7400")],
        };

        write_value(&a, &JsonCodec, &hello).await.unwrap();
        let got: GatewayHello = read_value(&mut b, &JsonCodec).await.unwrap();

        assert_eq!(got, hello);
    }

    #[tokio::test]
    async fn test_read_value_wrong_type_is_decode_error() {
        let (a, mut b) = Connector::pair();
        write_value(&a, &JsonCodec, &"text").await.unwrap();

        let result: Result<bool, _> = read_value(&mut b, &JsonCodec).await;

        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[tokio::test]
    async fn test_read_value_after_release_is_transport_error() {
        let (a, mut b) = Connector::pair();
        a.release();

        let result: Result<bool, _> = read_value(&mut b, &JsonCodec).await;

        assert!(matches!(result, Err(ProtocolError::Transport(_))));
    }
}
