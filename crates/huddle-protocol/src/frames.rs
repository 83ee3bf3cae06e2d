//! Frame types for the Huddle signaling protocol.
//!
//! Every message on the signaling channel is a [`Frame`]. Requests carry an id
//! that the server echoes in exactly one `response` or `error` frame; server
//! pushed notifications travel as `event` frames and are never acknowledged.

use serde::{Deserialize, Serialize};

use crate::media::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpParameters,
};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Request = 0x01,
    Response = 0x02,
    Error = 0x03,
    Event = 0x04,
    Ping = 0x05,
    Pong = 0x06,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Request),
            0x02 => Ok(FrameType::Response),
            0x03 => Ok(FrameType::Error),
            0x04 => Ok(FrameType::Event),
            0x05 => Ok(FrameType::Ping),
            0x06 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes sent in `error` frames.
pub mod codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1000;
    /// The request needs a joined room.
    pub const NOT_JOINED: u16 = 1001;
    /// The connection already joined a room.
    pub const ALREADY_JOINED: u16 = 1002;
    /// The room name was rejected.
    pub const INVALID_ROOM: u16 = 1003;
    /// A referenced transport, producer or consumer does not exist for the caller.
    pub const LOOKUP_FAILURE: u16 = 1004;
    /// The producer cannot be consumed with the supplied RTP capabilities.
    pub const CAPABILITY_MISMATCH: u16 = 1005;
    /// The media engine rejected the operation.
    pub const ENGINE_FAILURE: u16 = 1006;
    /// A participant asked to consume its own producer.
    pub const OWN_PRODUCER: u16 = 1007;
    /// The frame type is not accepted from clients.
    pub const UNEXPECTED_FRAME: u16 = 1008;
}

/// A client request. The tag is the event name used on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Request {
    /// Join (or create) a room.
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom { room_name: String },

    /// Create a send-side (`consumer == false`) or receive-side transport.
    #[serde(rename = "createWebRtcTransport")]
    CreateWebRtcTransport { consumer: bool },

    /// Complete the DTLS handshake of the caller's send transport.
    #[serde(rename = "transport-connect", rename_all = "camelCase")]
    TransportConnect { dtls_parameters: DtlsParameters },

    /// Start producing media on the caller's send transport.
    #[serde(rename = "transport-produce", rename_all = "camelCase")]
    TransportProduce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_data: Option<serde_json::Value>,
    },

    /// Complete the DTLS handshake of one of the caller's receive transports.
    #[serde(rename = "transport-recv-connect", rename_all = "camelCase")]
    TransportRecvConnect {
        dtls_parameters: DtlsParameters,
        server_consumer_transport_id: String,
    },

    /// Subscribe to a remote producer.
    #[serde(rename = "consume", rename_all = "camelCase")]
    Consume {
        rtp_capabilities: RtpCapabilities,
        remote_producer_id: String,
        server_consumer_transport_id: String,
    },

    /// Let a paused consumer start flowing.
    #[serde(rename = "consumer-resume", rename_all = "camelCase")]
    ConsumerResume { server_consumer_id: String },

    /// List producers of other participants in the caller's room.
    #[serde(rename = "getProducers")]
    GetProducers,
}

impl Request {
    /// The wire event name of this request.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Request::JoinRoom { .. } => "joinRoom",
            Request::CreateWebRtcTransport { .. } => "createWebRtcTransport",
            Request::TransportConnect { .. } => "transport-connect",
            Request::TransportProduce { .. } => "transport-produce",
            Request::TransportRecvConnect { .. } => "transport-recv-connect",
            Request::Consume { .. } => "consume",
            Request::ConsumerResume { .. } => "consumer-resume",
            Request::GetProducers => "getProducers",
        }
    }
}

/// Server-side transport parameters handed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Parameters of a freshly created (paused) consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub server_consumer_id: String,
}

/// A successful reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Response {
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom { rtp_capabilities: RtpCapabilities },

    #[serde(rename = "createWebRtcTransport")]
    CreateWebRtcTransport { params: TransportParams },

    #[serde(rename = "transport-connect")]
    TransportConnect,

    #[serde(rename = "transport-produce", rename_all = "camelCase")]
    TransportProduce { id: String, producers_exist: bool },

    #[serde(rename = "transport-recv-connect")]
    TransportRecvConnect,

    #[serde(rename = "consume")]
    Consume { params: ConsumerParams },

    #[serde(rename = "consumer-resume")]
    ConsumerResume,

    #[serde(rename = "getProducers", rename_all = "camelCase")]
    GetProducers { producer_ids: Vec<String> },
}

/// Notifications pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Sent once, right after the connection is accepted.
    #[serde(rename = "connection-success", rename_all = "camelCase")]
    ConnectionSuccess { socket_id: String },

    /// Another participant in the room started producing.
    #[serde(rename = "new-producer", rename_all = "camelCase")]
    NewProducer { producer_id: String },

    /// A producer this participant consumed went away.
    #[serde(rename = "producer-closed", rename_all = "camelCase")]
    ProducerClosed { remote_producer_id: String },
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// A client request awaiting exactly one reply.
    #[serde(rename = "request")]
    Request {
        /// Request ID echoed in the reply.
        id: u64,
        request: Request,
    },

    /// Successful reply.
    #[serde(rename = "response")]
    Response {
        /// ID of the answered request.
        id: u64,
        response: Response,
    },

    /// Error reply.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Server notification.
    #[serde(rename = "event")]
    Event { event: ServerEvent },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Request { .. } => FrameType::Request,
            Frame::Response { .. } => FrameType::Response,
            Frame::Error { .. } => FrameType::Error,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    #[must_use]
    pub fn request(id: u64, request: Request) -> Self {
        Frame::Request { id, request }
    }

    #[must_use]
    pub fn response(id: u64, response: Response) -> Self {
        Frame::Response { id, response }
    }

    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn event(event: ServerEvent) -> Self {
        Frame::Event { event }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let frame = Frame::request(1, Request::GetProducers);
        assert_eq!(frame.frame_type(), FrameType::Request);
        assert_eq!(u8::from(FrameType::Event), 0x04);
        assert!(FrameType::try_from(0x07).is_err());
    }

    #[test]
    fn test_request_wire_names() {
        let frame: Frame = serde_json::from_value(json!({
            "type": "request",
            "id": 7,
            "request": {
                "event": "transport-recv-connect",
                "dtlsParameters": {
                    "role": "client",
                    "fingerprints": [{"algorithm": "sha-256", "value": "AB:CD"}]
                },
                "serverConsumerTransportId": "t-1"
            }
        }))
        .unwrap();

        match frame {
            Frame::Request {
                id,
                request:
                    Request::TransportRecvConnect {
                        server_consumer_transport_id,
                        ..
                    },
            } => {
                assert_eq!(id, 7);
                assert_eq!(server_consumer_transport_id, "t-1");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unit_request_without_payload() {
        let request: Request = serde_json::from_value(json!({"event": "getProducers"})).unwrap();
        assert_eq!(request, Request::GetProducers);
        assert_eq!(request.event_name(), "getProducers");
    }

    #[test]
    fn test_server_event_shape() {
        let value = serde_json::to_value(Frame::event(ServerEvent::ProducerClosed {
            remote_producer_id: "p-1".into(),
        }))
        .unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["event"], "producer-closed");
        assert_eq!(value["event"]["remoteProducerId"], "p-1");
    }

    #[test]
    fn test_produce_response_shape() {
        let value = serde_json::to_value(Response::TransportProduce {
            id: "p-1".into(),
            producers_exist: true,
        })
        .unwrap();
        assert_eq!(value, json!({"event": "transport-produce", "id": "p-1", "producersExist": true}));
    }
}
