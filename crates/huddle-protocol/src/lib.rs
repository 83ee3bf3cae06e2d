//! # huddle-protocol
//!
//! Signaling wire protocol for the Huddle SFU orchestrator.
//!
//! Clients and the server exchange [`Frame`]s over a WebSocket. A request
//! frame carries one of the signaling events (`joinRoom`,
//! `createWebRtcTransport`, `transport-produce`, `consume`, ...) and is
//! answered by exactly one `response` or `error` frame with the same id.
//! The server pushes `connection-success`, `new-producer` and
//! `producer-closed` as unacknowledged `event` frames.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Frame, Request};
//!
//! let frame = Frame::request(1, Request::JoinRoom { room_name: "lobby".into() });
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;
pub mod media;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{
    codes, ConsumerParams, Frame, FrameType, Request, Response, ServerEvent, TransportParams,
};
pub use media::{
    CodecParameters, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, MediaKind, RtcpFeedback, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpParameters,
};
