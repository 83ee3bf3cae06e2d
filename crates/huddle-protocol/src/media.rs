//! Media negotiation parameters carried over signaling.
//!
//! These mirror the shapes a WebRTC client library exchanges with a
//! selective forwarding unit. The orchestrator treats most of them as opaque
//! and hands them to the media engine untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Codec-specific format parameters (`fmtp`), e.g. `x-google-start-bitrate`.
pub type CodecParameters = BTreeMap<String, serde_json::Value>;

/// Kind of media carried by a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A codec a router or endpoint is able to send or receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: CodecParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Create a capability without payload type or parameters.
    #[must_use]
    pub fn new(kind: MediaKind, mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind,
            mime_type: mime_type.into(),
            preferred_payload_type: None,
            clock_rate,
            channels: None,
            parameters: CodecParameters::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = Some(channels);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Whether two codecs describe the same format.
    ///
    /// MIME types compare case-insensitively; channels only matter for audio.
    #[must_use]
    pub fn matches(&self, mime_type: &str, clock_rate: u32, channels: Option<u8>) -> bool {
        if !self.mime_type.eq_ignore_ascii_case(mime_type) || self.clock_rate != clock_rate {
            return false;
        }
        match self.kind {
            MediaKind::Audio => self.channels.unwrap_or(1) == channels.unwrap_or(1),
            MediaKind::Video => true,
        }
    }
}

/// RTCP feedback mechanism supported by a codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

/// The codecs and header extensions an endpoint supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<serde_json::Value>,
}

/// A negotiated codec inside [`RtpParameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: CodecParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// Parameters describing an RTP stream being sent or received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<serde_json::Value>,
    #[serde(default)]
    pub encodings: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<serde_json::Value>,
}

/// ICE credentials of a server-side transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

/// Transport protocol of an ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceProtocol {
    Udp,
    Tcp,
}

/// A local ICE candidate offered by a server-side transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    #[serde(alias = "ip")]
    pub address: String,
    pub protocol: IceProtocol,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

/// DTLS role of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

/// Certificate fingerprint used to authenticate the DTLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS parameters exchanged to complete a transport handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<DtlsRole>,
    pub fingerprints: Vec<DtlsFingerprint>,
}
