//! JSON message protocol spoken with the signaling server.
//!
//! Every message is one line holding an envelope `{"event": <name>, "data": <payload>}`.
//! Payloads are decoded into tagged variants at this boundary; nothing past
//! it handles raw JSON.

use crate::error::{Result, SigncastError};
use crate::transport::{IceCandidate, SdpKind, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_REGISTER: &str = "register";
pub const EVENT_CONNECTION_SUCCESS: &str = "connection-success";
pub const EVENT_OFFER_OR_ANSWER: &str = "offerOrAnswer";
pub const EVENT_CANDIDATE: &str = "candidate";
pub const EVENT_END_CALL: &str = "endCall";
pub const EVENT_NO_AVAILABLE_SERVERS: &str = "no-available-servers";

/// Raw wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Registration payload announcing this agent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub role: String,
    #[serde(rename = "serverID")]
    pub server_id: String,
}

impl Registration {
    pub fn server(server_id: impl Into<String>) -> Self {
        Self {
            role: "server".to_string(),
            server_id: server_id.into(),
        }
    }
}

/// Offer or answer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, alias = "targetUserID", skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl SdpMessage {
    pub fn description(&self) -> SessionDescription {
        SessionDescription::new(self.sdp.clone(), self.kind)
    }
}

/// ICE candidate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl CandidateMessage {
    /// The candidate with missing fields defaulted to media section "0", index 0.
    pub fn to_ice(&self) -> IceCandidate {
        IceCandidate {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone().unwrap_or_else(|| "0".to_string()),
            sdp_mline_index: self.sdp_mline_index.unwrap_or(0),
        }
    }
}

/// Messages the server sends to an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Registration acknowledged; carries whatever id the server echoed.
    RegisterAck { peer_id: Option<String> },
    Offer(SdpMessage),
    Answer(SdpMessage),
    Candidate(CandidateMessage),
    EndCall,
    /// The server has no free agent for a client. Informational.
    NoAvailableServers,
}

impl InboundMessage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::RegisterAck { .. } => "register-ack",
            InboundMessage::Offer(_) => "offer",
            InboundMessage::Answer(_) => "answer",
            InboundMessage::Candidate(_) => "candidate",
            InboundMessage::EndCall => "end-call",
            InboundMessage::NoAvailableServers => "no-available-servers",
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let payload = |e: serde_json::Error| SigncastError::SignalingProtocol {
            message: format!("malformed '{}' payload: {}", envelope.event, e),
        };
        match envelope.event.as_str() {
            EVENT_CONNECTION_SUCCESS => {
                let peer_id = match &envelope.data {
                    Value::Object(map) => map.get("success").and_then(value_to_id),
                    other => value_to_id(other),
                };
                Ok(InboundMessage::RegisterAck { peer_id })
            }
            EVENT_OFFER_OR_ANSWER => {
                let message: SdpMessage =
                    serde_json::from_value(envelope.data.clone()).map_err(payload)?;
                Ok(match message.kind {
                    SdpKind::Offer => InboundMessage::Offer(message),
                    SdpKind::Answer => InboundMessage::Answer(message),
                })
            }
            EVENT_CANDIDATE => Ok(InboundMessage::Candidate(
                serde_json::from_value(envelope.data.clone()).map_err(payload)?,
            )),
            EVENT_END_CALL => Ok(InboundMessage::EndCall),
            EVENT_NO_AVAILABLE_SERVERS => Ok(InboundMessage::NoAvailableServers),
            other => Err(SigncastError::SignalingProtocol {
                message: format!("unknown event '{}'", other),
            }),
        }
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Messages an agent sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Register(Registration),
    Offer(SdpMessage),
    Answer(SdpMessage),
    Candidate(CandidateMessage),
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundMessage::Register(_) => "register",
            OutboundMessage::Offer(_) => "offer",
            OutboundMessage::Answer(_) => "answer",
            OutboundMessage::Candidate(_) => "candidate",
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        let (event, data) = match self {
            OutboundMessage::Register(r) => (EVENT_REGISTER, serde_json::to_value(r)?),
            OutboundMessage::Offer(m) | OutboundMessage::Answer(m) => {
                (EVENT_OFFER_OR_ANSWER, serde_json::to_value(m)?)
            }
            OutboundMessage::Candidate(c) => (EVENT_CANDIDATE, serde_json::to_value(c)?),
        };
        Ok(Envelope {
            event: event.to_string(),
            data,
        })
    }
}

/// Serializes one message as a newline-terminated line.
pub fn encode_line(message: &OutboundMessage) -> Result<String> {
    let mut line = serde_json::to_string(&message.to_envelope()?)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line received from the server.
pub fn decode_line(line: &str) -> Result<InboundMessage> {
    let envelope: Envelope =
        serde_json::from_str(line.trim()).map_err(|e| SigncastError::SignalingProtocol {
            message: format!("invalid envelope: {}", e),
        })?;
    InboundMessage::from_envelope(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_wire_format() {
        let line = encode_line(&OutboundMessage::Register(Registration::server("abc123DEF456")))
            .expect("should encode");
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["event"], "register");
        assert_eq!(value["data"]["role"], "server");
        assert_eq!(value["data"]["serverID"], "abc123DEF456");
    }

    #[test]
    fn test_decode_offer() {
        let line = r#"{"event":"offerOrAnswer","data":{"sdp":"v=0\r\n","type":"offer","from":"client-7"}}"#;
        match decode_line(line).expect("should decode") {
            InboundMessage::Offer(offer) => {
                assert_eq!(offer.from.as_deref(), Some("client-7"));
                assert_eq!(offer.description().kind, SdpKind::Offer);
            }
            other => panic!("Expected Offer, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_answer_accepts_target_alias() {
        let line = r#"{"event":"offerOrAnswer","data":{"sdp":"v=0","type":"answer","targetUserID":"123"}}"#;
        match decode_line(line).expect("should decode") {
            InboundMessage::Answer(answer) => assert_eq!(answer.to.as_deref(), Some("123")),
            other => panic!("Expected Answer, got: {:?}", other),
        }
    }

    #[test]
    fn test_candidate_defaults() {
        let line = r#"{"event":"candidate","data":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","from":"c"}}"#;
        let InboundMessage::Candidate(message) = decode_line(line).unwrap() else {
            panic!("Expected Candidate");
        };
        let ice = message.to_ice();
        assert_eq!(ice.sdp_mid, "0");
        assert_eq!(ice.sdp_mline_index, 0);

        let line = r#"{"event":"candidate","data":{"candidate":"c","sdpMid":"video","sdpMLineIndex":1}}"#;
        let InboundMessage::Candidate(message) = decode_line(line).unwrap() else {
            panic!("Expected Candidate");
        };
        assert_eq!(message.to_ice().sdp_mid, "video");
        assert_eq!(message.to_ice().sdp_mline_index, 1);
    }

    #[test]
    fn test_connection_success_extracts_id() {
        let line = r#"{"event":"connection-success","data":{"success":"42"}}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            InboundMessage::RegisterAck {
                peer_id: Some("42".to_string())
            }
        );
        let line = r#"{"event":"connection-success"}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            InboundMessage::RegisterAck { peer_id: None }
        );
    }

    #[test]
    fn test_end_call_and_informational_events() {
        assert_eq!(
            decode_line(r#"{"event":"endCall","data":{}}"#).unwrap(),
            InboundMessage::EndCall
        );
        assert_eq!(
            decode_line(r#"{"event":"no-available-servers","data":{"message":"busy"}}"#).unwrap(),
            InboundMessage::NoAvailableServers
        );
    }

    #[test]
    fn test_malformed_input_is_protocol_error() {
        for line in [
            "not json",
            r#"{"event":"bogus","data":{}}"#,
            r#"{"event":"offerOrAnswer","data":{"sdp":"v=0","type":"pranswer"}}"#,
            r#"{"event":"candidate","data":{"sdpMid":"0"}}"#,
        ] {
            assert!(
                matches!(decode_line(line), Err(SigncastError::SignalingProtocol { .. })),
                "expected protocol error for {}",
                line
            );
        }
    }

    #[test]
    fn test_answer_wire_format_addresses_peer() {
        let answer = OutboundMessage::Answer(SdpMessage {
            sdp: "v=0".to_string(),
            kind: SdpKind::Answer,
            from: Some("123".to_string()),
            to: Some("client-7".to_string()),
        });
        let value: Value = serde_json::from_str(encode_line(&answer).unwrap().trim()).unwrap();
        assert_eq!(value["event"], "offerOrAnswer");
        assert_eq!(value["data"]["type"], "answer");
        assert_eq!(value["data"]["to"], "client-7");
        assert_eq!(value["data"]["from"], "123");
    }
}
