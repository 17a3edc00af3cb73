//! Message envelope codec
//!
//! Frames are newline-delimited JSON objects, one message per frame:
//!
//! ```text
//! {"topic":"registerWaveInfo","peerId":"QmViewer"}\n
//! {"topic":"sendChannelsList","channels":{"QmStreamer":{}}}\n
//! ```
//!
//! There is no version field. Receivers ignore topics they do not know.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use super::constants::{topics, FRAME_DELIMITER};
use super::message::SignalingMessage;
use crate::error::{Error, Result};

/// Untyped `{topic, payload}` pair
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Encode as one delimited frame
    pub fn encode(&self) -> Result<Bytes> {
        let mut object = self.payload.clone();
        object.insert("topic".to_string(), Value::String(self.topic.clone()));

        let json = serde_json::to_vec(&Value::Object(object))?;
        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_slice(&json);
        buf.put_u8(FRAME_DELIMITER);
        Ok(buf.freeze())
    }

    /// Decode one frame; a trailing delimiter is optional
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let frame = match frame.last() {
            Some(&FRAME_DELIMITER) => &frame[..frame.len() - 1],
            _ => frame,
        };

        let value: Value = serde_json::from_slice(frame)?;
        let Value::Object(mut payload) = value else {
            return Err(Error::MalformedMessage("frame is not a JSON object".into()));
        };

        match payload.remove("topic") {
            Some(Value::String(topic)) => Ok(Self { topic, payload }),
            Some(_) => Err(Error::MalformedMessage("topic is not a string".into())),
            None => Err(Error::MalformedMessage("missing topic".into())),
        }
    }
}

impl TryFrom<&SignalingMessage> for Envelope {
    type Error = Error;

    fn try_from(msg: &SignalingMessage) -> Result<Self> {
        match serde_json::to_value(msg)? {
            Value::Object(mut payload) => {
                payload.remove("topic");
                Ok(Envelope::new(msg.topic(), payload))
            }
            _ => Err(Error::MalformedMessage(format!(
                "{} did not serialize to an object",
                msg.topic()
            ))),
        }
    }
}

impl TryFrom<Envelope> for SignalingMessage {
    type Error = Error;

    /// Unknown topics yield `UnknownTopic`; ill-shaped payloads `MalformedMessage`
    fn try_from(envelope: Envelope) -> Result<Self> {
        if !topics::is_known(&envelope.topic) {
            return Err(Error::UnknownTopic(envelope.topic));
        }

        let Envelope { topic, mut payload } = envelope;
        payload.insert("topic".to_string(), Value::String(topic.clone()));
        serde_json::from_value(Value::Object(payload))
            .map_err(|e| Error::MalformedMessage(format!("{}: {}", topic, e)))
    }
}

/// Encode a typed message as one frame
pub fn encode(msg: &SignalingMessage) -> Result<Bytes> {
    Envelope::try_from(msg)?.encode()
}

/// Decode one frame into a typed message
pub fn decode(frame: &[u8]) -> Result<SignalingMessage> {
    SignalingMessage::try_from(Envelope::decode(frame)?)
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::network::PeerId;

    #[test]
    fn test_encode_is_single_delimited_frame() {
        let frame = encode(&SignalingMessage::register_wave("QmViewer")).unwrap();

        assert_eq!(*frame.last().unwrap(), b'\n');
        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);

        let value: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(value["topic"], "registerWaveInfo");
        assert_eq!(value["peerId"], "QmViewer");
    }

    #[test]
    fn test_sdp_newlines_stay_inside_frame() {
        let msg = SignalingMessage::offer(
            crate::media::SessionDescription::offer("v=0\r\nm=video 9 RTP/AVP 96\r\n"),
            None,
        );
        let frame = encode(&msg).unwrap();

        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_decode_typed() {
        let msg = assert_ok!(decode(br#"{"topic":"requestCreateOffer","peerId":"QmS1"}"#));
        assert_eq!(
            msg,
            SignalingMessage::RequestCreateOffer {
                peer_id: PeerId::from("QmS1")
            }
        );
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(matches!(
            Envelope::decode(b"not json\n"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            Envelope::decode(b"[1,2,3]"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_topic() {
        assert!(matches!(
            Envelope::decode(br#"{"peerId":"QmS1"}"#),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"topic":42}"#),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unknown_topic() {
        let envelope = assert_ok!(Envelope::decode(br#"{"topic":"updateViewerCount","n":4}"#));
        assert_eq!(envelope.topic, "updateViewerCount");
        assert_eq!(envelope.payload["n"], 4);

        match SignalingMessage::try_from(envelope) {
            Err(Error::UnknownTopic(topic)) => assert_eq!(topic, "updateViewerCount"),
            other => panic!("expected unknown topic, got {:?}", other),
        }
    }

    #[test]
    fn test_known_topic_bad_payload() {
        let result = decode(br#"{"topic":"requestCreateOffer"}"#);
        assert_err!(&result);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_envelope_payload_excludes_topic() {
        let envelope =
            Envelope::try_from(&SignalingMessage::request_streamer_info("QmPrism")).unwrap();

        assert_eq!(envelope.topic, "requestStreamerInfo");
        assert!(!envelope.payload.contains_key("topic"));
        assert_eq!(envelope.payload["peerId"], "QmPrism");
    }
}
