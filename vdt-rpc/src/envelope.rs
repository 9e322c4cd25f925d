//! Message envelope and its wire encoding
//!
//! An envelope travels as a JSON object. Its `payload` is itself a JSON
//! string (double encoding), so adapters that only carry primitive-safe
//! structures never see nested objects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, DecodeError};
use crate::event::{BridgeEvent, Source};

/// Identifier pairing a request envelope with its reply
pub type CorrelationId = String;

/// Envelope exactly as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    source: Source,
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// A decoded envelope with its event resolved against the vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: Source,
    pub event: BridgeEvent,
    /// Serialized JSON payload
    pub payload: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    /// Failure reported by a responder
    pub error: Option<String>,
}

impl Envelope {
    /// Create an envelope without payload
    pub fn new(source: Source, event: BridgeEvent) -> Self {
        Self {
            source,
            event,
            payload: None,
            correlation_id: None,
            error: None,
        }
    }

    /// Attach a payload, serializing it to a JSON string
    pub fn with_payload(mut self, payload: Option<Value>) -> Result<Self, BridgeError> {
        self.payload = payload.map(|p| serde_json::to_string(&p)).transpose()?;
        Ok(self)
    }

    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Deserialize the payload. A missing payload deserializes from `null`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(raw) => serde_json::from_str(raw),
            None => serde_json::from_value(Value::Null),
        }
    }

    /// Whether this envelope expects an answer
    pub fn is_request(&self) -> bool {
        self.correlation_id.is_some() && !self.event.is_reply()
    }

    /// Whether this envelope answers a request
    pub fn is_response(&self) -> bool {
        self.correlation_id.is_some() && self.event.is_reply()
    }

    /// Encode to the transport string
    pub fn encode(&self) -> Result<String, BridgeError> {
        if self.event.is_local() {
            return Err(BridgeError::LocalEvent(self.event));
        }
        let wire = WireEnvelope {
            source: self.source,
            event: self.event.name().to_string(),
            payload: self.payload.clone(),
            correlation_id: self.correlation_id.clone(),
            error: self.error.clone(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode a transport string. Fails closed on malformed input and on
    /// event names outside the vocabulary.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_str(raw)?;
        let event = BridgeEvent::from_wire(&wire.event)
            .ok_or_else(|| DecodeError::UnknownEvent(wire.event.clone()))?;
        if let Some(payload) = &wire.payload {
            // Reject payloads that are not valid JSON before anyone sees them
            serde_json::from_str::<serde::de::IgnoredAny>(payload)
                .map_err(DecodeError::Payload)?;
        }
        Ok(Self {
            source: wire.source,
            event,
            payload: wire.payload,
            correlation_id: wire.correlation_id,
            error: wire.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_is_double_encoded() {
        let envelope = Envelope::new(Source::App, BridgeEvent::SendInspectorTree)
            .with_payload(Some(json!([{ "id": "root" }])))
            .unwrap()
            .with_correlation_id("c1");
        let raw = envelope.encode().unwrap();
        let wire: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(wire["payload"], json!("[{\"id\":\"root\"}]"));
        assert_eq!(wire["correlationId"], json!("c1"));
        assert_eq!(wire["event"], json!("inspector-tree:send"));
        assert_eq!(wire["source"], json!("app"));
        assert!(wire.get("error").is_none());

        let decoded = Envelope::decode(&raw).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.parse::<Value>().unwrap(), json!([{ "id": "root" }]));
    }

    #[test]
    fn test_decode_unknown_event() {
        let raw = r#"{"source":"client","event":"mystery:event"}"#;
        assert!(matches!(
            Envelope::decode(raw),
            Err(DecodeError::UnknownEvent(name)) if name == "mystery:event"
        ));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Envelope::decode("{not json"),
            Err(DecodeError::Json(_))
        ));
        let bad_payload = r#"{"source":"app","event":"devtools-state:updated","payload":"{oops"}"#;
        assert!(matches!(
            Envelope::decode(bad_payload),
            Err(DecodeError::Payload(_))
        ));
    }

    #[test]
    fn test_local_event_cannot_be_encoded() {
        let envelope = Envelope::new(Source::Client, BridgeEvent::Connect);
        assert!(matches!(
            envelope.encode(),
            Err(BridgeError::LocalEvent(BridgeEvent::Connect))
        ));
    }

    #[test]
    fn test_request_and_response_classification() {
        let request = Envelope::new(Source::Client, BridgeEvent::GetInspectorTree)
            .with_correlation_id("c1");
        assert!(request.is_request());
        assert!(!request.is_response());

        let reply = Envelope::new(Source::App, BridgeEvent::SendInspectorTree)
            .with_correlation_id("c1");
        assert!(reply.is_response());

        let push = Envelope::new(Source::App, BridgeEvent::SendInspectorTree);
        assert!(!push.is_request());
        assert!(!push.is_response());
    }

    #[test]
    fn test_missing_payload_parses_as_null() {
        let envelope = Envelope::new(Source::App, BridgeEvent::RpcReply);
        assert!(envelope.parse::<()>().is_ok());
        assert_eq!(envelope.parse::<Option<String>>().unwrap(), None);
    }
}
