//! Wire Envelopes
//!
//! JSON message envelopes exchanged over the realtime channel, matching the
//! server's casing conventions: outbound fields are camelCase, inbound
//! fields are PascalCase. The `payload` field carries opaque bytes and is
//! base64-encoded at construction, before serialization ever sees it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::Result;
use crate::types::{AppId, Credential};

// ----------------------------------------------------------------------------
// Message Kinds
// ----------------------------------------------------------------------------

/// Known values for the envelope `type` discriminator
pub mod kind {
    /// Client position update
    pub const POSITION: &str = "position";
    /// Map/viewport related traffic
    pub const MAP: &str = "map";
    /// Heartbeat probe
    pub const PING: &str = "ping";
}

/// Known values for the envelope `subtype` discriminator
pub mod subtype {
    /// Query hotspots within viewport boundaries
    pub const GET_HOTSPOTS_BY_BOUNDARIES: &str = "getHotspotsByBoundaries";
}

// ----------------------------------------------------------------------------
// Geographic Payloads
// ----------------------------------------------------------------------------

/// A geographic coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Map viewport boundaries, nested inside the `text` body of viewport queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    #[serde(rename = "northEast")]
    pub north_east: GeoPoint,
    #[serde(rename = "southWest")]
    pub south_west: GeoPoint,
}

// ----------------------------------------------------------------------------
// Outbound Envelope
// ----------------------------------------------------------------------------

/// Outbound message envelope, sent as a JSON text frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Application identity; absent only on the heartbeat probe
    #[serde(rename = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<AppId>,
    /// Type discriminator, e.g. "position", "map", "ping"
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional subtype discriminator, e.g. "getHotspotsByBoundaries"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Bearer credential, present on some message kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Credential>,
    /// JSON-encoded nested body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Opaque payload, base64-encoded at construction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl OutboundEnvelope {
    /// Create a bare envelope of the given kind
    pub fn new(app_id: AppId, kind: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id),
            kind: kind.into(),
            subtype: None,
            token: None,
            text: None,
            payload: None,
        }
    }

    /// The heartbeat probe: serializes to exactly `{"type":"ping"}`
    pub fn ping() -> Self {
        Self {
            app_id: None,
            kind: kind::PING.into(),
            subtype: None,
            token: None,
            text: None,
            payload: None,
        }
    }

    /// A position update carrying the current coordinates
    pub fn position(app_id: AppId, token: Credential, at: GeoPoint) -> Result<Self> {
        Ok(Self::new(app_id, kind::POSITION)
            .with_token(token)
            .with_text(&at)?)
    }

    /// A viewport query for hotspots within the given boundaries
    pub fn map_boundaries(app_id: AppId, token: Credential, bounds: Boundaries) -> Result<Self> {
        Ok(Self::new(app_id, kind::MAP)
            .with_subtype(subtype::GET_HOTSPOTS_BY_BOUNDARIES)
            .with_token(token)
            .with_text(&bounds)?)
    }

    /// Attach a subtype discriminator
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Attach the bearer credential
    pub fn with_token(mut self, token: Credential) -> Self {
        self.token = Some(token);
        self
    }

    /// Attach a nested body, JSON-encoded into the `text` field
    pub fn with_text<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.text = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    /// Attach opaque bytes, base64-encoded into the `payload` field
    pub fn with_payload(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.payload = Some(BASE64.encode(bytes.as_ref()));
        self
    }

    /// Serialize the envelope to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ----------------------------------------------------------------------------
// Inbound Envelope
// ----------------------------------------------------------------------------

/// Inbound message envelope, received as a JSON text frame.
///
/// All three fields are required; a frame missing any of them is malformed
/// and gets dropped by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Application identity of the message
    #[serde(rename = "AppId")]
    pub app_id: AppId,
    /// Type discriminator, e.g. "map"
    #[serde(rename = "Type")]
    pub kind: String,
    /// JSON string body, further parsed by the consumer
    #[serde(rename = "Text")]
    pub text: String,
}

impl InboundEnvelope {
    /// Parse an inbound text frame
    pub fn parse(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Whether this message is addressed to the given application identity
    pub fn is_for(&self, app_id: &AppId) -> bool {
        self.app_id == *app_id
    }

    /// Parse the nested `Text` body
    pub fn parse_text<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.text)?)
    }
}

/// Decode a base64 payload field received from the server
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(payload)?)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn app_id() -> AppId {
        AppId::new("herenow")
    }

    #[test]
    fn test_ping_shape() {
        let json = OutboundEnvelope::ping().to_json().unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_position_envelope_fields() {
        let envelope = OutboundEnvelope::position(
            app_id(),
            Credential::new("tok"),
            GeoPoint::new(41.9028, 12.4964),
        )
        .unwrap();

        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["appId"], "herenow");
        assert_eq!(value["type"], "position");
        assert_eq!(value["token"], "tok");
        assert!(value.get("subtype").is_none());
        assert!(value.get("payload").is_none());

        let body: GeoPoint = serde_json::from_str(value["text"].as_str().unwrap()).unwrap();
        assert_eq!(body.latitude, 41.9028);
        assert_eq!(body.longitude, 12.4964);
    }

    #[test]
    fn test_map_boundaries_envelope() {
        let bounds = Boundaries {
            north_east: GeoPoint::new(42.0, 13.0),
            south_west: GeoPoint::new(41.0, 12.0),
        };
        let envelope =
            OutboundEnvelope::map_boundaries(app_id(), Credential::new("tok"), bounds).unwrap();

        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "map");
        assert_eq!(value["subtype"], "getHotspotsByBoundaries");

        let body: Value = serde_json::from_str(value["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["northEast"]["latitude"], 42.0);
        assert_eq!(body["southWest"]["longitude"], 12.0);
    }

    #[test]
    fn test_payload_is_base64_encoded() {
        let envelope = OutboundEnvelope::new(app_id(), "map").with_payload(b"\x00\x01binary");
        let encoded = envelope.payload.as_deref().unwrap();
        assert_eq!(decode_payload(encoded).unwrap(), b"\x00\x01binary");

        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["payload"], encoded);
    }

    #[test]
    fn test_inbound_parse() {
        let envelope =
            InboundEnvelope::parse(r#"{"AppId":"herenow","Type":"map","Text":"[{\"id\":\"h1\"}]"}"#)
                .unwrap();
        assert_eq!(envelope.kind, "map");
        assert!(envelope.is_for(&app_id()));
        assert!(!envelope.is_for(&AppId::new("other")));

        let body: Vec<Value> = envelope.parse_text().unwrap();
        assert_eq!(body[0]["id"], "h1");
    }

    #[test]
    fn test_inbound_missing_field_is_malformed() {
        assert!(InboundEnvelope::parse(r#"{"Type":"map","Text":"[]"}"#).is_err());
        assert!(InboundEnvelope::parse(r#"{"AppId":"herenow","Type":"map"}"#).is_err());
        assert!(InboundEnvelope::parse("not json").is_err());
    }
}
