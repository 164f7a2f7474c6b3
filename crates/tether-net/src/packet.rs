use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tether_model::OpaqueValue;
use tether_types::{ChangeBundle, ObjectUuid};

/// One unit of the channel protocol.
///
/// Packet ids are assigned by the sending channel when the packet leaves
/// its outgoing queue. Replies carry the id of the packet they answer in
/// `origin_packet_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_packet_id: Option<u64>,
    #[serde(flatten)]
    pub body: PacketBody,
}

impl Packet {
    pub fn new(body: PacketBody) -> Self {
        Self {
            packet_id: None,
            origin_packet_id: None,
            body,
        }
    }
}

/// Packet payloads, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PacketBody {
    Open {
        uuid: ObjectUuid,
        instance_hash: String,
    },
    Close,
    SendObject {
        uuid: ObjectUuid,
        json: Json,
    },
    SendPropertyChanges {
        changes: BTreeMap<ObjectUuid, ChangeBundle>,
    },
    SendUriMapping {
        uri: String,
        uuid: ObjectUuid,
    },
    CallMethod {
        uuid: ObjectUuid,
        method_name: String,
        #[serde(default)]
        args: Vec<WireValue>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<WireValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Upload(UploadChunk),
}

impl PacketBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close => "close",
            Self::SendObject { .. } => "sendObject",
            Self::SendPropertyChanges { .. } => "sendPropertyChanges",
            Self::SendUriMapping { .. } => "sendUriMapping",
            Self::CallMethod { .. } => "callMethod",
            Self::Return { .. } => "return",
            Self::Upload(_) => "upload",
        }
    }
}

/// One chunk of a file upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunk {
    pub upload_id: String,
    pub filename: String,
    /// Byte offset of this chunk within the file.
    pub offset: u64,
    /// Chunk payload as encoded by the sender.
    pub data: String,
    #[serde(default)]
    pub last: bool,
}

/// A method argument or return value in transit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireValue {
    /// JSON primitives, null, and plain embedded structures.
    Value(Json),
    /// A replicated object, by identity.
    Uuid(ObjectUuid),
    Decimal(String),
    /// RFC 3339 timestamp.
    Date(String),
    Array(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    /// In-process only; refused by the codec.
    #[serde(skip)]
    Raw(OpaqueValue),
}

impl WireValue {
    pub fn null() -> Self {
        Self::Value(Json::Null)
    }

    /// Returns `true` if this value, or anything nested in it, only makes
    /// sense inside the current process.
    pub fn is_raw(&self) -> bool {
        match self {
            Self::Raw(_) => true,
            Self::Array(items) => items.iter().any(Self::is_raw),
            Self::Map(entries) => entries.values().any(Self::is_raw),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_types::ChangeRecord;

    #[test]
    fn call_packet_wire_shape() {
        let uuid = ObjectUuid::new();
        let packet = Packet {
            packet_id: Some(7),
            origin_packet_id: None,
            body: PacketBody::CallMethod {
                uuid,
                method_name: "greet".into(),
                args: vec![WireValue::Value(json!("x")), WireValue::Uuid(uuid)],
            },
        };
        let wire = serde_json::to_value(&packet).unwrap();
        assert_eq!(
            wire,
            json!({
                "packetId": 7,
                "type": "callMethod",
                "uuid": uuid.to_string(),
                "methodName": "greet",
                "args": [{"value": "x"}, {"uuid": uuid.to_string()}],
            })
        );
        let back: Packet = serde_json::from_value(wire).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn return_packet_omits_absent_fields() {
        let packet = Packet {
            packet_id: Some(3),
            origin_packet_id: Some(9),
            body: PacketBody::Return {
                result: None,
                error: Some("nope".into()),
            },
        };
        let wire = serde_json::to_value(&packet).unwrap();
        assert_eq!(
            wire,
            json!({"packetId": 3, "originPacketId": 9, "type": "return", "error": "nope"})
        );
    }

    #[test]
    fn property_changes_are_keyed_by_uuid() {
        let uuid = ObjectUuid::new();
        let mut bundle = ChangeBundle::new();
        bundle.insert(
            "tags".into(),
            ChangeRecord::ArrayChange {
                added: vec![json!("a")],
                removed: vec![],
            },
        );
        let packet = Packet::new(PacketBody::SendPropertyChanges {
            changes: BTreeMap::from([(uuid, bundle)]),
        });
        let wire = serde_json::to_value(&packet).unwrap();
        assert_eq!(wire["type"], json!("sendPropertyChanges"));
        assert_eq!(
            wire["changes"][uuid.to_string()]["tags"]["type"],
            json!("arrayChange")
        );
        let back: Packet = serde_json::from_value(wire).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn raw_values_do_not_serialize() {
        let raw = WireValue::Array(vec![WireValue::Raw(OpaqueValue::new(5_u8))]);
        assert!(raw.is_raw());
        assert!(serde_json::to_value(&raw).is_err());
        assert!(!WireValue::null().is_raw());
    }

    #[test]
    fn upload_chunk_is_flattened_into_the_packet() {
        let packet = Packet::new(PacketBody::Upload(UploadChunk {
            upload_id: "u1".into(),
            filename: "a.txt".into(),
            offset: 0,
            data: "aGk=".into(),
            last: true,
        }));
        let wire = serde_json::to_value(&packet).unwrap();
        assert_eq!(wire["type"], json!("upload"));
        assert_eq!(wire["uploadId"], json!("u1"));
        assert_eq!(wire["last"], json!(true));
    }
}
