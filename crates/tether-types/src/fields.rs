//! Field names and helpers for the persisted document shape.
//!
//! Every serialized object is `{_classname, _uuid, ...properties}`. A
//! reference that is not embedded is carried as a bare stub holding only
//! `_uuid` and `_classname`.

use serde_json::{Map, Value as Json};

use crate::error::{TypeError, TypeResult};
use crate::identity::ObjectUuid;

/// Class name of the serialized object.
pub const CLASSNAME_FIELD: &str = "_classname";
/// Identity of the serialized object.
pub const UUID_FIELD: &str = "_uuid";
/// Modification stamp written by storage-backed channels.
pub const MTIME_FIELD: &str = "_mtime";
/// Marks a reference given as a store query instead of an identity.
pub const QUERY_FIELD: &str = "_query";

/// Build a `{_uuid, _classname}` reference stub.
pub fn stub(uuid: ObjectUuid, class_name: &str) -> Json {
    let mut map = Map::new();
    map.insert(UUID_FIELD.into(), Json::String(uuid.to_string()));
    map.insert(CLASSNAME_FIELD.into(), Json::String(class_name.into()));
    Json::Object(map)
}

/// Returns `true` if `json` is an object carrying nothing but identity fields.
pub fn is_stub(json: &Json) -> bool {
    match json.as_object() {
        Some(map) => {
            map.contains_key(UUID_FIELD)
                && map
                    .keys()
                    .all(|k| k == UUID_FIELD || k == CLASSNAME_FIELD)
        }
        None => false,
    }
}

/// Read the `_uuid` field of a document.
pub fn uuid_of(json: &Json) -> TypeResult<ObjectUuid> {
    let map = json
        .as_object()
        .ok_or_else(|| TypeError::NotAnObject(json.to_string()))?;
    map.get(UUID_FIELD)
        .and_then(Json::as_str)
        .ok_or(TypeError::MissingField(UUID_FIELD))?
        .parse()
}

/// Read the `_classname` field of a document, if present.
pub fn classname_of(json: &Json) -> Option<&str> {
    json.get(CLASSNAME_FIELD).and_then(Json::as_str)
}

/// Read the `_mtime` stamp (milliseconds since the epoch), if present.
pub fn mtime_of(json: &Json) -> Option<i64> {
    json.get(MTIME_FIELD).and_then(Json::as_i64)
}
