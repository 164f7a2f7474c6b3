use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tether_channel::ReplicationChannel;
use tether_model::{KeyedCollection, ObjectHandle, OrderedCollection, Value};
use tether_serial::coerce;
use tracing::warn;

use crate::channel::NetworkChannel;
use crate::error::NetResult;
use crate::packet::WireValue;

impl NetworkChannel {
    /// Convert a method argument or result for the wire. Objects the peer
    /// does not know yet are put first, so they arrive ahead of the packet
    /// that refers to them.
    pub(crate) async fn to_wire(&self, value: &Value) -> NetResult<WireValue> {
        let mut objects = Vec::new();
        collect_objects(value, &mut objects);
        for object in objects {
            if self.needs_send(&object) {
                self.put(&object).await?;
            }
        }
        Ok(encode(value))
    }

    /// Convert an inbound argument or result. Identities the peer never
    /// sent resolve to null.
    pub(crate) fn from_wire(&self, value: &WireValue) -> Value {
        match value {
            WireValue::Value(json) => coerce::plain_from_json(json),
            WireValue::Uuid(uuid) => match self.core_ref().registry().try_get_incomplete(*uuid) {
                Some(object) => Value::Object(object),
                None => {
                    warn!(channel = %self.id(), uuid = %uuid, "unknown object in method payload, using null");
                    Value::Null
                }
            },
            WireValue::Decimal(text) => match text.parse() {
                Ok(decimal) => Value::Decimal(decimal),
                Err(e) => {
                    warn!(value = %text, error = %e, "invalid decimal in method payload, using null");
                    Value::Null
                }
            },
            WireValue::Date(text) => match DateTime::parse_from_rfc3339(text) {
                Ok(date) => Value::Date(date.with_timezone(&Utc)),
                Err(e) => {
                    warn!(value = %text, error = %e, "invalid date in method payload, using null");
                    Value::Null
                }
            },
            WireValue::Array(items) => Value::List(OrderedCollection::from_values(
                items.iter().map(|item| self.from_wire(item)).collect(),
            )),
            WireValue::Map(entries) => Value::Map(KeyedCollection::from_entries(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.from_wire(v)))
                    .collect(),
            )),
            WireValue::Raw(opaque) => Value::Opaque(opaque.clone()),
        }
    }
}

fn collect_objects(value: &Value, out: &mut Vec<ObjectHandle>) {
    match value {
        Value::Object(object) => {
            if !out.iter().any(|o| o.ptr_eq(object)) {
                out.push(object.clone());
            }
        }
        Value::List(list) => list.to_vec().iter().for_each(|v| collect_objects(v, out)),
        Value::Map(map) => map.to_map().values().for_each(|v| collect_objects(v, out)),
        _ => {}
    }
}

fn encode(value: &Value) -> WireValue {
    match value {
        Value::Null => WireValue::null(),
        Value::Bool(_) | Value::Integer(_) | Value::Number(_) | Value::Text(_) => {
            WireValue::Value(coerce::primitive_to_json(value, "argument"))
        }
        Value::Json(json) => WireValue::Value(json.clone()),
        Value::Decimal(decimal) => WireValue::Decimal(decimal.as_str().to_string()),
        Value::Date(date) => WireValue::Date(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Object(object) => WireValue::Uuid(object.uuid()),
        Value::List(list) => WireValue::Array(list.to_vec().iter().map(encode).collect()),
        Value::Map(map) => WireValue::Map(
            map.to_map()
                .iter()
                .map(|(k, v)| (k.clone(), encode(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
        Value::Opaque(opaque) => WireValue::Raw(opaque.clone()),
    }
}
