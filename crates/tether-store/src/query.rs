use serde_json::{Map, Value as Json};
use tether_types::{ObjectUuid, UUID_FIELD};

use crate::error::{StoreError, StoreResult};

/// Equality query over top-level document fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query(Map<String, Json>);

impl Query {
    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches the document with the given identity.
    pub fn by_uuid(uuid: ObjectUuid) -> Self {
        Self::all().with(UUID_FIELD, Json::String(uuid.to_string()))
    }

    /// Add an equality condition.
    pub fn with(mut self, field: impl Into<String>, value: Json) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Build a query from a JSON object of field conditions.
    pub fn from_json(json: &Json) -> StoreResult<Self> {
        json.as_object()
            .cloned()
            .map(Self)
            .ok_or_else(|| StoreError::InvalidQuery(json.to_string()))
    }

    /// The identity this query pins, if it has a `_uuid` condition.
    pub fn uuid_key(&self) -> Option<ObjectUuid> {
        self.0.get(UUID_FIELD)?.as_str()?.parse().ok()
    }

    pub fn matches(&self, document: &Json) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

/// Restricts the fields returned by a lookup. `_uuid` is always kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Projection(Vec<String>);

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn apply(&self, document: &Json) -> Json {
        let Some(map) = document.as_object() else {
            return document.clone();
        };
        let projected: Map<String, Json> = map
            .iter()
            .filter(|(k, _)| k.as_str() == UUID_FIELD || self.0.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Json::Object(projected)
    }
}
