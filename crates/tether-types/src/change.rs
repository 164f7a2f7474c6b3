use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// A normalized, JSON-ready description of one property mutation.
///
/// Payloads are already serialized, so a record can be queued, coalesced,
/// and replayed on a peer without touching the live object graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeRecord {
    /// The property now holds `value`.
    SetValue { value: Json },
    /// The ordered collection's full contents are now `value`.
    ArrayReplace { value: Vec<Json> },
    /// Remove each of `removed` (last equal occurrence), then append `added`.
    ArrayChange {
        #[serde(default)]
        added: Vec<Json>,
        #[serde(default)]
        removed: Vec<Json>,
    },
    /// The keyed collection's full contents are now `value`.
    MapReplace { value: Map<String, Json> },
    /// Remove each key in `removed`, then insert every entry of `put`.
    MapChange {
        #[serde(default)]
        put: Map<String, Json>,
        #[serde(default)]
        removed: Vec<String>,
    },
}

impl ChangeRecord {
    /// Returns `true` for records that carry a full snapshot of the property.
    pub fn is_replace(&self) -> bool {
        matches!(
            self,
            Self::SetValue { .. } | Self::ArrayReplace { .. } | Self::MapReplace { .. }
        )
    }

    /// The wire name of the record type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetValue { .. } => "setValue",
            Self::ArrayReplace { .. } => "arrayReplace",
            Self::ArrayChange { .. } => "arrayChange",
            Self::MapReplace { .. } => "mapReplace",
            Self::MapChange { .. } => "mapChange",
        }
    }
}

/// Pending changes for one object, keyed by property name.
pub type ChangeBundle = BTreeMap<String, ChangeRecord>;
