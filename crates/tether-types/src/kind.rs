use std::fmt;

use serde::{Deserialize, Serialize};

/// How a property's value is carried in the persisted JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    /// Booleans, numbers, strings, decimals.
    Primitive,
    /// A timestamp, carried as an RFC 3339 string.
    Date,
    /// A plain JSON structure stored inline, with no identity of its own.
    EmbeddedValue,
    /// Another identified object, carried as a stub or embedded inline.
    Reference,
    /// An ordered collection of values of one element shape.
    OrderedCollection,
    /// A string-keyed collection of values of one element shape.
    KeyedCollection,
}

impl ValueKind {
    /// Returns `true` for the two collection kinds.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::OrderedCollection | Self::KeyedCollection)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primitive => "primitive",
            Self::Date => "date",
            Self::EmbeddedValue => "embeddedValue",
            Self::Reference => "reference",
            Self::OrderedCollection => "orderedCollection",
            Self::KeyedCollection => "keyedCollection",
        };
        f.write_str(name)
    }
}
