//! Port Record
//!
//! The entity that moves through the whole pipeline: decoded from the source
//! document, forwarded over the wire, stored in the keyed store.
//!
//! The record id is never read from the field object. It always comes from the
//! enclosing key (top-level document key or wire map key), so a stray `id`
//! inside the payload is simply ignored during deserialization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longitude/latitude pair, in the order the source document lists them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Coordinates {
            longitude,
            latitude,
        }
    }
}

/// Per-record field set, shared by the source document and the wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default, deserialize_with = "nullable::string")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(
        default,
        rename = "alias",
        deserialize_with = "nullable::list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aliases: Vec<String>,
    #[serde(
        default,
        deserialize_with = "nullable::list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub regions: Vec<String>,
    #[serde(
        default,
        with = "coordinates_pair",
        skip_serializing_if = "Option::is_none"
    )]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable::list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub unlocs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RecordFields {
    /// Field set with only the required `name` populated
    pub fn named(name: impl Into<String>) -> Self {
        RecordFields {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Reasons a record is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    EmptyId,
    EmptyName { id: String },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::EmptyId => write!(f, "record id is empty"),
            RecordError::EmptyName { id } => write!(f, "record '{}' has no name", id),
        }
    }
}

impl std::error::Error for RecordError {}

/// A single imported port/location keyed by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: RecordFields,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: RecordFields) -> Self {
        Record {
            id: id.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }

    /// The only schema rule: a non-empty id and a non-empty name.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        if self.fields.name.is_empty() {
            return Err(RecordError::EmptyName {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    pub fn into_parts(self) -> (String, RecordFields) {
        (self.id, self.fields)
    }
}

/// `null` is accepted wherever a string or list is optional in practice.
mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub fn list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
    }
}

/// Coordinates travel as a two-element array; `[]` and `null` mean absent.
mod coordinates_pair {
    use super::{Coordinates, Deserialize, Deserializer, Serialize, Serializer};
    use serde::de::Error;

    pub fn serialize<S>(value: &Option<Coordinates>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value
            .map(|c| [c.longitude, c.latitude])
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Coordinates>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<f64>>::deserialize(deserializer)?.unwrap_or_default();
        match raw.as_slice() {
            [] => Ok(None),
            [longitude, latitude] => Ok(Some(Coordinates::new(*longitude, *latitude))),
            other => Err(D::Error::invalid_length(
                other.len(),
                &"an empty array or exactly two coordinates",
            )),
        }
    }
}
