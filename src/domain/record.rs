//! Record domain types
//!
//! Parcels (parent records) and notes (child records) as read from the source
//! store. The engine never mutates these; it only writes tagged copies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two record kinds the engine migrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Land parcel
    Parent,
    /// Note attached to a parcel
    Child,
}

impl RecordKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "parent" | "parents" | "parcel" | "parcels" => Some(Self::Parent),
            "child" | "children" | "note" | "notes" => Some(Self::Child),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (longitude, latitude) pair
///
/// Non-finite values serialize as strings ("NaN", "inf") so a snapshot of bad
/// source data still reads back; the validator rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(with = "float_repr")]
    pub lon: f64,
    #[serde(with = "float_repr")]
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Scalar parcel fields plus the opaque provenance blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot: Option<String>,
    /// Area in square meters
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "float_repr::option"
    )]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Unknown source data, carried through unmodified
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub provenance: serde_json::Value,
}

/// A land parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub key: String,
    pub boundary: Vec<Coordinate>,
    pub centroid: Coordinate,
    #[serde(default)]
    pub attributes: ParentAttributes,
}

impl ParentRecord {
    /// Whether the boundary ring ends where it starts
    pub fn is_ring_closed(&self) -> bool {
        match (self.boundary.first(), self.boundary.last()) {
            (Some(first), Some(last)) => self.boundary.len() > 1 && first == last,
            _ => false,
        }
    }

    /// Copy of this record with the boundary ring closed
    pub fn with_closed_ring(&self) -> Self {
        let mut closed = self.clone();
        if !closed.is_ring_closed() {
            if let Some(first) = closed.boundary.first().copied() {
                closed.boundary.push(first);
            }
        }
        closed
    }
}

/// A note referencing a parcel by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub key: String,
    pub parent_key: String,
    pub content: String,
}

/// Either record kind, as exchanged with the target store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Parent(ParentRecord),
    Child(ChildRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Parent(_) => RecordKind::Parent,
            Self::Child(_) => RecordKind::Child,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Parent(p) => &p.key,
            Self::Child(c) => &c.key,
        }
    }

    pub fn as_parent(&self) -> Option<&ParentRecord> {
        match self {
            Self::Parent(p) => Some(p),
            Self::Child(_) => None,
        }
    }
}

impl From<ParentRecord> for Record {
    fn from(record: ParentRecord) -> Self {
        Self::Parent(record)
    }
}

impl From<ChildRecord> for Record {
    fn from(record: ChildRecord) -> Self {
        Self::Child(record)
    }
}

/// JSON has no NaN or infinity; those travel as their `Display` text
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    impl Repr {
        fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
            match self {
                Repr::Number(n) => Ok(n),
                Repr::Text(text) => text
                    .parse()
                    .map_err(|_| E::custom(format!("not a number: {}", text))),
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.into_f64()
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_f64::<D::Error>)
                .transpose()
        }
    }
}
