//! Wire types of the Firestore v1 REST API, limited to what listing and committing need.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::store::{Timestamp, VideoRecord, VideoUpdate, LAST_UPDATED};

/// A typed Firestore field value. Integers travel as decimal strings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(#[serde_as(as = "DisplayFromStr")] i64),
    DoubleValue(#[serde(deserialize_with = "double")] f64),
    TimestampValue(Timestamp),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(serde_json::Value),
    MapValue(serde_json::Value),
}

/// Doubles arrive as JSON numbers, except the non-finite ones which proto3 spells out as strings.
fn double<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Double {
        Number(f64),
        Text(String),
    }

    match Double::deserialize(deserializer)? {
        Double::Number(number) => Ok(number),
        Double::Text(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(D::Error::custom(format!("invalid double `{other}`"))),
        },
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::StringValue(text) => Some(text),
            _ => None,
        }
    }

    /// Reads a non-negative counter, tolerating counters that were written as doubles.
    pub fn as_count(&self) -> Option<u64> {
        match *self {
            Value::IntegerValue(count) => u64::try_from(count).ok(),
            Value::DoubleValue(count) if count.is_finite() && count >= 0.0 => Some(count as u64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::TimestampValue(timestamp) => Some(*timestamp),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(count: u64) -> Self {
        Value::IntegerValue(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Document {
    /// Full resource name, `projects/{project}/databases/{database}/documents/{collection}/{id}`
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map_or(self.name.as_str(), |(_, id)| id)
    }

    pub fn into_record(self) -> VideoRecord {
        let field = |name: &str| self.fields.get(name);

        VideoRecord {
            id: self.id().to_string(),
            link: field("link").and_then(Value::as_str).map(str::to_string),
            title: field("title").and_then(Value::as_str).map(str::to_string),
            views: field("views").and_then(Value::as_count),
            likes: field("likes").and_then(Value::as_count),
            last_updated: field(LAST_UPDATED).and_then(Value::as_timestamp),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    update: DocumentFields,
    update_mask: DocumentMask,
    update_transforms: Vec<FieldTransform>,
    current_document: Precondition,
}

#[derive(Debug, Serialize)]
struct DocumentFields {
    name: String,
    fields: BTreeMap<&'static str, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentMask {
    field_paths: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldTransform {
    field_path: &'static str,
    set_to_server_value: &'static str,
}

#[derive(Debug, Serialize)]
struct Precondition {
    exists: bool,
}

impl Write {
    /// Overwrite only the counters named by `update` on an existing document and stamp
    /// `last_updated` with the commit time.
    pub fn partial_update(name: String, update: &VideoUpdate) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("views", Value::from(update.views));
        if let Some(likes) = update.likes {
            fields.insert("likes", Value::from(likes));
        }

        Write {
            update: DocumentFields { name, fields },
            update_mask: DocumentMask {
                field_paths: update.field_paths(),
            },
            update_transforms: vec![FieldTransform {
                field_path: LAST_UPDATED,
                set_to_server_value: "REQUEST_TIME",
            }],
            current_document: Precondition { exists: true },
        }
    }
}
