//! Catalog document codec.
//!
//! A catalog is a JSON object holding an array of entries; each entry wraps a
//! single record under a per-kind field:
//!
//! ```text
//! { "apps": [ { "app": { "uuid": "…", "downloads": 12, … } }, … ], … }
//! ```
//!
//! Decoding keeps every key in its original position and every number as its
//! original digit sequence, so an encode after a decode differs from the
//! source only where a record's `downloads` was changed (and in whitespace,
//! which is normalised to four-space indentation).
//!
//! A record's existing `downloads` is only ever overwritten, so a value that
//! is missing or not a count (`"n/a"`, `-1`, `2.5`) decodes as unknown
//! instead of failing the document. Until a count is assigned, the original
//! value is written back untouched.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::error::DocumentError;
use crate::types::{DocumentLayout, DownloadCount, RecordId};

const UUID_FIELD: &str = "uuid";
const DOWNLOADS_FIELD: &str = "downloads";
const INDENT: &[u8] = b"    ";

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One catalog record. `uuid` and `downloads` are typed; every other field is
/// carried through untouched in its original order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub uuid: RecordId,
    /// `None` when the document holds no readable count.
    pub downloads: Option<DownloadCount>,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(uuid: impl Into<RecordId>, downloads: DownloadCount) -> Self {
        let uuid = uuid.into();
        let mut fields = Map::new();
        fields.insert(UUID_FIELD.to_string(), Value::String(uuid.0.clone()));
        fields.insert(DOWNLOADS_FIELD.to_string(), Value::Null);
        Self {
            uuid,
            downloads: Some(downloads),
            fields,
        }
    }

    /// A field other than `uuid`/`downloads`, as decoded.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        let uuid = match fields.get(UUID_FIELD) {
            Some(Value::String(s)) => RecordId(s.clone()),
            Some(_) => return Err(D::Error::custom("'uuid' must be a string")),
            None => return Err(D::Error::missing_field(UUID_FIELD)),
        };
        let downloads = fields
            .get(DOWNLOADS_FIELD)
            .and_then(|value| DownloadCount::from_value(value).ok());
        Ok(Self {
            uuid,
            downloads,
            fields,
        })
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let append = match &self.downloads {
            Some(count) if !self.fields.contains_key(DOWNLOADS_FIELD) => Some(count),
            _ => None,
        };
        let len = self.fields.len() + usize::from(append.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in &self.fields {
            match (key.as_str(), &self.downloads) {
                (UUID_FIELD, _) => map.serialize_entry(key, &self.uuid.0)?,
                (DOWNLOADS_FIELD, Some(count)) => map.serialize_entry(key, count)?,
                _ => map.serialize_entry(key, value)?,
            }
        }
        // A record that never had a count gets the assigned one appended.
        if let Some(count) = append {
            map.serialize_entry(DOWNLOADS_FIELD, count)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Entry / CatalogDocument
// ---------------------------------------------------------------------------

/// One element of the catalog's collection array.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub record: Record,
    /// Sibling keys of the record field; the record slot holds a placeholder.
    fields: Map<String, Value>,
}

/// A decoded catalog, ready for reconciliation and re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogDocument {
    layout: DocumentLayout,
    /// Root object; the collection slot holds a placeholder.
    root: Map<String, Value>,
    entries: Vec<Entry>,
}

impl CatalogDocument {
    /// Decode raw document bytes using `layout` to locate the records.
    pub fn decode(bytes: &[u8], layout: &DocumentLayout) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut root) = value else {
            return Err(DocumentError::RootNotObject);
        };

        let collection = match root.get_mut(&layout.collection_field) {
            Some(Value::Array(items)) => std::mem::take(items),
            _ => {
                return Err(DocumentError::MissingCollection {
                    field: layout.collection_field.clone(),
                })
            }
        };

        let mut entries = Vec::with_capacity(collection.len());
        for (index, item) in collection.into_iter().enumerate() {
            let malformed = || DocumentError::MalformedEntry {
                index,
                field: layout.record_field.clone(),
            };
            let Value::Object(mut fields) = item else {
                return Err(malformed());
            };
            let Some(slot) = fields.get_mut(&layout.record_field) else {
                return Err(malformed());
            };
            if !slot.is_object() {
                return Err(malformed());
            }
            let record: Record = serde_json::from_value(slot.take())
                .map_err(|source| DocumentError::MalformedRecord { index, source })?;
            entries.push(Entry { record, fields });
        }

        Ok(Self {
            layout: layout.clone(),
            root,
            entries,
        })
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|entry| &entry.record)
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.entries.iter_mut().map(|entry| &mut entry.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the full JSON value, records written back into their slots.
    pub fn to_value(&self) -> Result<Value, DocumentError> {
        let mut items = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut fields = entry.fields.clone();
            // `insert` on an existing key keeps its position under preserve_order.
            fields.insert(
                self.layout.record_field.clone(),
                serde_json::to_value(&entry.record)?,
            );
            items.push(Value::Object(fields));
        }
        let mut root = self.root.clone();
        root.insert(self.layout.collection_field.clone(), Value::Array(items));
        Ok(Value::Object(root))
    }

    /// Encode with four-space indentation and no trailing newline.
    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        let value = self.to_value()?;
        let mut out = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(INDENT));
        value.serialize(&mut serializer)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
