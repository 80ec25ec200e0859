/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! records, collections and the rules for their fields */
use crate::shared::{FLResult, ShelfError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

/** longest allowed id */
pub const MAX_ID_LENGTH: usize = 64;
/** longest allowed name (after trimming) */
pub const MAX_NAME_LENGTH: usize = 100;
/** the characters allowed in an id */
pub(crate) const ID_PATTERN: &str = "^[a-z0-9-]+$";
/** keys that are record fields, so never extra fields */
const RESERVED_FIELDS: [&str; 3] = ["id", "name", "isActive"];

/** a single named entity in a collection. Fields other than `id`, `name`
and `isActive` are kept in `extra`, in document order, and are not
interpreted here. */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: Mapping,
}

/** all the records of one kind, in display order */
pub type Collection = Vec<Record>;

/** the data for a new record */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: Mapping,
}
impl RecordInput {
    /** an active record with no extra fields */
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            is_active: true,
            extra: Mapping::new(),
        }
    }
    /** add a kind-specific field */
    pub fn with_field(mut self, key: &str, value: serde_yaml::Value) -> Self {
        let _ = self.extra.insert(serde_yaml::Value::from(key), value);
        self
    }
}
fn default_active() -> bool {
    true
}

/** changes to an existing record. Absent fields are left as they are; an
`id` is accepted so that whole records can be sent back, but is never applied. */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub extra: Mapping,
}
impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }
    pub fn with_field(mut self, key: &str, value: serde_yaml::Value) -> Self {
        let _ = self.extra.insert(serde_yaml::Value::from(key), value);
        self
    }
    /** apply to a record; the record's id is kept */
    pub(crate) fn apply_to(&self, record: &mut Record, name: Option<String>) {
        if let Some(n) = name {
            record.name = n;
        }
        if let Some(a) = self.is_active {
            record.is_active = a;
        }
        for (k, v) in self.extra.iter() {
            let _ = record.extra.insert(k.clone(), v.clone());
        }
    }
}

/** check an id, returning it unchanged if it is acceptable */
pub(crate) fn validate_id(pattern: &Regex, id: &str) -> FLResult<String> {
    if id.is_empty() {
        return Err(ShelfError::InvalidId(id.to_owned(), "empty".to_owned()));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(ShelfError::InvalidId(
            id.to_owned(),
            format!("longer than {} characters", MAX_ID_LENGTH),
        ));
    }
    if !pattern.is_match(id) {
        return Err(ShelfError::InvalidId(
            id.to_owned(),
            "only lowercase letters, digits and '-' are allowed".to_owned(),
        ));
    }
    Ok(id.to_owned())
}

/** check a name, returning it trimmed */
pub(crate) fn validate_name(name: &str) -> FLResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ShelfError::InvalidName(name.to_owned(), "empty".to_owned()));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ShelfError::InvalidName(
            name.to_owned(),
            format!("longer than {} characters", MAX_NAME_LENGTH),
        ));
    }
    Ok(trimmed.to_owned())
}

/** check that no extra field would clash with a record field */
pub(crate) fn validate_extra(extra: &Mapping) -> FLResult<()> {
    for key in extra.keys() {
        if let Some(k) = key.as_str() {
            if RESERVED_FIELDS.contains(&k) {
                return Err(ShelfError::ReservedField(k.to_owned()));
            }
        }
    }
    Ok(())
}

/** the form of a name used for uniqueness */
pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/** whether another record (not `except_id`) already uses the name */
pub(crate) fn name_taken(collection: &[Record], name: &str, except_id: Option<&str>) -> bool {
    let key = name_key(name);
    collection
        .iter()
        .filter(|r| Some(r.id.as_str()) != except_id)
        .any(|r| name_key(&r.name) == key)
}
