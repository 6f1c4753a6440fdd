//! Flat node snapshots.
//!
//! A document serializes to a list of `(id, record)` rows carrying the parent
//! link of each node; `Document::load` reconstructs the tree from such a list.
//! Exactly one row is parentless (the root).

use crate::id::Id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind tag of a serialized node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Object,
    Map,
    List,
    Register,
}

/// One row of a document snapshot. `data` is present only for `Object`
/// (its scalar entries) and `Register` (its value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<Id>,
    #[serde(rename = "parentKey", skip_serializing_if = "Option::is_none", default)]
    pub parent_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// Flat form of a whole document, as produced by `Document::serialize`.
pub type Snapshot = Vec<(Id, NodeRecord)>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("snapshot contains no records")]
    Empty,
    #[error("snapshot must contain exactly one parentless record, found {0}")]
    RootCount(usize),
    #[error("the root record must be an object")]
    NonObjectRoot,
    #[error("record {0} appears more than once")]
    DuplicateRecord(Id),
    #[error("record {0} has a parent but no parentKey")]
    MissingParentKey(Id),
    #[error("record {id} names unknown parent {parent}")]
    DanglingParent { id: Id, parent: Id },
    #[error("record {id} cannot be a child of register {parent}")]
    InvalidParentKind { id: Id, parent: Id },
    #[error("record {0} carries malformed data for its kind")]
    MalformedData(Id),
    #[error("record {0} is not reachable from the root")]
    Disconnected(Id),
}
