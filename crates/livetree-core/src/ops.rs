//! The operation set exchanged between replicas.
//!
//! Every operation carries a `type` tag from the closed set below; identities
//! travel as `"<actor>:<clock>"` strings. The field set is normative, the
//! byte layout is left to the codec in use.

use crate::id::Id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single change to the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Op {
    /// Creates an object node. The document root is the only object created
    /// without a parent.
    CreateObject {
        id: Id,
        #[serde(rename = "parentId", skip_serializing_if = "Option::is_none", default)]
        parent_id: Option<Id>,
        #[serde(rename = "parentKey", skip_serializing_if = "Option::is_none", default)]
        parent_key: Option<String>,
        data: Map<String, Value>,
    },
    CreateMap {
        id: Id,
        #[serde(rename = "parentId")]
        parent_id: Id,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
    CreateList {
        id: Id,
        #[serde(rename = "parentId")]
        parent_id: Id,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
    CreateRegister {
        id: Id,
        #[serde(rename = "parentId")]
        parent_id: Id,
        #[serde(rename = "parentKey")]
        parent_key: String,
        data: Value,
    },
    /// Per-key scalar writes on an object. `opId` supports acknowledgement of
    /// the sender's own echo; it is always present on locally minted ops.
    UpdateObject {
        id: Id,
        data: Map<String, Value>,
        #[serde(rename = "opId", skip_serializing_if = "Option::is_none", default)]
        op_id: Option<Id>,
    },
    DeleteObjectKey {
        id: Id,
        key: String,
    },
    DeleteCrdt {
        id: Id,
    },
    SetParentKey {
        id: Id,
        #[serde(rename = "parentKey")]
        parent_key: String,
    },
}

impl Op {
    /// The `id` field of the operation: the node being created for creation
    /// ops, the addressed node otherwise.
    pub fn id(&self) -> Id {
        match self {
            Op::CreateObject { id, .. }
            | Op::CreateMap { id, .. }
            | Op::CreateList { id, .. }
            | Op::CreateRegister { id, .. }
            | Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. }
            | Op::DeleteCrdt { id }
            | Op::SetParentKey { id, .. } => *id,
        }
    }

    /// Node the op is routed to: the parent for creation ops, the addressed
    /// node otherwise. `None` for a parentless root creation.
    pub fn target(&self) -> Option<Id> {
        match self {
            Op::CreateObject { parent_id, .. } => *parent_id,
            Op::CreateMap { parent_id, .. }
            | Op::CreateList { parent_id, .. }
            | Op::CreateRegister { parent_id, .. } => Some(*parent_id),
            Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. }
            | Op::DeleteCrdt { id }
            | Op::SetParentKey { id, .. } => Some(*id),
        }
    }
}
