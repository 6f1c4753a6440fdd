//! Arena node bodies.
//!
//! The document owns every attached node in an `id -> Node` arena; parent
//! links are stored as ids, never references, so detachment cannot invalidate
//! anything but the arena entries it removes.

use crate::id::Id;
use crate::position::Position;
use crate::serialization::NodeKind;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<ParentLink>,
    pub(crate) body: NodeBody,
}

/// Back-reference to the owning container. `key` is the object/map key, or
/// the position digits for a list child.
#[derive(Debug, Clone)]
pub(crate) struct ParentLink {
    pub(crate) id: Id,
    pub(crate) key: String,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeBody {
    Object(ObjectState),
    Map(MapState),
    List(ListState),
    Register(RegisterState),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectState {
    /// Key order is first-insertion order, like the source's ordered record.
    pub(crate) entries: IndexMap<String, ObjectEntry>,
    /// key -> op id of the latest locally dispatched update, pending its echo.
    pub(crate) prop_last_update: HashMap<String, Id>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ObjectEntry {
    Scalar(Value),
    Child(Id),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MapState {
    pub(crate) entries: BTreeMap<String, Id>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ListState {
    /// Kept sorted by position; the external index order.
    pub(crate) items: Vec<ListItem>,
}

#[derive(Debug, Clone)]
pub(crate) struct ListItem {
    pub(crate) position: Position,
    pub(crate) child: Id,
}

#[derive(Debug, Clone)]
pub(crate) struct RegisterState {
    pub(crate) data: Value,
}

impl ListState {
    pub(crate) fn index_of_child(&self, id: Id) -> Option<usize> {
        self.items.iter().position(|item| item.child == id)
    }

    pub(crate) fn index_of_position(&self, position: &str) -> Option<usize> {
        self.items.iter().position(|item| item.position.as_str() == position)
    }

    pub(crate) fn sort(&mut self) {
        self.items.sort_by(|a, b| a.position.cmp(&b.position));
    }
}

impl Node {
    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Object(_) => NodeKind::Object,
            NodeBody::Map(_) => NodeKind::Map,
            NodeBody::List(_) => NodeKind::List,
            NodeBody::Register(_) => NodeKind::Register,
        }
    }

    /// Direct child ids in the node's own order.
    pub(crate) fn child_ids(&self) -> Vec<Id> {
        match &self.body {
            NodeBody::Object(state) => state
                .entries
                .values()
                .filter_map(|entry| match entry {
                    ObjectEntry::Child(id) => Some(*id),
                    ObjectEntry::Scalar(_) => None,
                })
                .collect(),
            NodeBody::Map(state) => state.entries.values().copied().collect(),
            NodeBody::List(state) => state.items.iter().map(|item| item.child).collect(),
            NodeBody::Register(_) => Vec::new(),
        }
    }
}
