//! Operation application and subtree plumbing.
//!
//! Every state change funnels through here: remote delivery, history replay,
//! and the walkers the mutators share (subtree creation, serialization,
//! detachment). Each applied op yields the modified node and the op list that
//! undoes it; ops addressed at nodes this replica no longer has are dropped
//! with a debug event.

use super::Document;
use crate::id::Id;
use crate::node::{
    ListItem, ListState, MapState, Node, NodeBody, ObjectEntry, ObjectState, ParentLink,
    RegisterState,
};
use crate::ops::Op;
use crate::position::Position;
use crate::serialization::NodeKind;
use crate::value::LiveValue;
use serde_json::{Map, Value};
use tracing::debug;

pub(crate) struct ApplyOutcome {
    pub(crate) modified: Option<Id>,
    pub(crate) reverse: Vec<Op>,
}

impl ApplyOutcome {
    fn unmodified() -> Self {
        Self {
            modified: None,
            reverse: Vec::new(),
        }
    }
}

impl Document {
    /// Applies one op. `is_local` marks history replay; remote delivery
    /// passes `false`.
    pub(crate) fn apply_op(&mut self, op: &Op, is_local: bool) -> ApplyOutcome {
        match op {
            Op::CreateObject {
                id,
                parent_id,
                parent_key,
                data,
            } => match (parent_id, parent_key) {
                (Some(parent), Some(key)) => {
                    let mut state = ObjectState::default();
                    for (k, v) in data {
                        state
                            .entries
                            .insert(k.clone(), ObjectEntry::Scalar(v.clone()));
                    }
                    self.apply_create(*id, *parent, key, NodeBody::Object(state))
                }
                _ => {
                    debug!(id = %id, "ignoring parentless object creation: the root already exists");
                    ApplyOutcome::unmodified()
                }
            },
            Op::CreateMap {
                id,
                parent_id,
                parent_key,
            } => self.apply_create(*id, *parent_id, parent_key, NodeBody::Map(MapState::default())),
            Op::CreateList {
                id,
                parent_id,
                parent_key,
            } => self.apply_create(
                *id,
                *parent_id,
                parent_key,
                NodeBody::List(ListState::default()),
            ),
            Op::CreateRegister {
                id,
                parent_id,
                parent_key,
                data,
            } => self.apply_create(
                *id,
                *parent_id,
                parent_key,
                NodeBody::Register(RegisterState { data: data.clone() }),
            ),
            Op::UpdateObject { id, data, op_id } => {
                self.apply_update_object(*id, data, *op_id, is_local)
            }
            Op::DeleteObjectKey { id, key } => self.apply_delete_object_key(*id, key),
            Op::DeleteCrdt { id } => self.apply_delete_crdt(*id),
            Op::SetParentKey { id, parent_key } => self.apply_set_parent_key(*id, parent_key),
        }
    }

    /// Applies an op list locally, as undo/redo and batch rollback do. Update
    /// ops missing an op id get one stamped before application so the
    /// broadcast stream stays acknowledgeable. Returns the forward-order
    /// inverse and the modified set.
    pub(crate) fn apply_local(&mut self, ops: &mut [Op]) -> (Vec<Op>, Vec<Id>) {
        let mut inverse = Vec::new();
        let mut modified: Vec<Id> = Vec::new();
        for op in ops.iter_mut() {
            if let Op::UpdateObject { op_id, .. } = op {
                if op_id.is_none() {
                    *op_id = Some(self.mint_op_id());
                }
            }
            let outcome = self.apply_op(op, true);
            inverse.extend(outcome.reverse);
            if let Some(id) = outcome.modified {
                if !modified.contains(&id) {
                    modified.push(id);
                }
            }
        }
        (inverse, modified)
    }

    fn apply_create(&mut self, id: Id, parent: Id, key: &str, body: NodeBody) -> ApplyOutcome {
        if self.nodes.contains_key(&id) {
            debug!(id = %id, "ignoring creation for an id that already exists");
            return ApplyOutcome::unmodified();
        }
        let Some(parent_kind) = self.nodes.get(&parent).map(Node::kind) else {
            debug!(id = %id, parent = %parent, "ignoring creation under an unknown parent");
            return ApplyOutcome::unmodified();
        };
        match parent_kind {
            NodeKind::Object => {
                let previous = self.object_state(parent).entries.get(key).cloned();
                let reverse = match &previous {
                    Some(ObjectEntry::Child(old)) => self.serialize_subtree(*old),
                    Some(ObjectEntry::Scalar(old)) => {
                        let mut data = Map::new();
                        data.insert(key.to_owned(), old.clone());
                        vec![Op::UpdateObject {
                            id: parent,
                            data,
                            op_id: None,
                        }]
                    }
                    None => vec![Op::DeleteCrdt { id }],
                };
                if let Some(ObjectEntry::Child(old)) = previous {
                    self.detach_subtree(old);
                }
                self.insert_node(id, parent, key.to_owned(), body);
                self.object_state_mut(parent)
                    .entries
                    .insert(key.to_owned(), ObjectEntry::Child(id));
                ApplyOutcome {
                    modified: Some(parent),
                    reverse,
                }
            }
            NodeKind::Map => {
                let previous = self.map_state(parent).entries.get(key).copied();
                let reverse = match previous {
                    Some(old) => self.serialize_subtree(old),
                    None => vec![Op::DeleteCrdt { id }],
                };
                if let Some(old) = previous {
                    self.detach_subtree(old);
                }
                self.insert_node(id, parent, key.to_owned(), body);
                self.map_state_mut(parent).entries.insert(key.to_owned(), id);
                ApplyOutcome {
                    modified: Some(parent),
                    reverse,
                }
            }
            NodeKind::List => {
                let position = self.place_in_list(parent, id, Position::from(key));
                self.insert_node(id, parent, position.as_str().to_owned(), body);
                let state = self.list_state_mut(parent);
                state.items.push(ListItem {
                    position,
                    child: id,
                });
                state.sort();
                ApplyOutcome {
                    modified: Some(parent),
                    reverse: vec![Op::DeleteCrdt { id }],
                }
            }
            NodeKind::Register => {
                debug!(id = %id, parent = %parent, "ignoring creation under a register");
                ApplyOutcome::unmodified()
            }
        }
    }

    /// Position-collision resolution: the child with the smaller id keeps the
    /// contested key, the other lands immediately after it. The tie-break is
    /// a pure function of the two ids, so replicas resolving the same
    /// collision agree. Returns the position the incoming child takes.
    fn place_in_list(&mut self, list: Id, incoming: Id, position: Position) -> Position {
        let state = self.list_state(list);
        let Some(index) = state.index_of_position(position.as_str()) else {
            return position;
        };
        let existing = state.items[index].child;
        let next = state.items.get(index + 1).map(|item| item.position.clone());
        let shifted = Position::between(Some(&position), next.as_ref());
        if existing < incoming {
            return shifted;
        }
        let state = self.list_state_mut(list);
        state.items[index].position = shifted.clone();
        state.sort();
        self.set_link_key(existing, shifted.as_str());
        position
    }

    fn apply_update_object(
        &mut self,
        id: Id,
        data: &Map<String, Value>,
        op_id: Option<Id>,
        is_local: bool,
    ) -> ApplyOutcome {
        if !matches!(self.nodes.get(&id).map(Node::kind), Some(NodeKind::Object)) {
            debug!(id = %id, "ignoring object update for a missing or non-object node");
            return ApplyOutcome::unmodified();
        }
        // Ops minted before the acknowledgement discipline carry no op id;
        // treat them as locally originated.
        let is_local = is_local || op_id.is_none();
        let op_id = match op_id {
            Some(op_id) => op_id,
            None => self.mint_op_id(),
        };

        let mut modified = false;
        let mut reverse_scalars = Map::new();
        let mut reverse_rest: Vec<Op> = Vec::new();
        for (key, value) in data {
            if is_local {
                self.object_state_mut(id)
                    .prop_last_update
                    .insert(key.clone(), op_id);
            } else {
                match self.object_state(id).prop_last_update.get(key) {
                    None => {}
                    Some(pending) if *pending == op_id => {
                        // Echo of our own op: clear the entry, keep the
                        // optimistic value.
                        self.object_state_mut(id).prop_last_update.remove(key);
                        continue;
                    }
                    Some(_) => continue,
                }
            }
            let previous = self.object_state(id).entries.get(key).cloned();
            match &previous {
                Some(ObjectEntry::Scalar(old)) => {
                    reverse_scalars.insert(key.clone(), old.clone());
                }
                Some(ObjectEntry::Child(old)) => {
                    reverse_rest.extend(self.serialize_subtree(*old));
                }
                None => reverse_rest.push(Op::DeleteObjectKey {
                    id,
                    key: key.clone(),
                }),
            }
            if let Some(ObjectEntry::Child(old)) = previous {
                self.detach_subtree(old);
            }
            self.object_state_mut(id)
                .entries
                .insert(key.clone(), ObjectEntry::Scalar(value.clone()));
            modified = true;
        }
        let mut reverse = Vec::new();
        if !reverse_scalars.is_empty() {
            reverse.push(Op::UpdateObject {
                id,
                data: reverse_scalars,
                op_id: None,
            });
        }
        reverse.extend(reverse_rest);
        ApplyOutcome {
            modified: modified.then_some(id),
            reverse,
        }
    }

    fn apply_delete_object_key(&mut self, id: Id, key: &str) -> ApplyOutcome {
        if !matches!(self.nodes.get(&id).map(Node::kind), Some(NodeKind::Object)) {
            debug!(id = %id, "ignoring key deletion for a missing or non-object node");
            return ApplyOutcome::unmodified();
        }
        let Some(previous) = self.object_state(id).entries.get(key).cloned() else {
            return ApplyOutcome::unmodified();
        };
        let reverse = match &previous {
            ObjectEntry::Scalar(old) => {
                let mut data = Map::new();
                data.insert(key.to_owned(), old.clone());
                vec![Op::UpdateObject {
                    id,
                    data,
                    op_id: None,
                }]
            }
            ObjectEntry::Child(old) => self.serialize_subtree(*old),
        };
        if let ObjectEntry::Child(old) = previous {
            self.detach_subtree(old);
        }
        let state = self.object_state_mut(id);
        state.entries.shift_remove(key);
        state.prop_last_update.remove(key);
        ApplyOutcome {
            modified: Some(id),
            reverse,
        }
    }

    fn apply_delete_crdt(&mut self, id: Id) -> ApplyOutcome {
        let Some(node) = self.nodes.get(&id) else {
            debug!(id = %id, "ignoring delete for an unknown node");
            return ApplyOutcome::unmodified();
        };
        let Some(link) = node.parent.clone() else {
            debug!(id = %id, "ignoring delete of the root");
            return ApplyOutcome::unmodified();
        };
        let reverse = self.serialize_subtree(id);
        self.unlink_from_parent(id, &link);
        self.detach_subtree(id);
        ApplyOutcome {
            modified: Some(link.id),
            reverse,
        }
    }

    fn apply_set_parent_key(&mut self, id: Id, new_key: &str) -> ApplyOutcome {
        let Some(node) = self.nodes.get(&id) else {
            debug!(id = %id, "ignoring parent-key rewrite for an unknown node");
            return ApplyOutcome::unmodified();
        };
        let Some(link) = node.parent.clone() else {
            debug!(id = %id, "ignoring parent-key rewrite on the root");
            return ApplyOutcome::unmodified();
        };
        if !matches!(
            self.nodes.get(&link.id).map(Node::kind),
            Some(NodeKind::List)
        ) {
            debug!(id = %id, "ignoring parent-key rewrite outside a list");
            return ApplyOutcome::unmodified();
        }
        let list = link.id;
        let state = self.list_state(list);
        let Some(index) = state.index_of_child(id) else {
            debug!(id = %id, list = %list, "ignoring parent-key rewrite for a detached list child");
            return ApplyOutcome::unmodified();
        };
        let old = state.items[index].position.clone();
        if old.as_str() == new_key {
            return ApplyOutcome::unmodified();
        }
        let claimed = self.place_in_list(list, id, Position::from(new_key));
        let state = self.list_state_mut(list);
        let index = state
            .index_of_child(id)
            .expect("moved child stays in its list");
        state.items[index].position = claimed.clone();
        state.sort();
        self.set_link_key(id, claimed.as_str());
        ApplyOutcome {
            modified: Some(list),
            reverse: vec![Op::SetParentKey {
                id,
                parent_key: old.as_str().to_owned(),
            }],
        }
    }

    /// Attaches a value tree under `parent` at `key`, minting ids as it goes,
    /// and returns the new child id with its creation op sequence. The caller
    /// links the returned id into the parent's own container.
    pub(crate) fn build_subtree(
        &mut self,
        value: LiveValue,
        parent: Id,
        key: &str,
    ) -> (Id, Vec<Op>) {
        let mut ops = Vec::new();
        let id = self.build_into(value, parent, key, &mut ops);
        (id, ops)
    }

    fn build_into(&mut self, value: LiveValue, parent: Id, key: &str, ops: &mut Vec<Op>) -> Id {
        let id = self.mint_id();
        match value {
            LiveValue::Scalar(data) => {
                ops.push(Op::CreateRegister {
                    id,
                    parent_id: parent,
                    parent_key: key.to_owned(),
                    data: data.clone(),
                });
                self.insert_node(
                    id,
                    parent,
                    key.to_owned(),
                    NodeBody::Register(RegisterState { data }),
                );
            }
            LiveValue::Object(entries) => {
                let mut scalars = Map::new();
                let mut nested: Vec<(String, LiveValue)> = Vec::new();
                let mut state = ObjectState::default();
                for (k, v) in entries {
                    match v {
                        LiveValue::Scalar(s) => {
                            scalars.insert(k.clone(), s.clone());
                            state.entries.insert(k, ObjectEntry::Scalar(s));
                        }
                        other => nested.push((k, other)),
                    }
                }
                ops.push(Op::CreateObject {
                    id,
                    parent_id: Some(parent),
                    parent_key: Some(key.to_owned()),
                    data: scalars,
                });
                self.insert_node(id, parent, key.to_owned(), NodeBody::Object(state));
                for (k, v) in nested {
                    let child = self.build_into(v, id, &k, ops);
                    self.object_state_mut(id)
                        .entries
                        .insert(k, ObjectEntry::Child(child));
                }
            }
            LiveValue::Map(entries) => {
                ops.push(Op::CreateMap {
                    id,
                    parent_id: parent,
                    parent_key: key.to_owned(),
                });
                self.insert_node(id, parent, key.to_owned(), NodeBody::Map(MapState::default()));
                for (k, v) in entries {
                    let child = self.build_into(v, id, &k, ops);
                    self.map_state_mut(id).entries.insert(k, child);
                }
            }
            LiveValue::List(items) => {
                ops.push(Op::CreateList {
                    id,
                    parent_id: parent,
                    parent_key: key.to_owned(),
                });
                self.insert_node(
                    id,
                    parent,
                    key.to_owned(),
                    NodeBody::List(ListState::default()),
                );
                let mut last: Option<Position> = None;
                for item in items {
                    let position = Position::between(last.as_ref(), None);
                    let child = self.build_into(item, id, position.as_str(), ops);
                    self.list_state_mut(id).items.push(ListItem {
                        position: position.clone(),
                        child,
                    });
                    last = Some(position);
                }
            }
        }
        id
    }

    /// Creation op sequence for an attached subtree, pre-order, using the
    /// stored parent links.
    pub(crate) fn serialize_subtree(&self, id: Id) -> Vec<Op> {
        let mut ops = Vec::new();
        self.serialize_into(id, &mut ops);
        ops
    }

    fn serialize_into(&self, id: Id, ops: &mut Vec<Op>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (parent_id, parent_key) = match &node.parent {
            Some(link) => (Some(link.id), Some(link.key.clone())),
            None => (None, None),
        };
        let kids = node.child_ids();
        match &node.body {
            NodeBody::Object(state) => {
                let mut data = Map::new();
                for (key, entry) in &state.entries {
                    if let ObjectEntry::Scalar(value) = entry {
                        data.insert(key.clone(), value.clone());
                    }
                }
                ops.push(Op::CreateObject {
                    id,
                    parent_id,
                    parent_key,
                    data,
                });
            }
            NodeBody::Map(_) => ops.push(Op::CreateMap {
                id,
                parent_id: parent_id.expect("maps are never the root"),
                parent_key: parent_key.expect("maps are never the root"),
            }),
            NodeBody::List(_) => ops.push(Op::CreateList {
                id,
                parent_id: parent_id.expect("lists are never the root"),
                parent_key: parent_key.expect("lists are never the root"),
            }),
            NodeBody::Register(state) => ops.push(Op::CreateRegister {
                id,
                parent_id: parent_id.expect("registers are never the root"),
                parent_key: parent_key.expect("registers are never the root"),
                data: state.data.clone(),
            }),
        }
        for child in kids {
            self.serialize_into(child, ops);
        }
    }

    /// Removes a node and its descendants from the arena. The caller is
    /// responsible for the top-level container entry.
    pub(crate) fn detach_subtree(&mut self, id: Id) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for child in node.child_ids() {
            self.detach_subtree(child);
        }
    }

    pub(crate) fn insert_node(&mut self, id: Id, parent: Id, key: String, body: NodeBody) {
        self.nodes.insert(
            id,
            Node {
                parent: Some(ParentLink { id: parent, key }),
                body,
            },
        );
    }

    fn unlink_from_parent(&mut self, child: Id, link: &ParentLink) {
        match self.nodes.get_mut(&link.id).map(|n| &mut n.body) {
            Some(NodeBody::Object(state)) => {
                let held = state
                    .entries
                    .get(&link.key)
                    .is_some_and(|entry| matches!(entry, ObjectEntry::Child(c) if *c == child));
                if held {
                    state.entries.shift_remove(&link.key);
                }
            }
            Some(NodeBody::Map(state)) => {
                if state.entries.get(&link.key).is_some_and(|c| *c == child) {
                    state.entries.remove(&link.key);
                }
            }
            Some(NodeBody::List(state)) => {
                if let Some(index) = state.index_of_child(child) {
                    state.items.remove(index);
                }
            }
            _ => {}
        }
    }
}
