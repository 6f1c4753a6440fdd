//! Public node handles.
//!
//! A handle mutably borrows the document and addresses one attached node by
//! id. At most one handle is live at a time, so a handle can never observe
//! its node detaching underneath it; child nodes come back as ids to be
//! resolved through the document once the handle is dropped.

use super::{Document, DocumentError};
use crate::id::Id;
use crate::node::{ListItem, ObjectEntry};
use crate::ops::Op;
use crate::position::Position;
use crate::value::{LiveValue, ValueRef};
use serde_json::{Map, Value};

/// Keyed record of scalars and nested nodes.
#[derive(Debug)]
pub struct LiveObject<'a> {
    doc: &'a mut Document,
    id: Id,
}

/// Keyed container of nodes; scalars are wrapped in an internal register on
/// write and unwrapped on read.
#[derive(Debug)]
pub struct LiveMap<'a> {
    doc: &'a mut Document,
    id: Id,
}

/// Ordered sequence of nodes keyed by dense-order positions.
#[derive(Debug)]
pub struct LiveList<'a> {
    doc: &'a mut Document,
    id: Id,
}

impl<'a> LiveObject<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: Id) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<ValueRef> {
        match self.doc.object_state(self.id).entries.get(key)? {
            ObjectEntry::Scalar(value) => Some(ValueRef::Scalar(value.clone())),
            ObjectEntry::Child(child) => Some(self.doc.value_ref(*child)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.doc
            .object_state(self.id)
            .entries
            .keys()
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.doc.object_state(self.id).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets one key; a single-entry [`LiveObject::update`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<LiveValue>) {
        let key: String = key.into();
        let value: LiveValue = value.into();
        self.update([(key, value)]);
    }

    /// Applies a partial update in one commit: one `UpdateObject` op carrying
    /// every scalar key, plus a creation sequence per nested value. One op id
    /// is minted for the call and recorded against every scalar key written.
    pub fn update<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<LiveValue>,
    {
        // Collapse repeated keys to their last value before touching any
        // state, so each key is written once and its reverse is computed
        // against the pre-call entry.
        let entries: Vec<(String, LiveValue)> = {
            let mut collapsed: Vec<(String, LiveValue)> = Vec::new();
            for (key, value) in entries {
                let key: String = key.into();
                let value: LiveValue = value.into();
                match collapsed.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(slot) => slot.1 = value,
                    None => collapsed.push((key, value)),
                }
            }
            collapsed
        };
        if entries.is_empty() {
            return;
        }
        let op_id = self.doc.mint_op_id();
        let mut forward_scalars = Map::new();
        let mut forward_rest: Vec<Op> = Vec::new();
        let mut reverse_scalars = Map::new();
        let mut reverse_rest: Vec<Op> = Vec::new();
        for (key, value) in entries {
            let previous = self.doc.object_state(self.id).entries.get(&key).cloned();
            match &previous {
                Some(ObjectEntry::Scalar(old)) => {
                    reverse_scalars.insert(key.clone(), old.clone());
                }
                Some(ObjectEntry::Child(old)) => {
                    reverse_rest.extend(self.doc.serialize_subtree(*old));
                }
                None => reverse_rest.push(Op::DeleteObjectKey {
                    id: self.id,
                    key: key.clone(),
                }),
            }
            if let Some(ObjectEntry::Child(old)) = previous {
                self.doc.detach_subtree(old);
            }
            match value {
                LiveValue::Scalar(scalar) => {
                    forward_scalars.insert(key.clone(), scalar.clone());
                    let state = self.doc.object_state_mut(self.id);
                    state.entries.insert(key.clone(), ObjectEntry::Scalar(scalar));
                    state.prop_last_update.insert(key, op_id);
                }
                nested => {
                    let (child, ops) = self.doc.build_subtree(nested, self.id, &key);
                    forward_rest.extend(ops);
                    self.doc
                        .object_state_mut(self.id)
                        .entries
                        .insert(key, ObjectEntry::Child(child));
                }
            }
        }
        let mut ops = Vec::new();
        if !forward_scalars.is_empty() {
            ops.push(Op::UpdateObject {
                id: self.id,
                data: forward_scalars,
                op_id: Some(op_id),
            });
        }
        ops.extend(forward_rest);
        let mut reverse = Vec::new();
        if !reverse_scalars.is_empty() {
            reverse.push(Op::UpdateObject {
                id: self.id,
                data: reverse_scalars,
                op_id: None,
            });
        }
        reverse.extend(reverse_rest);
        let id = self.id;
        self.doc.dispatch(ops, reverse, vec![id]);
    }

    /// Removes a key if present; the reverse restores the previous scalar or
    /// re-serializes the previous subtree.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(previous) = self.doc.object_state(self.id).entries.get(key).cloned() else {
            return false;
        };
        let reverse = match &previous {
            ObjectEntry::Scalar(old) => {
                let mut data = Map::new();
                data.insert(key.to_owned(), old.clone());
                vec![Op::UpdateObject {
                    id: self.id,
                    data,
                    op_id: None,
                }]
            }
            ObjectEntry::Child(old) => self.doc.serialize_subtree(*old),
        };
        if let ObjectEntry::Child(old) = previous {
            self.doc.detach_subtree(old);
        }
        let state = self.doc.object_state_mut(self.id);
        state.entries.shift_remove(key);
        state.prop_last_update.remove(key);
        let id = self.id;
        self.doc.dispatch(
            vec![Op::DeleteObjectKey {
                id,
                key: key.to_owned(),
            }],
            reverse,
            vec![id],
        );
        true
    }

    /// Plain-JSON rendering of the object, nested nodes materialized.
    pub fn to_object(&self) -> Map<String, Value> {
        match self.doc.view_node(self.id) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

impl<'a> LiveMap<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: Id) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<ValueRef> {
        let child = self.doc.map_state(self.id).entries.get(key)?;
        Some(self.doc.value_ref(*child))
    }

    pub fn has(&self, key: &str) -> bool {
        self.doc.map_state(self.id).entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.doc.map_state(self.id).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.doc
            .map_state(self.id)
            .entries
            .keys()
            .map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, ValueRef)> + '_ {
        self.doc
            .map_state(self.id)
            .entries
            .iter()
            .map(|(key, child)| (key.as_str(), self.doc.value_ref(*child)))
    }

    /// Binds `key` to a fresh node built from `value`, replacing and
    /// detaching any previous child. The reverse restores the previous child
    /// from its serialization, or deletes the new node if the key was vacant.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<LiveValue>) {
        let key = key.into();
        let previous = self.doc.map_state(self.id).entries.get(&key).copied();
        let previous_serialized = previous.map(|old| self.doc.serialize_subtree(old));
        if let Some(old) = previous {
            self.doc.detach_subtree(old);
        }
        let (child, ops) = self.doc.build_subtree(value.into(), self.id, &key);
        self.doc.map_state_mut(self.id).entries.insert(key, child);
        let reverse = previous_serialized.unwrap_or_else(|| vec![Op::DeleteCrdt { id: child }]);
        let id = self.id;
        self.doc.dispatch(ops, reverse, vec![id]);
    }

    /// Removes `key`, dispatching a single delete op; the reverse is the full
    /// serialization of the removed subtree.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(child) = self.doc.map_state(self.id).entries.get(key).copied() else {
            return false;
        };
        let reverse = self.doc.serialize_subtree(child);
        self.doc.map_state_mut(self.id).entries.remove(key);
        self.doc.detach_subtree(child);
        let id = self.id;
        self.doc
            .dispatch(vec![Op::DeleteCrdt { id: child }], reverse, vec![id]);
        true
    }
}

impl<'a> LiveList<'a> {
    pub(crate) fn new(doc: &'a mut Document, id: Id) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn len(&self) -> usize {
        self.doc.list_state(self.id).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<ValueRef> {
        let item = self.doc.list_state(self.id).items.get(index)?;
        Some(self.doc.value_ref(item.child))
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueRef> + '_ {
        self.doc
            .list_state(self.id)
            .items
            .iter()
            .map(|item| self.doc.value_ref(item.child))
    }

    /// Index of the first register child holding `value`.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.doc
            .list_state(self.id)
            .items
            .iter()
            .position(|item| match self.doc.value_ref(item.child) {
                ValueRef::Scalar(scalar) => scalar == *value,
                ValueRef::Node(_) => false,
            })
    }

    /// Appends at the end; `insert` at `len` is always in range.
    pub fn push(&mut self, value: impl Into<LiveValue>) {
        let len = self.len();
        self.insert(len, value)
            .expect("append index is always in range");
    }

    /// Inserts before `index`, minting a position between the neighbours.
    /// `index == len` appends.
    pub fn insert(
        &mut self,
        index: usize,
        value: impl Into<LiveValue>,
    ) -> Result<(), DocumentError> {
        let len = self.len();
        if index > len {
            return Err(DocumentError::IndexOutOfRange { index, len });
        }
        let state = self.doc.list_state(self.id);
        let before = if index == 0 {
            None
        } else {
            Some(state.items[index - 1].position.clone())
        };
        let after = state.items.get(index).map(|item| item.position.clone());
        let position = Position::between(before.as_ref(), after.as_ref());
        let (child, ops) = self.doc.build_subtree(value.into(), self.id, position.as_str());
        let state = self.doc.list_state_mut(self.id);
        state.items.push(ListItem { position, child });
        state.sort();
        let id = self.id;
        self.doc
            .dispatch(ops, vec![Op::DeleteCrdt { id: child }], vec![id]);
        Ok(())
    }

    /// Moves the item at `from` before/after its neighbours at `to`,
    /// rewriting its position key. Both indices address current items.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), DocumentError> {
        let len = self.len();
        if from >= len {
            return Err(DocumentError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(DocumentError::IndexOutOfRange { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        let state = self.doc.list_state(self.id);
        let child = state.items[from].child;
        let old = state.items[from].position.clone();
        let (before, after) = if from < to {
            (
                Some(state.items[to].position.clone()),
                state.items.get(to + 1).map(|item| item.position.clone()),
            )
        } else {
            (
                if to == 0 {
                    None
                } else {
                    Some(state.items[to - 1].position.clone())
                },
                Some(state.items[to].position.clone()),
            )
        };
        let position = Position::between(before.as_ref(), after.as_ref());
        let state = self.doc.list_state_mut(self.id);
        state.items[from].position = position.clone();
        state.sort();
        self.doc.set_link_key(child, position.as_str());
        let id = self.id;
        self.doc.dispatch(
            vec![Op::SetParentKey {
                id: child,
                parent_key: position.as_str().to_owned(),
            }],
            vec![Op::SetParentKey {
                id: child,
                parent_key: old.as_str().to_owned(),
            }],
            vec![id],
        );
        Ok(())
    }

    /// Deletes the item at `index`; the reverse re-serializes the removed
    /// subtree with its prior position.
    pub fn delete(&mut self, index: usize) -> Result<(), DocumentError> {
        let len = self.len();
        if index >= len {
            return Err(DocumentError::IndexOutOfRange { index, len });
        }
        let child = self.doc.list_state(self.id).items[index].child;
        let reverse = self.doc.serialize_subtree(child);
        self.doc.list_state_mut(self.id).items.remove(index);
        self.doc.detach_subtree(child);
        let id = self.id;
        self.doc
            .dispatch(vec![Op::DeleteCrdt { id: child }], reverse, vec![id]);
        Ok(())
    }

    /// Deletes every item in one commit: one delete op per child, reverses in
    /// forward order.
    pub fn clear(&mut self) {
        let children: Vec<Id> = self
            .doc
            .list_state(self.id)
            .items
            .iter()
            .map(|item| item.child)
            .collect();
        if children.is_empty() {
            return;
        }
        let mut ops = Vec::with_capacity(children.len());
        let mut reverse = Vec::new();
        for child in &children {
            reverse.extend(self.doc.serialize_subtree(*child));
            ops.push(Op::DeleteCrdt { id: *child });
        }
        self.doc.list_state_mut(self.id).items.clear();
        for child in children {
            self.doc.detach_subtree(child);
        }
        let id = self.id;
        self.doc.dispatch(ops, reverse, vec![id]);
    }

    /// Plain-JSON rendering of the list, nested nodes materialized.
    pub fn to_array(&self) -> Vec<Value> {
        match self.doc.view_node(self.id) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }
}
