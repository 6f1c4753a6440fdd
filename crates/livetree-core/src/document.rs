//! The replica container.
//!
//! A [`Document`] owns every attached node in an id-indexed arena, assigns
//! identities from its per-replica clocks, keeps the undo/redo stacks and the
//! batch buffer, pushes committed op streams into the injected broadcast
//! callback, and applies inbound op streams from peers. All callbacks run
//! synchronously inside the committing call; the engine assumes exclusive
//! mutation by one thread and takes no locks.

mod apply;
mod events;
mod handles;

pub use events::{ChangeOrigin, CommitEvent, SubscriptionId};
pub use handles::{LiveList, LiveMap, LiveObject};

use crate::id::Id;
use crate::node::{
    ListItem, ListState, MapState, Node, NodeBody, ObjectEntry, ObjectState, ParentLink,
    RegisterState,
};
use crate::ops::Op;
use crate::position::Position;
use crate::serialization::{LoadError, NodeKind, NodeRecord, Snapshot};
use crate::value::{LiveValue, ValueRef};
use indexmap::IndexSet;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Upper bound on retained undo entries; the oldest entry is discarded first.
pub const HISTORY_LIMIT: usize = 50;

type Subscriber = Box<dyn FnMut(&CommitEvent) + Send + Sync>;

struct NodeSubscriber {
    node: Id,
    deep: bool,
    callback: Subscriber,
}

/// Buffered dispatches of an open batch. Reverse lists are kept grouped per
/// dispatch so an aborted batch can be rolled back newest-group-first.
#[derive(Default)]
struct Batch {
    ops: Vec<Op>,
    reverse: Vec<Vec<Op>>,
    modified: IndexSet<Id>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("batches cannot nest")]
    NestedBatch,
    #[error("undo and redo cannot run inside a batch")]
    HistoryInBatch,
    #[error("no node with id {0}")]
    UnknownNode(Id),
    #[error("node {0} is not an object")]
    NotAnObject(Id),
    #[error("node {0} is not a map")]
    NotAMap(Id),
    #[error("node {0} is not a list")]
    NotAList(Id),
    #[error("the document root must be an object")]
    InvalidRoot,
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// One client's replica of the shared tree.
pub struct Document {
    nodes: HashMap<Id, Node>,
    root: Id,
    actor: u64,
    clock: u64,
    op_clock: u64,
    undo_stack: VecDeque<Vec<Op>>,
    redo_stack: Vec<Vec<Op>>,
    batch: Option<Batch>,
    broadcast: Box<dyn FnMut(&[Op]) + Send + Sync>,
    subscribers: BTreeMap<u64, Subscriber>,
    node_subscribers: BTreeMap<u64, NodeSubscriber>,
    next_subscription: u64,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes)
            .field("root", &self.root)
            .field("actor", &self.actor)
            .field("clock", &self.clock)
            .field("op_clock", &self.op_clock)
            .field("undo_stack", &self.undo_stack)
            .field("redo_stack", &self.redo_stack)
            .finish_non_exhaustive()
    }
}

impl Document {
    fn empty(actor: u64, broadcast: Box<dyn FnMut(&[Op]) + Send + Sync>) -> Self {
        Self {
            nodes: HashMap::new(),
            root: Id::new(actor, 0),
            actor,
            clock: 0,
            op_clock: 0,
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            batch: None,
            broadcast,
            subscribers: BTreeMap::new(),
            node_subscribers: BTreeMap::new(),
            next_subscription: 0,
        }
    }

    /// Builds a document around a fresh root object and dispatches the root's
    /// serialization as the initial op stream (empty reverse, empty modified
    /// set). Only an object can be the root.
    pub fn from_root(
        root: LiveValue,
        actor: u64,
        broadcast: impl FnMut(&[Op]) + Send + Sync + 'static,
    ) -> Result<Self, DocumentError> {
        let LiveValue::Object(entries) = root else {
            return Err(DocumentError::InvalidRoot);
        };
        let mut doc = Self::empty(actor, Box::new(broadcast));
        let root_id = doc.mint_id();
        doc.root = root_id;
        doc.nodes.insert(
            root_id,
            Node {
                parent: None,
                body: NodeBody::Object(ObjectState::default()),
            },
        );
        for (key, value) in entries {
            match value {
                LiveValue::Scalar(scalar) => {
                    doc.object_state_mut(root_id)
                        .entries
                        .insert(key, ObjectEntry::Scalar(scalar));
                }
                nested => {
                    let (child, _) = doc.build_subtree(nested, root_id, &key);
                    doc.object_state_mut(root_id)
                        .entries
                        .insert(key, ObjectEntry::Child(child));
                }
            }
        }
        let ops = doc.serialize_subtree(root_id);
        doc.dispatch(ops, Vec::new(), Vec::new());
        Ok(doc)
    }

    /// Reconstructs a document from a flat snapshot. Record ids are adopted
    /// verbatim; nothing is dispatched or broadcast.
    pub fn load(
        snapshot: Snapshot,
        actor: u64,
        broadcast: impl FnMut(&[Op]) + Send + Sync + 'static,
    ) -> Result<Self, DocumentError> {
        if snapshot.is_empty() {
            return Err(LoadError::Empty.into());
        }
        let mut records: HashMap<Id, NodeRecord> = HashMap::with_capacity(snapshot.len());
        let mut order: Vec<Id> = Vec::with_capacity(snapshot.len());
        for (id, record) in snapshot {
            if records.insert(id, record).is_some() {
                return Err(LoadError::DuplicateRecord(id).into());
            }
            order.push(id);
        }

        let roots: Vec<Id> = order
            .iter()
            .copied()
            .filter(|id| records[id].parent_id.is_none())
            .collect();
        if roots.len() != 1 {
            return Err(LoadError::RootCount(roots.len()).into());
        }
        let root_id = roots[0];
        if records[&root_id].kind != NodeKind::Object {
            return Err(LoadError::NonObjectRoot.into());
        }

        let mut children: HashMap<Id, Vec<Id>> = HashMap::new();
        for id in &order {
            let record = &records[id];
            if let Some(parent) = record.parent_id {
                if !records.contains_key(&parent) {
                    return Err(LoadError::DanglingParent { id: *id, parent }.into());
                }
                if record.parent_key.is_none() {
                    return Err(LoadError::MissingParentKey(*id).into());
                }
                children.entry(parent).or_default().push(*id);
            }
        }

        let mut doc = Self::empty(actor, Box::new(broadcast));
        doc.root = root_id;
        doc.build_from_records(root_id, &records, &children)?;
        if doc.nodes.len() != records.len() {
            let missing = order.iter().copied().find(|id| !doc.nodes.contains_key(id));
            return Err(LoadError::Disconnected(missing.unwrap_or(root_id)).into());
        }

        // Keep local minting clear of any snapshot ids this actor produced in
        // an earlier life of the document.
        doc.clock = order
            .iter()
            .filter(|id| id.actor == actor)
            .map(|id| id.clock + 1)
            .max()
            .unwrap_or(0);
        Ok(doc)
    }

    fn build_from_records(
        &mut self,
        id: Id,
        records: &HashMap<Id, NodeRecord>,
        children: &HashMap<Id, Vec<Id>>,
    ) -> Result<(), LoadError> {
        let record = &records[&id];
        let body = match record.kind {
            NodeKind::Object => {
                let mut state = ObjectState::default();
                match &record.data {
                    Some(Value::Object(map)) => {
                        for (key, value) in map {
                            state
                                .entries
                                .insert(key.clone(), ObjectEntry::Scalar(value.clone()));
                        }
                    }
                    None => {}
                    Some(_) => return Err(LoadError::MalformedData(id)),
                }
                NodeBody::Object(state)
            }
            NodeKind::Map => NodeBody::Map(MapState::default()),
            NodeKind::List => NodeBody::List(ListState::default()),
            NodeKind::Register => match &record.data {
                Some(value) => NodeBody::Register(RegisterState {
                    data: value.clone(),
                }),
                None => return Err(LoadError::MalformedData(id)),
            },
        };
        let parent = record.parent_id.map(|pid| ParentLink {
            id: pid,
            key: record
                .parent_key
                .clone()
                .expect("parent keys were checked during indexing"),
        });
        self.nodes.insert(id, Node { parent, body });

        if let Some(kids) = children.get(&id) {
            for child in kids {
                let key = records[child]
                    .parent_key
                    .clone()
                    .expect("parent keys were checked during indexing");
                match &mut self
                    .nodes
                    .get_mut(&id)
                    .expect("record node was inserted above")
                    .body
                {
                    NodeBody::Object(state) => {
                        state.entries.insert(key, ObjectEntry::Child(*child));
                    }
                    NodeBody::Map(state) => {
                        state.entries.insert(key, *child);
                    }
                    NodeBody::List(state) => {
                        state.items.push(ListItem {
                            position: Position::from(key),
                            child: *child,
                        });
                    }
                    NodeBody::Register(_) => {
                        return Err(LoadError::InvalidParentKind {
                            id: *child,
                            parent: id,
                        })
                    }
                }
                self.build_from_records(*child, records, children)?;
            }
            if let Some(Node {
                body: NodeBody::List(state),
                ..
            }) = self.nodes.get_mut(&id)
            {
                state.sort();
            }
        }
        Ok(())
    }

    pub fn actor(&self) -> u64 {
        self.actor
    }

    pub fn root_id(&self) -> Id {
        self.root
    }

    pub fn contains(&self, id: Id) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Ids of every attached node, in arena order.
    pub fn node_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.nodes.keys().copied()
    }

    pub fn kind_of(&self, id: Id) -> Option<NodeKind> {
        self.nodes.get(&id).map(Node::kind)
    }

    /// Parent link of an attached node; `None` for the root or an unknown id.
    pub fn parent_of(&self, id: Id) -> Option<(Id, String)> {
        let link = self.nodes.get(&id)?.parent.as_ref()?;
        Some((link.id, link.key.clone()))
    }

    /// Child node under `key` of a container node. Scalar object entries are
    /// not nodes and resolve to `None`.
    pub fn child_at(&self, parent: Id, key: &str) -> Option<Id> {
        match &self.nodes.get(&parent)?.body {
            NodeBody::Object(state) => match state.entries.get(key)? {
                ObjectEntry::Child(child) => Some(*child),
                ObjectEntry::Scalar(_) => None,
            },
            NodeBody::Map(state) => state.entries.get(key).copied(),
            NodeBody::List(state) => state
                .items
                .get(state.index_of_position(key)?)
                .map(|item| item.child),
            NodeBody::Register(_) => None,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Resolves an object handle.
    pub fn object(&mut self, id: Id) -> Result<LiveObject<'_>, DocumentError> {
        match self.nodes.get(&id) {
            None => Err(DocumentError::UnknownNode(id)),
            Some(node) if matches!(node.body, NodeBody::Object(_)) => Ok(LiveObject::new(self, id)),
            Some(_) => Err(DocumentError::NotAnObject(id)),
        }
    }

    /// Resolves a map handle.
    pub fn map(&mut self, id: Id) -> Result<LiveMap<'_>, DocumentError> {
        match self.nodes.get(&id) {
            None => Err(DocumentError::UnknownNode(id)),
            Some(node) if matches!(node.body, NodeBody::Map(_)) => Ok(LiveMap::new(self, id)),
            Some(_) => Err(DocumentError::NotAMap(id)),
        }
    }

    /// Resolves a list handle.
    pub fn list(&mut self, id: Id) -> Result<LiveList<'_>, DocumentError> {
        match self.nodes.get(&id) {
            None => Err(DocumentError::UnknownNode(id)),
            Some(node) if matches!(node.body, NodeBody::List(_)) => Ok(LiveList::new(self, id)),
            Some(_) => Err(DocumentError::NotAList(id)),
        }
    }

    /// Handle over the root object.
    pub fn root_object(&mut self) -> LiveObject<'_> {
        let root = self.root;
        LiveObject::new(self, root)
    }

    /// Materialized JSON view of the whole tree.
    pub fn view(&self) -> Value {
        self.view_node(self.root).unwrap_or(Value::Null)
    }

    /// Materialized JSON view of one subtree; registers render as their
    /// scalar.
    pub fn view_node(&self, id: Id) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        Some(match &node.body {
            NodeBody::Object(state) => {
                let mut out = Map::new();
                for (key, entry) in &state.entries {
                    let value = match entry {
                        ObjectEntry::Scalar(value) => value.clone(),
                        ObjectEntry::Child(child) => {
                            self.view_node(*child).unwrap_or(Value::Null)
                        }
                    };
                    out.insert(key.clone(), value);
                }
                Value::Object(out)
            }
            NodeBody::Map(state) => {
                let mut out = Map::new();
                for (key, child) in &state.entries {
                    out.insert(key.clone(), self.view_node(*child).unwrap_or(Value::Null));
                }
                Value::Object(out)
            }
            NodeBody::List(state) => Value::Array(
                state
                    .items
                    .iter()
                    .map(|item| self.view_node(item.child).unwrap_or(Value::Null))
                    .collect(),
            ),
            NodeBody::Register(state) => state.data.clone(),
        })
    }

    /// Flat snapshot of the document, loadable by [`Document::load`].
    pub fn serialize(&self) -> Snapshot {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.record_into(self.root, &mut out);
        out
    }

    fn record_into(&self, id: Id, out: &mut Snapshot) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (parent_id, parent_key) = match &node.parent {
            Some(link) => (Some(link.id), Some(link.key.clone())),
            None => (None, None),
        };
        let data = match &node.body {
            NodeBody::Object(state) => {
                let mut map = Map::new();
                for (key, entry) in &state.entries {
                    if let ObjectEntry::Scalar(value) = entry {
                        map.insert(key.clone(), value.clone());
                    }
                }
                Some(Value::Object(map))
            }
            NodeBody::Register(state) => Some(state.data.clone()),
            NodeBody::Map(_) | NodeBody::List(_) => None,
        };
        let kids = node.child_ids();
        out.push((
            id,
            NodeRecord {
                kind: node.kind(),
                parent_id,
                parent_key,
                data,
            },
        ));
        for child in kids {
            self.record_into(child, out);
        }
    }

    /// Applies ops received from peers, in the order given. History is not
    /// touched and nothing is broadcast; subscribers see one notification
    /// carrying the union of modified nodes.
    pub fn apply_remote_operations(&mut self, ops: &[Op]) {
        let mut modified: Vec<Id> = Vec::new();
        for op in ops {
            let outcome = self.apply_op(op, false);
            if let Some(id) = outcome.modified {
                if !modified.contains(&id) {
                    modified.push(id);
                }
            }
        }
        self.notify(modified, ChangeOrigin::Remote);
    }

    /// Runs `f` with dispatches buffered, committing one consolidated unit on
    /// return: one history entry, one broadcast, one notification. If `f`
    /// panics the buffered mutations are rolled back, newest dispatch first,
    /// before the panic resumes, so later commits never carry aborted ops.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Result<T, DocumentError> {
        if self.batch.is_some() {
            return Err(DocumentError::NestedBatch);
        }
        self.batch = Some(Batch::default());
        let result = {
            let this = &mut *self;
            catch_unwind(AssertUnwindSafe(move || f(this)))
        };
        let batch = self.batch.take().expect("batch state survives the closure");
        match result {
            Ok(value) => {
                // A successful batch commits exactly once, even when the
                // closure dispatched nothing.
                let reverse: Vec<Op> = batch.reverse.into_iter().flatten().collect();
                self.commit(batch.ops, reverse, batch.modified.into_iter().collect());
                Ok(value)
            }
            Err(panic) => {
                for mut group in batch.reverse.into_iter().rev() {
                    let _ = self.apply_local(&mut group);
                }
                resume_unwind(panic);
            }
        }
    }

    /// Pops the newest undo entry, applies it, pushes the produced inverse
    /// onto the redo stack, broadcasts the applied ops, and notifies. Returns
    /// `false` when the stack is empty.
    pub fn undo(&mut self) -> Result<bool, DocumentError> {
        if self.batch.is_some() {
            return Err(DocumentError::HistoryInBatch);
        }
        let Some(mut entry) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        let (inverse, modified) = self.apply_local(&mut entry);
        self.redo_stack.push(inverse);
        (self.broadcast)(&entry);
        self.notify(modified, ChangeOrigin::History);
        Ok(true)
    }

    /// Counterpart of [`Document::undo`] over the redo stack.
    pub fn redo(&mut self) -> Result<bool, DocumentError> {
        if self.batch.is_some() {
            return Err(DocumentError::HistoryInBatch);
        }
        let Some(mut entry) = self.redo_stack.pop() else {
            return Ok(false);
        };
        let (inverse, modified) = self.apply_local(&mut entry);
        self.push_undo(inverse);
        (self.broadcast)(&entry);
        self.notify(modified, ChangeOrigin::History);
        Ok(true)
    }

    /// Registers a global subscriber, invoked once per commit in registration
    /// order.
    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&CommitEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription_id();
        self.subscribers.insert(id.0, Box::new(callback));
        id
    }

    /// Registers a per-node subscriber: invoked when a commit's modified set
    /// contains `node`, or, with `deep`, any of its descendants.
    pub fn subscribe_node(
        &mut self,
        node: Id,
        deep: bool,
        callback: impl FnMut(&CommitEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, DocumentError> {
        if !self.nodes.contains_key(&node) {
            return Err(DocumentError::UnknownNode(node));
        }
        let id = self.next_subscription_id();
        self.node_subscribers.insert(
            id.0,
            NodeSubscriber {
                node,
                deep,
                callback: Box::new(callback),
            },
        );
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id.0).is_some() || self.node_subscribers.remove(&id.0).is_some()
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        id
    }

    pub(crate) fn mint_id(&mut self) -> Id {
        let id = Id::new(self.actor, self.clock);
        self.clock += 1;
        id
    }

    pub(crate) fn mint_op_id(&mut self) -> Id {
        let id = Id::new(self.actor, self.op_clock);
        self.op_clock += 1;
        id
    }

    /// Routes a mutator's output: buffered while a batch is open, otherwise
    /// committed immediately.
    pub(crate) fn dispatch(&mut self, ops: Vec<Op>, reverse: Vec<Op>, modified: Vec<Id>) {
        if let Some(batch) = &mut self.batch {
            batch.ops.extend(ops);
            if !reverse.is_empty() {
                batch.reverse.push(reverse);
            }
            batch.modified.extend(modified);
            return;
        }
        self.commit(ops, reverse, modified);
    }

    fn commit(&mut self, ops: Vec<Op>, reverse: Vec<Op>, modified: Vec<Id>) {
        if !reverse.is_empty() {
            self.push_undo(reverse);
        }
        self.redo_stack.clear();
        (self.broadcast)(&ops);
        self.notify(modified, ChangeOrigin::Local);
    }

    fn push_undo(&mut self, reverse: Vec<Op>) {
        if self.undo_stack.len() == HISTORY_LIMIT {
            self.undo_stack.pop_front();
            tracing::debug!("undo history full, discarding the oldest entry");
        }
        self.undo_stack.push_back(reverse);
    }

    fn notify(&mut self, modified: Vec<Id>, origin: ChangeOrigin) {
        if modified.is_empty() {
            return;
        }
        let event = CommitEvent {
            origin,
            nodes: modified,
        };
        for callback in self.subscribers.values_mut() {
            callback(&event);
        }
        let matched: Vec<u64> = self
            .node_subscribers
            .iter()
            .filter(|(_, sub)| {
                event.nodes.contains(&sub.node)
                    || (sub.deep
                        && event
                            .nodes
                            .iter()
                            .any(|node| self.is_ancestor(sub.node, *node)))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in matched {
            if let Some(sub) = self.node_subscribers.get_mut(&id) {
                (sub.callback)(&event);
            }
        }
    }

    fn is_ancestor(&self, ancestor: Id, node: Id) -> bool {
        let mut current = node;
        while let Some(link) = self.nodes.get(&current).and_then(|n| n.parent.as_ref()) {
            if link.id == ancestor {
                return true;
            }
            current = link.id;
        }
        false
    }

    /// Read result for a child id: registers unwrap to their scalar.
    pub(crate) fn value_ref(&self, id: Id) -> ValueRef {
        match self.nodes.get(&id).map(|n| &n.body) {
            Some(NodeBody::Register(state)) => ValueRef::Scalar(state.data.clone()),
            _ => ValueRef::Node(id),
        }
    }

    pub(crate) fn object_state(&self, id: Id) -> &ObjectState {
        self.nodes
            .get(&id)
            .and_then(|n| match &n.body {
                NodeBody::Object(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached object")
    }

    pub(crate) fn object_state_mut(&mut self, id: Id) -> &mut ObjectState {
        self.nodes
            .get_mut(&id)
            .and_then(|n| match &mut n.body {
                NodeBody::Object(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached object")
    }

    pub(crate) fn map_state(&self, id: Id) -> &MapState {
        self.nodes
            .get(&id)
            .and_then(|n| match &n.body {
                NodeBody::Map(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached map")
    }

    pub(crate) fn map_state_mut(&mut self, id: Id) -> &mut MapState {
        self.nodes
            .get_mut(&id)
            .and_then(|n| match &mut n.body {
                NodeBody::Map(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached map")
    }

    pub(crate) fn list_state(&self, id: Id) -> &ListState {
        self.nodes
            .get(&id)
            .and_then(|n| match &n.body {
                NodeBody::List(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached list")
    }

    pub(crate) fn list_state_mut(&mut self, id: Id) -> &mut ListState {
        self.nodes
            .get_mut(&id)
            .and_then(|n| match &mut n.body {
                NodeBody::List(state) => Some(state),
                _ => None,
            })
            .expect("target must be an attached list")
    }

    pub(crate) fn set_link_key(&mut self, id: Id, key: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(link) = &mut node.parent {
                link.key = key.to_owned();
            }
        }
    }
}
