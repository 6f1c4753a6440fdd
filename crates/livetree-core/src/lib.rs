//! livetree — client-side collaborative data tree.
//!
//! A replica-local CRDT engine over a tree of three container kinds (keyed
//! object, keyed map, ordered list) whose leaves are opaque JSON scalars.
//! Mutators produce operation streams for peers; remote operations apply out
//! of order and converge through per-property last-writer-wins with an op-id
//! acknowledgement discipline, and through dense-order position keys for list
//! children.
//!
//! Transport, persistence, and schema validation live outside the engine: the
//! host injects a broadcast callback at construction and feeds inbound op
//! streams to [`Document::apply_remote_operations`].

pub mod codec;
pub mod document;
pub mod id;
pub mod ops;
pub mod position;
pub mod serialization;
pub mod value;

mod node;

pub use document::{
    ChangeOrigin, CommitEvent, Document, DocumentError, LiveList, LiveMap, LiveObject,
    SubscriptionId, HISTORY_LIMIT,
};
pub use id::{Id, ParseIdError};
pub use ops::Op;
pub use position::Position;
pub use serialization::{LoadError, NodeKind, NodeRecord, Snapshot};
pub use value::{LiveValue, ValueRef};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
