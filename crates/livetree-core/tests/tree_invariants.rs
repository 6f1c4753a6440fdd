mod common;

use common::{doc_with_log, Lcg};
use livetree_core::{Document, Id, LiveValue, Op};
use serde_json::json;

/// The §-level structural checks: the arena holds exactly the reachable
/// nodes, every parent holds its child under the stored key, and a snapshot
/// of the tree reloads to an equal view.
fn check_invariants(doc: &Document) {
    let records = doc.serialize();

    let mut arena: Vec<Id> = doc.node_ids().collect();
    arena.sort();
    let mut reachable: Vec<Id> = records.iter().map(|(id, _)| *id).collect();
    reachable.sort();
    assert_eq!(arena, reachable, "arena must contain exactly the reachable nodes");

    for (id, record) in &records {
        match (record.parent_id, record.parent_key.as_ref()) {
            (Some(parent), Some(key)) => {
                assert_eq!(
                    doc.child_at(parent, key),
                    Some(*id),
                    "parent must hold the child under its stored key"
                );
                assert_eq!(doc.parent_of(*id), Some((parent, key.clone())));
            }
            _ => assert_eq!(*id, doc.root_id(), "only the root is parentless"),
        }
    }

    let reloaded = Document::load(records, 99, |_: &[Op]| {}).expect("serialize output must load");
    assert_eq!(reloaded.view(), doc.view());
}

#[test]
fn random_mutation_sequences_preserve_the_tree_invariants() {
    for seed in [3u64, 0xbead, 0xfeed_f00d] {
        let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
        doc.root_object().set("list", LiveValue::List(Vec::new()));
        doc.root_object().set("map", LiveValue::Map(Vec::new()));
        let list_id = doc
            .root_object()
            .get("list")
            .and_then(|v| v.node_id())
            .expect("list is a node");
        let map_id = doc
            .root_object()
            .get("map")
            .and_then(|v| v.node_id())
            .expect("map is a node");

        let mut rng = Lcg::new(seed);
        for step in 0..300 {
            match rng.range(9) {
                0 | 1 => {
                    let key = format!("k{}", rng.range(5));
                    doc.root_object().set(key, rng.range(100) as i64);
                }
                2 => {
                    let key = format!("k{}", rng.range(5));
                    doc.root_object().delete(&key);
                }
                3 => {
                    let len = doc.list(list_id).unwrap().len();
                    let index = rng.range(len as u64 + 1) as usize;
                    doc.list(list_id)
                        .unwrap()
                        .insert(index, rng.range(100) as i64)
                        .expect("insert index is clamped to the length");
                }
                4 => {
                    let mut list = doc.list(list_id).unwrap();
                    if !list.is_empty() {
                        let index = rng.range(list.len() as u64) as usize;
                        list.delete(index).expect("delete index is in range");
                    }
                }
                5 => {
                    let mut list = doc.list(list_id).unwrap();
                    if list.len() >= 2 {
                        let from = rng.range(list.len() as u64) as usize;
                        let to = rng.range(list.len() as u64) as usize;
                        list.move_item(from, to).expect("move indices are in range");
                    }
                }
                6 => {
                    let key = format!("m{}", rng.range(4));
                    doc.map(map_id).unwrap().set(key, rng.range(50) as i64);
                }
                7 => {
                    let key = format!("m{}", rng.range(4));
                    doc.map(map_id).unwrap().delete(&key);
                }
                _ => {
                    // Keep the two bootstrap commits (the list and map
                    // containers) out of reach of the random undos.
                    if doc.undo_depth() > 2 {
                        assert!(doc.undo().expect("no batch is open"));
                    }
                }
            }
            if step % 25 == 0 {
                check_invariants(&doc);
            }
        }
        check_invariants(&doc);
    }
}

#[test]
fn detached_subtrees_leave_the_arena() {
    let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
    doc.root_object().set(
        "data",
        LiveValue::map([("todo", LiveValue::list(["a".into(), "b".into()]))]),
    );
    let map_id = doc
        .root_object()
        .get("data")
        .and_then(|v| v.node_id())
        .unwrap();
    let list_id = doc.child_at(map_id, "todo").unwrap();
    let register_ids: Vec<Id> = doc
        .node_ids()
        .filter(|id| doc.parent_of(*id).is_some_and(|(parent, _)| parent == list_id))
        .collect();
    assert_eq!(register_ids.len(), 2);

    assert!(doc.root_object().delete("data"));

    assert!(!doc.contains(map_id));
    assert!(!doc.contains(list_id));
    for id in register_ids {
        assert!(!doc.contains(id), "descendants must leave the arena");
    }
    assert_eq!(doc.view(), json!({}));
    check_invariants(&doc);
}

#[test]
fn overwriting_a_nested_value_detaches_the_old_subtree() {
    let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
    doc.root_object()
        .set("slot", LiveValue::list(["x".into()]));
    let old_list = doc
        .root_object()
        .get("slot")
        .and_then(|v| v.node_id())
        .unwrap();

    doc.root_object().set("slot", 1);
    assert!(!doc.contains(old_list));
    assert_eq!(doc.view(), json!({"slot": 1}));

    assert!(doc.undo().unwrap());
    assert_eq!(doc.view(), json!({"slot": ["x"]}));
    check_invariants(&doc);
}

#[test]
fn map_overwrite_replaces_and_detaches_the_previous_child() {
    let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
    doc.root_object().set("m", LiveValue::Map(Vec::new()));
    let map_id = doc.root_object().get("m").and_then(|v| v.node_id()).unwrap();

    doc.map(map_id).unwrap().set("k", LiveValue::list(["a".into()]));
    let first_child = doc.child_at(map_id, "k").unwrap();
    doc.map(map_id).unwrap().set("k", 2);
    let second_child = doc.child_at(map_id, "k").unwrap();

    assert_ne!(first_child, second_child);
    assert!(!doc.contains(first_child));
    assert_eq!(doc.view(), json!({"m": {"k": 2}}));

    // Undo restores the list child from its serialization.
    assert!(doc.undo().unwrap());
    assert_eq!(doc.view(), json!({"m": {"k": ["a"]}}));
    check_invariants(&doc);
}
