mod common;

use common::doc_with_log;
use livetree_core::codec::{
    decode_ops_cbor, decode_ops_json, decode_snapshot_cbor, decode_snapshot_json, encode_ops_cbor,
    encode_ops_json, encode_snapshot_cbor, encode_snapshot_json,
};
use livetree_core::{
    Document, DocumentError, Id, LiveValue, LoadError, NodeKind, NodeRecord, Op,
};
use serde_json::json;

fn nested_doc() -> Document {
    let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
    doc.root_object().update([
        ("title", LiveValue::from("t")),
        ("tags", LiveValue::list(["x".into(), "y".into()])),
        (
            "meta",
            LiveValue::map([(
                "owner",
                LiveValue::object([("name", LiveValue::from("n"))]),
            )]),
        ),
    ]);
    doc
}

#[test]
fn snapshot_round_trips_structure_and_records() {
    let doc = nested_doc();
    let snapshot = doc.serialize();

    let second = Document::load(snapshot.clone(), 9, |_: &[Op]| {}).expect("snapshot must load");
    assert_eq!(second.serialize(), snapshot);
    assert_eq!(second.view(), doc.view());
    assert_eq!(
        second.view(),
        json!({"title": "t", "tags": ["x", "y"], "meta": {"owner": {"name": "n"}}})
    );
}

#[test]
fn op_wire_format_uses_the_documented_field_names() {
    let root: Id = "1:0".parse().unwrap();

    let mut data = serde_json::Map::new();
    data.insert("a".to_owned(), json!(1));
    let create = Op::CreateObject {
        id: root,
        parent_id: None,
        parent_key: None,
        data,
    };
    assert_eq!(
        serde_json::to_value(&create).unwrap(),
        json!({"type": "CreateObject", "id": "1:0", "data": {"a": 1}})
    );

    let mut data = serde_json::Map::new();
    data.insert("a".to_owned(), json!(2));
    let update = Op::UpdateObject {
        id: root,
        data,
        op_id: Some("1:4".parse().unwrap()),
    };
    assert_eq!(
        serde_json::to_value(&update).unwrap(),
        json!({"type": "UpdateObject", "id": "1:0", "data": {"a": 2}, "opId": "1:4"})
    );

    let register = Op::CreateRegister {
        id: "2:1".parse().unwrap(),
        parent_id: "2:0".parse().unwrap(),
        parent_key: "k".to_owned(),
        data: json!("v"),
    };
    assert_eq!(
        serde_json::to_value(&register).unwrap(),
        json!({"type": "CreateRegister", "id": "2:1", "parentId": "2:0", "parentKey": "k", "data": "v"})
    );

    let rekey = Op::SetParentKey {
        id: "2:1".parse().unwrap(),
        parent_key: "P".to_owned(),
    };
    assert_eq!(
        serde_json::to_value(&rekey).unwrap(),
        json!({"type": "SetParentKey", "id": "2:1", "parentKey": "P"})
    );

    // Tagged decoding is the inverse.
    let round: Op = serde_json::from_value(serde_json::to_value(&update).unwrap()).unwrap();
    assert_eq!(round, update);
}

#[test]
fn node_record_wire_format() {
    let record = NodeRecord {
        kind: NodeKind::Register,
        parent_id: Some("1:0".parse().unwrap()),
        parent_key: Some("k".to_owned()),
        data: Some(json!(5)),
    };
    assert_eq!(
        serde_json::to_value(&record).unwrap(),
        json!({"type": "Register", "parentId": "1:0", "parentKey": "k", "data": 5})
    );
    let round: NodeRecord = serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
    assert_eq!(round, record);
}

#[test]
fn op_and_snapshot_codecs_round_trip() {
    let doc = nested_doc();
    let snapshot = doc.serialize();

    let json_bytes = encode_snapshot_json(&snapshot).unwrap();
    assert_eq!(decode_snapshot_json(&json_bytes).unwrap(), snapshot);
    let cbor_bytes = encode_snapshot_cbor(&snapshot).unwrap();
    assert_eq!(decode_snapshot_cbor(&cbor_bytes).unwrap(), snapshot);

    let mut data = serde_json::Map::new();
    data.insert("a".to_owned(), json!([1, {"deep": null}]));
    let ops = vec![
        Op::UpdateObject {
            id: "1:0".parse().unwrap(),
            data,
            op_id: Some("1:7".parse().unwrap()),
        },
        Op::DeleteCrdt {
            id: "2:3".parse().unwrap(),
        },
        Op::SetParentKey {
            id: "2:4".parse().unwrap(),
            parent_key: "Q!x".to_owned(),
        },
    ];
    let json_bytes = encode_ops_json(&ops).unwrap();
    assert_eq!(decode_ops_json(&json_bytes).unwrap(), ops);
    let cbor_bytes = encode_ops_cbor(&ops).unwrap();
    assert_eq!(decode_ops_cbor(&cbor_bytes).unwrap(), ops);
}

#[test]
fn load_rejects_malformed_snapshots() {
    let object_record = |parent: Option<&str>, key: Option<&str>| NodeRecord {
        kind: NodeKind::Object,
        parent_id: parent.map(|p| p.parse().unwrap()),
        parent_key: key.map(str::to_owned),
        data: Some(json!({})),
    };

    let err = Document::load(Vec::new(), 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(err, DocumentError::Load(LoadError::Empty)));

    // Two parentless records.
    let snapshot = vec![
        ("1:0".parse().unwrap(), object_record(None, None)),
        ("1:1".parse().unwrap(), object_record(None, None)),
    ];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(err, DocumentError::Load(LoadError::RootCount(2))));

    // A parent without a parentKey.
    let snapshot = vec![
        ("1:0".parse().unwrap(), object_record(None, None)),
        ("1:1".parse().unwrap(), object_record(Some("1:0"), None)),
    ];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Load(LoadError::MissingParentKey(_))
    ));

    // A parent that is not in the snapshot.
    let snapshot = vec![
        ("1:0".parse().unwrap(), object_record(None, None)),
        ("1:1".parse().unwrap(), object_record(Some("9:9"), Some("k"))),
    ];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Load(LoadError::DanglingParent { .. })
    ));

    // A non-object root.
    let snapshot = vec![(
        "1:0".parse::<Id>().unwrap(),
        NodeRecord {
            kind: NodeKind::List,
            parent_id: None,
            parent_key: None,
            data: None,
        },
    )];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(err, DocumentError::Load(LoadError::NonObjectRoot)));

    // A register without data.
    let snapshot = vec![
        ("1:0".parse().unwrap(), object_record(None, None)),
        (
            "1:1".parse().unwrap(),
            NodeRecord {
                kind: NodeKind::Register,
                parent_id: Some("1:0".parse().unwrap()),
                parent_key: Some("k".to_owned()),
                data: None,
            },
        ),
    ];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Load(LoadError::MalformedData(_))
    ));

    // The same id twice.
    let snapshot = vec![
        ("1:0".parse().unwrap(), object_record(None, None)),
        ("1:1".parse().unwrap(), object_record(Some("1:0"), Some("a"))),
        ("1:1".parse().unwrap(), object_record(Some("1:0"), Some("b"))),
    ];
    let err = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Load(LoadError::DuplicateRecord(_))
    ));
}

#[test]
fn load_keeps_local_minting_clear_of_snapshot_ids() {
    let (mut doc, _log) = doc_with_log(LiveValue::Object(Vec::new()), 1);
    doc.root_object().set("a", 1);
    let snapshot = doc.serialize();

    // Reload under the same actor: newly minted node ids must not collide
    // with ids adopted from the snapshot.
    let mut reloaded = Document::load(snapshot, 1, |_: &[Op]| {}).unwrap();
    reloaded.root_object().set("items", LiveValue::List(Vec::new()));
    let items = reloaded
        .root_object()
        .get("items")
        .and_then(|v| v.node_id())
        .unwrap();
    assert_ne!(items, reloaded.root_id());
    assert_eq!(reloaded.view(), json!({"a": 1, "items": []}));
}

#[test]
fn id_strings_round_trip_and_reject_garbage() {
    let id: Id = "12:34".parse().unwrap();
    assert_eq!(id.to_string(), "12:34");
    assert_eq!(id, Id::new(12, 34));

    assert!("12".parse::<Id>().is_err());
    assert!("a:b".parse::<Id>().is_err());
    assert!("1:2:3".parse::<Id>().is_err());
    assert!("".parse::<Id>().is_err());
}
