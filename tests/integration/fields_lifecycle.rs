#![allow(missing_docs)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use sombra_fields::{
    db::{Expiry, MemDb, MemDbOptions},
    storage::{
        delete_field, encode_wire, reference_set, references_insert, remove_reference,
        CounterMetrics, EdgeConstraint, FieldKind, FieldSchema, FieldValue, NodeDirectory,
        NodeSchema, RawView, RefSelector, EDGE_FLAG_DEPENDENT,
    },
    types::{FieldIndex, NodeKey, Result, SombraError, TypeId},
};

const DOC: TypeId = TypeId(10);
const TAG: TypeId = TypeId(11);
const NOTE: TypeId = TypeId(12);
const BIG: TypeId = TypeId(13);

const DOC_REV: u8 = 0;
const DOC_CODE: u8 = 1;
const DOC_BODY: u8 = 2;
const DOC_TITLE: u8 = 3;
const DOC_TAGS: u8 = 4;
const DOC_NOTES: u8 = 5;
const DOC_MARK: u8 = 6;
const DOC_OWNER: u8 = 7;
const TAG_DOCS: u8 = 0;
const TAG_NOTED: u8 = 1;
const TAG_OWNS: u8 = 2;

const EN: u8 = 1;
const FR: u8 = 2;

fn setup(opts: MemDbOptions) -> MemDb {
    let mut db = MemDb::new(opts);
    let dependent = |dst, inverse| {
        EdgeConstraint::new(dst, FieldIndex(inverse)).with_flags(EDGE_FLAG_DEPENDENT)
    };
    db.register_schema(
        NodeSchema::new(
            DOC,
            vec![
                FieldSchema::new(DOC_REV, FieldKind::MicroBuffer { len: 4 }),
                FieldSchema::new(DOC_CODE, FieldKind::String { fixed_len: 8 }),
                FieldSchema::new(DOC_BODY, FieldKind::String { fixed_len: 0 }),
                FieldSchema::new(DOC_TITLE, FieldKind::Text { fixed_len: 0 }),
                FieldSchema::new(DOC_TAGS, FieldKind::References(dependent(TAG, TAG_DOCS))),
                FieldSchema::new(
                    DOC_NOTES,
                    FieldKind::References(
                        EdgeConstraint::new(TAG, FieldIndex(TAG_NOTED)).with_edge_type(NOTE),
                    ),
                ),
                FieldSchema::new(DOC_MARK, FieldKind::Null),
                FieldSchema::new(
                    DOC_OWNER,
                    FieldKind::Reference(EdgeConstraint::new(TAG, FieldIndex(TAG_OWNS))),
                ),
            ],
        )
        .expect("doc schema"),
    );
    db.register_schema(
        NodeSchema::new(
            TAG,
            vec![
                FieldSchema::new(TAG_DOCS, FieldKind::References(dependent(DOC, DOC_TAGS))),
                FieldSchema::new(
                    TAG_NOTED,
                    FieldKind::References(
                        EdgeConstraint::new(DOC, FieldIndex(DOC_NOTES)).with_edge_type(NOTE),
                    ),
                ),
                FieldSchema::new(
                    TAG_OWNS,
                    FieldKind::References(EdgeConstraint::new(DOC, FieldIndex(DOC_OWNER))),
                ),
            ],
        )
        .expect("tag schema"),
    );
    db.register_schema(
        NodeSchema::new(NOTE, vec![FieldSchema::new(0, FieldKind::MicroBuffer { len: 1 })])
            .expect("note schema"),
    );
    db.register_schema(
        NodeSchema::new(
            BIG,
            (0..3)
                .map(|f| FieldSchema::new(f, FieldKind::String { fixed_len: 100_000 }))
                .collect(),
        )
        .expect("big schema"),
    );
    db
}

fn field(db: &MemDb, ty: TypeId, idx: u8) -> FieldSchema {
    db.field(ty, idx).expect("field schema")
}

fn ids(db: &MemDb, key: NodeKey, fs: &FieldSchema) -> Vec<NodeKey> {
    db.node(key)
        .expect("node")
        .get_references(fs)
        .expect("reference list")
        .map(|rec| rec.dst)
        .collect()
}

#[test]
fn fixed_string_refuses_oversized_value() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let doc = db.create_node(DOC)?;
    let code = field(&db, DOC, DOC_CODE);
    let node = db.node_mut(doc)?;

    let wire = encode_wire(0, false, b"abcdefgh");
    assert_eq!(
        node.set_string(&code, &wire).unwrap_err(),
        SombraError::NoBufferSpace { need: 10, cap: 8 }
    );
    assert!(!node.is_populated(code.field));
    assert_eq!(node.get_raw(&code)?, RawView::default());

    node.set_string(&code, &encode_wire(0, false, b"abcdef"))?;
    assert_eq!(node.get_string(&code)?.payload(), b"abcdef");
    let raw = node.get_raw(&code)?;
    assert_eq!(raw.len, 8);
    assert_eq!(&node.raw_bytes(raw)[2..], b"abcdef");
    Ok(())
}

#[test]
fn mutable_string_keeps_checksum_current() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let doc = db.create_node(DOC)?;
    let body = field(&db, DOC, DOC_BODY);
    let node = db.node_mut(doc)?;

    assert!(matches!(
        node.get_mutable_string(&body),
        Err(SombraError::NotFound(_))
    ));
    {
        let mut s = node.ensure_mutable_string(&body, 5)?;
        s.bytes_mut().copy_from_slice(&[EN, 0, b'x', b'y', b'z']);
    }
    let expected = encode_wire(EN, false, b"xyz");
    let (stored, crc) = expected.split_at(expected.len() - 4);
    let value = node.get_string(&body)?;
    assert_eq!(value.as_bytes(), stored);
    assert_eq!(value.crc().to_le_bytes(), crc);
    assert_eq!(value.lang(), EN);
    Ok(())
}

#[test]
fn text_replaces_same_language_in_place() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let doc = db.create_node(DOC)?;
    let title = field(&db, DOC, DOC_TITLE);
    let node = db.node_mut(doc)?;

    let mut bad = encode_wire(EN, false, b"broken");
    if let Some(last) = bad.last_mut() {
        *last ^= 0xff;
    }
    assert_eq!(
        node.set_text(&title, &bad).unwrap_err(),
        SombraError::InvalidArgument("string checksum mismatch")
    );
    assert!(!node.is_populated(title.field));

    node.set_text(&title, &encode_wire(EN, false, b"hello"))?;
    node.set_text(&title, &encode_wire(FR, false, b"bonjour"))?;
    node.set_text(&title, &encode_wire(EN, false, b"hi"))?;

    let entries = node.text_entries(&title)?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].lang(), EN);
    assert_eq!(entries[0].payload(), b"hi");
    assert_eq!(node.get_text(&title, FR)?.payload(), b"bonjour");

    node.remove_text(&title, FR)?;
    assert_eq!(
        node.get_text(&title, FR).unwrap_err(),
        SombraError::NotFound("translation")
    );
    assert!(node.is_populated(title.field));
    Ok(())
}

#[test]
fn ensure_is_idempotent_and_delete_reuses_slot() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let doc = db.create_node(DOC)?;
    let rev = field(&db, DOC, DOC_REV);
    let mark = field(&db, DOC, DOC_MARK);

    let node = db.node_mut(doc)?;
    assert!(matches!(node.get_field(&rev), Err(SombraError::NotFound(_))));
    let off = node.ensure_field(&rev)?;
    assert_eq!(node.ensure_field(&rev)?, off);
    assert_eq!(node.get_field(&rev)?, FieldValue::MicroBuffer(&[0; 4]));
    node.set_micro_buffer(&rev, &[1, 2, 3, 4])?;
    node.ensure_field(&mark)?;
    assert_eq!(node.get_field(&mark)?, FieldValue::Null);
    db.take_dirty();

    delete_field(&mut db, doc, &rev)?;
    assert_eq!(db.take_dirty(), vec![doc]);
    let node = db.node_mut(doc)?;
    assert!(!node.is_populated(rev.field));
    assert_eq!(node.ensure_field(&rev)?, off);
    assert_eq!(node.get_micro_buffer(&rev)?, &[0; 4]);

    let foreign = field(&db, TAG, TAG_DOCS);
    assert!(delete_field(&mut db, doc, &foreign).is_err());
    Ok(())
}

#[test]
fn deleting_reference_field_fires_dependent_triggers() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut db = setup(MemDbOptions::default().metrics(metrics.clone()));
    db.set_clock_ms(42);
    let doc = db.create_node(DOC)?;
    let t1 = db.create_node(TAG)?;
    let t2 = db.create_node(TAG)?;
    let tags = field(&db, DOC, DOC_TAGS);
    let docs = field(&db, TAG, TAG_DOCS);
    references_insert(&mut db, doc, &tags, -1, 0, t1)?;
    references_insert(&mut db, doc, &tags, -1, 0, t2)?;

    delete_field(&mut db, doc, &tags)?;

    assert!(!db.node(doc)?.is_populated(tags.field));
    assert!(ids(&db, t1, &docs).is_empty());
    assert!(ids(&db, t2, &docs).is_empty());
    assert_eq!(
        db.expiries(),
        &[
            Expiry { node: t2, at_ms: 42 },
            Expiry { node: t1, at_ms: 42 },
            Expiry { node: doc, at_ms: 42 },
        ]
    );
    assert_eq!(metrics.edges_torn_down.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.expiries_scheduled.load(Ordering::Relaxed), 3);
    Ok(())
}

#[test]
fn deleting_node_tears_down_edges_and_edge_nodes() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    db.set_clock_ms(7);
    let doc = db.create_node(DOC)?;
    let tag = db.create_node(TAG)?;
    let tags = field(&db, DOC, DOC_TAGS);
    let notes = field(&db, DOC, DOC_NOTES);
    let owner = field(&db, DOC, DOC_OWNER);
    let docs = field(&db, TAG, TAG_DOCS);
    let noted = field(&db, TAG, TAG_NOTED);
    let owns = field(&db, TAG, TAG_OWNS);

    references_insert(&mut db, doc, &tags, -1, 0, tag)?;
    let edge = references_insert(&mut db, doc, &notes, -1, 0, tag)?
        .meta
        .expect("edge node");
    reference_set(&mut db, doc, &owner, tag)?;
    assert_eq!(ids(&db, tag, &owns), vec![doc]);

    db.delete_node(doc)?;

    assert!(db.node(doc).is_err());
    assert!(db.node(edge).is_err());
    assert!(ids(&db, tag, &docs).is_empty());
    assert!(ids(&db, tag, &noted).is_empty());
    assert!(ids(&db, tag, &owns).is_empty());
    assert_eq!(db.expiries(), &[Expiry { node: tag, at_ms: 7 }]);

    assert_eq!(db.run_expiries(7)?, 1);
    assert!(db.node(tag).is_err());
    assert!(matches!(db.delete_node(doc), Err(SombraError::NotFound(_))));
    Ok(())
}

#[test]
fn unloading_hands_edge_node_to_partner() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let doc = db.create_node(DOC)?;
    let tag = db.create_node(TAG)?;
    let notes = field(&db, DOC, DOC_NOTES);
    let noted = field(&db, TAG, TAG_NOTED);
    let edge = references_insert(&mut db, doc, &notes, -1, 0, tag)?
        .meta
        .expect("edge node");

    db.unload_node(doc)?;
    assert!(db.node(doc).is_err());
    assert_eq!(ids(&db, tag, &noted), vec![doc]);
    assert_eq!(db.node(tag)?.reference_meta(&noted, doc.id)?, Some(edge));
    assert!(db.node(edge).is_ok());

    remove_reference(&mut db, tag, &noted, RefSelector::Id(doc.id))?;
    assert!(ids(&db, tag, &noted).is_empty());
    assert!(db.node(edge).is_err());
    Ok(())
}

#[test]
#[should_panic(expected = "field buffer too large")]
fn exhausting_node_buffer_is_fatal() {
    let mut db = setup(MemDbOptions::default());
    let key = db.create_node(BIG).expect("node");
    let fields: Vec<FieldSchema> = (0..3).map(|f| field(&db, BIG, f)).collect();
    let node = db.node_mut(key).expect("node");
    for fs in &fields {
        node.ensure_field(fs).expect("ensure");
    }
}
