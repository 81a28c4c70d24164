#![allow(missing_docs)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use sombra_fields::{
    db::{Expiry, MemDb, MemDbOptions},
    storage::{
        clear_references, reference_set, references_insert, references_insert_tail,
        remove_reference, CounterMetrics, EdgeConstraint, FieldKind, FieldSchema, NodeSchema,
        RefSelector, EDGE_FLAG_DEPENDENT, REORDER,
    },
    types::{FieldIndex, NodeId, NodeKey, RefRecord, Result, SombraError, TypeId},
};

const USER: TypeId = TypeId(1);
const POST: TypeId = TypeId(2);
const GROUP: TypeId = TypeId(3);
const LIKE: TypeId = TypeId(4);

const USER_RECENT: u8 = 0;
const USER_GROUP: u8 = 1;
const USER_SUBS: u8 = 2;
const USER_PARTNER: u8 = 3;
const USER_LIKES: u8 = 4;
const POST_SEEN_BY: u8 = 0;
const POST_LIKED_BY: u8 = 1;
const GROUP_MEMBERS: u8 = 0;
const GROUP_SUBSCRIBERS: u8 = 1;

fn refs(dst: TypeId, inverse: u8) -> EdgeConstraint {
    EdgeConstraint::new(dst, FieldIndex(inverse))
}

fn setup(opts: MemDbOptions) -> MemDb {
    let mut db = MemDb::new(opts);
    db.register_schema(
        NodeSchema::new(
            USER,
            vec![
                FieldSchema::new(
                    USER_RECENT,
                    FieldKind::References(refs(POST, POST_SEEN_BY).with_limit(2)),
                ),
                FieldSchema::new(USER_GROUP, FieldKind::Reference(refs(GROUP, GROUP_MEMBERS))),
                FieldSchema::new(
                    USER_SUBS,
                    FieldKind::References(
                        refs(GROUP, GROUP_SUBSCRIBERS).with_flags(EDGE_FLAG_DEPENDENT),
                    ),
                ),
                FieldSchema::new(USER_PARTNER, FieldKind::Reference(refs(USER, USER_PARTNER))),
                FieldSchema::new(
                    USER_LIKES,
                    FieldKind::References(refs(POST, POST_LIKED_BY).with_edge_type(LIKE)),
                ),
            ],
        )
        .expect("user schema"),
    );
    db.register_schema(
        NodeSchema::new(
            POST,
            vec![
                FieldSchema::new(POST_SEEN_BY, FieldKind::References(refs(USER, USER_RECENT))),
                FieldSchema::new(
                    POST_LIKED_BY,
                    FieldKind::References(refs(USER, USER_LIKES).with_edge_type(LIKE)),
                ),
            ],
        )
        .expect("post schema"),
    );
    db.register_schema(
        NodeSchema::new(
            GROUP,
            vec![
                FieldSchema::new(GROUP_MEMBERS, FieldKind::References(refs(USER, USER_GROUP))),
                FieldSchema::new(
                    GROUP_SUBSCRIBERS,
                    FieldKind::References(refs(USER, USER_SUBS)),
                ),
            ],
        )
        .expect("group schema"),
    );
    db.register_schema(
        NodeSchema::new(LIKE, vec![FieldSchema::new(0, FieldKind::MicroBuffer { len: 2 })])
            .expect("like schema"),
    );
    db
}

fn field(db: &MemDb, ty: TypeId, idx: u8) -> FieldSchema {
    db.field(ty, idx).expect("field schema")
}

fn list(db: &MemDb, key: NodeKey, fs: &FieldSchema) -> Vec<u32> {
    db.node(key)
        .expect("node")
        .get_references(fs)
        .expect("reference list")
        .map(|rec| rec.dst.id.0)
        .collect()
}

fn single(db: &MemDb, key: NodeKey, fs: &FieldSchema) -> Option<NodeKey> {
    db.node(key)
        .expect("node")
        .get_reference(fs)
        .expect("single reference")
        .map(|rec| rec.dst)
}

#[test]
fn limit_evicts_oldest_edges() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let user = db.create_node(USER)?;
    let posts: Vec<NodeKey> = (0..3).map(|_| db.create_node(POST)).collect::<Result<_>>()?;
    let recent = field(&db, USER, USER_RECENT);
    let seen_by = field(&db, POST, POST_SEEN_BY);

    for post in &posts {
        references_insert(&mut db, user, &recent, -1, 0, *post)?;
    }

    assert_eq!(list(&db, user, &recent), vec![posts[1].id.0, posts[2].id.0]);
    assert!(list(&db, posts[0], &seen_by).is_empty());
    assert_eq!(list(&db, posts[2], &seen_by), vec![user.id.0]);
    Ok(())
}

#[test]
fn head_insert_into_full_list_keeps_new_edge() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let user = db.create_node(USER)?;
    let posts: Vec<NodeKey> = (0..3).map(|_| db.create_node(POST)).collect::<Result<_>>()?;
    let recent = field(&db, USER, USER_RECENT);
    let seen_by = field(&db, POST, POST_SEEN_BY);
    references_insert(&mut db, user, &recent, -1, 0, posts[0])?;
    references_insert(&mut db, user, &recent, -1, 0, posts[1])?;

    let rec = references_insert(&mut db, user, &recent, 0, 0, posts[2])?;
    assert_eq!((rec.dst, rec.index), (posts[2], 0));
    assert_eq!(list(&db, user, &recent), vec![posts[2].id.0, posts[1].id.0]);
    assert_eq!(list(&db, posts[2], &seen_by), vec![user.id.0]);
    assert!(list(&db, posts[0], &seen_by).is_empty());
    Ok(())
}

#[test]
fn empty_batch_and_prealloc_leave_field_unset() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let user = db.create_node(USER)?;
    let post = db.create_node(POST)?;
    let recent = field(&db, USER, USER_RECENT);
    let before = db.hash_node(user)?;

    assert_eq!(references_insert_tail(&mut db, user, &recent, POST, &[])?, 0);
    db.node_mut(user)?.prealloc_refs(&recent, 16)?;
    assert!(!db.node(user)?.is_populated(recent.field));
    assert_eq!(db.hash_node(user)?, before);

    references_insert(&mut db, user, &recent, -1, 0, post)?;
    db.node_mut(user)?.prealloc_refs(&recent, 16)?;
    assert_eq!(list(&db, user, &recent), vec![post.id.0]);
    Ok(())
}

#[test]
fn unregistered_edge_type_fails_before_unlinking() -> Result<()> {
    const OWNER: TypeId = TypeId(20);
    const PET: TypeId = TypeId(21);
    const COLLAR: TypeId = TypeId(99);

    let mut db = MemDb::new(MemDbOptions::default());
    db.register_schema(NodeSchema::new(
        OWNER,
        vec![FieldSchema::new(
            0,
            FieldKind::Reference(refs(PET, 0).with_edge_type(COLLAR)),
        )],
    )?);
    db.register_schema(NodeSchema::new(
        PET,
        vec![FieldSchema::new(0, FieldKind::Reference(refs(OWNER, 0)))],
    )?);
    let (a1, a2) = (db.create_node(OWNER)?, db.create_node(OWNER)?);
    let (b1, b2) = (db.create_node(PET)?, db.create_node(PET)?);
    let pet = field(&db, OWNER, 0);
    let owner = field(&db, PET, 0);
    reference_set(&mut db, b1, &owner, a1)?;
    reference_set(&mut db, b2, &owner, a2)?;

    assert_eq!(
        reference_set(&mut db, a2, &pet, b1).unwrap_err(),
        SombraError::NotFound("edge node type")
    );
    assert_eq!(single(&db, a1, &pet), Some(b1));
    assert_eq!(single(&db, b1, &owner), Some(a1));
    assert_eq!(single(&db, a2, &pet), Some(b2));
    assert_eq!(single(&db, b2, &owner), Some(a2));
    Ok(())
}

#[test]
fn reference_set_moves_back_edge() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let a = db.create_node(USER)?;
    let b = db.create_node(GROUP)?;
    let c = db.create_node(GROUP)?;
    let group = field(&db, USER, USER_GROUP);
    let members = field(&db, GROUP, GROUP_MEMBERS);

    let first = reference_set(&mut db, a, &group, b)?;
    assert_eq!(first.dst, b);
    assert_eq!(reference_set(&mut db, a, &group, b)?, first);
    reference_set(&mut db, a, &group, c)?;

    assert_eq!(single(&db, a, &group), Some(c));
    assert!(list(&db, b, &members).is_empty());
    assert_eq!(list(&db, c, &members), vec![a.id.0]);
    Ok(())
}

#[test]
fn single_inverse_is_released_on_both_sides() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let a = db.create_node(USER)?;
    let b = db.create_node(USER)?;
    let c = db.create_node(USER)?;
    let partner = field(&db, USER, USER_PARTNER);

    reference_set(&mut db, a, &partner, b)?;
    assert_eq!(single(&db, b, &partner), Some(a));

    reference_set(&mut db, c, &partner, b)?;
    assert_eq!(single(&db, a, &partner), None);
    assert_eq!(single(&db, b, &partner), Some(c));
    assert_eq!(single(&db, c, &partner), Some(b));
    Ok(())
}

#[test]
fn emptying_dependent_field_schedules_expiry() -> Result<()> {
    let mut db = setup(MemDbOptions::default().dependent_expire_delay_ms(100));
    db.set_clock_ms(5_000);
    let user = db.create_node(USER)?;
    let group = db.create_node(GROUP)?;
    let subs = field(&db, USER, USER_SUBS);

    references_insert(&mut db, user, &subs, -1, 0, group)?;
    assert!(db.expiries().is_empty());
    remove_reference(&mut db, user, &subs, RefSelector::Id(group.id))?;
    assert_eq!(db.expiries(), &[Expiry { node: user, at_ms: 5_100 }]);

    db.set_clock_ms(6_000);
    references_insert(&mut db, user, &subs, -1, 0, group)?;
    remove_reference(&mut db, user, &subs, RefSelector::Index(0))?;
    assert_eq!(db.expiries(), &[Expiry { node: user, at_ms: 6_100 }]);
    Ok(())
}

#[test]
fn non_dependent_field_never_schedules() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let user = db.create_node(USER)?;
    let post = db.create_node(POST)?;
    let recent = field(&db, USER, USER_RECENT);
    references_insert(&mut db, user, &recent, -1, 0, post)?;
    remove_reference(&mut db, user, &recent, RefSelector::Id(post.id))?;
    assert!(db.expiries().is_empty());
    Ok(())
}

#[test]
fn duplicate_insert_reports_or_reorders() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let group = db.create_node(GROUP)?;
    let users: Vec<NodeKey> = (0..3).map(|_| db.create_node(USER)).collect::<Result<_>>()?;
    let subscribers = field(&db, GROUP, GROUP_SUBSCRIBERS);
    for user in &users {
        references_insert(&mut db, group, &subscribers, -1, 0, *user)?;
    }

    let err = references_insert(&mut db, group, &subscribers, 0, 0, users[2]).unwrap_err();
    assert_eq!(
        err,
        SombraError::AlreadyExists(RefRecord {
            dst: users[2],
            meta: None,
            index: 2,
        })
    );

    let moved = references_insert(&mut db, group, &subscribers, 0, REORDER, users[2])?;
    assert_eq!(moved.index, 0);
    let ids: Vec<u32> = users.iter().map(|u| u.id.0).collect();
    assert_eq!(list(&db, group, &subscribers), vec![ids[2], ids[0], ids[1]]);
    Ok(())
}

#[test]
fn insert_honors_position_hints() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let group = db.create_node(GROUP)?;
    let users: Vec<NodeKey> = (0..4).map(|_| db.create_node(USER)).collect::<Result<_>>()?;
    let subscribers = field(&db, GROUP, GROUP_SUBSCRIBERS);

    references_insert(&mut db, group, &subscribers, -1, 0, users[0])?;
    references_insert(&mut db, group, &subscribers, 0, 0, users[1])?;
    let rec = references_insert(&mut db, group, &subscribers, -2, 0, users[2])?;
    assert_eq!(rec.index, 1);
    references_insert(&mut db, group, &subscribers, 99, 0, users[3])?;

    let ids: Vec<u32> = users.iter().map(|u| u.id.0).collect();
    assert_eq!(
        list(&db, group, &subscribers),
        vec![ids[1], ids[2], ids[0], ids[3]]
    );
    Ok(())
}

#[test]
fn invalid_edges_are_rejected_without_side_effects() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let a = db.create_node(USER)?;
    let b = db.create_node(USER)?;
    let post = db.create_node(POST)?;
    let partner = field(&db, USER, USER_PARTNER);
    let recent = field(&db, USER, USER_RECENT);

    assert_eq!(
        reference_set(&mut db, a, &partner, a).unwrap_err(),
        SombraError::InvalidArgument("self reference")
    );
    assert!(matches!(
        reference_set(&mut db, a, &partner, post),
        Err(SombraError::TypeMismatch(_))
    ));
    assert!(matches!(
        references_insert(&mut db, a, &partner, -1, 0, b),
        Err(SombraError::TypeMismatch(_))
    ));
    assert!(matches!(
        reference_set(&mut db, a, &recent, post),
        Err(SombraError::TypeMismatch(_))
    ));
    assert!(matches!(
        reference_set(&mut db, a, &partner, NodeKey::new(USER, NodeId(400))),
        Err(SombraError::NotFound(_))
    ));
    assert!(!db.node(a)?.is_populated(partner.field));
    assert!(!db.node(a)?.is_populated(recent.field));
    assert!(matches!(
        remove_reference(&mut db, a, &partner, RefSelector::Id(b.id)),
        Err(SombraError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn edge_nodes_are_shared_then_destroyed() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut db = setup(MemDbOptions::default().metrics(metrics.clone()));
    let user = db.create_node(USER)?;
    let post = db.create_node(POST)?;
    let likes = field(&db, USER, USER_LIKES);
    let liked_by = field(&db, POST, POST_LIKED_BY);

    let rec = references_insert(&mut db, user, &likes, -1, 0, post)?;
    let edge = rec.meta.expect("edge node");
    assert_eq!(edge.ty, LIKE);
    assert!(db.node(edge).is_ok());
    assert_eq!(db.node(post)?.reference_meta(&liked_by, user.id)?, Some(edge));

    let weight = field(&db, LIKE, 0);
    db.node_mut(edge)?.set_micro_buffer(&weight, &[0, 7])?;

    remove_reference(&mut db, post, &liked_by, RefSelector::Id(user.id))?;
    assert!(db.node(edge).is_err());
    assert!(list(&db, user, &likes).is_empty());
    assert_eq!(metrics.edge_meta_created.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.edge_meta_destroyed.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.edges_created.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.edges_removed.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn bulk_tail_insert_skips_linked_and_applies_limit_once() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut db = setup(MemDbOptions::default().metrics(metrics.clone()));
    let user = db.create_node(USER)?;
    let recent = field(&db, USER, USER_RECENT);
    let seen_by = field(&db, POST, POST_SEEN_BY);
    let first = NodeKey::new(POST, NodeId(1));
    db.create_node(POST)?;
    references_insert(&mut db, user, &recent, -1, 0, first)?;

    let ids = [NodeId(5), NodeId(3), NodeId(1), NodeId(4), NodeId(3)];
    let inserted = references_insert_tail(&mut db, user, &recent, POST, &ids)?;
    assert_eq!(inserted, 3);
    assert_eq!(list(&db, user, &recent), vec![4, 5]);
    assert!(db.node(NodeKey::new(POST, NodeId(3))).is_ok());
    assert!(list(&db, NodeKey::new(POST, NodeId(3)), &seen_by).is_empty());
    assert_eq!(list(&db, NodeKey::new(POST, NodeId(5)), &seen_by), vec![user.id.0]);
    assert_eq!(metrics.edges_evicted.load(Ordering::Relaxed), 2);
    Ok(())
}

#[test]
fn bulk_tail_insert_relinks_single_inverse() -> Result<()> {
    let mut db = setup(MemDbOptions::default().refs_prealloc(16));
    let g1 = db.create_node(GROUP)?;
    let g2 = db.create_node(GROUP)?;
    let u = db.create_node(USER)?;
    let group = field(&db, USER, USER_GROUP);
    let members = field(&db, GROUP, GROUP_MEMBERS);
    reference_set(&mut db, u, &group, g1)?;

    let inserted = references_insert_tail(&mut db, g2, &members, USER, &[NodeId(9), u.id])?;
    assert_eq!(inserted, 2);
    assert_eq!(single(&db, u, &group), Some(g2));
    assert_eq!(single(&db, NodeKey::new(USER, NodeId(9)), &group), Some(g2));
    assert!(list(&db, g1, &members).is_empty());
    assert_eq!(list(&db, g2, &members), vec![u.id.0, 9]);

    assert!(matches!(
        references_insert_tail(&mut db, g2, &members, POST, &[NodeId(1)]),
        Err(SombraError::TypeMismatch(_))
    ));
    assert!(matches!(
        references_insert_tail(&mut db, g2, &members, USER, &[NodeId(0)]),
        Err(SombraError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn move_and_swap_wrap_negative_indices() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    let group = db.create_node(GROUP)?;
    let subscribers = field(&db, GROUP, GROUP_SUBSCRIBERS);
    let users: Vec<NodeKey> = (0..4).map(|_| db.create_node(USER)).collect::<Result<_>>()?;
    for user in &users {
        references_insert(&mut db, group, &subscribers, -1, 0, *user)?;
    }
    let ids: Vec<u32> = users.iter().map(|u| u.id.0).collect();

    db.node_mut(group)?.references_move(&subscribers, -1, 0)?;
    assert_eq!(list(&db, group, &subscribers), vec![ids[3], ids[0], ids[1], ids[2]]);
    db.node_mut(group)?.references_swap(&subscribers, 0, -3)?;
    assert_eq!(list(&db, group, &subscribers), vec![ids[0], ids[3], ids[1], ids[2]]);
    assert_eq!(
        db.node_mut(group)?.references_swap(&subscribers, 0, 4).unwrap_err(),
        SombraError::InvalidArgument("index out of range")
    );
    Ok(())
}

#[test]
fn clear_removes_every_back_edge() -> Result<()> {
    let mut db = setup(MemDbOptions::default());
    db.set_clock_ms(10);
    let user = db.create_node(USER)?;
    let subs = field(&db, USER, USER_SUBS);
    let subscribers = field(&db, GROUP, GROUP_SUBSCRIBERS);
    let groups: Vec<NodeKey> = (0..3).map(|_| db.create_node(GROUP)).collect::<Result<_>>()?;
    for g in &groups {
        references_insert(&mut db, user, &subs, -1, 0, *g)?;
    }

    assert_eq!(clear_references(&mut db, user, &subs)?, 3);
    assert!(!db.node(user)?.is_populated(subs.field));
    for g in &groups {
        assert!(list(&db, *g, &subscribers).is_empty());
    }
    assert_eq!(db.expiries(), &[Expiry { node: user, at_ms: 10 }]);
    Ok(())
}
