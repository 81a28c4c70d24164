#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Once;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_fields::{
    db::{MemDb, MemDbOptions},
    storage::{
        references_insert, references_insert_tail, remove_reference, EdgeConstraint, FieldKind,
        FieldSchema, NodeSchema, RefSelector, REORDER,
    },
    types::{FieldIndex, NodeId, NodeKey, Result, SombraError, TypeId},
};
use tracing_subscriber::EnvFilter;

const READER: TypeId = TypeId(1);
const FEED: TypeId = TypeId(2);
const FOLLOWS: u8 = 0;
const FOLLOWERS: u8 = 0;
const FEED_LIMIT: u32 = 6;
const READERS: u32 = 12;
const FEEDS: u32 = 10;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sombra_fields=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn setup(opts: MemDbOptions) -> Result<MemDb> {
    let mut db = MemDb::new(opts);
    db.register_schema(NodeSchema::new(
        READER,
        vec![FieldSchema::new(
            FOLLOWS,
            FieldKind::References(EdgeConstraint::new(FEED, FieldIndex(FOLLOWERS))),
        )],
    )?);
    db.register_schema(NodeSchema::new(
        FEED,
        vec![FieldSchema::new(
            FOLLOWERS,
            FieldKind::References(
                EdgeConstraint::new(READER, FieldIndex(FOLLOWS)).with_limit(FEED_LIMIT),
            ),
        )],
    )?);
    for _ in 0..READERS {
        db.create_node(READER)?;
    }
    for _ in 0..FEEDS {
        db.create_node(FEED)?;
    }
    Ok(db)
}

fn edges(db: &MemDb, key: NodeKey, fs: &FieldSchema) -> Result<Vec<NodeKey>> {
    let node = db.node(key)?;
    let list: Vec<NodeKey> = node.get_references(fs)?.map(|rec| rec.dst).collect();
    assert_eq!(list.len(), node.reference_count(fs)?, "{key}: count disagrees");
    Ok(list)
}

/// Both endpoints agree on every edge, no list holds a duplicate and the
/// limited side never exceeds its limit.
fn check_symmetry(db: &MemDb, follows: &FieldSchema, followers: &FieldSchema) -> Result<()> {
    let mut forward = HashSet::new();
    for id in 1..=READERS {
        let reader = NodeKey::new(READER, NodeId(id));
        let list = edges(db, reader, follows)?;
        let unique: HashSet<_> = list.iter().copied().collect();
        assert_eq!(unique.len(), list.len(), "{reader}: duplicate destination");
        forward.extend(list.into_iter().map(|feed| (reader, feed)));
    }
    let mut backward = HashSet::new();
    for id in 1..=FEEDS {
        let feed = NodeKey::new(FEED, NodeId(id));
        let list = edges(db, feed, followers)?;
        assert!(list.len() <= FEED_LIMIT as usize, "{feed}: limit exceeded");
        let unique: HashSet<_> = list.iter().copied().collect();
        assert_eq!(unique.len(), list.len(), "{feed}: duplicate destination");
        backward.extend(list.into_iter().map(|reader| (reader, feed)));
    }
    assert_eq!(forward, backward);
    Ok(())
}

fn tolerate(res: Result<impl Sized>) -> Result<()> {
    match res {
        Ok(_) | Err(SombraError::AlreadyExists(_)) | Err(SombraError::NotFound(_)) => Ok(()),
        Err(SombraError::InvalidArgument("index out of range")) => Ok(()),
        Err(err) => Err(err),
    }
}

fn churn(seed: u64, opts: MemDbOptions, rounds: usize) -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut db = setup(opts)?;
    let follows = db.field(READER, FOLLOWS)?;
    let followers = db.field(FEED, FOLLOWERS)?;

    for _ in 0..rounds {
        let reader = NodeKey::new(READER, NodeId(rng.gen_range(1..=READERS)));
        let feed = NodeKey::new(FEED, NodeId(rng.gen_range(1..=FEEDS)));
        let hint = rng.gen_range(-4isize..8);
        match rng.gen_range(0..8u8) {
            0 | 1 => tolerate(references_insert(&mut db, reader, &follows, hint, 0, feed))?,
            2 => tolerate(references_insert(&mut db, reader, &follows, hint, REORDER, feed))?,
            3 => tolerate(references_insert(&mut db, feed, &followers, hint, 0, reader))?,
            4 => tolerate(remove_reference(
                &mut db,
                reader,
                &follows,
                RefSelector::Id(feed.id),
            ))?,
            5 => tolerate(remove_reference(
                &mut db,
                feed,
                &followers,
                RefSelector::Index(hint),
            ))?,
            6 => {
                let j = rng.gen_range(-4isize..8);
                tolerate(db.node_mut(reader)?.references_swap(&follows, hint, j))?;
                tolerate(db.node_mut(feed)?.references_move(&followers, j, hint))?;
            }
            _ => {
                let batch: Vec<NodeId> = (0..rng.gen_range(1..5))
                    .map(|_| NodeId(rng.gen_range(1..=FEEDS)))
                    .collect();
                references_insert_tail(&mut db, reader, &follows, FEED, &batch)?;
            }
        }
        check_symmetry(&db, &follows, &followers)?;
    }
    Ok(())
}

#[test]
fn random_churn_keeps_both_sides_in_sync() -> Result<()> {
    for seed in [1, 7, 42] {
        churn(seed, MemDbOptions::default(), 400)?;
    }
    Ok(())
}

#[test]
fn random_churn_with_preallocation() -> Result<()> {
    churn(0x5eed, MemDbOptions::bulk_load(), 400)
}
