//! Virtual-bucket sharding

use keyroute::{BucketId, RoutingError};

use crate::common::*;

#[test]
fn test_keys_sharing_a_bucket_share_a_shard() {
    let ctx = TestRouter::new();
    // default range mapper: 20 000 keys per bucket
    let shards: Vec<ShardId> = [0, 1, 19_999]
        .into_iter()
        .map(|account| ctx.router.reserve_index(&event(account)).unwrap().shard)
        .collect();
    assert!(shards.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(ctx.rows("event_buckets"), 1);

    let next = ctx.router.reserve_index(&event(20_000)).unwrap();
    assert_eq!(next.bucket, Some(BucketId(2)));
    assert_eq!(ctx.rows("event_buckets"), 2);
}

#[test]
fn test_batch_lookup_spans_buckets() {
    let ctx = TestRouter::new();
    for account in [5, 25_000, 45_000] {
        ctx.router.reserve_index(&event(account)).unwrap();
    }
    let keys: Vec<ShardKey> = [5, 6, 25_000, 45_001, 90_000]
        .into_iter()
        .map(ShardKey::Int)
        .collect();
    let shards = ctx.router.find_objects_shards("event", &keys).unwrap();
    let mut found: Vec<ShardKey> = shards.into_values().flatten().collect();
    found.sort();
    // bucket 5 (90 000) was never reserved
    assert_eq!(
        found,
        vec![
            ShardKey::Int(5),
            ShardKey::Int(6),
            ShardKey::Int(25_000),
            ShardKey::Int(45_001)
        ]
    );
}

#[test]
fn test_delete_makes_the_key_unroutable() {
    let ctx = TestRouter::new();
    let record = event(12);
    ctx.router.reserve_index(&record).unwrap();
    assert!(ctx.router.find_object_shard("event", &ShardKey::Int(12)).unwrap().is_some());

    assert!(ctx.router.delete_index(&record, &ShardKey::Int(12)).unwrap());
    assert_eq!(ctx.router.find_object_shard("event", &ShardKey::Int(12)).unwrap(), None);
    assert!(!ctx.router.delete_index(&record, &ShardKey::Int(12)).unwrap());
}

#[test]
fn test_reassigning_a_bucket_moves_all_its_keys() {
    let ctx = TestRouter::new();
    let bucket = ctx.router.reserve_index(&event(1)).unwrap().bucket.unwrap();
    ctx.router.reserve_index(&event(2)).unwrap();

    for target in ["s1", "s2"] {
        assert!(ctx
            .router
            .reassign_bucket("event", bucket, &ShardId::from(target))
            .unwrap());
        for account in [1, 2, 3] {
            assert_eq!(
                ctx.router.find_object_shard("event", &ShardKey::Int(account)).unwrap(),
                Some(ShardId::from(target))
            );
        }
    }
}

#[test]
fn test_int_mapping_field_uses_numeric_mapper() {
    let ctx = TestRouter::new();
    let shard = ctx.router.reserve_index(&event(42)).unwrap().shard;

    assert_eq!(
        ctx.router.find_object_shard("event", &ShardKey::from("42")).unwrap(),
        Some(shard.clone())
    );
    let shards = ctx
        .router
        .find_objects_shards("event", &[ShardKey::from("42"), ShardKey::Int(42)])
        .unwrap();
    assert_eq!(shards[&shard].len(), 2);

    let text_account = SimpleRecord::new("event").with("account", "42");
    let err = ctx.router.reserve_index(&text_account).unwrap_err();
    assert!(matches!(err, RoutingError::ReservationFailed { .. }));
    assert_eq!(ctx.rows("event_buckets"), 1);
}
