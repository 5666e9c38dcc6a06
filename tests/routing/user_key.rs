//! User-key sharding, with and without an auto id

use crate::common::*;

fn only_s2() -> RoutingConfig {
    let mut config = standard_config();
    config.shards = vec![Shard::new("s1", 0), Shard::new("s2", 1)];
    config
}

#[test]
fn test_same_key_reserves_once() {
    let ctx = TestRouter::with_config(only_s2());
    let record = SimpleRecord::new("user").with("user_id", 42i64);

    let first = ctx.router.reserve_index(&record).unwrap();
    let second = ctx.router.reserve_index(&record).unwrap();

    assert_eq!(first.shard.as_str(), "s2");
    assert_eq!(second.shard.as_str(), "s2");
    assert_eq!(first.id, second.id);
    assert_eq!(ctx.rows("user_index"), 1);
}

#[test]
fn test_reserve_then_find_round_trip() {
    let ctx = TestRouter::new();
    for user_id in 1..=50 {
        let reservation = ctx.router.reserve_index(&user(user_id)).unwrap();
        assert_eq!(reservation.key, Some(ShardKey::Int(user_id)));
        assert_eq!(
            ctx.router.find_object_shard("user", &ShardKey::Int(user_id)).unwrap(),
            Some(reservation.shard)
        );
    }
}

#[test]
fn test_indexed_fields_are_denormalized() {
    let ctx = TestRouter::new();
    ctx.router.reserve_index(&user(7)).unwrap();
    let rows = ctx.store.rows("user_index").unwrap();
    assert_eq!(rows[0].get("email"), Some(&Value::from("user7@example.com")));
    assert_eq!(rows[0].get("user_id"), Some(&Value::Int(7)));
}

#[test]
fn test_batch_lookup_omits_unknown_keys() {
    let ctx = TestRouter::new();
    let mut expected = 0;
    for user_id in [1, 2, 3] {
        ctx.router.reserve_index(&user(user_id)).unwrap();
        expected += 1;
    }
    let keys: Vec<ShardKey> = [1, 2, 3, 404, 405].into_iter().map(ShardKey::Int).collect();
    let shards = ctx.router.find_objects_shards("user", &keys).unwrap();

    let found: Vec<&ShardKey> = shards.values().flatten().collect();
    assert_eq!(found.len(), expected);
    assert!(!found.contains(&&ShardKey::Int(404)));
    for (shard, keys) in &shards {
        for key in keys {
            assert_eq!(ctx.router.find_object_shard("user", key).unwrap().as_ref(), Some(shard));
        }
    }
    assert_eq!(ctx.router.metrics().lookup_misses, 2);
}

#[test]
fn test_text_keys_without_index() {
    let ctx = TestRouter::new();
    let session = SimpleRecord::new("session").with("token", "abc123");
    let reservation = ctx.router.reserve_index(&session).unwrap();

    assert_eq!(reservation.id, None);
    assert_eq!(reservation.key, Some(ShardKey::from("abc123")));
    assert_eq!(
        ctx.router.detect_shard(&session).unwrap(),
        Some(reservation.shard.clone())
    );
    assert_eq!(
        ctx.router.find_object_shard("session", &ShardKey::from("abc123")).unwrap(),
        Some(reservation.shard)
    );
    assert_eq!(ctx.router.find_object_shard("session", &ShardKey::from("zzz")).unwrap(), None);
}

#[test]
fn test_delete_twice_is_safe() {
    let ctx = TestRouter::new();
    let record = user(9);
    ctx.router.reserve_index(&record).unwrap();

    assert!(ctx.router.delete_index(&record, &ShardKey::Int(9)).unwrap());
    assert!(!ctx.router.delete_index(&record, &ShardKey::Int(9)).unwrap());
    assert_eq!(ctx.router.find_object_shard("user", &ShardKey::Int(9)).unwrap(), None);

    // the key can be reserved again afterwards
    ctx.router.reserve_index(&record).unwrap();
    assert_eq!(ctx.rows("user_index"), 1);
}

#[test]
fn test_change_shard_moves_one_key() {
    let ctx = TestRouter::with_config(only_s2());
    ctx.router.reserve_index(&user(1)).unwrap();
    ctx.router.reserve_index(&user(2)).unwrap();

    assert!(ctx
        .router
        .change_shard("user", &ShardKey::Int(1), &ShardId::from("s1"))
        .unwrap());
    assert_eq!(
        ctx.router.shard_keys("user", &ShardId::from("s1")).unwrap(),
        vec![ShardKey::Int(1)]
    );
    assert_eq!(
        ctx.router.shard_keys("user", &ShardId::from("s2")).unwrap(),
        vec![ShardKey::Int(2)]
    );
    // detection now keeps the new placement
    assert_eq!(ctx.router.reserve_index(&user(1)).unwrap().shard.as_str(), "s1");
}
