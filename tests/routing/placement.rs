//! Weighted random placement

use std::collections::HashMap;

use keyroute::ShardRegistry;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::*;

#[test]
fn test_random_shard_follows_weights() {
    let ctx = TestRouter::new();
    let picks = 10_000;
    let mut counts: HashMap<ShardId, usize> = HashMap::new();
    for _ in 0..picks {
        *counts.entry(ctx.router.random_shard()).or_default() += 1;
    }

    // every pick is a configured shard
    assert!(counts.keys().all(|id| ctx.router.shard(id).is_some()));
    let s2 = counts.get(&ShardId::from("s2")).copied().unwrap_or(0) as f64 / picks as f64;
    assert!((0.72..=0.78).contains(&s2), "s2 share was {s2}");
}

#[test]
fn test_zero_weight_shard_is_never_picked() {
    let config = RoutingConfig::new(vec![
        Shard::new("s1", 1),
        Shard::new("drained", 0),
        Shard::new("s3", 1),
    ]);
    let ctx = TestRouter::with_config(config);
    for _ in 0..2_000 {
        assert_ne!(ctx.router.random_shard().as_str(), "drained");
    }
    // still addressable
    assert!(ctx.router.shard(&ShardId::from("drained")).is_some());
}

#[test]
fn test_random_shard_except_skips_excluded() {
    let ctx = TestRouter::new();
    let excluded = [ShardId::from("s2")];
    for _ in 0..1_000 {
        assert_eq!(
            ctx.router.random_shard_except(&excluded),
            Some(ShardId::from("s1"))
        );
    }
}

#[test]
fn test_random_shard_except_all_is_none() {
    let ctx = TestRouter::new();
    let all: Vec<ShardId> = ctx.router.shards().iter().map(|s| s.id.clone()).collect();
    assert_eq!(ctx.router.random_shard_except(&all), None);
    assert!(ctx.router.random_shard_except(&[]).is_some());
}

#[test]
fn test_random_placement_spreads_new_users() {
    let ctx = TestRouter::new();
    for user_id in 0..400 {
        ctx.router.reserve_index(&user(user_id)).unwrap();
    }
    let on_s1 = ctx.router.shard_keys("user", &ShardId::from("s1")).unwrap().len();
    let on_s2 = ctx.router.shard_keys("user", &ShardId::from("s2")).unwrap().len();
    assert_eq!(on_s1 + on_s2, 400);
    assert!(on_s2 > on_s1);
    assert_eq!(ctx.router.metrics().random_assignments, 400);
}

#[test]
fn test_seeded_placement_is_reproducible() {
    let registry = ShardRegistry::new(vec![
        Shard::new("s1", 1),
        Shard::new("s2", 3),
        Shard::new("drained", 0),
    ])
    .unwrap();

    let draw = |seed: u64| -> Vec<ShardId> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..500).map(|_| registry.random_shard_with(&mut rng)).collect()
    };
    let first = draw(17);
    assert_eq!(first, draw(17));
    assert!(first.iter().all(|id| id.as_str() != "drained"));
    let s2 = first.iter().filter(|id| id.as_str() == "s2").count();
    assert!(s2 > 500 / 2, "s2 drew {s2} of 500");

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..200 {
        assert_eq!(
            registry.random_shard_except_with(&[ShardId::from("s1")], &mut rng),
            Some(ShardId::from("s2"))
        );
    }
}
