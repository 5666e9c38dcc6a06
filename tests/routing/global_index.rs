//! Global-index sharding

use crate::common::*;

fn order(customer: &str) -> SimpleRecord {
    SimpleRecord::new("order").with("customer", customer)
}

#[test]
fn test_ids_come_from_the_index() {
    let ctx = TestRouter::new();
    let ids: Vec<i64> = (0..5)
        .map(|_| ctx.router.reserve_index(&order("acme")).unwrap().id.unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(ctx.rows("order_index"), 5);
}

#[test]
fn test_caller_supplied_id_is_ignored() {
    let ctx = TestRouter::new();
    let record = order("acme").with("id", 999i64);
    let reservation = ctx.router.reserve_index(&record).unwrap();
    assert_eq!(reservation.id, Some(1));
}

#[test]
fn test_reserve_find_delete() {
    let ctx = TestRouter::new();
    let record = order("globex");
    let reservation = ctx.router.reserve_index(&record).unwrap();
    let id = ShardKey::Int(reservation.id.unwrap());

    assert_eq!(
        ctx.router.find_object_shard("order", &id).unwrap(),
        Some(reservation.shard.clone())
    );
    let batch = ctx
        .router
        .find_objects_shards("order", &[id.clone(), ShardKey::Int(77)])
        .unwrap();
    assert_eq!(batch.get(&reservation.shard), Some(&vec![id.clone()]));

    assert!(ctx.router.delete_index(&record, &id).unwrap());
    assert!(!ctx.router.delete_index(&record, &id).unwrap());
    assert!(ctx.router.find_objects_shards("order", &[id]).unwrap().is_empty());
}
