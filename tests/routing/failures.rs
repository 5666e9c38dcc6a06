//! Error taxonomy at the public API

use keyroute::testing::FaultPoint;
use keyroute::RoutingError;

use crate::common::*;

#[test]
fn test_unknown_record_type_is_a_configuration_error() {
    let ctx = TestRouter::new();
    let err = ctx
        .router
        .reserve_index(&SimpleRecord::new("invoice"))
        .unwrap_err();
    assert!(matches!(err, RoutingError::Configuration(_)));
    assert!(err.is_fatal());
    assert!(!ctx.router.is_distributed("invoice"));
}

#[test]
fn test_transient_store_failure_is_absorbed_by_retry() {
    let ctx = TestRouter::new();
    ctx.store.faults().fail_next(FaultPoint::Commit, 1);
    let reservation = ctx.router.reserve_index(&user(1)).unwrap();
    assert_eq!(
        ctx.router.find_object_shard("user", &ShardKey::Int(1)).unwrap(),
        Some(reservation.shard)
    );
    assert_eq!(ctx.router.metrics().retries, 1);
}

#[test]
fn test_persistent_store_failure_surfaces() {
    let ctx = TestRouter::new();
    ctx.store.faults().fail_next(FaultPoint::Insert, 2);
    let err = ctx.router.reserve_index(&user(1)).unwrap_err();
    assert!(matches!(err, RoutingError::ReservationFailed { .. }));
    assert!(!err.is_fatal());
    assert_eq!(ctx.rows("user_index"), 0);
    assert_eq!(ctx.router.metrics().reservation_failures, 1);
}

#[test]
fn test_global_index_is_never_retried() {
    let ctx = TestRouter::new();
    ctx.store.faults().fail_next(FaultPoint::Insert, 1);
    let err = ctx
        .router
        .reserve_index(&SimpleRecord::new("order"))
        .unwrap_err();
    assert!(matches!(err, RoutingError::ReservationFailed { .. }));
    assert_eq!(ctx.router.metrics().retries, 0);
}

#[test]
fn test_lookup_failure_is_not_a_miss() {
    let ctx = TestRouter::new();
    ctx.store.faults().fail_next(FaultPoint::Select, 1);
    let err = ctx
        .router
        .find_objects_shards("user", &[ShardKey::Int(1)])
        .unwrap_err();
    assert!(matches!(err, RoutingError::LookupFailed { .. }));
    assert!(ctx
        .router
        .find_objects_shards("user", &[ShardKey::Int(1)])
        .unwrap()
        .is_empty());
}

#[test]
fn test_delete_store_failure_returns_false() {
    let ctx = TestRouter::new();
    let record = user(3);
    ctx.router.reserve_index(&record).unwrap();
    ctx.store.faults().fail_next(FaultPoint::Delete, 1);
    assert!(!ctx.router.delete_index(&record, &ShardKey::Int(3)).unwrap());
    assert!(ctx.router.find_object_shard("user", &ShardKey::Int(3)).unwrap().is_some());
}

#[test]
fn test_unsupported_operation_is_reported() {
    let ctx = TestRouter::new();
    let err = ctx
        .router
        .reassign_bucket("user", keyroute::BucketId(1), &ShardId::from("s1"))
        .unwrap_err();
    assert!(matches!(err, RoutingError::Unsupported { operation: "reassign_bucket", .. }));
}
