//! Routing configuration loaded from TOML files

use std::io::Write;

use keyroute::{ConfigError, MapperSpec};
use tempfile::NamedTempFile;

use crate::common::*;

const ROUTING_TOML: &str = r#"
[[shards]]
id = "eu-1"
weight = 2
connection = "postgres://eu-1/app"

[[shards]]
id = "us-1"
weight = 1

[sharding_types.global_id]
generator = "global_index"

[sharding_types.user_key]
generator = "user_key"

[sharding_types.tenant_bucket]
generator = "virtual_bucket"
options = { shard_field = "node", text_mapper = { kind = "hash", buckets = 64 } }

[objects.user]
sharding_type = "user_key"
sharding_key = "user_id"
index_object = "user_index"
indexed_fields = [{ name = "region", kind = "text" }]

[objects.document]
sharding_type = "tenant_bucket"
bucket_mapper_key = "tenant"
bucket_key_kind = "text"
index_object = "document_buckets"

[[routes]]
object = "user"
field = "region"
value = "eu"
shard = "eu-1"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_orchestrator_from_config_file() {
    let file = write_config(ROUTING_TOML);
    let config = RoutingConfig::from_file(file.path()).unwrap();
    assert_eq!(config.shards.len(), 2);
    assert_eq!(
        config.sharding_types["tenant_bucket"].options.text_mapper,
        MapperSpec::Hash { buckets: 64 }
    );

    let ctx = TestRouter::with_config(config);
    assert_eq!(
        ctx.router.shard(&ShardId::from("eu-1")).map(|s| s.connection.as_str()),
        Some("postgres://eu-1/app")
    );

    // the configured route pins EU users
    for user_id in 0..20i64 {
        let record = SimpleRecord::new("user").with("user_id", user_id).with("region", "eu");
        assert_eq!(ctx.router.reserve_index(&record).unwrap().shard.as_str(), "eu-1");
    }

    // custom shard column on the bucket table
    let doc = SimpleRecord::new("document").with("tenant", "acme");
    let reservation = ctx.router.reserve_index(&doc).unwrap();
    assert!(reservation.bucket.map_or(false, |b| b.0 < 64));
    let rows = ctx.store.rows("document_buckets").unwrap();
    assert_eq!(rows[0].get("node"), Some(&Value::from(reservation.shard.as_str())));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RoutingConfig::from_file(&dir.path().join("routing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
[[shards]]
id = "s1"
weight = 0
"#,
    );
    let err = RoutingConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
