//! Property-based tests for boardsync
//!
//! These tests verify invariants that must hold for all inputs:
//! - Stored data survives a write/read round trip bit-for-bit
//! - Conflict detection follows the version/timestamp rule exactly
//! - Shallow merge is deterministic and local-biased
//! - Queued actions are retried a bounded number of times
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// DURABLE STORE TESTS
// ============================================================================

mod store_tests {
    use super::*;
    use boardsync::store::WriteOptions;
    use boardsync::DurableStore;
    use std::collections::BTreeMap;

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        /// Invariant: any serializable value round-trips unchanged and
        /// passes the integrity check on read
        #[test]
        fn round_trip_preserves_data(
            key in "[a-z_]{1,32}",
            data in proptest::collection::btree_map("[a-z0-9]{1,16}", any::<i64>(), 0..8),
        ) {
            let store = DurableStore::open_in_memory();
            block_on(store.put(&key, &data, WriteOptions::default())).unwrap();
            let entry = store.get::<BTreeMap<String, i64>>(&key).unwrap().unwrap();
            prop_assert_eq!(entry.data, data);
        }

        /// Invariant: an explicit version is stored verbatim
        #[test]
        fn explicit_version_is_stored(version in 0i64..1_000_000) {
            let store = DurableStore::open_in_memory();
            block_on(store.put(
                "k",
                &"payload",
                WriteOptions { version: Some(version), ..Default::default() },
            ))
            .unwrap();
            let entry = store.get::<String>("k").unwrap().unwrap();
            prop_assert_eq!(entry.version, version);
        }

        /// Invariant: a degraded store never errors, whatever the key
        #[test]
        fn degraded_store_is_total(key in "\\PC{0,64}") {
            let store = DurableStore::degraded();
            prop_assert!(store.get::<String>(&key).unwrap().is_none());
            prop_assert!(!store.exists(&key));
            prop_assert!(store.keys(None).is_empty());
        }
    }
}

// ============================================================================
// CONFLICT DETECTION TESTS
// ============================================================================

mod conflict_tests {
    use super::*;
    use boardsync::sync::detect;

    proptest! {
        /// Invariant: equal versions never conflict, whatever the timestamps
        #[test]
        fn equal_versions_never_conflict(
            version in any::<i64>(),
            local_ts in any::<i64>(),
            server_ts in any::<i64>(),
        ) {
            let info = detect(version, local_ts, version, server_ts);
            prop_assert!(!info.has_conflict);
        }

        /// Invariant: differing versions conflict exactly when the local
        /// copy was modified strictly after the server's timestamp
        #[test]
        fn divergence_requires_newer_local(
            local_v in 0i64..1000,
            server_v in 0i64..1000,
            local_ts in 0i64..1_000_000,
            server_ts in 0i64..1_000_000,
        ) {
            let info = detect(local_v, local_ts, server_v, server_ts);
            let expected = local_v != server_v && local_ts > server_ts;
            prop_assert_eq!(info.has_conflict, expected);
        }
    }
}

// ============================================================================
// SHALLOW MERGE TESTS
// ============================================================================

mod merge_tests {
    use super::*;
    use boardsync::sync::shallow_merge;
    use serde_json::{json, Value};

    fn arb_flat_object() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..8).prop_map(|m| {
            Value::Object(m.into_iter().map(|(k, v)| (k, json!(v))).collect())
        })
    }

    proptest! {
        /// Invariant: merging a document with itself changes nothing
        #[test]
        fn self_merge_is_identity(doc in arb_flat_object()) {
            prop_assert_eq!(shallow_merge(&doc, &doc), doc);
        }

        /// Invariant: every key from either side appears in the result,
        /// and contested keys carry the local value
        #[test]
        fn local_wins_contested_keys(
            server in arb_flat_object(),
            local in arb_flat_object(),
        ) {
            let merged = shallow_merge(&server, &local);
            let merged = merged.as_object().unwrap();
            let server = server.as_object().unwrap();
            let local = local.as_object().unwrap();

            for (key, value) in local {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            for (key, value) in server {
                if !local.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            prop_assert_eq!(merged.len(), server.len() + local.len()
                - server.keys().filter(|k| local.contains_key(*k)).count());
        }
    }
}

// ============================================================================
// RETRY QUEUE TESTS
// ============================================================================

mod queue_tests {
    use super::*;
    use async_trait::async_trait;
    use boardsync::net::{ActionHandler, ActionKind, ActionQueue, QueuedAction};
    use boardsync::Result;
    use serde_json::json;

    struct AlwaysFails;

    #[async_trait]
    impl ActionHandler for AlwaysFails {
        async fn execute(&self, _action: &QueuedAction) -> Result<()> {
            Err(boardsync::BoardsyncError::Sync("replay failed".to_string()))
        }
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        /// Invariant: a failing action is attempted exactly `max_retries`
        /// times across repeated drains, then dropped with one error
        #[test]
        fn retry_budget_is_exact(max_retries in 1u32..6) {
            let queue = ActionQueue::new();
            queue.enqueue(ActionKind::Update, json!({"id": "x"}), max_retries);

            let mut total_errors = 0;
            for cycle in 0..max_retries + 2 {
                let report = block_on(queue.drain(&AlwaysFails));
                total_errors += report.errors.len();
                if cycle < max_retries - 1 {
                    prop_assert_eq!(queue.len(), 1);
                }
            }

            prop_assert!(queue.is_empty());
            prop_assert_eq!(total_errors, 1);
        }
    }
}
