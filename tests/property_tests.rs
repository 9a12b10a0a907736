//! Property-based tests for trueno-tracker
//!
//! Following ruchy/trueno/aprender pattern:
//! - Test invariants of the context registry and tracking path
//! - Run with ProptestConfig::with_cases(64)
//! - Must complete in <30 seconds for pre-commit hook

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::Value;
use trueno_tracker::context::ContextRegistry;
use trueno_tracker::tree::{MemoryTree, TreeView};
use trueno_tracker::Context;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate a scalar context value
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Generate a context with up to 4 entries
fn arb_context() -> impl Strategy<Value = Context> {
    proptest::collection::btree_map("[a-z]{1,6}", arb_scalar(), 0..4)
        .prop_map(|entries: BTreeMap<String, Value>| Context::from(entries))
}

fn registry() -> ContextRegistry {
    let tree = TreeView::new(Arc::new(MemoryTree::new())).subtree(&["runs", "r", "contexts"]);
    ContextRegistry::new(tree, true)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: equal contexts always map to the same index
    #[test]
    fn prop_context_index_is_stable(ctx in arb_context()) {
        let registry = registry();
        let first = registry.context_to_index(&ctx).unwrap();
        let again = registry.context_to_index(&ctx.clone()).unwrap();
        prop_assert_eq!(first, again);
        prop_assert_eq!(registry.cached_len(), 1);
    }

    /// Property: an index resolves back to the context it was assigned to
    #[test]
    fn prop_index_roundtrips_to_context(contexts in proptest::collection::vec(arb_context(), 1..8)) {
        let registry = registry();
        for ctx in &contexts {
            let idx = registry.context_to_index(ctx).unwrap();
            prop_assert_eq!(&registry.index_to_context(idx).unwrap(), ctx);
        }
    }

    /// Property: distinct contexts never share an index
    #[test]
    fn prop_distinct_contexts_get_distinct_indices(
        a in arb_context(),
        b in arb_context()
    ) {
        prop_assume!(a != b);
        let registry = registry();
        let ia = registry.context_to_index(&a).unwrap();
        let ib = registry.context_to_index(&b).unwrap();
        prop_assert_ne!(ia, ib);
    }

    /// Property: indices survive a cache reset (they are persisted)
    #[test]
    fn prop_indices_persist_across_cache_reset(ctx in arb_context()) {
        let registry = registry();
        let idx = registry.context_to_index(&ctx).unwrap();
        registry.clear_cache();
        prop_assert_eq!(registry.cached_len(), 0);
        prop_assert_eq!(registry.context_to_index(&ctx).unwrap(), idx);
    }

    /// Property: canonical encoding ignores insertion order
    #[test]
    fn prop_canonical_is_order_independent(
        entries in proptest::collection::vec(("[a-z]{1,6}", arb_scalar()), 0..5)
    ) {
        let forward = entries
            .iter()
            .fold(Context::new(), |ctx, (k, v)| ctx.with(k.clone(), v.clone()));
        let mut deduped: BTreeMap<String, Value> = BTreeMap::new();
        for (k, v) in &entries {
            deduped.insert(k.clone(), v.clone());
        }
        let backward = deduped
            .iter()
            .rev()
            .fold(Context::new(), |ctx, (k, v)| ctx.with(k.clone(), v.clone()));
        prop_assert_eq!(forward.canonical(), backward.canonical());
        prop_assert_eq!(forward.index_hint(), backward.index_hint());
    }
}
