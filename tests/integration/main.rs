//! Integration tests for cache-to-disk

use cache_to_disk::{CacheRegistry, FunctionId};
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry() -> (Arc<CacheRegistry>, TempDir) {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let registry = CacheRegistry::open_at(temp.path()).unwrap();
    (registry, temp)
}

mod decorator_tests {
    use super::*;
    use cache_to_disk::{function_id, CacheInfo, CacheOutcome, NoCacheCondition, Uncacheable};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Matrix {
        name: String,
        cells: Vec<Vec<f64>>,
        labels: BTreeMap<String, Vec<u32>>,
    }

    fn build(size: &usize) -> Matrix {
        Matrix {
            name: format!("m{}", size),
            cells: (0..*size)
                .map(|i| (0..*size).map(|j| (i * j) as f64).collect())
                .collect(),
            labels: (0..*size)
                .map(|i| (format!("row-{}", i), (0..i as u32).collect()))
                .collect(),
        }
    }

    #[test]
    fn results_survive_a_new_registry() {
        let (registry, temp) = registry();
        let runs = Arc::new(AtomicUsize::new(0));

        let seen = runs.clone();
        let matrix = registry.cached(
            function_id!(build),
            7,
            move |n: &usize| -> CacheOutcome<Matrix> {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(build(n))
            },
        );
        let first = matrix.call(&300).unwrap();
        drop(matrix);
        drop(registry);

        // a fresh registry on the same directory stands in for a process restart
        let registry = CacheRegistry::open_at(temp.path()).unwrap();
        let seen = runs.clone();
        let matrix = registry.cached(
            function_id!(build),
            7,
            move |n: &usize| -> CacheOutcome<Matrix> {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(build(n))
            },
        );

        assert_eq!(matrix.call(&300).unwrap(), first);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(matrix.cache_info(), CacheInfo { hits: 1, misses: 0, nocache: 0 });
    }

    #[test]
    fn distinct_functions_do_not_collide() {
        let (registry, _temp) = registry();
        let double = registry.cached(
            FunctionId::new("math", "double"),
            7,
            |x: &i64| -> CacheOutcome<i64> {
                Ok(x * 2)
            },
        );
        let triple = registry.cached(
            FunctionId::new("math", "triple"),
            7,
            |x: &i64| -> CacheOutcome<i64> {
                Ok(x * 3)
            },
        );

        assert_eq!(double.call(&5).unwrap(), 10);
        assert_eq!(triple.call(&5).unwrap(), 15);
        assert_eq!(double.call(&5).unwrap(), 10);
        assert_eq!(triple.call(&5).unwrap(), 15);
    }

    #[test]
    fn accounting_three_hits_one_miss() {
        let (registry, _temp) = registry();
        let sum = registry.cached(
            FunctionId::new("math", "sum"),
            7,
            |xs: &Vec<u64>| -> CacheOutcome<u64> {
                Ok(xs.iter().sum())
            },
        );

        for _ in 0..4 {
            assert_eq!(sum.call(&vec![1, 2, 3]).unwrap(), 6);
        }

        assert_eq!(sum.cache_info(), CacheInfo { hits: 3, misses: 1, nocache: 0 });
    }

    #[test]
    fn nocache_every_call() {
        let (registry, _temp) = registry();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        let partial = registry.cached(
            FunctionId::new("net", "query"),
            7,
            move |host: &String| -> CacheOutcome<String> {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(NoCacheCondition(format!("partial response from {}", host)).into())
            },
        );

        for _ in 0..3 {
            assert_eq!(
                partial.call(&"db1".to_string()).unwrap(),
                "partial response from db1"
            );
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(partial.cache_info(), CacheInfo { hits: 0, misses: 0, nocache: 3 });
        assert_eq!(partial.cache_size().unwrap(), 0);
    }

    #[test]
    fn errors_are_not_cached() {
        let (registry, _temp) = registry();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        let parse = registry.cached(
            FunctionId::new("text", "parse"),
            7,
            move |s: &String| -> CacheOutcome<i32, std::num::ParseIntError> {
                seen.fetch_add(1, Ordering::SeqCst);
                s.parse().map_err(Uncacheable::failed)
            },
        );

        assert!(parse.call(&"x".to_string()).is_err());
        assert!(parse.call(&"x".to_string()).is_err());
        assert_eq!(parse.call(&"42".to_string()).unwrap(), 42);
        assert_eq!(parse.call(&"42".to_string()).unwrap(), 42);

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(parse.cache_info(), CacheInfo { hits: 1, misses: 1, nocache: 0 });
    }
}

mod expiry_tests {
    use super::*;
    use cache_to_disk::cache::{compute_key, ArtifactStore};
    use cache_to_disk::RetentionPolicy;
    use chrono::{Duration, Utc};

    #[test]
    fn stale_artifacts_swept_on_open() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let f = FunctionId::new("reports", "weekly");
        let policy = RetentionPolicy::days(7);
        let now = Utc::now();

        let store = ArtifactStore::open(temp.path()).unwrap();
        let old = compute_key(&f, policy, &"old", &()).unwrap();
        let fresh = compute_key(&f, policy, &"fresh", &()).unwrap();
        store.put_at(&f, &old, policy, &1u8, now - Duration::days(8)).unwrap();
        store.put_at(&f, &fresh, policy, &2u8, now - Duration::days(6)).unwrap();

        let registry = CacheRegistry::open_at(temp.path()).unwrap();

        let report = registry.opening_sweep().unwrap();
        assert_eq!((report.deleted, report.kept), (1, 1));
        assert!(!registry.store().contains(&f, &old));
        assert!(registry.store().contains(&f, &fresh));
    }

    #[test]
    fn on_demand_sweep_after_open() {
        let (registry, _temp) = registry();
        let f = FunctionId::new("reports", "daily");
        let policy = RetentionPolicy::days(1);
        let key = compute_key(&f, policy, &(), &()).unwrap();

        registry
            .store()
            .put_at(&f, &key, policy, &"late", Utc::now() - Duration::days(2))
            .unwrap();

        let report = registry.delete_old_disk_caches().unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(registry.delete_old_disk_caches().unwrap().deleted, 0);
    }

    #[test]
    fn delete_for_function_twice() {
        let (registry, _temp) = registry();
        let f = FunctionId::new("reports", "monthly");
        let policy = RetentionPolicy::days(30);

        for i in 0..5 {
            let key = compute_key(&f, policy, &i, &()).unwrap();
            registry.store().put(&f, &key, policy, &i).unwrap();
        }

        assert_eq!(registry.delete_disk_caches_for_function(&f).unwrap(), 5);
        assert_eq!(registry.delete_disk_caches_for_function(&f).unwrap(), 0);
        assert!(registry.store().list_for_function(&f).unwrap().is_empty());
    }
}

mod concurrency_tests {
    use super::*;
    use cache_to_disk::cache::{compute_key, ArtifactStore};
    use cache_to_disk::{CacheInfo, CacheOutcome, RetentionPolicy};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn racing_misses_both_succeed() {
        let (registry, _temp) = registry();
        let barrier = Barrier::new(2);
        let slow = registry.cached(
            FunctionId::new("race", "slow"),
            7,
            |n: &u32| -> CacheOutcome<Vec<u32>> {
                // both callers are inside the function before either writes
                barrier.wait();
                Ok((0..*n).collect())
            },
        );

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2).map(|_| s.spawn(|| slow.call(&10_000))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result.unwrap().len(), 10_000);
        }
        assert_eq!(slow.cache_info(), CacheInfo { hits: 0, misses: 2, nocache: 0 });
        assert_eq!(slow.cache_size().unwrap(), 1);
        assert_eq!(slow.call(&10_000).unwrap().len(), 10_000);
    }

    #[test]
    fn readers_never_see_partial_artifacts() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let f = FunctionId::new("race", "blob");
        let policy = RetentionPolicy::days(1);
        let key = compute_key(&f, policy, &"blob", &()).unwrap();

        // separate stores on one directory behave like separate processes
        let writers: Vec<_> = (0..2).map(|_| ArtifactStore::open(temp.path()).unwrap()).collect();
        let reader = ArtifactStore::open(temp.path()).unwrap();

        thread::scope(|s| {
            for (id, store) in writers.iter().enumerate() {
                let (f, key) = (&f, &key);
                s.spawn(move || {
                    for round in 0..20u8 {
                        let blob = vec![id as u8 ^ round; 256 * 1024];
                        store.put(f, key, policy, &blob).unwrap();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..200 {
                    if let Some(artifact) = reader.get::<Vec<u8>>(&f, &key) {
                        let blob = artifact.value;
                        assert_eq!(blob.len(), 256 * 1024);
                        assert!(blob.iter().all(|b| *b == blob[0]));
                    }
                }
            });
        });

        let last = reader.get::<Vec<u8>>(&f, &key).unwrap();
        assert_eq!(last.value.len(), 256 * 1024);
    }
}
