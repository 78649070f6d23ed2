//! Library pipeline scenarios: scan, reconcile, persist, reload.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use common::{make_repo, touch_head};
use repodex::cache::model::{CachedRepository, RootCache};
use repodex::cache::reconcile::ReconciliationService;
use repodex::cache::store::{CacheStore, FileCacheStore, root_cache_key};
use repodex::core::cancel::CancellationToken;
use repodex::core::config::{CategoryOverride, ScannerConfig};
use repodex::scanner::walker::RepoScanner;

fn scanner_with(config: &ScannerConfig) -> RepoScanner {
    RepoScanner::from_config(config).expect("valid scanner config")
}

fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = fs::canonicalize(tmp.path()).expect("canonical tempdir");
    (tmp, base)
}

fn refresh_collect(
    service: &ReconciliationService<impl CacheStore>,
    root: &Path,
    index: i32,
) -> (Vec<CachedRepository>, Vec<PathBuf>) {
    let mut upserts = Vec::new();
    let mut removals = Vec::new();
    service
        .refresh(
            root,
            index,
            |repo| upserts.push(repo.clone()),
            |path| removals.push(path.to_path_buf()),
            &CancellationToken::new(),
        )
        .expect("refresh succeeds");
    (upserts, removals)
}

#[test]
fn grouping_follows_segment_index() {
    let (_tmp, root) = canonical_tempdir();
    make_repo(&root, "services/orders/OrderService", 1_700_000_000);
    let scanner = scanner_with(&ScannerConfig::default());
    let cancel = CancellationToken::new();

    for (index, expected) in [(1, "OrderService"), (2, "orders"), (3, "services"), (0, "services")] {
        let repos = scanner.scan_all(&root, index, &cancel).expect("scan");
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].group_key, expected, "index {index}");
    }
}

#[test]
fn nested_repositories_and_excluded_trees_are_not_reported() {
    let (_tmp, root) = canonical_tempdir();
    let outer = make_repo(&root, "apps/outer", 1_700_000_000);
    make_repo(&outer, "vendor/inner", 1_700_000_000);
    make_repo(&root, "web/node_modules/dep", 1_700_000_000);
    make_repo(&root, "misc/Node_Modules2/other", 1_700_000_000);
    make_repo(&root, "web/site", 1_700_000_000);

    let repos = scanner_with(&ScannerConfig::default())
        .scan_all(&root, 2, &CancellationToken::new())
        .expect("scan");
    let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["outer", "site"]);
}

#[test]
fn solution_marker_and_category_override_flow_into_cache() {
    let (_tmp, base) = canonical_tempdir();
    let root = base.join("tree");
    let legacy = make_repo(&root, "team/legacy-billing", 1_700_000_000);
    fs::create_dir_all(legacy.join("src")).unwrap();
    fs::write(legacy.join("src").join("Billing.sln"), "").unwrap();
    make_repo(&root, "team/modern", 1_700_000_000);

    let config = ScannerConfig {
        category_overrides: vec![CategoryOverride {
            category: "Legacy".to_string(),
            fragments: vec!["legacy".to_string()],
        }],
        ..ScannerConfig::default()
    };
    let store = FileCacheStore::new(base.join("cache"));
    let service = ReconciliationService::new(store, scanner_with(&config));
    refresh_collect(&service, &root, 2);

    let cached = service.load_from_cache(&root).expect("load");
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].group_key, "Legacy");
    assert!(cached[0].has_solution_marker);
    assert_eq!(
        cached[0].solution_marker_path.as_deref(),
        Some(legacy.join("src").join("Billing.sln").as_path())
    );
    assert_eq!(cached[1].group_key, "team");
    assert!(!cached[1].has_solution_marker);
}

#[test]
fn file_backed_refresh_cycle() {
    let (_tmp, base) = canonical_tempdir();
    let root = base.join("src");
    make_repo(&root, "g/a", 1_700_000_000);
    let b = make_repo(&root, "g/b", 1_700_000_000);
    let cache_dir = base.join("cache");

    let service = ReconciliationService::new(
        FileCacheStore::new(cache_dir.clone()),
        scanner_with(&ScannerConfig::default()),
    );
    let (upserts, removals) = refresh_collect(&service, &root, 2);
    assert_eq!(upserts.len(), 2);
    assert!(removals.is_empty());

    let key = root_cache_key(&root);
    let on_disk: RootCache =
        serde_json::from_str(&fs::read_to_string(cache_dir.join(format!("{key}.json"))).unwrap())
            .unwrap();
    assert_eq!(on_disk.normalized_root, key);
    assert_eq!(on_disk.root_path, root);
    assert_eq!(on_disk.repos.len(), 2);

    touch_head(&b, 1_700_100_000);
    make_repo(&root, "g/c", 1_700_000_000);
    let (upserts, removals) = refresh_collect(&service, &root, 2);
    let names: Vec<&str> = upserts.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert!(removals.is_empty());

    fs::remove_dir_all(&b).unwrap();
    fs::remove_dir_all(root.join("g").join("c")).unwrap();
    let (upserts, removals) = refresh_collect(&service, &root, 2);
    assert!(upserts.is_empty());
    assert_eq!(removals, vec![root.join("g").join("b"), root.join("g").join("c")]);

    // A fresh service over the same directory sees the persisted state.
    let reopened = ReconciliationService::new(
        FileCacheStore::new(cache_dir),
        scanner_with(&ScannerConfig::default()),
    );
    let cached = reopened.load_from_cache(&root).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].name, "a");
}

#[test]
fn persisted_order_is_group_then_name_case_insensitive() {
    let (_tmp, base) = canonical_tempdir();
    let root = base.join("src");
    for rel in ["beta/Zeta", "Alpha/yak", "beta/alpha", "Gamma/Xylo", "Alpha/Bear"] {
        make_repo(&root, rel, 1_700_000_000);
    }
    let service = ReconciliationService::new(
        FileCacheStore::new(base.join("cache")),
        scanner_with(&ScannerConfig::default()),
    );
    refresh_collect(&service, &root, 2);

    let order: Vec<String> = service
        .load_from_cache(&root)
        .unwrap()
        .iter()
        .map(|r| format!("{}/{}", r.group_key, r.name))
        .collect();
    assert_eq!(
        order,
        vec!["Alpha/Bear", "Alpha/yak", "beta/alpha", "beta/Zeta", "Gamma/Xylo"]
    );
}

#[test]
fn worker_count_does_not_change_results() {
    let (_tmp, root) = canonical_tempdir();
    for group in 0..6 {
        for repo in 0..5 {
            make_repo(&root, &format!("g{group}/deep/r{repo}"), 1_700_000_000);
        }
    }
    let cancel = CancellationToken::new();

    let single = ScannerConfig {
        parallelism: 1,
        ..ScannerConfig::default()
    };
    let many = ScannerConfig {
        parallelism: 8,
        ..ScannerConfig::default()
    };
    let a = scanner_with(&single).scan_all(&root, 3, &cancel).unwrap();
    let b = scanner_with(&many).scan_all(&root, 3, &cancel).unwrap();
    assert_eq!(a.len(), 30);
    assert_eq!(a, b);
}

#[test]
fn independent_roots_refresh_concurrently() {
    let (_tmp, base) = canonical_tempdir();
    let roots: Vec<PathBuf> = (0..4).map(|i| base.join(format!("root{i}"))).collect();
    for (i, root) in roots.iter().enumerate() {
        for j in 0..=i {
            make_repo(root, &format!("grp/repo{j}"), 1_700_000_000);
        }
    }

    let service = Arc::new(ReconciliationService::new(
        FileCacheStore::new(base.join("cache")),
        scanner_with(&ScannerConfig::default()),
    ));
    let handles: Vec<_> = roots
        .iter()
        .cloned()
        .map(|root| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .refresh(&root, 2, |_| {}, |_| {}, &CancellationToken::new())
                    .expect("refresh")
                    .total
            })
        })
        .collect();
    let totals: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(totals, vec![1, 2, 3, 4]);
    assert_eq!(service.store().keys().unwrap().len(), 4);
}

#[test]
fn case_variant_group_folders_keep_all_repositories() {
    let (_tmp, base) = canonical_tempdir();
    let root = base.join("src");
    make_repo(&root, "Team/alpha", 1_700_000_000);
    make_repo(&root, "team/beta", 1_700_000_000);
    if fs::read_dir(&root).unwrap().count() < 2 {
        return;
    }

    let service = ReconciliationService::new(
        FileCacheStore::new(base.join("cache")),
        scanner_with(&ScannerConfig::default()),
    );
    let (upserts, _) = refresh_collect(&service, &root, 2);
    assert_eq!(upserts.len(), 2);

    let (upserts, removals) = refresh_collect(&service, &root, 2);
    assert!(upserts.is_empty());
    assert!(removals.is_empty());

    let names: Vec<String> = service
        .load_from_cache(&root)
        .unwrap()
        .iter()
        .map(|r| r.name.clone())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
}
