use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mobile_diff::diff::app_data::diff_records;
use mobile_diff::diff::tree::{self, FileEntry, Tree};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Fixture generators for scope trees and app data records
mod fixtures {
    use super::*;

    /// A tree of `n` files where every `churn`th path differs between sides
    pub fn trees(n: usize, churn: usize) -> (Tree, Tree) {
        let entry = |path: String, hash: &str| FileEntry {
            path: path.clone(),
            size: 64,
            is_directory: false,
            hash: Some(hash.to_string()),
            modified_date: None,
        };

        let mut before = Tree::new();
        let mut after = Tree::new();
        for i in 0..n {
            let path = format!("dir-{}/file-{i}.dat", i % 32);
            before.insert(path.clone(), entry(path.clone(), "aa"));
            match i % churn {
                0 => {}
                1 => {
                    after.insert(path.clone(), entry(path, "bb"));
                }
                _ => {
                    after.insert(path.clone(), entry(path, "aa"));
                }
            }
        }
        for i in 0..n / churn {
            let path = format!("new/file-{i}.dat");
            after.insert(path.clone(), entry(path, "cc"));
        }
        (before, after)
    }

    /// Preference-like records; the after side reorders, edits and adds keys
    pub fn records(n: usize) -> (Vec<(String, Value)>, Vec<(String, Value)>) {
        let before: Vec<_> = (0..n).map(|i| (format!("key.{i}"), json!({"v": i}))).collect();
        let after: Vec<_> = (0..n)
            .rev()
            .filter(|i| i % 10 != 0)
            .map(|i| {
                let value = if i % 7 == 0 { json!({"v": i + 1}) } else { json!({"v": i}) };
                (format!("key.{i}"), value)
            })
            .chain((0..n / 10).map(|i| (format!("extra.{i}"), json!(i))))
            .collect();
        (before, after)
    }

    /// A scope directory with `files` small files spread over a few folders
    pub fn scope_dir(base: &Path, files: usize) -> std::io::Result<()> {
        for i in 0..files {
            let dir = base.join(format!("folder-{}", i % 8));
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(format!("item-{i}.json")), format!(r#"{{"id": {i}}}"#))?;
        }
        Ok(())
    }
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_trees");
    for size in [1_000, 10_000, 50_000] {
        let (before, after) = fixtures::trees(size, 5);
        group.bench_with_input(BenchmarkId::new("entries", size), &size, |b, _| {
            b.iter(|| tree::classify(black_box(&before), black_box(&after)))
        });
    }
    group.finish();
}

fn bench_diff_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_records");
    for size in [100, 1_000, 10_000] {
        let (before, after) = fixtures::records(size);
        group.bench_with_input(BenchmarkId::new("records", size), &size, |b, _| {
            b.iter(|| diff_records(black_box(before.clone()), black_box(after.clone())))
        });
    }
    group.finish();
}

fn bench_compare_trees(c: &mut Criterion) {
    c.bench_function("compare_extracted_scopes", |b| {
        let temp = TempDir::new().unwrap();
        let before = temp.path().join("before");
        let after = temp.path().join("after");
        fixtures::scope_dir(&before, 500).unwrap();
        fixtures::scope_dir(&after, 500).unwrap();
        fs::write(after.join("folder-0/item-0.json"), "changed").unwrap();

        b.iter(|| tree::compare_trees(black_box(&before), black_box(&after)).unwrap())
    });
}

criterion_group!(benches, bench_classify, bench_diff_records, bench_compare_trees);
criterion_main!(benches);
