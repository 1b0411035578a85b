use super::Steward;
use crate::error::StoreError;
use crate::indexer::{EntityExtractor, FileInfo, FileWalker, is_test_unit};
use crate::store::{EntityStore, Upsert};
use crate::types::{ExtractedFile, SyncReport};
use anyhow::{Context, Result};
use std::time::Instant;

/// Per-file upsert tallies
#[derive(Debug, Default, Clone, Copy)]
struct FileTally {
    created: usize,
    stale: usize,
}

impl FileTally {
    fn record(&mut self, upsert: Upsert, kind: &str, name: &str, file_path: &str) {
        if upsert.created {
            self.created += 1;
            tracing::debug!("New {} {} in {}", kind, name, file_path);
        } else if upsert.stale {
            self.stale += 1;
            tracing::warn!(
                "Stale entity: {} {} in {} changed since it was stored",
                kind,
                name,
                file_path
            );
        }
    }
}

/// Scan the project, store every unit and link tests
pub async fn do_sync(steward: &Steward) -> Result<SyncReport> {
    let start = Instant::now();
    let scan = &steward.config.scan;

    // Walk on a blocking thread; ignore-crate walks are synchronous
    let walker = FileWalker::new(&steward.root, scan.max_file_size)
        .with_patterns(scan.include_patterns.clone(), scan.exclude_patterns.clone());
    let files = tokio::task::spawn_blocking(move || walker.walk())
        .await
        .context("Failed to spawn file walker task")?
        .context("Failed to walk project directory")?;

    tracing::info!("Found {} Python file(s) under {}", files.len(), steward.root.display());

    let mut extractor = EntityExtractor::new().context("Failed to set up the Python parser")?;
    let mut report = SyncReport {
        files_scanned: files.len(),
        ..Default::default()
    };

    for file in &files {
        let extracted = match extractor.extract(&file.content) {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", file.relative_path, e);
                report.files_skipped += 1;
                report.errors.push(format!("{}: {}", file.relative_path, e));
                continue;
            }
        };

        match store_file(&steward.store, file, &extracted, &scan.test_prefix) {
            Ok(tally) => {
                report.entities_created += tally.created;
                report.stale_entities += tally.stale;
            }
            Err(e) => {
                tracing::warn!("Failed to store {}: {}", file.relative_path, e);
                report.files_skipped += 1;
                report.errors.push(format!("{}: {}", file.relative_path, e));
            }
        }
    }

    let links = steward
        .store
        .link_tests(&scan.test_prefix)
        .context("Failed to link tests")?;
    report.tests_linked = links.linked;
    report.duration_ms = start.elapsed().as_millis() as u64;

    if report.stale_entities > 0 {
        tracing::warn!(
            "{} stored entit(ies) differ from the current source; reset and sync to refresh",
            report.stale_entities
        );
    }
    tracing::info!(
        "Sync finished: {} file(s), {} new entit(ies), {} test(s) linked in {} ms",
        report.files_scanned,
        report.entities_created,
        report.tests_linked,
        report.duration_ms
    );

    Ok(report)
}

/// Upsert one file's units inside a single transaction.
///
/// A class that looks like a test (`TestCalc`, or any class in a test file)
/// is not stored itself; its prefixed methods become tests. Other classes are
/// stored with their methods as functions, except prefixed methods, which are
/// tests. Top-level units are split the same way.
fn store_file(
    store: &EntityStore,
    file: &FileInfo,
    extracted: &ExtractedFile,
    prefix: &str,
) -> Result<FileTally, StoreError> {
    let path = file.relative_path.as_str();
    let mut tally = FileTally::default();

    let tx = store.begin()?;

    for class in &extracted.classes {
        if is_test_unit(&class.unit.name, path, prefix) {
            let test_class = Some(class.unit.name.as_str());
            for method in class.methods.iter().filter(|m| m.name.starts_with(prefix)) {
                let upsert = store.upsert_test(method, path, test_class)?;
                tally.record(upsert, "test", &method.name, path);
            }
            continue;
        }

        let class_upsert = store.upsert_class(&class.unit, path)?;
        tally.record(class_upsert, "class", &class.unit.name, path);

        for method in &class.methods {
            let upsert = if is_test_unit(&method.name, path, prefix) {
                store.upsert_test(method, path, Some(class.unit.name.as_str()))?
            } else {
                store.upsert_function(method, path, Some(class_upsert.id))?
            };
            tally.record(upsert, "method", &method.name, path);
        }
    }

    for function in &extracted.functions {
        let (upsert, kind) = if is_test_unit(&function.name, path, prefix) {
            (store.upsert_test(function, path, None)?, "test")
        } else {
            (store.upsert_function(function, path, None)?, "function")
        };
        tally.record(upsert, kind, &function.name, path);
    }

    tx.commit()?;
    Ok(tally)
}
