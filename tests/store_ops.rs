//! Entry count and identity across arbitrary ingest/remove/clear sequences.

use proptest::prelude::*;
use std::collections::HashSet;
use upload_session::upload::{EntryId, FileHandle};
use upload_session::{UploadConfig, UploadError, UploadSession};

#[derive(Debug, Clone)]
enum Op {
    Ingest(usize),
    /// Remove a previously issued id, which may already be gone.
    Remove(usize),
    RemoveAt(usize),
    ClearAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..4).prop_map(Op::Ingest),
        2 => any::<usize>().prop_map(Op::Remove),
        1 => (0usize..8).prop_map(Op::RemoveAt),
        1 => Just(Op::ClearAll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn entry_count_is_adds_minus_removals(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let session = UploadSession::mount(&UploadConfig::default()).unwrap();

        let mut issued: Vec<EntryId> = Vec::new();
        let mut gone: HashSet<EntryId> = HashSet::new();
        let (mut added, mut removed, mut cleared) = (0usize, 0usize, 0usize);

        for op in ops {
            match op {
                Op::Ingest(n) => {
                    // Same names on every batch: duplicates are allowed by default.
                    let batch = (0..n)
                        .map(|i| FileHandle::new(format!("f{i}.bin"), 1024))
                        .collect();
                    let report = session.ingest(batch);
                    prop_assert!(report.rejected.is_empty());
                    prop_assert_eq!(report.accepted.len(), n);
                    added += n;
                    issued.extend(report.accepted);
                }
                Op::Remove(pick) => {
                    if issued.is_empty() {
                        continue;
                    }
                    let id = issued[pick % issued.len()];
                    match session.remove(id) {
                        Ok(entry) => {
                            prop_assert_eq!(entry.id, id);
                            prop_assert!(gone.insert(id));
                            removed += 1;
                        }
                        Err(err) => {
                            prop_assert!(gone.contains(&id));
                            prop_assert_eq!(err, UploadError::NotFound(id));
                        }
                    }
                }
                Op::RemoveAt(index) => {
                    let len = session.len();
                    match session.remove_at(index) {
                        Ok(entry) => {
                            prop_assert!(index < len);
                            prop_assert!(gone.insert(entry.id));
                            removed += 1;
                        }
                        Err(err) => {
                            prop_assert!(index >= len);
                            prop_assert_eq!(err, UploadError::NoEntryAtIndex(index));
                        }
                    }
                }
                Op::ClearAll => {
                    gone.extend(session.entries().iter().map(|e| e.id));
                    cleared += session.clear_all();
                    prop_assert!(session.is_empty());
                    prop_assert_eq!(session.active_drivers(), 0);
                }
            }

            prop_assert_eq!(session.len(), added - removed - cleared);
            let listed: HashSet<EntryId> = session.entries().iter().map(|e| e.id).collect();
            prop_assert_eq!(listed.len(), session.len());
            prop_assert!(listed.is_disjoint(&gone));
        }

        let unique: HashSet<&EntryId> = issued.iter().collect();
        prop_assert_eq!(unique.len(), issued.len());
    }
}
