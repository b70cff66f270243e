//! Latest result and bounded history per check

use super::model::CheckResult;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_HISTORY_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub latest: CheckResult,
    /// Oldest first; never longer than the cache's history size.
    pub history: VecDeque<CheckResult>,
    /// Sequence number of the run that wrote `latest`.
    pub run_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub applied: usize,
    pub discarded: usize,
}

/// Shared store written once per completed run.
///
/// A commit applies a whole run's results under a single write lock, so
/// readers observe either the previous or the new state of every check,
/// never a mix.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    history_size: usize,
}

impl ResultCache {
    pub fn new(history_size: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            history_size: history_size.max(1),
        }
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Applies the results of run `run_seq`. A result for a check that already
    /// holds a result from a later-started run is discarded.
    pub fn commit(&self, run_seq: u64, results: impl IntoIterator<Item = CheckResult>) -> CommitStats {
        let mut stats = CommitStats::default();
        let mut entries = self.entries.write();

        for result in results {
            match entries.get_mut(&result.name) {
                Some(entry) if entry.run_seq > run_seq => {
                    debug!(
                        "Discarding late result for '{}' from run {} (cache holds run {})",
                        result.name, run_seq, entry.run_seq
                    );
                    stats.discarded += 1;
                }
                Some(entry) => {
                    entry.history.push_back(result.clone());
                    while entry.history.len() > self.history_size {
                        entry.history.pop_front();
                    }
                    entry.latest = result;
                    entry.run_seq = run_seq;
                    stats.applied += 1;
                }
                None => {
                    let mut history = VecDeque::with_capacity(self.history_size.min(16));
                    history.push_back(result.clone());
                    entries.insert(
                        result.name.clone(),
                        CacheEntry {
                            latest: result,
                            history,
                            run_seq,
                        },
                    );
                    stats.applied += 1;
                }
            }
        }

        stats
    }

    pub fn latest(&self, name: &str) -> Option<CheckResult> {
        self.entries.read().get(name).map(|entry| entry.latest.clone())
    }

    /// Latest results for `names` that have one, taken under one read lock.
    pub fn latest_for<S: AsRef<str>>(&self, names: &[S]) -> Vec<CheckResult> {
        let entries = self.entries.read();
        names
            .iter()
            .filter_map(|name| entries.get(name.as_ref()).map(|entry| entry.latest.clone()))
            .collect()
    }

    /// Most recent last.
    pub fn history(&self, name: &str) -> Vec<CheckResult> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_run_seq(&self, name: &str) -> Option<u64> {
        self.entries.read().get(name).map(|entry| entry.run_seq)
    }

    pub fn remove(&self, name: &str) -> Option<CacheEntry> {
        self.entries.write().remove(name)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
