//! Per-trx latency and error recording.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Latency bucket a statement execution is recorded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Read,
    Write,
    Commit,
    /// Statements that are neither reads, writes nor commits (`BEGIN`, `SET`, ...).
    Total,
}

/// Sink for one logical trx of one client.
pub trait StatsRecorder: Send + Sync {
    fn record(&self, category: Category, micros: i64);
    /// `code` is the dialect error code, if the error carried one.
    fn record_error(&self, code: Option<&str>);
}

#[derive(Debug)]
struct Bucket {
    count: AtomicU64,
    sum_us: AtomicI64,
    min_us: AtomicI64,
    max_us: AtomicI64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_us: AtomicI64::new(0),
            min_us: AtomicI64::new(i64::MAX),
            max_us: AtomicI64::new(0),
        }
    }

    fn record(&self, micros: i64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);
        self.min_us.fetch_min(micros, Ordering::Relaxed);
        self.max_us.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BucketSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        BucketSnapshot {
            count,
            sum_us: self.sum_us.load(Ordering::Relaxed),
            min_us: if count == 0 {
                0
            } else {
                self.min_us.load(Ordering::Relaxed)
            },
            max_us: self.max_us.load(Ordering::Relaxed),
        }
    }
}

/// Lock-free latency collector with an error-code tally.
#[derive(Debug)]
pub struct TrxStats {
    name: String,
    read: Bucket,
    write: Bucket,
    commit: Bucket,
    total: Bucket,
    errors: Mutex<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BucketSnapshot {
    pub count: u64,
    pub sum_us: i64,
    pub min_us: i64,
    pub max_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    pub read: BucketSnapshot,
    pub write: BucketSnapshot,
    pub commit: BucketSnapshot,
    pub total: BucketSnapshot,
    /// Error count per dialect code; errors without a code are counted under `""`.
    pub errors: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }

    /// Fold `other` into `self`, as when summing the same trx over many clients.
    pub fn merge(&mut self, other: &StatsSnapshot) {
        for (mine, theirs) in [
            (&mut self.read, &other.read),
            (&mut self.write, &other.write),
            (&mut self.commit, &other.commit),
            (&mut self.total, &other.total),
        ] {
            if theirs.count > 0 {
                mine.min_us = if mine.count == 0 {
                    theirs.min_us
                } else {
                    mine.min_us.min(theirs.min_us)
                };
            }
            mine.count += theirs.count;
            mine.sum_us += theirs.sum_us;
            mine.max_us = mine.max_us.max(theirs.max_us);
        }
        for (code, n) in &other.errors {
            *self.errors.entry(code.clone()).or_default() += n;
        }
    }
}

impl TrxStats {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read: Bucket::new(),
            write: Bucket::new(),
            commit: Bucket::new(),
            total: Bucket::new(),
            errors: Mutex::new(BTreeMap::new()),
        }
    }

    fn bucket(&self, category: Category) -> &Bucket {
        match category {
            Category::Read => &self.read,
            Category::Write => &self.write,
            Category::Commit => &self.commit,
            Category::Total => &self.total,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let errors = match self.errors.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        StatsSnapshot {
            name: self.name.clone(),
            read: self.read.snapshot(),
            write: self.write.snapshot(),
            commit: self.commit.snapshot(),
            total: self.total.snapshot(),
            errors,
        }
    }
}

impl StatsRecorder for TrxStats {
    fn record(&self, category: Category, micros: i64) {
        self.bucket(category).record(micros);
    }

    fn record_error(&self, code: Option<&str>) {
        let mut errors = match self.errors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *errors.entry(code.unwrap_or_default().to_string()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_per_category() {
        let stats = TrxStats::new("trx1");
        stats.record(Category::Read, 10);
        stats.record(Category::Read, 30);
        stats.record(Category::Commit, 5);
        stats.record_error(Some("1213"));
        stats.record_error(None);

        let snap = stats.snapshot();
        assert_eq!(snap.read.count, 2);
        assert_eq!(snap.read.sum_us, 40);
        assert_eq!(snap.read.min_us, 10);
        assert_eq!(snap.read.max_us, 30);
        assert_eq!(snap.commit.count, 1);
        assert_eq!(snap.write, BucketSnapshot::default());
        assert_eq!(snap.error_count(), 2);
        assert_eq!(snap.errors.get("1213"), Some(&1));
    }

    #[test]
    fn merge_sums_clients() {
        let a = TrxStats::new("t");
        a.record(Category::Write, 8);
        let b = TrxStats::new("t");
        b.record(Category::Write, 2);
        b.record_error(Some("5"));

        let mut total = StatsSnapshot::default();
        total.merge(&a.snapshot());
        total.merge(&b.snapshot());
        assert_eq!(total.write.count, 2);
        assert_eq!(total.write.min_us, 2);
        assert_eq!(total.write.max_us, 8);
        assert_eq!(total.errors.get("5"), Some(&1));
    }
}
