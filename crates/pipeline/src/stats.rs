use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by all stages of one run.
pub struct PipelineStats {
    // Fetch
    documents_fetched: AtomicUsize,

    // Annotate
    documents_annotated: AtomicUsize,
    extraction_failures: AtomicUsize,
    entities_extracted: AtomicUsize,

    // Persist
    games_persisted: AtomicUsize,
    game_failures: AtomicUsize,
    records_with_link_errors: AtomicUsize,
    entities_linked: AtomicUsize,
    entity_failures: AtomicUsize,
    entities_ignored: AtomicUsize,
    entities_cancelled: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    total_persist_time_us: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents_fetched: AtomicUsize::new(0),
            documents_annotated: AtomicUsize::new(0),
            extraction_failures: AtomicUsize::new(0),
            entities_extracted: AtomicUsize::new(0),
            games_persisted: AtomicUsize::new(0),
            game_failures: AtomicUsize::new(0),
            records_with_link_errors: AtomicUsize::new(0),
            entities_linked: AtomicUsize::new(0),
            entity_failures: AtomicUsize::new(0),
            entities_ignored: AtomicUsize::new(0),
            entities_cancelled: AtomicUsize::new(0),
            total_extract_time_us: AtomicU64::new(0),
            total_persist_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_fetch(&self, documents: usize) {
        self.documents_fetched.fetch_add(documents, Ordering::Relaxed);
    }

    /// `entities` is `None` when the extraction failed.
    pub fn record_extract(&self, duration: Duration, entities: Option<usize>) {
        self.total_extract_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        match entities {
            Some(entities) => {
                self.documents_annotated.fetch_add(1, Ordering::Relaxed);
                self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
            }
            None => {
                self.extraction_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_persist_time(&self, duration: Duration) {
        self.total_persist_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_game(&self, inserted: bool) {
        if inserted {
            self.games_persisted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.game_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_links(&self, linked: usize, failed: usize, ignored: usize, cancelled: usize) {
        self.entities_linked.fetch_add(linked, Ordering::Relaxed);
        self.entity_failures.fetch_add(failed, Ordering::Relaxed);
        self.entities_ignored.fetch_add(ignored, Ordering::Relaxed);
        self.entities_cancelled.fetch_add(cancelled, Ordering::Relaxed);
        if failed > 0 {
            self.records_with_link_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            documents_fetched: self.documents_fetched.load(Ordering::Relaxed),
            documents_annotated: self.documents_annotated.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            games_persisted: self.games_persisted.load(Ordering::Relaxed),
            game_failures: self.game_failures.load(Ordering::Relaxed),
            records_with_link_errors: self.records_with_link_errors.load(Ordering::Relaxed),
            entities_linked: self.entities_linked.load(Ordering::Relaxed),
            entity_failures: self.entity_failures.load(Ordering::Relaxed),
            entities_ignored: self.entities_ignored.load(Ordering::Relaxed),
            entities_cancelled: self.entities_cancelled.load(Ordering::Relaxed),
            avg_extract_time_ms: self.avg_time_ms(
                &self.total_extract_time_us,
                self.documents_annotated.load(Ordering::Relaxed)
                    + self.extraction_failures.load(Ordering::Relaxed),
            ),
            avg_persist_time_ms: self.avg_time_ms(
                &self.total_persist_time_us,
                self.games_persisted.load(Ordering::Relaxed)
                    + self.game_failures.load(Ordering::Relaxed),
            ),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: usize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        if count > 0 {
            total / count as f64 / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub documents_fetched: usize,
    pub documents_annotated: usize,
    pub extraction_failures: usize,
    pub entities_extracted: usize,
    pub games_persisted: usize,
    pub game_failures: usize,
    pub records_with_link_errors: usize,
    pub entities_linked: usize,
    pub entity_failures: usize,
    pub entities_ignored: usize,
    pub entities_cancelled: usize,
    pub avg_extract_time_ms: f64,
    pub avg_persist_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = PipelineStats::new();

        stats.record_fetch(3);
        stats.record_extract(Duration::from_millis(4), Some(2));
        stats.record_extract(Duration::from_millis(2), None);
        stats.record_game(true);
        stats.record_links(1, 1, 1, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.documents_fetched, 3);
        assert_eq!(snapshot.documents_annotated, 1);
        assert_eq!(snapshot.extraction_failures, 1);
        assert_eq!(snapshot.entities_extracted, 2);
        assert_eq!(snapshot.games_persisted, 1);
        assert_eq!(snapshot.records_with_link_errors, 1);
        assert!((snapshot.avg_extract_time_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_has_zero_averages() {
        let snapshot = PipelineStats::new().snapshot();
        assert_eq!(snapshot.avg_extract_time_ms, 0.0);
        assert_eq!(snapshot.avg_persist_time_ms, 0.0);
    }
}
