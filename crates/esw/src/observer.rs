//! 👀 The writer's confidant. It tells the observer what happened; the observer decides who hears about it.
//!
//! The default [`TracingObserver`] turns everything into `tracing` events, so a
//! subscriber set up by the host process picks them up. Tests swap in their own
//! observer and count things instead of grepping stdout like animals. 🦆

use tracing::{debug, warn};

use crate::common::Sample;

/// 👀 Receives the events a `SampleWriter` produces while writing a batch.
pub trait WriteObserver: std::fmt::Debug + Send + Sync {
    /// ⚠️ A sample had a NaN or infinite value and was left out of the bulk request.
    fn sample_skipped(&self, sample: &Sample);

    /// ✅ A bulk request landed and every action was acknowledged.
    fn batch_submitted(&self, _index: &str, _documents: usize) {}

    /// 🗑️ The session refused to close politely. The write result still stands.
    fn session_close_failed(&self, _error: &anyhow::Error) {}
}

/// 🍞 Forwards writer events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WriteObserver for TracingObserver {
    fn sample_skipped(&self, sample: &Sample) {
        warn!(
            "⚠️ cannot send value {} to Elasticsearch, skipping sample {:?}",
            sample.value, sample
        );
    }

    fn batch_submitted(&self, index: &str, documents: usize) {
        debug!("✅ {} documents landed in index '{}'", documents, index);
    }

    fn session_close_failed(&self, error: &anyhow::Error) {
        warn!("🗑️ session did not close cleanly: {:#}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::DateTime;

    /// 👀 Only cares about skipped samples. Everything else falls through to the defaults.
    #[derive(Debug, Default)]
    struct HeadCounter {
        skipped: AtomicUsize,
    }

    impl WriteObserver for HeadCounter {
        fn sample_skipped(&self, _sample: &Sample) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn the_one_where_an_observer_only_implements_what_it_cares_about() {
        let the_counter = HeadCounter::default();
        let the_observer: &dyn WriteObserver = &the_counter;
        let the_sample = Sample::new(
            "up",
            [("instance", "a")],
            f64::NAN,
            DateTime::from_timestamp(1000, 0).expect("💀 bad timestamp"),
        );

        the_observer.sample_skipped(&the_sample);
        the_observer.batch_submitted("prometheus", 3);
        the_observer.session_close_failed(&anyhow::anyhow!("💀 the socket ghosted us"));

        assert_eq!(the_counter.skipped.load(Ordering::SeqCst), 1);
    }
}
