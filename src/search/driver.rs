//! Two-pass decoder wiring.
//!
//! The driver couples one backpointer table with one arc buffer and hands
//! out role-typed handles: the first search pass holds a [`SearchProducer`]
//! and writes hypotheses, the second holds a [`SearchConsumer`] and drains
//! committed arcs. Both handles are `Send`, so each pass can run on its own
//! thread; every operation crossing the hand-off goes through the buffer's
//! lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::types::{BpIdx, WordId};

use super::arc_buffer::{ArcBuffer, ArcBufferReader};
use super::bptbl::BpTable;

/// Factory for a coupled backpointer table + arc buffer pair.
pub struct DecoderPipeline;

impl DecoderPipeline {
    /// Build the pipeline, returning the producer and consumer handles.
    pub fn new(name: &str, config: &SearchConfig) -> Result<(SearchProducer, SearchConsumer)> {
        if name.is_empty() {
            return Err(SearchError::InvalidInput(
                "pipeline name must not be empty".to_string(),
            ));
        }
        config.validate()?;
        let table = Arc::new(Mutex::new(BpTable::new(name, config)));
        let buffer = Arc::new(ArcBuffer::new(name, Arc::clone(&table), config));
        info!(name, "initialized decoder pipeline");
        Ok((
            SearchProducer {
                table,
                buffer: Arc::clone(&buffer),
            },
            SearchConsumer { buffer },
        ))
    }
}

/// Producer-side handle held by the first search pass.
pub struct SearchProducer {
    table: Arc<Mutex<BpTable>>,
    buffer: Arc<ArcBuffer>,
}

impl SearchProducer {
    /// Record one word-end hypothesis.
    pub fn enter(&self, wid: WordId, prev: BpIdx, frame: usize, score: i32) -> BpIdx {
        self.table.lock().enter(wid, prev, frame, score)
    }

    /// Record the path score for one right context of a pending entry.
    pub fn set_rcscore(&self, idx: BpIdx, rc: usize, score: i32) {
        self.table.lock().set_rcscore(idx, rc, score)
    }

    /// Advance the frame counter, retiring entries below `watermark`.
    pub fn push_frame(&self, watermark: BpIdx) -> usize {
        self.table.lock().push_frame(watermark)
    }

    /// Stream newly retired entries into the buffer and commit them,
    /// optionally releasing table entries the search no longer references.
    pub fn sweep(&self, release: bool) -> BpIdx {
        self.buffer.sweep(release)
    }

    /// End of utterance: close the table, commit the remaining arcs and
    /// mark the buffer final.
    pub fn finalize(&self, release: bool) -> BpIdx {
        self.table.lock().finalize();
        self.buffer.finalize(release)
    }

    /// Prepare table and buffer for the next utterance. The consumer must
    /// be done with the previous one.
    pub fn reset(&self) {
        self.buffer.reset();
        self.table.lock().reset();
    }

    /// Shared access to the underlying table, for lattice construction.
    pub fn table(&self) -> &Arc<Mutex<BpTable>> {
        &self.table
    }
}

/// Consumer-side handle held by the second search pass.
pub struct SearchConsumer {
    buffer: Arc<ArcBuffer>,
}

impl SearchConsumer {
    /// Block until the producer commits; see [`ArcBuffer::wait`].
    pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
        self.buffer.wait(timeout)
    }

    /// Consistent read snapshot over committed arcs.
    pub fn read(&self) -> ArcBufferReader<'_> {
        self.buffer.read()
    }

    /// Trim frames below `first_sf` once they will never be queried again.
    pub fn release(&self, first_sf: usize) -> usize {
        self.buffer.release(first_sf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::thread;

    static TRACING: Lazy<()> = Lazy::new(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });

    #[test]
    fn test_pipeline_rejects_invalid_config() {
        let config = SearchConfig {
            keep_scores: true,
            n_right_contexts: 0,
            ..Default::default()
        };
        assert!(DecoderPipeline::new("bad", &config).is_err());
    }

    #[test]
    fn test_pipeline_rejects_empty_name() {
        assert!(matches!(
            DecoderPipeline::new("", &SearchConfig::default()),
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_producer_consumer_threads() {
        Lazy::force(&TRACING);
        const N_FRAMES: usize = 50;
        let (producer, consumer) =
            DecoderPipeline::new("utt", &SearchConfig::default()).unwrap();

        let producer_thread = thread::spawn(move || {
            let mut prev = BpIdx::NO_BP;
            for f in 0..N_FRAMES {
                let e = producer.enter(WordId::new(f as i32), prev, f, -(f as i32));
                let watermark = prev;
                prev = e;
                producer.push_frame(watermark);
                if f % 5 == 4 {
                    producer.sweep(true);
                }
            }
            producer.finalize(true);
        });

        let consumer_thread = thread::spawn(move || {
            let mut seen = 0usize;
            let mut srcs = Vec::new();
            for _ in 0..10_000 {
                // Timeouts are recoverable; just look again.
                let _ = consumer.wait(Some(Duration::from_millis(200)));
                let (end, active, done) = {
                    let r = consumer.read();
                    for idx in seen..r.end_arc() {
                        srcs.push(r.arc(idx).src);
                    }
                    (r.end_arc(), r.active_sf(), r.is_final())
                };
                seen = end;
                // Trim everything this pass has fully consumed.
                if active > 1 {
                    consumer.release(active - 1);
                }
                if done {
                    return srcs;
                }
            }
            panic!("consumer starved");
        });

        producer_thread.join().unwrap();
        let srcs = consumer_thread.join().unwrap();

        // Every hypothesis arrived exactly once, in frame order.
        assert_eq!(srcs.len(), N_FRAMES);
        assert!(srcs.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(srcs.first(), Some(&0));
    }

    #[test]
    fn test_pipeline_reset_reuses_storage() {
        let (producer, consumer) =
            DecoderPipeline::new("utt", &SearchConfig::default()).unwrap();

        let a = producer.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        producer.push_frame(a);
        producer.finalize(false);
        assert_eq!(consumer.read().n_arcs(), 1);

        producer.reset();
        assert_eq!(consumer.read().n_arcs(), 0);
        assert!(!consumer.read().is_final());

        let b = producer.enter(WordId::new(2), BpIdx::NO_BP, 0, 0);
        producer.push_frame(b);
        producer.finalize(false);
        let r = consumer.read();
        assert_eq!(r.n_arcs(), 1);
        assert_eq!(r.arc(0).wid, WordId::new(2));
    }
}
