//! Queue passing hypothesis arcs between search passes.
//!
//! The arc buffer streams completed word hypotheses from the first search
//! pass to the second while decoding is still in progress. The producer side
//! converts retired backpointer entries into self-contained arcs and commits
//! them in frame-sorted order; the consumer side waits for commits, iterates
//! arcs by start frame, and trims frames it will never query again.
//!
//! All shared state lives behind one mutex; the wake event is signalled only
//! after a protected commit finishes, so a consumer woken by the signal
//! always observes fully committed, frame-sorted state. Arcs are copies, not
//! references into the backpointer table, so the producer may release table
//! entries as soon as they have been converted.
//!
//! Known limitation, kept from the original design: `release` compacts the
//! frame index and the arc storage but not the right-context delta pool,
//! which is not stored in frame order. Deltas accumulate until `reset`.

use std::mem::size_of;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::types::{BpIdx, RcBits, WordId, NO_RC};

use super::bptbl::BpTable;
use super::garray::GArray;

/// A committed hypothesis arc: a compact, read-only projection of a
/// backpointer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypArc {
    /// Word hypothesized over this arc.
    pub wid: WordId,
    /// Start frame.
    pub src: usize,
    /// End frame. May equal `src` for zero-duration arcs.
    pub dest: usize,
}

/// Score payload parallel to an arc when score keeping is enabled.
#[derive(Debug, Clone)]
struct ArcScore {
    /// Absolute path score of the arc.
    score: i32,
    /// Index of this arc's first delta in the shared delta pool.
    rc_idx: usize,
    /// Which right contexts carry a delta.
    rc_bits: RcBits,
}

/// Score-keeping storage, allocated only when enabled.
struct ScoreBlock {
    /// Parallel to the arc array, permuted together with it at commit.
    scores: GArray<ArcScore>,
    /// Shared pool of compressed deltas, one per set right-context bit.
    rc_deltas: GArray<u16>,
    n_rc: usize,
}

struct Inner {
    /// Frame -> first-arc-index map. Holds per-frame arc *counts* between
    /// `extend` and `commit`; cumulative start offsets afterwards.
    sf_idx: GArray<usize>,
    arcs: GArray<HypArc>,
    scores: Option<ScoreBlock>,
    /// Frames below this are committed and visible.
    active_sf: usize,
    /// Frames below this are open; `[active_sf, next_sf)` is pending.
    next_sf: usize,
    /// Arcs below this logical index are committed.
    active_arc: usize,
    /// Resume cursor into the input table for the next sweep.
    next_bp: usize,
    is_final: bool,
    /// Wake event state; a signal persists until consumed by a wait.
    signalled: bool,
}

/// Bounded hand-off queue of committed hypothesis arcs, keyed by start
/// frame.
///
/// One producer thread drives `extend`/`add_bps`/`commit` (or the compound
/// `sweep`/`finalize`); one consumer thread drives `wait`/`read`/`release`.
pub struct ArcBuffer {
    name: String,
    input: Arc<Mutex<BpTable>>,
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl ArcBuffer {
    /// Create an arc buffer over its input backpointer table.
    ///
    /// The right-context count is fixed here for the buffer's lifetime; the
    /// delta pool is never allocated when `keep_scores` is off.
    pub fn new(name: &str, input: Arc<Mutex<BpTable>>, config: &SearchConfig) -> Self {
        let scores = config.keep_scores.then(|| ScoreBlock {
            scores: GArray::with_capacity(config.arc_capacity),
            rc_deltas: GArray::new(),
            n_rc: config.n_right_contexts,
        });
        let buf = Self {
            name: name.to_string(),
            input,
            inner: Mutex::new(Inner {
                sf_idx: GArray::new(),
                arcs: GArray::with_capacity(config.arc_capacity),
                scores,
                active_sf: 0,
                next_sf: 0,
                active_arc: 0,
                next_bp: 0,
                is_final: false,
                signalled: false,
            }),
            wake: Condvar::new(),
        };
        info!(
            name = %buf.name,
            arc_bytes = buf.arc_footprint(),
            "initialized arc buffer"
        );
        buf
    }

    /// Name given at construction, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backpointer table this buffer drains.
    pub fn input(&self) -> &Arc<Mutex<BpTable>> {
        &self.input
    }

    /// Bytes occupied per arc: the minimal layout, plus score and bit-vector
    /// storage when score keeping is enabled.
    pub fn arc_footprint(&self) -> usize {
        let inner = self.inner.lock();
        match &inner.scores {
            None => size_of::<HypArc>(),
            Some(sb) => {
                size_of::<HypArc>() + size_of::<ArcScore>() + RcBits::new(sb.n_rc).size_bytes()
            }
        }
    }

    // Producer side.

    /// Grow the visible frame window to `[active_sf, next_sf)`, clearing the
    /// per-frame arc-count slots for newly opened frames.
    ///
    /// Returns the number of newly opened frames; 0 (a benign no-op) when
    /// the frontier is unchanged.
    pub fn extend(&self, next_sf: usize) -> usize {
        let mut inner = self.inner.lock();
        Self::extend_locked(&mut inner, next_sf)
    }

    fn extend_locked(inner: &mut Inner, next_sf: usize) -> usize {
        if next_sf <= inner.next_sf {
            return 0;
        }
        inner.sf_idx.expand_to(next_sf);
        let opened = next_sf - inner.active_sf;
        inner.next_sf = next_sf;
        inner.sf_idx.clear(inner.active_sf, opened);
        opened
    }

    /// Scan backpointer entries in `[start, end)`, converting every entry
    /// whose start frame lies inside the open window into a pending arc.
    ///
    /// Entries starting at or beyond the window are skipped; the return
    /// value is the index of the first such entry (or `end`), which the
    /// caller passes back as `start` on a later call. Entries starting below
    /// the window were captured by an earlier cycle and are skipped
    /// silently.
    pub fn add_bps(&self, table: &BpTable, start: BpIdx, end: BpIdx) -> BpIdx {
        let mut inner = self.inner.lock();
        self.add_bps_locked(&mut inner, table, start.index(), end.index())
    }

    fn add_bps_locked(
        &self,
        inner: &mut Inner,
        table: &BpTable,
        start: usize,
        end: usize,
    ) -> BpIdx {
        let mut resume = None;
        let mut n_added = 0usize;
        for idx in start..end {
            let ent = table.get(BpIdx::new(idx));
            let (src, dest) = (ent.sf, ent.frame);
            if src >= inner.active_sf && src < inner.next_sf {
                inner.arcs.append(HypArc {
                    wid: ent.wid,
                    src,
                    dest,
                });
                if let Some(sb) = inner.scores.as_mut() {
                    let rc_idx = sb.rc_deltas.next_idx();
                    let mut rc_bits = RcBits::new(sb.n_rc);
                    for (rc, &rcscore) in table.get_rcscores(BpIdx::new(idx)).iter().enumerate() {
                        if rcscore != NO_RC {
                            // Monotonicity invariant of the search: a right
                            // context can only lose score relative to the
                            // parent path.
                            assert!(
                                rcscore <= ent.score,
                                "right-context score {} above path score {}",
                                rcscore,
                                ent.score
                            );
                            let delta = ent.score - rcscore;
                            assert!(delta <= u16::MAX as i32, "right-context delta overflow");
                            rc_bits.set(rc);
                            sb.rc_deltas.append(delta as u16);
                        }
                    }
                    sb.scores.append(ArcScore {
                        score: ent.score,
                        rc_idx,
                        rc_bits,
                    });
                }
                *inner.sf_idx.get_mut(src) += 1;
                n_added += 1;
            } else if src >= inner.active_sf && resume.is_none() {
                resume = Some(idx);
            }
        }
        debug!(
            name = %self.name,
            window = ?(inner.active_sf..inner.next_sf),
            range = ?(start..end),
            n_added,
            "added backpointers"
        );
        BpIdx::new(resume.unwrap_or(end))
    }

    /// Make pending arcs visible: turn per-frame counts into cumulative
    /// start offsets, permute pending arcs into frame-sorted order, advance
    /// the committed cursors and signal the consumer.
    ///
    /// Returns the number of arcs committed. Strict no-op, with no signal,
    /// when no frames were newly opened in this cycle.
    pub fn commit(&self) -> usize {
        let mut inner = self.inner.lock();
        self.commit_locked(&mut inner)
    }

    fn commit_locked(&self, inner: &mut Inner) -> usize {
        let n_active_fr = inner.next_sf - inner.active_sf;
        let n_arcs = inner.arcs.next_idx() - inner.active_arc;
        if n_active_fr == 0 {
            assert_eq!(n_arcs, 0, "pending arcs without open frames");
            return 0;
        }

        // Exclusive prefix sum over the newly opened frame slots, seeded
        // from the committed-arc cursor: slot f becomes the index of the
        // first arc whose start frame is >= f.
        {
            let seed = inner.active_arc;
            let sf = inner.sf_idx.view_mut(inner.active_sf, n_active_fr);
            let mut prev_count = sf[0];
            sf[0] = seed;
            for i in 1..n_active_fr {
                let tmp = sf[i];
                sf[i] = sf[i - 1] + prev_count;
                prev_count = tmp;
            }
        }

        if n_arcs > 0 {
            // Counting sort keyed by start frame: each pending arc is copied
            // to its frame's next free slot, using a transient copy of the
            // offsets as free-running cursors.
            let active_sf = inner.active_sf;
            let mut cursor: Vec<usize> = inner.sf_idx.view(active_sf, n_active_fr).to_vec();
            let pending: Vec<HypArc> = inner.arcs.view(inner.active_arc, n_arcs).to_vec();
            let pending_scores: Option<Vec<ArcScore>> = inner
                .scores
                .as_ref()
                .map(|sb| sb.scores.view(inner.active_arc, n_arcs).to_vec());

            for (k, arc) in pending.iter().enumerate() {
                let pos = &mut cursor[arc.src - active_sf];
                *inner.arcs.get_mut(*pos) = *arc;
                if let Some(ps) = pending_scores.as_ref() {
                    let sb = inner.scores.as_mut().expect("score block disappeared");
                    *sb.scores.get_mut(*pos) = ps[k].clone();
                }
                *pos += 1;
            }
        }

        inner.active_sf = inner.next_sf;
        inner.active_arc += n_arcs;

        // Nothing before this point is visible to the consumer.
        inner.signalled = true;
        self.wake.notify_all();
        n_arcs
    }

    /// Compound producer cycle: extend to the input table's frame frontier,
    /// convert newly retired entries, optionally release table entries below
    /// the oldest-needed watermark, and commit.
    ///
    /// Returns the resume cursor into the input table.
    pub fn sweep(&self, release: bool) -> BpIdx {
        let mut table = self.input.lock();
        let mut inner = self.inner.lock();
        let next_sf = table.active_sf();
        if Self::extend_locked(&mut inner, next_sf) > 0 {
            debug!(
                name = %self.name,
                next_sf,
                range = ?(inner.next_bp..table.retired_idx().index()),
                "sweeping arcs"
            );
            let start = inner.next_bp.max(table.first_idx().index());
            let end = table.retired_idx().index();
            inner.next_bp = self.add_bps_locked(&mut inner, &table, start, end).index();
            if release {
                Self::release_input(&mut table);
            }
            // Release happens before commit's signal, so a waking consumer
            // never observes a release that hasn't happened.
            self.commit_locked(&mut inner);
        }
        BpIdx::new(inner.next_bp)
    }

    /// As `sweep`, but also marks the buffer final, waking any waiting
    /// consumer even when no new frames were committed.
    pub fn finalize(&self, release: bool) -> BpIdx {
        let mut table = self.input.lock();
        let mut inner = self.inner.lock();
        let next_sf = table.active_sf();
        if Self::extend_locked(&mut inner, next_sf) > 0 {
            let start = inner.next_bp.max(table.first_idx().index());
            let end = table.retired_idx().index();
            inner.next_bp = self.add_bps_locked(&mut inner, &table, start, end).index();
            if release {
                Self::release_input(&mut table);
            }
        }
        // Final is set before the commit so a woken consumer sees the last
        // arcs and the end-of-utterance flag together.
        inner.is_final = true;
        self.commit_locked(&mut inner);
        // Commit stays silent without new frames, but finalize must always
        // unblock waiters.
        inner.signalled = true;
        self.wake.notify_all();

        info!(
            name = %self.name,
            arcs = inner.arcs.alloc_size(),
            frames = inner.sf_idx.alloc_size(),
            deltas = inner.scores.as_ref().map_or(0, |sb| sb.rc_deltas.alloc_size()),
            "finalized arc buffer"
        );
        BpIdx::new(inner.next_bp)
    }

    fn release_input(table: &mut BpTable) {
        let oldest = table.oldest_bp();
        if !oldest.is_no_bp() && oldest.index() > 0 {
            table.release(BpIdx::new(oldest.index() - 1));
        }
    }

    // Consumer side.

    /// Block until the producer commits (or has committed since the last
    /// wait), returning the producer's frame frontier.
    ///
    /// `None` blocks indefinitely; `Some(Duration::ZERO)` polls. A timeout
    /// is a normal, recoverable condition.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut inner = self.inner.lock();
        loop {
            if inner.signalled {
                inner.signalled = false;
                return Ok(inner.next_sf);
            }
            match deadline {
                None => self.wake.wait(&mut inner),
                Some(dl) => {
                    if Instant::now() >= dl || self.wake.wait_until(&mut inner, dl).timed_out() {
                        if inner.signalled {
                            inner.signalled = false;
                            return Ok(inner.next_sf);
                        }
                        return Err(SearchError::WaitTimeout);
                    }
                }
            }
        }
    }

    /// Take the buffer lock for a compound read sequence that must observe
    /// one consistent snapshot.
    pub fn read(&self) -> ArcBufferReader<'_> {
        ArcBufferReader {
            inner: self.inner.lock(),
        }
    }

    /// Consumer-side trim: physically discard frames below `first_sf` and
    /// the arcs that start there. No-op at the current base.
    ///
    /// Frames at or above `first_sf` are unaffected; their arc indices stay
    /// valid. Returns the number of arcs released.
    pub fn release(&self, first_sf: usize) -> usize {
        let mut inner = self.inner.lock();
        if first_sf <= inner.sf_idx.base() {
            return 0;
        }
        assert!(
            first_sf < inner.active_sf,
            "released frontier {} not below committed frontier {}",
            first_sf,
            inner.active_sf
        );
        let next_first_arc = *inner.sf_idx.get(first_sf);
        inner.sf_idx.shift_from(first_sf);
        inner.sf_idx.set_base(first_sf);
        let released = next_first_arc - inner.arcs.base();
        inner.arcs.shift_from(next_first_arc);
        inner.arcs.set_base(next_first_arc);
        if let Some(sb) = inner.scores.as_mut() {
            sb.scores.shift_from(next_first_arc);
            sb.scores.set_base(next_first_arc);
            // The delta pool is left as-is; see module docs.
        }
        debug!(name = %self.name, first_sf, released, "released arcs");
        released
    }

    /// Return the buffer to its initial empty, non-final state for the next
    /// utterance.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.sf_idx.reset();
        inner.arcs.reset();
        if let Some(sb) = inner.scores.as_mut() {
            sb.scores.reset();
            sb.rc_deltas.reset();
        }
        inner.active_sf = 0;
        inner.next_sf = 0;
        inner.active_arc = 0;
        inner.next_bp = 0;
        inner.is_final = false;
        inner.signalled = false;
    }

    /// Log every committed arc, resolving word ids through `word_name`.
    pub fn dump(&self, word_name: &dyn Fn(WordId) -> String) {
        let inner = self.inner.lock();
        debug!(
            name = %self.name,
            n_arcs = inner.active_arc - inner.arcs.low(),
            "arc buffer dump"
        );
        for idx in inner.arcs.low()..inner.active_arc {
            let arc = inner.arcs.get(idx);
            debug!("  {} sf {} ef {}", word_name(arc.wid), arc.src, arc.dest);
        }
    }
}

/// Scoped read guard over committed arc buffer state.
///
/// Holding the guard keeps the producer (and any concurrent `release`) out,
/// so a traversal observes one consistent snapshot.
pub struct ArcBufferReader<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl ArcBufferReader<'_> {
    /// Index of the first committed arc starting at or after frame `sf`, or
    /// `None` if the frame is released, uncommitted, or has no arcs at or
    /// after it.
    pub fn first_arc(&self, sf: usize) -> Option<usize> {
        if sf < self.inner.sf_idx.low() || sf >= self.inner.active_sf {
            return None;
        }
        let idx = *self.inner.sf_idx.get(sf);
        (idx < self.inner.active_arc).then_some(idx)
    }

    /// Committed arc at logical index `idx`.
    pub fn arc(&self, idx: usize) -> &HypArc {
        assert!(idx < self.inner.active_arc, "arc {} not committed", idx);
        self.inner.arcs.get(idx)
    }

    /// Iterate committed arcs from frame `sf` to the end of the committed
    /// region, in non-decreasing start-frame order.
    pub fn iter_from(&self, sf: usize) -> impl Iterator<Item = (usize, &HypArc)> + '_ {
        let start = self.first_arc(sf).unwrap_or(self.inner.active_arc);
        (start..self.inner.active_arc).map(move |idx| (idx, self.inner.arcs.get(idx)))
    }

    /// Absolute score of a committed arc; `None` when score keeping is
    /// disabled.
    pub fn score(&self, idx: usize) -> Option<i32> {
        let sb = self.inner.scores.as_ref()?;
        assert!(idx < self.inner.active_arc, "arc {} not committed", idx);
        Some(sb.scores.get(idx).score)
    }

    /// Reconstructed right-context scores of a committed arc, one
    /// `(right context, score)` pair per set bit; `None` when score keeping
    /// is disabled.
    pub fn rc_scores(&self, idx: usize) -> Option<Vec<(usize, i32)>> {
        let sb = self.inner.scores.as_ref()?;
        assert!(idx < self.inner.active_arc, "arc {} not committed", idx);
        let s = sb.scores.get(idx);
        let mut out = Vec::with_capacity(s.rc_bits.count());
        let mut k = 0;
        for rc in 0..sb.n_rc {
            if s.rc_bits.is_set(rc) {
                let delta = *sb.rc_deltas.get(s.rc_idx + k) as i32;
                out.push((rc, s.score - delta));
                k += 1;
            }
        }
        Some(out)
    }

    /// One past the last committed arc index.
    pub fn end_arc(&self) -> usize {
        self.inner.active_arc
    }

    /// Number of committed, unreleased arcs.
    pub fn n_arcs(&self) -> usize {
        self.inner.active_arc - self.inner.arcs.low()
    }

    /// Frames below this are committed and queryable.
    pub fn active_sf(&self) -> usize {
        self.inner.active_sf
    }

    /// The producer's frame frontier.
    pub fn next_sf(&self) -> usize {
        self.inner.next_sf
    }

    /// Whether the producer has signalled end of utterance.
    pub fn is_final(&self) -> bool {
        self.inner.is_final
    }
}
