//! Frame-indexed backpointer table.
//!
//! The table is the append-only record store of word-end hypotheses produced
//! by the first search pass. Each entry notes which word ended, in which
//! frame, with what accumulated path score, and which earlier entry preceded
//! it. Entries are referenced by logical index ([`BpIdx`]) everywhere, never
//! by address: the physical backing store may be compacted by `release`
//! while consumers still hold indices to surviving entries.
//!
//! Lifecycle of an entry: created by `enter` while its end frame is open;
//! retired (immutable, eligible for conversion into arcs) once `push_frame`
//! moves the watermark past it; physically freed by `release` once every
//! consumer has confirmed it no longer needs frames below the threshold.

use tracing::{debug, info, trace};

use crate::config::SearchConfig;
use crate::types::{BpIdx, WordId, NO_RC};

use super::garray::GArray;

/// One word-end hypothesis.
#[derive(Debug, Clone)]
pub struct BpEntry {
    /// Word that ended.
    pub wid: WordId,
    /// Predecessor entry, or `NO_BP`.
    pub prev: BpIdx,
    /// Start frame, fixed at entry time from the predecessor's end frame.
    pub sf: usize,
    /// End frame.
    pub frame: usize,
    /// Accumulated path score.
    pub score: i32,
    /// Per-right-context path scores; `NO_RC` marks absent contexts.
    rc_scores: Option<Box<[i32]>>,
}

/// Append-only store of word-end hypotheses, indexed by frame.
pub struct BpTable {
    name: String,
    ent: GArray<BpEntry>,
    /// Number of frames pushed so far.
    n_frame: usize,
    /// Highest end frame seen in `enter`, if any.
    max_frame: Option<usize>,
    /// First index not yet retired.
    retired: usize,
    /// Oldest entry still referenced by the active search.
    oldest_bp: BpIdx,
    n_rc: usize,
    finalized: bool,
}

impl BpTable {
    /// Create a table. Right-context score keeping is enabled when the
    /// configuration carries a non-zero right-context count and
    /// `keep_scores`.
    pub fn new(name: &str, config: &SearchConfig) -> Self {
        let n_rc = if config.keep_scores {
            config.n_right_contexts
        } else {
            0
        };
        info!(
            name,
            n_rc,
            capacity = config.bp_capacity,
            "initialized backpointer table"
        );
        Self {
            name: name.to_string(),
            ent: GArray::with_capacity(config.bp_capacity),
            n_frame: 0,
            max_frame: None,
            retired: 0,
            oldest_bp: BpIdx::NO_BP,
            n_rc,
            finalized: false,
        }
    }

    /// Name given at construction, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of right-context units scored per entry (0 when disabled).
    pub fn n_right_contexts(&self) -> usize {
        self.n_rc
    }

    /// Advance to the next frame, retiring everything below `watermark`.
    ///
    /// `watermark` is the oldest entry the active search still references;
    /// entries below it become immutable and eligible for collection.
    /// `NO_BP` leaves the retirement boundary where it is. Returns the new
    /// frame count.
    ///
    /// # Panics
    ///
    /// Panics after `finalize`, or if the watermark moves backwards.
    pub fn push_frame(&mut self, watermark: BpIdx) -> usize {
        assert!(!self.finalized, "push_frame on a finalized table");
        self.n_frame += 1;
        if !watermark.is_no_bp() {
            let w = watermark.index();
            assert!(
                w >= self.retired && w <= self.ent.next_idx(),
                "gc watermark {} outside [{}, {}]",
                w,
                self.retired,
                self.ent.next_idx()
            );
            self.retired = w;
            self.oldest_bp = watermark;
        }
        trace!(
            name = %self.name,
            frame = self.n_frame,
            retired = self.retired,
            "pushed frame"
        );
        self.n_frame
    }

    /// Append one word-end hypothesis, returning its index.
    ///
    /// End frames must be non-decreasing across calls. The start frame is
    /// derived from the predecessor (`prev.frame + 1`, or 0 without one) and
    /// may equal `frame` for zero-duration arcs.
    pub fn enter(&mut self, wid: WordId, prev: BpIdx, frame: usize, score: i32) -> BpIdx {
        assert!(!self.finalized, "enter on a finalized table");
        if let Some(last) = self.max_frame {
            assert!(
                frame >= last,
                "entries must be created in non-decreasing frame order ({} < {})",
                frame,
                last
            );
        }
        let sf = if prev.is_no_bp() {
            0
        } else {
            self.ent.get(prev.index()).frame + 1
        };
        assert!(sf <= frame, "entry would start at {} after ending at {}", sf, frame);
        self.max_frame = Some(frame);
        let rc_scores = (self.n_rc > 0).then(|| vec![NO_RC; self.n_rc].into_boxed_slice());
        let idx = self.ent.append(BpEntry {
            wid,
            prev,
            sf,
            frame,
            score,
            rc_scores,
        });
        BpIdx::new(idx)
    }

    /// Entry at `idx`.
    ///
    /// # Panics
    ///
    /// Panics for released or never-written indices.
    pub fn get(&self, idx: BpIdx) -> &BpEntry {
        self.ent.get(idx.index())
    }

    /// Start frame of the entry at `idx`.
    pub fn sf(&self, idx: BpIdx) -> usize {
        self.get(idx).sf
    }

    /// Record the path score for one right context of a pending entry.
    pub fn set_rcscore(&mut self, idx: BpIdx, rc: usize, score: i32) {
        assert!(self.n_rc > 0, "table does not keep right-context scores");
        assert!(
            idx.index() >= self.retired,
            "retired entry {} is immutable",
            idx
        );
        let entry = self.ent.get_mut(idx.index());
        entry
            .rc_scores
            .as_mut()
            .expect("rc score table missing")[rc] = score;
    }

    /// Per-right-context path scores of an entry; empty when score keeping
    /// is disabled.
    pub fn get_rcscores(&self, idx: BpIdx) -> &[i32] {
        self.get(idx).rc_scores.as_deref().unwrap_or(&[])
    }

    /// First index not yet retired. Entries at or beyond are still pending.
    pub fn retired_idx(&self) -> BpIdx {
        BpIdx::new(self.retired)
    }

    /// Current release watermark, `NO_BP` before the first collection.
    pub fn oldest_bp(&self) -> BpIdx {
        self.oldest_bp
    }

    /// First frame not yet fully closed.
    ///
    /// Arcs starting below this frame are final: every future entry's
    /// predecessor lies at or above the watermark, so no new arc can start
    /// earlier than the watermark entry's end frame + 1, and no pending
    /// entry starts earlier than the minimum over the pending region.
    pub fn active_sf(&self) -> usize {
        if self.finalized {
            return self.n_frame;
        }
        let bound = if self.oldest_bp.is_no_bp() {
            0
        } else if self.oldest_bp.index() < self.ent.next_idx() {
            self.get(self.oldest_bp).frame + 1
        } else {
            // Watermark past the last entry: nothing is referenced anymore.
            self.max_frame.map_or(0, |mf| mf + 1)
        };
        (self.retired..self.ent.next_idx())
            .map(|i| self.ent.get(i).sf)
            .min()
            .map_or(bound, |pending| bound.min(pending))
    }

    /// Lowest index still physically present (everything below has been
    /// released).
    pub fn first_idx(&self) -> BpIdx {
        BpIdx::new(self.ent.low())
    }

    /// Physically discard all entries below `threshold`, invalidating their
    /// indices. Benign no-op at or below the current base.
    pub fn release(&mut self, threshold: BpIdx) -> usize {
        if threshold.is_no_bp() {
            return 0;
        }
        let thr = threshold.index();
        if thr <= self.ent.low() {
            return 0;
        }
        assert!(
            thr <= self.retired,
            "cannot release pending entries ({} > retired {})",
            thr,
            self.retired
        );
        let n = thr - self.ent.low();
        self.ent.shift_from(thr);
        self.ent.set_base(thr);
        debug!(name = %self.name, released = n, base = thr, "released backpointers");
        n
    }

    /// Close the table at utterance end: all remaining entries retire and
    /// the frame frontier advances past the last recorded end frame.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.retired = self.ent.next_idx();
        if let Some(mf) = self.max_frame {
            self.n_frame = self.n_frame.max(mf + 1);
        }
        self.finalized = true;
        info!(
            name = %self.name,
            entries = self.ent.next_idx(),
            frames = self.n_frame,
            "finalized backpointer table"
        );
    }

    /// Whether `finalize` has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Index one past the last entry.
    pub fn next_idx(&self) -> BpIdx {
        BpIdx::new(self.ent.next_idx())
    }

    /// Number of frames pushed (or closed by `finalize`).
    pub fn n_frames(&self) -> usize {
        self.n_frame
    }

    /// Return the table to its initial empty state for the next utterance.
    pub fn reset(&mut self) {
        self.ent.reset();
        self.n_frame = 0;
        self.max_frame = None;
        self.retired = 0;
        self.oldest_bp = BpIdx::NO_BP;
        self.finalized = false;
    }

    /// Log every live entry, resolving word ids through `word_name`.
    pub fn dump(&self, word_name: &dyn Fn(WordId) -> String) {
        debug!(name = %self.name, entries = self.ent.len(), "backpointer table dump");
        for idx in self.ent.low()..self.ent.next_idx() {
            let e = self.ent.get(idx);
            debug!(
                "  {}: {} sf {} ef {} score {} prev {}",
                idx,
                word_name(e.wid),
                e.sf,
                e.frame,
                e.score,
                e.prev
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BpTable {
        BpTable::new("test", &SearchConfig::default())
    }

    fn scored_table(n_rc: usize) -> BpTable {
        BpTable::new(
            "test",
            &SearchConfig {
                keep_scores: true,
                n_right_contexts: n_rc,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_enter_derives_start_frames() {
        let mut t = table();
        t.push_frame(BpIdx::NO_BP);
        let sil = t.enter(WordId::new(42), BpIdx::NO_BP, 1, 0);
        assert_eq!(t.sf(sil), 0);
        let word = t.enter(WordId::new(69), sil, 4, -100);
        assert_eq!(t.sf(word), 2);
        assert_eq!(t.get(word).frame, 4);
        assert_eq!(t.get(word).score, -100);
    }

    #[test]
    fn test_zero_duration_entry_is_valid() {
        let mut t = table();
        let a = t.enter(WordId::new(1), BpIdx::NO_BP, 3, 0);
        // Starts in the frame its predecessor ends + 1 == its own end frame.
        let b = t.enter(WordId::new(2), a, 4, 0);
        assert_eq!(t.sf(b), 4);
        assert_eq!(t.get(b).frame, 4);
    }

    #[test]
    #[should_panic]
    fn test_decreasing_frames_panic() {
        let mut t = table();
        t.enter(WordId::new(1), BpIdx::NO_BP, 5, 0);
        t.enter(WordId::new(2), BpIdx::NO_BP, 4, 0);
    }

    #[test]
    fn test_push_frame_retires_to_watermark() {
        let mut t = table();
        let a = t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        let b = t.enter(WordId::new(2), BpIdx::NO_BP, 1, 0);
        t.enter(WordId::new(3), a, 2, 0);
        assert_eq!(t.retired_idx(), BpIdx::new(0));

        t.push_frame(b);
        assert_eq!(t.retired_idx(), b);
        assert_eq!(t.oldest_bp(), b);
        // The pending entry starts at frame 1, which caps the frontier
        // below the watermark bound of 2.
        assert_eq!(t.active_sf(), 1);

        t.push_frame(BpIdx::new(3));
        // No pending entries left; the watermark entry ends at frame 2.
        assert_eq!(t.active_sf(), 3);
    }

    #[test]
    fn test_active_sf_before_any_watermark() {
        let mut t = table();
        assert_eq!(t.active_sf(), 0);
        t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        t.push_frame(BpIdx::NO_BP);
        assert_eq!(t.active_sf(), 0);
    }

    #[test]
    fn test_release_invalidates_prefix() {
        let mut t = table();
        for i in 0..6 {
            t.enter(WordId::new(i), BpIdx::NO_BP, i as usize, 0);
        }
        t.push_frame(BpIdx::new(4));
        assert_eq!(t.release(BpIdx::new(3)), 3);
        // Surviving indices are untouched.
        assert_eq!(t.get(BpIdx::new(3)).wid, WordId::new(3));
        assert_eq!(t.get(BpIdx::new(5)).wid, WordId::new(5));
        // Releasing again at the same threshold is a no-op.
        assert_eq!(t.release(BpIdx::new(3)), 0);
    }

    #[test]
    #[should_panic]
    fn test_get_released_entry_panics() {
        let mut t = table();
        for i in 0..4 {
            t.enter(WordId::new(i), BpIdx::NO_BP, i as usize, 0);
        }
        t.push_frame(BpIdx::new(3));
        t.release(BpIdx::new(3));
        t.get(BpIdx::new(1));
    }

    #[test]
    fn test_finalize_retires_everything() {
        let mut t = table();
        t.push_frame(BpIdx::NO_BP);
        t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        t.enter(WordId::new(2), BpIdx::NO_BP, 7, 0);
        t.finalize();
        assert!(t.is_finalized());
        assert_eq!(t.retired_idx(), BpIdx::new(2));
        // Frontier covers the last recorded end frame.
        assert_eq!(t.active_sf(), 8);
    }

    #[test]
    #[should_panic]
    fn test_enter_after_finalize_panics() {
        let mut t = table();
        t.finalize();
        t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
    }

    #[test]
    fn test_rc_scores_roundtrip() {
        let mut t = scored_table(4);
        let idx = t.enter(WordId::new(1), BpIdx::NO_BP, 0, -50);
        t.set_rcscore(idx, 1, -60);
        t.set_rcscore(idx, 3, -55);
        let scores = t.get_rcscores(idx);
        assert_eq!(scores.len(), 4);
        assert_eq!(scores[0], NO_RC);
        assert_eq!(scores[1], -60);
        assert_eq!(scores[3], -55);
    }

    #[test]
    fn test_rc_scores_disabled() {
        let mut t = table();
        let idx = t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        assert!(t.get_rcscores(idx).is_empty());
    }

    #[test]
    fn test_reset_for_next_utterance() {
        let mut t = table();
        t.enter(WordId::new(1), BpIdx::NO_BP, 0, 0);
        t.push_frame(BpIdx::new(1));
        t.finalize();
        t.reset();
        assert!(!t.is_finalized());
        assert_eq!(t.n_frames(), 0);
        assert_eq!(t.retired_idx(), BpIdx::new(0));
        assert_eq!(t.oldest_bp(), BpIdx::NO_BP);
        // Usable again.
        let idx = t.enter(WordId::new(9), BpIdx::NO_BP, 0, 0);
        assert_eq!(idx, BpIdx::new(0));
    }
}
