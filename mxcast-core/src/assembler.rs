//! Receiver-side frame reassembly.
//!
//! Chunks are grouped by [`FrameKey`] and stored by index, so arrival
//! order does not matter. A frame completes when every index in
//! `0..total` has arrived; it is discarded when its chunks disagree on
//! `total`, when it sits incomplete past the timeout, or when too many
//! other frames are pending and it is the oldest.
//!
//! Keys of recently completed frames are remembered for one timeout
//! window, so a late retransmitted chunk counts as a duplicate instead
//! of opening a new partial frame.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::pixel::FRAME_BYTES;
use crate::wire::{FrameKey, WireChunk};

// ── AssemblerConfig ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    /// How long a partial frame may wait for its missing chunks.
    pub frame_timeout: Duration,
    /// Partial frames kept at once; the oldest is evicted beyond this.
    pub max_pending: usize,
    /// Required size of a completed frame, if any.
    pub expected_len: Option<usize>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(3),
            max_pending: 4,
            expected_len: Some(FRAME_BYTES),
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────

/// A fully reassembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub key: FrameKey,
    pub data: Bytes,
    pub chunks: u16,
}

/// What happened to one pushed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk finished its frame.
    Complete(CompletedFrame),
    /// Stored; the frame still misses chunks.
    Pending { received: u16, total: u16 },
    /// Same index seen before for this frame; ignored.
    Duplicate,
    /// The chunk (and possibly its frame) was dropped.
    Discarded,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub completed: u64,
    pub expired: u64,
    pub discarded: u64,
    pub duplicates: u64,
}

// ── FrameAssembler ───────────────────────────────────────────────

struct PartialFrame {
    total: u16,
    parts: Vec<Option<Bytes>>,
    received: u16,
    started: Instant,
}

/// Completed frame keys remembered per allowed pending frame.
const RECENT_PER_PENDING: usize = 4;

pub struct FrameAssembler {
    config: AssemblerConfig,
    pending: HashMap<FrameKey, PartialFrame>,
    /// Completed keys in completion order, oldest first.
    recent: VecDeque<(FrameKey, Instant)>,
    recent_keys: HashSet<FrameKey>,
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            recent: VecDeque::new(),
            recent_keys: HashSet::new(),
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Number of incomplete frames held.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, chunk: WireChunk) -> ChunkOutcome {
        self.push_at(chunk, Instant::now())
    }

    /// Push with an explicit clock (useful for testing).
    pub fn push_at(&mut self, chunk: WireChunk, now: Instant) -> ChunkOutcome {
        self.expire(now);

        if chunk.total == 0 || chunk.index >= chunk.total {
            self.stats.discarded += 1;
            return ChunkOutcome::Discarded;
        }

        if self.recent_keys.contains(&chunk.key) {
            debug!(frame = %chunk.key, index = chunk.index, "chunk for completed frame");
            self.stats.duplicates += 1;
            return ChunkOutcome::Duplicate;
        }

        if let Some(frame) = self.pending.get(&chunk.key) {
            if frame.total != chunk.total {
                warn!(
                    frame = %chunk.key,
                    expected = frame.total,
                    got = chunk.total,
                    "chunk total mismatch; discarding frame"
                );
                self.pending.remove(&chunk.key);
                self.stats.discarded += 1;
                return ChunkOutcome::Discarded;
            }
        } else {
            if self.pending.len() >= self.config.max_pending.max(1) {
                self.evict_oldest();
            }
            self.pending.insert(
                chunk.key.clone(),
                PartialFrame {
                    total: chunk.total,
                    parts: vec![None; chunk.total as usize],
                    received: 0,
                    started: now,
                },
            );
        }

        let Some(frame) = self.pending.get_mut(&chunk.key) else {
            return ChunkOutcome::Discarded;
        };
        let slot = &mut frame.parts[chunk.index as usize];
        if slot.is_some() {
            self.stats.duplicates += 1;
            return ChunkOutcome::Duplicate;
        }
        *slot = Some(chunk.payload);
        frame.received += 1;

        if frame.received < frame.total {
            return ChunkOutcome::Pending {
                received: frame.received,
                total: frame.total,
            };
        }

        let Some(frame) = self.pending.remove(&chunk.key) else {
            return ChunkOutcome::Discarded;
        };
        self.remember(chunk.key.clone(), now);
        let mut data = BytesMut::new();
        for part in frame.parts.into_iter().flatten() {
            data.extend_from_slice(&part);
        }

        if let Some(expected) = self.config.expected_len {
            if data.len() != expected {
                warn!(
                    frame = %chunk.key,
                    len = data.len(),
                    expected,
                    "reassembled frame has wrong size; discarding"
                );
                self.stats.discarded += 1;
                return ChunkOutcome::Discarded;
            }
        }

        self.stats.completed += 1;
        debug!(frame = %chunk.key, chunks = frame.total, "frame complete");
        ChunkOutcome::Complete(CompletedFrame {
            key: chunk.key,
            data: data.freeze(),
            chunks: frame.total,
        })
    }

    /// Drop partial frames older than the timeout. Returns how many.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.config.frame_timeout;
        while let Some((key, done)) = self.recent.front() {
            if now.saturating_duration_since(*done) <= timeout {
                break;
            }
            self.recent_keys.remove(key);
            self.recent.pop_front();
        }

        let before = self.pending.len();
        self.pending.retain(|key, frame| {
            let keep = now.saturating_duration_since(frame.started) <= timeout;
            if !keep {
                warn!(
                    frame = %key,
                    received = frame.received,
                    total = frame.total,
                    "frame timed out"
                );
            }
            keep
        });
        let expired = before - self.pending.len();
        self.stats.expired += expired as u64;
        expired
    }

    fn remember(&mut self, key: FrameKey, now: Instant) {
        let cap = self.config.max_pending.max(1) * RECENT_PER_PENDING;
        while self.recent.len() >= cap {
            if let Some((old, _)) = self.recent.pop_front() {
                self.recent_keys.remove(&old);
            }
        }
        self.recent_keys.insert(key.clone());
        self.recent.push_back((key, now));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, f)| f.started)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            warn!(frame = %key, "too many pending frames; evicting oldest");
            self.pending.remove(&key);
            self.stats.discarded += 1;
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AssemblerConfig {
        AssemblerConfig {
            frame_timeout: Duration::from_secs(2),
            max_pending: 2,
            expected_len: None,
        }
    }

    fn wc(id: u16, index: u16, total: u16, payload: &'static [u8]) -> WireChunk {
        WireChunk {
            key: FrameKey::Id(id),
            index,
            total,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn out_of_order_chunks_complete() {
        let mut asm = FrameAssembler::new(config());
        assert_eq!(
            asm.push(wc(1, 2, 3, b"cc")),
            ChunkOutcome::Pending { received: 1, total: 3 }
        );
        asm.push(wc(1, 0, 3, b"aa"));
        let ChunkOutcome::Complete(frame) = asm.push(wc(1, 1, 3, b"bb")) else {
            panic!("frame should complete");
        };
        assert_eq!(&frame.data[..], b"aabbcc");
        assert_eq!(frame.chunks, 3);
        assert_eq!(asm.pending(), 0);
        assert_eq!(asm.stats().completed, 1);
    }

    #[test]
    fn duplicates_ignored() {
        let mut asm = FrameAssembler::new(config());
        asm.push(wc(1, 0, 2, b"a"));
        assert_eq!(asm.push(wc(1, 0, 2, b"X")), ChunkOutcome::Duplicate);
        let ChunkOutcome::Complete(frame) = asm.push(wc(1, 1, 2, b"b")) else {
            panic!("frame should complete");
        };
        assert_eq!(&frame.data[..], b"ab");
        assert_eq!(asm.stats().duplicates, 1);
    }

    #[test]
    fn interleaved_frames_kept_apart() {
        let mut asm = FrameAssembler::new(config());
        asm.push(wc(1, 0, 2, b"1a"));
        asm.push(wc(2, 1, 2, b"2b"));
        asm.push(wc(2, 0, 2, b"2a"));
        let ChunkOutcome::Complete(frame) = asm.push(wc(1, 1, 2, b"1b")) else {
            panic!("frame 1 should complete");
        };
        assert_eq!(&frame.data[..], b"1a1b");
        assert_eq!(asm.stats().completed, 2);
    }

    #[test]
    fn total_mismatch_discards_frame() {
        let mut asm = FrameAssembler::new(config());
        asm.push(wc(1, 0, 3, b"a"));
        assert_eq!(asm.push(wc(1, 1, 4, b"b")), ChunkOutcome::Discarded);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn index_out_of_range_discarded() {
        let mut asm = FrameAssembler::new(config());
        assert_eq!(asm.push(wc(1, 3, 3, b"a")), ChunkOutcome::Discarded);
        assert_eq!(asm.push(wc(1, 0, 0, b"a")), ChunkOutcome::Discarded);
    }

    #[test]
    fn lost_chunk_times_out() {
        let mut asm = FrameAssembler::new(config());
        let t0 = Instant::now();
        asm.push_at(wc(1, 0, 2, b"a"), t0);
        assert_eq!(asm.expire(t0 + Duration::from_secs(1)), 0);
        assert_eq!(asm.expire(t0 + Duration::from_secs(3)), 1);
        assert_eq!(asm.pending(), 0);
        assert_eq!(asm.stats().expired, 1);
    }

    #[test]
    fn oldest_evicted_when_full() {
        let mut asm = FrameAssembler::new(config());
        let t0 = Instant::now();
        asm.push_at(wc(1, 0, 2, b"a"), t0);
        asm.push_at(wc(2, 0, 2, b"a"), t0 + Duration::from_millis(10));
        asm.push_at(wc(3, 0, 2, b"a"), t0 + Duration::from_millis(20));
        assert_eq!(asm.pending(), 2);

        // Frame 1 was evicted, so its second chunk starts over.
        assert!(matches!(
            asm.push_at(wc(1, 1, 2, b"b"), t0 + Duration::from_millis(30)),
            ChunkOutcome::Pending { received: 1, .. }
        ));
    }

    #[test]
    fn chunk_after_completion_is_duplicate() {
        let mut asm = FrameAssembler::new(config());
        assert!(matches!(asm.push(wc(1, 0, 1, b"a")), ChunkOutcome::Complete(_)));
        assert_eq!(asm.push(wc(1, 0, 1, b"a")), ChunkOutcome::Duplicate);
        assert_eq!(asm.pending(), 0);
        assert_eq!(asm.stats().completed, 1);
        assert_eq!(asm.stats().duplicates, 1);
    }

    #[test]
    fn late_retransmit_does_not_evict_live_frame() {
        let mut asm = FrameAssembler::new(AssemblerConfig {
            max_pending: 1,
            ..config()
        });
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        asm.push_at(wc(1, 0, 2, b"1a"), t0);
        assert!(matches!(
            asm.push_at(wc(1, 1, 2, b"1b"), t0 + ms(1)),
            ChunkOutcome::Complete(_)
        ));
        asm.push_at(wc(2, 0, 2, b"2a"), t0 + ms(2));
        assert_eq!(asm.push_at(wc(1, 1, 2, b"1b"), t0 + ms(3)), ChunkOutcome::Duplicate);
        assert_eq!(asm.pending(), 1);

        let ChunkOutcome::Complete(frame) = asm.push_at(wc(2, 1, 2, b"2b"), t0 + ms(4)) else {
            panic!("frame 2 should complete");
        };
        assert_eq!(&frame.data[..], b"2a2b");
        assert_eq!(asm.stats().discarded, 0);
        assert_eq!(asm.stats().completed, 2);
    }

    #[test]
    fn completed_key_reusable_after_timeout() {
        let mut asm = FrameAssembler::new(config());
        let t0 = Instant::now();
        asm.push_at(wc(1, 0, 1, b"a"), t0);
        assert!(matches!(
            asm.push_at(wc(1, 0, 1, b"b"), t0 + Duration::from_secs(3)),
            ChunkOutcome::Complete(_)
        ));
        assert_eq!(asm.stats().completed, 2);
        assert_eq!(asm.stats().duplicates, 0);
    }

    #[test]
    fn wrong_size_frame_discarded() {
        let mut asm = FrameAssembler::new(AssemblerConfig {
            expected_len: Some(4),
            ..config()
        });
        assert_eq!(asm.push(wc(1, 0, 1, b"abc")), ChunkOutcome::Discarded);
        assert_eq!(asm.stats().completed, 0);
    }
}
