//! Rebuilding logical messages from frames.
//!
//! A [`Reassembler`] belongs to exactly one port reader. Frames may arrive
//! in any order and may repeat; a message completes once every sequence
//! number `0..total_chunks` has been seen, and its payload is the frames
//! concatenated in sequence order.
//!
//! Partial state is bounded three ways: entry count
//! ([`ReassemblyLimits::max_in_flight`]), buffered bytes
//! ([`ReassemblyLimits::max_buffered_bytes`]) and age
//! ([`ReassemblyLimits::timeout`], enforced by [`Reassembler::purge_expired`]).
//!
//! Finished message ids are remembered for one `timeout` so a late
//! duplicate frame is dropped instead of completing the message again.

use crate::chunk::Frame;
use crate::config::TransportConfig;
use crate::envelope::EnvelopeKind;
use crate::error::{AbortReason, TransportError};
use bytes::{Bytes, BytesMut};
use relay_types::MessageId;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard ceiling on remembered finished ids. Only reached when more than
/// this many messages finish within one reassembly timeout.
const RECENT_CEILING: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyLimits {
    pub timeout: Duration,
    pub max_in_flight: usize,
    pub max_buffered_bytes: usize,
}

impl From<&TransportConfig> for ReassemblyLimits {
    fn from(config: &TransportConfig) -> Self {
        Self {
            timeout: config.reassembly_timeout(),
            max_in_flight: config.max_in_flight,
            max_buffered_bytes: config.max_buffered_bytes,
        }
    }
}

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<K = EnvelopeKind> {
    pub message_id: MessageId,
    pub kind: K,
    pub payload: Bytes,
}

/// A partial message that was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aborted<K = EnvelopeKind> {
    pub message_id: MessageId,
    pub kind: K,
    pub received: usize,
    pub total_chunks: u32,
    pub reason: AbortReason,
}

impl<K> Aborted<K> {
    #[must_use]
    pub fn to_error(&self) -> TransportError {
        TransportError::ReassemblyAborted {
            message_id: self.message_id,
            reason: self.reason,
        }
    }
}

#[derive(Debug)]
struct ReassemblyEntry<K> {
    kind: K,
    total_chunks: u32,
    received: BTreeMap<u32, Bytes>,
    bytes: usize,
    created_at: Instant,
}

impl<K: Copy> ReassemblyEntry<K> {
    fn aborted(&self, message_id: MessageId, reason: AbortReason) -> Aborted<K> {
        Aborted {
            message_id,
            kind: self.kind,
            received: self.received.len(),
            total_chunks: self.total_chunks,
            reason,
        }
    }
}

/// Per-port reassembly state.
///
/// `K` tags each message with what it carries (the envelope kind on a
/// port); every frame of a message must agree on it.
#[derive(Debug)]
pub struct Reassembler<K = EnvelopeKind> {
    limits: ReassemblyLimits,
    entries: HashMap<MessageId, ReassemblyEntry<K>>,
    buffered: usize,
    /// Finished ids in the order they finished, with when.
    recent: VecDeque<(MessageId, Instant)>,
    recent_set: HashSet<MessageId>,
    /// Latest time seen through `accept` or `purge_expired`.
    clock: Instant,
}

impl<K: Copy + Eq + fmt::Debug> Reassembler<K> {
    #[must_use]
    pub fn new(limits: ReassemblyLimits) -> Self {
        Self {
            limits,
            entries: HashMap::new(),
            buffered: 0,
            recent: VecDeque::new(),
            recent_set: HashSet::new(),
            clock: Instant::now(),
        }
    }

    /// Partial messages currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Payload bytes held across all partial messages.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    /// Feeds one frame; returns the message once its last missing frame
    /// arrives.
    ///
    /// A repeated `(message_id, sequence)` replaces the earlier payload.
    /// Frames for a message that completed or was aborted less than
    /// `timeout` ago are ignored. Past that, a duplicate of a single-frame
    /// message completes again and a duplicate of a larger message opens a
    /// new entry that eventually expires.
    ///
    /// # Errors
    ///
    /// - [`TransportError::MalformedFrame`]: zero `total_chunks`, sequence
    ///   out of range, or `total_chunks`/kind disagreeing with earlier
    ///   frames. The frame is dropped; existing state is untouched.
    /// - [`TransportError::TooManyInFlight`]: a new message would exceed
    ///   the entry limit. The frame is dropped.
    /// - [`TransportError::ReassemblyAborted`]: buffering the frame would
    ///   exceed the byte budget. The whole message is discarded.
    pub fn accept(
        &mut self,
        kind: K,
        frame: Frame,
        now: Instant,
    ) -> Result<Option<Completed<K>>, TransportError> {
        let Frame {
            message_id,
            sequence,
            total_chunks,
            payload,
        } = frame;

        if total_chunks == 0 {
            return Err(TransportError::malformed(message_id, "total_chunks is zero"));
        }
        if sequence >= total_chunks {
            return Err(TransportError::malformed(
                message_id,
                format!("sequence {sequence} out of range for {total_chunks} chunks"),
            ));
        }
        self.clock = self.clock.max(now);
        self.forget_expired(now);
        if self.recent_set.contains(&message_id) {
            debug!(%message_id, sequence, "Dropping frame for finished message");
            return Ok(None);
        }

        match self.entries.get(&message_id) {
            Some(entry) if entry.total_chunks != total_chunks => {
                return Err(TransportError::malformed(
                    message_id,
                    format!(
                        "total_chunks {total_chunks} disagrees with earlier {}",
                        entry.total_chunks
                    ),
                ));
            }
            Some(entry) if entry.kind != kind => {
                return Err(TransportError::malformed(
                    message_id,
                    format!("kind {kind:?} disagrees with earlier {:?}", entry.kind),
                ));
            }
            Some(_) => {}
            None if total_chunks == 1 => {
                self.remember(message_id, now);
                return Ok(Some(Completed {
                    message_id,
                    kind,
                    payload,
                }));
            }
            None if self.entries.len() >= self.limits.max_in_flight => {
                warn!(
                    %message_id,
                    limit = self.limits.max_in_flight,
                    "Rejecting frame: too many partial messages"
                );
                return Err(TransportError::TooManyInFlight {
                    limit: self.limits.max_in_flight,
                });
            }
            None => {
                self.entries.insert(
                    message_id,
                    ReassemblyEntry {
                        kind,
                        total_chunks,
                        received: BTreeMap::new(),
                        bytes: 0,
                        created_at: now,
                    },
                );
            }
        }

        let Some(entry) = self.entries.get_mut(&message_id) else {
            return Ok(None);
        };
        let previous = entry.received.get(&sequence).map(Bytes::len);
        let replaced = previous.unwrap_or(0);
        let projected = self.buffered - replaced + payload.len();
        if projected > self.limits.max_buffered_bytes {
            self.abort(message_id, AbortReason::BufferLimit, now);
            return Err(TransportError::ReassemblyAborted {
                message_id,
                reason: AbortReason::BufferLimit,
            });
        }

        self.buffered = projected;
        entry.bytes = entry.bytes - replaced + payload.len();
        if previous.is_some() {
            debug!(%message_id, sequence, "Duplicate frame replaces earlier payload");
        }
        entry.received.insert(sequence, payload);

        if entry.received.len() < total_chunks as usize {
            return Ok(None);
        }

        let Some(entry) = self.entries.remove(&message_id) else {
            return Ok(None);
        };
        self.buffered -= entry.bytes;
        self.remember(message_id, now);

        let mut joined = BytesMut::with_capacity(entry.bytes);
        for chunk in entry.received.values() {
            joined.extend_from_slice(chunk);
        }
        debug!(%message_id, frames = total_chunks, bytes = entry.bytes, "Reassembled message");
        Ok(Some(Completed {
            message_id,
            kind: entry.kind,
            payload: joined.freeze(),
        }))
    }

    /// Discards partial messages whose first frame arrived at least
    /// `timeout` before `now`.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<Aborted<K>> {
        self.clock = self.clock.max(now);
        self.forget_expired(now);
        let timeout = self.limits.timeout;
        let expired: Vec<MessageId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.created_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.abort(id, AbortReason::Timeout, now))
            .collect()
    }

    /// Discards every partial message, e.g. when the port goes away.
    pub fn abort_all(&mut self, reason: AbortReason) -> Vec<Aborted<K>> {
        let ids: Vec<MessageId> = self.entries.keys().copied().collect();
        let now = self.clock;
        ids.into_iter()
            .filter_map(|id| self.abort(id, reason, now))
            .collect()
    }

    fn abort(
        &mut self,
        message_id: MessageId,
        reason: AbortReason,
        now: Instant,
    ) -> Option<Aborted<K>> {
        let entry = self.entries.remove(&message_id)?;
        self.buffered -= entry.bytes;
        self.remember(message_id, now);
        let aborted = entry.aborted(message_id, reason);
        warn!(
            %message_id,
            received = aborted.received,
            total = aborted.total_chunks,
            %reason,
            "Reassembly aborted"
        );
        Some(aborted)
    }

    fn remember(&mut self, message_id: MessageId, now: Instant) {
        if self.recent.len() == RECENT_CEILING {
            if let Some((oldest, _)) = self.recent.pop_front() {
                self.recent_set.remove(&oldest);
            }
        }
        if self.recent_set.insert(message_id) {
            self.recent.push_back((message_id, now));
        }
    }

    fn forget_expired(&mut self, now: Instant) {
        let timeout = self.limits.timeout;
        while let Some(&(id, finished_at)) = self.recent.front() {
            if now.saturating_duration_since(finished_at) < timeout {
                break;
            }
            self.recent.pop_front();
            self.recent_set.remove(&id);
        }
    }
}

impl Reassembler<()> {
    /// Untagged form of [`Reassembler::accept`]: the payload once complete,
    /// `None` while frames are still missing.
    ///
    /// # Errors
    ///
    /// As for [`Reassembler::accept`].
    pub fn decode(&mut self, frame: Frame, now: Instant) -> Result<Option<Bytes>, TransportError> {
        Ok(self.accept((), frame, now)?.map(|done| done.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkCodec;

    fn limits() -> ReassemblyLimits {
        ReassemblyLimits {
            timeout: Duration::from_secs(30),
            max_in_flight: 4,
            max_buffered_bytes: 1 << 20,
        }
    }

    fn frames(payload: &'static [u8], size: usize) -> (MessageId, Vec<Frame>) {
        let id = MessageId::new();
        let frames = ChunkCodec::new(size)
            .unwrap()
            .encode(id, Bytes::from_static(payload))
            .unwrap();
        (id, frames)
    }

    fn feed(r: &mut Reassembler, frames: Vec<Frame>) -> Vec<Completed> {
        let now = Instant::now();
        frames
            .into_iter()
            .filter_map(|f| r.accept(EnvelopeKind::Event, f, now).unwrap())
            .collect()
    }

    #[test]
    fn in_order_frames_complete_once() {
        let mut r = Reassembler::new(limits());
        let (id, frames) = frames(b"abcdefghij", 3);

        let done = feed(&mut r, frames);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].message_id, id);
        assert_eq!(done[0].payload, Bytes::from_static(b"abcdefghij"));
        assert_eq!(r.in_flight(), 0);
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn untagged_decode_reports_pending_until_complete() {
        let mut r: Reassembler<()> = Reassembler::new(limits());
        let (_, frames) = frames(b"abcdefghij", 4);
        let now = Instant::now();
        let last = frames.len() - 1;

        for (i, frame) in frames.into_iter().enumerate() {
            let out = r.decode(frame, now).unwrap();
            if i < last {
                assert!(out.is_none());
            } else {
                assert_eq!(out, Some(Bytes::from_static(b"abcdefghij")));
            }
        }
    }

    #[test]
    fn reverse_order_frames_complete() {
        let mut r = Reassembler::new(limits());
        let (_, mut frames) = frames(b"abcdefghij", 3);
        frames.reverse();

        let done = feed(&mut r, frames);

        assert_eq!(done[0].payload, Bytes::from_static(b"abcdefghij"));
    }

    #[test]
    fn interleaved_messages_stay_separate() {
        let mut r = Reassembler::new(limits());
        let (a, fa) = frames(b"aaaaaa", 2);
        let (b, fb) = frames(b"bbbbbb", 2);
        let interleaved: Vec<Frame> = fa
            .into_iter()
            .zip(fb)
            .flat_map(|(x, y)| [x, y])
            .collect();

        let done = feed(&mut r, interleaved);

        assert_eq!(done.len(), 2);
        let a_done = done.iter().find(|c| c.message_id == a).unwrap();
        let b_done = done.iter().find(|c| c.message_id == b).unwrap();
        assert_eq!(a_done.payload, Bytes::from_static(b"aaaaaa"));
        assert_eq!(b_done.payload, Bytes::from_static(b"bbbbbb"));
    }

    #[test]
    fn duplicate_frame_last_write_wins() {
        let mut r = Reassembler::new(limits());
        let id = MessageId::new();
        let now = Instant::now();
        let frame = |seq: u32, data: &'static [u8]| Frame {
            message_id: id,
            sequence: seq,
            total_chunks: 2,
            payload: Bytes::from_static(data),
        };

        assert!(r.accept(EnvelopeKind::Event, frame(0, b"old"), now).unwrap().is_none());
        assert!(r.accept(EnvelopeKind::Event, frame(0, b"new"), now).unwrap().is_none());
        assert_eq!(r.buffered_bytes(), 3);
        let done = r.accept(EnvelopeKind::Event, frame(1, b"!"), now).unwrap().unwrap();

        assert_eq!(done.payload, Bytes::from_static(b"new!"));
    }

    #[test]
    fn late_duplicates_are_ignored_for_one_timeout_regardless_of_traffic() {
        let mut r = Reassembler::new(ReassemblyLimits {
            timeout: Duration::from_secs(10),
            ..limits()
        });
        let start = Instant::now();
        let single = |id: MessageId| Frame {
            message_id: id,
            sequence: 0,
            total_chunks: 1,
            payload: Bytes::from_static(b"x"),
        };
        let first = MessageId::new();

        assert!(r.accept(EnvelopeKind::Event, single(first), start).unwrap().is_some());
        for _ in 0..2_000 {
            let other = single(MessageId::new());
            assert!(r.accept(EnvelopeKind::Event, other, start).unwrap().is_some());
        }
        let soon = start + Duration::from_secs(9);
        assert!(r.accept(EnvelopeKind::Event, single(first), soon).unwrap().is_none());

        // Once the timeout has passed the id is forgotten.
        let later = start + Duration::from_secs(11);
        assert!(r.accept(EnvelopeKind::Event, single(first), later).unwrap().is_some());
    }

    #[test]
    fn late_duplicate_after_completion_is_ignored() {
        let mut r = Reassembler::new(limits());
        let (_, frames) = frames(b"abcdef", 3);
        let late = frames[1].clone();

        assert_eq!(feed(&mut r, frames).len(), 1);
        let again = r.accept(EnvelopeKind::Event, late, Instant::now()).unwrap();

        assert!(again.is_none());
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn malformed_frames_rejected_without_touching_state() {
        let mut r = Reassembler::new(limits());
        let id = MessageId::new();
        let now = Instant::now();
        let frame = |seq: u32, total: u32| Frame {
            message_id: id,
            sequence: seq,
            total_chunks: total,
            payload: Bytes::from_static(b"x"),
        };

        assert!(matches!(
            r.accept(EnvelopeKind::Event, frame(0, 0), now),
            Err(TransportError::MalformedFrame { .. })
        ));
        assert!(matches!(
            r.accept(EnvelopeKind::Event, frame(3, 3), now),
            Err(TransportError::MalformedFrame { .. })
        ));

        r.accept(EnvelopeKind::Event, frame(0, 3), now).unwrap();
        assert!(matches!(
            r.accept(EnvelopeKind::Event, frame(1, 4), now),
            Err(TransportError::MalformedFrame { .. })
        ));
        assert!(matches!(
            r.accept(EnvelopeKind::ActionCall, frame(1, 3), now),
            Err(TransportError::MalformedFrame { .. })
        ));
        assert_eq!(r.in_flight(), 1);
        assert_eq!(r.buffered_bytes(), 1);
    }

    #[test]
    fn in_flight_limit_rejects_new_messages() {
        let mut r = Reassembler::new(ReassemblyLimits {
            max_in_flight: 1,
            ..limits()
        });
        let now = Instant::now();
        let (_, first) = frames(b"aaaa", 2);
        let (_, second) = frames(b"bbbb", 2);

        r.accept(EnvelopeKind::Event, first[0].clone(), now).unwrap();
        let err = r
            .accept(EnvelopeKind::Event, second[0].clone(), now)
            .unwrap_err();

        assert!(matches!(err, TransportError::TooManyInFlight { limit: 1 }));
        // Frames of the admitted message still flow.
        let done = r.accept(EnvelopeKind::Event, first[1].clone(), now).unwrap();
        assert!(done.is_some());
    }

    #[test]
    fn single_frame_messages_bypass_in_flight_limit() {
        let mut r = Reassembler::new(ReassemblyLimits {
            max_in_flight: 1,
            ..limits()
        });
        let now = Instant::now();
        let (_, partial) = frames(b"aaaa", 2);
        let (_, whole) = frames(b"bb", 2);

        r.accept(EnvelopeKind::Event, partial[0].clone(), now).unwrap();
        let done = r.accept(EnvelopeKind::Event, whole[0].clone(), now).unwrap();

        assert!(done.is_some());
    }

    #[test]
    fn buffer_limit_aborts_the_message() {
        let mut r = Reassembler::new(ReassemblyLimits {
            max_buffered_bytes: 5,
            ..limits()
        });
        let now = Instant::now();
        let (id, frames) = frames(b"abcdefghi", 3);

        r.accept(EnvelopeKind::Event, frames[0].clone(), now).unwrap();
        let err = r
            .accept(EnvelopeKind::Event, frames[1].clone(), now)
            .unwrap_err();

        match err {
            TransportError::ReassemblyAborted { message_id, reason } => {
                assert_eq!(message_id, id);
                assert_eq!(reason, AbortReason::BufferLimit);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.in_flight(), 0);
        assert_eq!(r.buffered_bytes(), 0);
        // Stragglers of the aborted message are dropped quietly.
        assert!(r.accept(EnvelopeKind::Event, frames[2].clone(), now).unwrap().is_none());
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn purge_discards_only_expired_entries() {
        let mut r = Reassembler::new(ReassemblyLimits {
            timeout: Duration::from_secs(10),
            ..limits()
        });
        let start = Instant::now();
        let (old, old_frames) = frames(b"aaaa", 2);
        let (_, new_frames) = frames(b"bbbb", 2);

        r.accept(EnvelopeKind::Event, old_frames[0].clone(), start).unwrap();
        r.accept(
            EnvelopeKind::Event,
            new_frames[0].clone(),
            start + Duration::from_secs(8),
        )
        .unwrap();

        let aborted = r.purge_expired(start + Duration::from_secs(11));

        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].message_id, old);
        assert_eq!(aborted[0].reason, AbortReason::Timeout);
        assert_eq!(aborted[0].received, 1);
        assert_eq!(aborted[0].total_chunks, 2);
        assert_eq!(r.in_flight(), 1);
        assert_eq!(r.buffered_bytes(), 2);
    }

    #[test]
    fn abort_all_clears_everything() {
        let mut r = Reassembler::new(limits());
        let now = Instant::now();
        let (a, fa) = frames(b"aaaa", 2);
        let (b, fb) = frames(b"bbbb", 2);
        r.accept(EnvelopeKind::Event, fa[0].clone(), now).unwrap();
        r.accept(EnvelopeKind::ActionResult, fb[1].clone(), now).unwrap();

        let mut aborted = r.abort_all(AbortReason::Disconnected);
        aborted.sort_by_key(|x| x.message_id);

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(
            aborted.iter().map(|x| x.message_id).collect::<Vec<_>>(),
            expected
        );
        assert!(aborted.iter().all(|x| x.reason == AbortReason::Disconnected));
        assert_eq!(r.in_flight(), 0);
        assert_eq!(r.buffered_bytes(), 0);
    }
}
