//! Bounded FIFO playback queue.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;

use crate::error::{Error, Result};

use super::Track;

/// Pending tracks in play order, plus the track currently streaming.
///
/// The current track is not a member of the pending sequence and cannot be
/// addressed by index.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    /// Pending tracks, head plays next.
    items: VecDeque<Track>,
    /// Track being loaded or streamed.
    current: Option<Track>,
    /// Maximum number of pending tracks.
    max_size: usize,
}

impl PlaybackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(256)),
            current: None,
            max_size,
        }
    }

    /// Get the current track.
    pub const fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Get the number of pending tracks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a track and return its 1-based distance from now-playing.
    pub fn enqueue(&mut self, track: Track) -> Result<usize> {
        if self.items.len() >= self.max_size {
            return Err(Error::QueueFull { max: self.max_size });
        }

        let was_idle = self.items.is_empty() && self.current.is_none();
        self.items.push_back(track);

        if was_idle {
            Ok(1)
        } else {
            Ok(self.items.len() + usize::from(self.current.is_some()))
        }
    }

    /// Remove the pending track at a 0-based index.
    pub fn remove_at(&mut self, index: usize) -> Result<Track> {
        let len = self.items.len();
        self.items
            .remove(index)
            .ok_or(Error::InvalidIndex { index, len })
    }

    /// Pop the head of the pending sequence.
    pub fn dequeue_next(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Make the head the current track; `None` leaves nothing current.
    pub fn advance(&mut self) -> Option<Track> {
        self.current = self.dequeue_next();
        self.current.clone()
    }

    /// Forget the current track without touching the pending sequence.
    pub fn clear_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    /// Drop every pending track and return how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Owned copy of the pending tracks, in play order.
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackInfo;
    use proptest::prelude::*;

    fn make_track(id: &str) -> Track {
        Track::from_info(TrackInfo::new(id, format!("Track {id}")), "tester")
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(Track::source_id).collect()
    }

    #[test]
    fn test_enqueue_positions() {
        let mut queue = PlaybackQueue::new(10);
        assert_eq!(queue.enqueue(make_track("1")).unwrap(), 1);
        // Nothing playing yet, two pending.
        assert_eq!(queue.enqueue(make_track("2")).unwrap(), 2);

        queue.advance();
        // "1" is playing, "2" pending, "3" is two away from now-playing.
        assert_eq!(queue.enqueue(make_track("3")).unwrap(), 3);
    }

    #[test]
    fn test_enqueue_while_playing_with_empty_queue() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(make_track("1")).unwrap();
        queue.advance();
        assert_eq!(queue.enqueue(make_track("2")).unwrap(), 2);
    }

    #[test]
    fn test_queue_full() {
        let mut queue = PlaybackQueue::new(2);
        queue.enqueue(make_track("1")).unwrap();
        queue.enqueue(make_track("2")).unwrap();

        let err = queue.enqueue(make_track("3")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { max: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_current_does_not_count_against_capacity() {
        let mut queue = PlaybackQueue::new(1);
        queue.enqueue(make_track("1")).unwrap();
        queue.advance();
        assert!(queue.enqueue(make_track("2")).is_ok());
        assert!(queue.enqueue(make_track("3")).is_err());
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PlaybackQueue::new(10);
        for id in ["A", "B", "C"] {
            queue.enqueue(make_track(id)).unwrap();
        }
        assert_eq!(queue.dequeue_next().unwrap().source_id(), "A");
        assert_eq!(queue.dequeue_next().unwrap().source_id(), "B");
        assert_eq!(queue.dequeue_next().unwrap().source_id(), "C");
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_remove_at_bounds() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(make_track("1")).unwrap();
        queue.enqueue(make_track("2")).unwrap();

        let err = queue.remove_at(2).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex { index: 2, len: 2 }));
        assert_eq!(ids(&queue.snapshot()), vec!["1", "2"]);

        assert_eq!(queue.remove_at(0).unwrap().source_id(), "1");
        assert_eq!(ids(&queue.snapshot()), vec!["2"]);
    }

    #[test]
    fn test_current_is_not_addressable() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(make_track("1")).unwrap();
        queue.advance();
        assert!(queue.remove_at(0).is_err());
        assert_eq!(queue.current().unwrap().source_id(), "1");
    }

    #[test]
    fn test_clear_keeps_current() {
        let mut queue = PlaybackQueue::new(10);
        for id in ["1", "2", "3"] {
            queue.enqueue(make_track(id)).unwrap();
        }
        queue.advance();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.current().unwrap().source_id(), "1");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut queue = PlaybackQueue::new(10);
        queue.enqueue(make_track("1")).unwrap();
        let snapshot = queue.snapshot();
        queue.clear();
        assert_eq!(snapshot.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(
            max in 1usize..8,
            ops in proptest::collection::vec(0u8..3, 0..64),
        ) {
            let mut queue = PlaybackQueue::new(max);
            for (n, op) in ops.into_iter().enumerate() {
                let before = queue.len();
                match op {
                    0 | 1 => {
                        let result = queue.enqueue(make_track(&n.to_string()));
                        if before == max {
                            prop_assert!(result.is_err());
                            prop_assert_eq!(queue.len(), before);
                        } else {
                            prop_assert!(result.is_ok());
                        }
                    }
                    _ => {
                        queue.advance();
                    }
                }
                prop_assert!(queue.len() <= max);
            }
        }

        #[test]
        fn prop_dequeue_preserves_insertion_order(count in 0usize..20) {
            let mut queue = PlaybackQueue::new(32);
            for n in 0..count {
                queue.enqueue(make_track(&n.to_string())).unwrap();
            }
            let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue_next())
                .map(|t| t.source_id().to_string())
                .collect();
            let expected: Vec<String> = (0..count).map(|n| n.to_string()).collect();
            prop_assert_eq!(drained, expected);
        }
    }
}
