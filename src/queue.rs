//! Ordered track queue with loop modes and balanced shuffling.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use rand::seq::SliceRandom;

use crate::types::Track;
use crate::{Error, Result};

/// Loop behavior applied when the queue advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Advance normally and drop finished tracks.
    #[default]
    None,
    /// Repeat the current track.
    Track,
    /// Re-append finished tracks to the tail.
    Queue,
}

impl std::str::FromStr for LoopMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            other => Err(Error::InvalidFilter(format!("unknown loop mode {other:?}"))),
        }
    }
}

/// Snapshot of queue shape and contents, for status displays.
#[derive(Debug, Clone)]
pub struct QueueSummary {
    pub size: usize,
    /// Total length of queued tracks, milliseconds.
    pub duration: u64,
    /// `duration` plus the current track when it is not a stream.
    pub total_duration: u64,
    pub is_empty: bool,
    pub current: Option<Track>,
    pub previous: Option<Track>,
    pub loop_mode: LoopMode,
    pub unique_authors: usize,
    pub unique_sources: usize,
}

/// Ordered track list driving one player.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: VecDeque<Track>,
    current: Option<Track>,
    previous: Option<Track>,
    loop_mode: LoopMode,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// The track the player is on, if any.
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// The track played before the current one.
    pub fn previous(&self) -> Option<&Track> {
        self.previous.as_ref()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Flip between `None` and `Queue` looping.
    pub fn toggle_loop(&mut self) -> LoopMode {
        self.loop_mode = match self.loop_mode {
            LoopMode::None => LoopMode::Queue,
            _ => LoopMode::None,
        };
        self.loop_mode
    }

    pub fn add(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn add_many(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    /// Insert at `index`, shifting successors right. `index == len` appends.
    pub fn insert(&mut self, index: usize, track: Track) -> Result<()> {
        if index > self.tracks.len() {
            return Err(Error::InvalidPosition(index as i64));
        }
        self.tracks.insert(index, track);
        Ok(())
    }

    /// Remove and return the track at `index`, shifting successors left.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    pub fn at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn peek(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Advance the queue and return the new current track.
    ///
    /// Under `Track` loop the current track is returned unchanged. Under
    /// `Queue` loop the displaced current track is re-appended to the tail.
    pub fn poll(&mut self) -> Option<Track> {
        if self.loop_mode == LoopMode::Track && self.current.is_some() {
            return self.current.clone();
        }
        self.previous = self.current.take();
        self.current = self.tracks.pop_front();
        if self.loop_mode == LoopMode::Queue {
            if let (Some(previous), Some(_)) = (&self.previous, &self.current) {
                self.tracks.push_back(previous.clone());
            }
        }
        self.current.clone()
    }

    /// Drop the first `index` tracks, then poll once.
    pub fn skip_to(&mut self, index: usize) -> Option<Track> {
        let index = index.min(self.tracks.len());
        self.tracks.drain(..index);
        self.poll()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Move a track from one position to another.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.tracks.len() {
            return Err(Error::InvalidPosition(from as i64));
        }
        if to >= self.tracks.len() {
            return Err(Error::InvalidPosition(to as i64));
        }
        if let Some(track) = self.tracks.remove(from) {
            self.tracks.insert(to, track);
        }
        Ok(())
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= self.tracks.len() {
            return Err(Error::InvalidPosition(a as i64));
        }
        if b >= self.tracks.len() {
            return Err(Error::InvalidPosition(b as i64));
        }
        self.tracks.swap(a, b);
        Ok(())
    }

    pub fn find(&self, mut pred: impl FnMut(&Track) -> bool) -> Option<&Track> {
        self.tracks.iter().find(|track| pred(track))
    }

    pub fn find_index(&self, mut pred: impl FnMut(&Track) -> bool) -> Option<usize> {
        self.tracks.iter().position(|track| pred(track))
    }

    pub fn filter(&self, mut pred: impl FnMut(&Track) -> bool) -> Vec<&Track> {
        self.tracks.iter().filter(|track| pred(track)).collect()
    }

    /// Keep the first occurrence of each identifier, drop the rest.
    pub fn remove_duplicates(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.tracks.len();
        self.tracks
            .retain(|track| seen.insert(track.info.identifier.clone()));
        before - self.tracks.len()
    }

    /// Tracks whose author contains `author`, case-insensitively.
    pub fn filter_by_author(&self, author: &str) -> Vec<&Track> {
        let needle = author.to_lowercase();
        self.filter(|track| track.info.author.to_lowercase().contains(&needle))
    }

    /// Tracks whose length falls in `[min_ms, max_ms]`.
    pub fn filter_by_duration(&self, min_ms: u64, max_ms: u64) -> Vec<&Track> {
        self.filter(|track| (min_ms..=max_ms).contains(&track.info.length))
    }

    /// Tracks from the given source, case-insensitively.
    pub fn filter_by_source(&self, source: &str) -> Vec<&Track> {
        self.filter(|track| track.info.source_name.eq_ignore_ascii_case(source))
    }

    /// Drop every track whose author contains `author`, case-insensitively.
    pub fn remove_by_author(&mut self, author: &str) -> usize {
        let needle = author.to_lowercase();
        let before = self.tracks.len();
        self.tracks
            .retain(|track| !track.info.author.to_lowercase().contains(&needle));
        before - self.tracks.len()
    }

    pub fn reverse(&mut self) {
        self.tracks.make_contiguous().reverse();
    }

    /// Copy of the tracks in `[start, end)`, clamped to the queue length.
    pub fn slice(&self, start: usize, end: Option<usize>) -> Vec<Track> {
        let end = end.unwrap_or(self.tracks.len()).min(self.tracks.len());
        if start >= end {
            return Vec::new();
        }
        self.tracks.iter().skip(start).take(end - start).cloned().collect()
    }

    /// Uniform shuffle of the queued tracks.
    pub fn shuffle(&mut self) {
        self.tracks.make_contiguous().shuffle(&mut rand::thread_rng());
    }

    /// Balanced shuffle that avoids back-to-back tracks by the same author.
    ///
    /// Tracks are bucketed by author (trimmed, case-folded), each bucket is
    /// shuffled, then tracks are drawn largest-bucket-first; when the largest
    /// bucket produced the previous track and another bucket exists, the
    /// next-largest is drawn instead.
    pub fn smart_shuffle(&mut self) {
        if self.tracks.len() < 2 {
            return;
        }

        let mut rng = rand::thread_rng();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<Vec<Track>> = Vec::new();
        for track in self.tracks.drain(..) {
            let key = track.info.author.trim().to_lowercase();
            let slot = *index.entry(key).or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            });
            buckets[slot].push(track);
        }
        for bucket in &mut buckets {
            bucket.shuffle(&mut rng);
        }

        let mut heap: BinaryHeap<(usize, usize)> = buckets
            .iter()
            .enumerate()
            .map(|(slot, bucket)| (bucket.len(), slot))
            .collect();
        let mut last_slot: Option<usize> = None;
        let mut shuffled = VecDeque::with_capacity(buckets.iter().map(Vec::len).sum());

        while let Some((len, slot)) = heap.pop() {
            let (len, slot) = if last_slot == Some(slot) {
                match heap.pop() {
                    Some(alternative) => {
                        heap.push((len, slot));
                        alternative
                    }
                    // Only one author left; adjacency is unavoidable.
                    None => (len, slot),
                }
            } else {
                (len, slot)
            };

            let track = buckets[slot].pop().expect("bucket tracked as non-empty");
            shuffled.push_back(track);
            if len > 1 {
                heap.push((len - 1, slot));
            }
            last_slot = Some(slot);
        }

        self.tracks = shuffled;
    }

    /// Total length of queued tracks, excluding the current one.
    pub fn duration(&self) -> u64 {
        self.tracks.iter().map(|track| track.info.length).sum()
    }

    /// [`duration`](Self::duration) plus the current track, unless it streams.
    pub fn total_duration(&self) -> u64 {
        let current = match &self.current {
            Some(track) if !track.info.is_stream => track.info.length,
            _ => 0,
        };
        self.duration() + current
    }

    pub fn summary(&self) -> QueueSummary {
        let authors: HashSet<String> = self
            .tracks
            .iter()
            .map(|track| track.info.author.trim().to_lowercase())
            .collect();
        let sources: HashSet<String> = self
            .tracks
            .iter()
            .map(|track| track.info.source_name.to_lowercase())
            .collect();
        QueueSummary {
            size: self.tracks.len(),
            duration: self.duration(),
            total_duration: self.total_duration(),
            is_empty: self.tracks.is_empty(),
            current: self.current.clone(),
            previous: self.previous.clone(),
            loop_mode: self.loop_mode,
            unique_authors: authors.len(),
            unique_sources: sources.len(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Drop the current and previous markers, e.g. after a stop.
    pub(crate) fn reset_position(&mut self) {
        self.current = None;
        self.previous = None;
    }

    pub(crate) fn set_current(&mut self, track: Option<Track>) {
        self.current = track;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::track;

    fn queue_of(specs: &[(&str, &str)]) -> Queue {
        let mut queue = Queue::new();
        queue.add_many(specs.iter().map(|(id, author)| track(id, author)));
        queue
    }

    #[test]
    fn poll_returns_insertion_order_then_none() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let polled: Vec<_> = std::iter::from_fn(|| queue.poll())
            .map(|t| t.info.identifier)
            .collect();
        assert_eq!(polled, ["a", "b", "c"]);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn track_loop_repeats_without_mutating() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y")]);
        queue.poll();
        queue.set_loop_mode(LoopMode::Track);
        for _ in 0..10 {
            assert_eq!(queue.poll().unwrap().info.identifier, "a");
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_loop_cycles_the_multiset() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y")]);
        queue.set_loop_mode(LoopMode::Queue);

        assert_eq!(queue.poll().unwrap().info.identifier, "a");
        assert_eq!(queue.poll().unwrap().info.identifier, "b");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll().unwrap().info.identifier, "a");
        assert_eq!(queue.poll().unwrap().info.identifier, "b");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_shifts_successors_left() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.info.identifier, "b");
        assert_eq!(queue.at(1).unwrap().info.identifier, "c");
    }

    #[test]
    fn insert_bounds() {
        let mut queue = queue_of(&[("a", "x")]);
        assert!(queue.insert(1, track("b", "y")).is_ok());
        assert!(queue.insert(5, track("c", "z")).is_err());
    }

    #[test]
    fn skip_to_drops_prefix_and_polls() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let landed = queue.skip_to(2).unwrap();
        assert_eq!(landed.info.identifier, "c");
        assert_eq!(queue.current().unwrap().info.identifier, "c");
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_duplicates_keeps_first() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y"), ("a", "other"), ("b", "y")]);
        assert_eq!(queue.remove_duplicates(), 2);
        let ids: Vec<_> = queue.iter().map(|t| t.info.identifier.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn remove_by_author_matches_substring_case_insensitively() {
        let mut queue = queue_of(&[("a", "Daft Punk"), ("b", "other"), ("c", "daft punk ft. x")]);
        assert_eq!(queue.remove_by_author("DAFT"), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn move_and_swap() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y"), ("c", "z")]);
        queue.move_track(0, 2).unwrap();
        let ids: Vec<_> = queue.iter().map(|t| t.info.identifier.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        queue.swap(0, 1).unwrap();
        let ids: Vec<_> = queue.iter().map(|t| t.info.identifier.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        assert!(queue.swap(0, 9).is_err());
    }

    #[test]
    fn slice_clamps() {
        let queue = queue_of(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let tail = queue.slice(1, None);
        assert_eq!(tail.len(), 2);
        assert!(queue.slice(2, Some(100)).len() == 1);
        assert!(queue.slice(3, Some(2)).is_empty());
    }

    #[test]
    fn durations_skip_streaming_current() {
        let mut queue = queue_of(&[("a", "x"), ("b", "y")]);
        queue.poll();
        assert_eq!(queue.duration(), 180_000);
        assert_eq!(queue.total_duration(), 360_000);

        let mut stream = track("live", "x");
        stream.info.is_stream = true;
        queue.set_current(Some(stream));
        assert_eq!(queue.total_duration(), queue.duration());
    }

    #[test]
    fn toggle_loop_flips_none_and_queue() {
        let mut queue = Queue::new();
        assert_eq!(queue.toggle_loop(), LoopMode::Queue);
        assert_eq!(queue.toggle_loop(), LoopMode::None);
        queue.set_loop_mode(LoopMode::Track);
        assert_eq!(queue.toggle_loop(), LoopMode::None);
    }

    #[test]
    fn summary_counts_unique_authors_and_sources() {
        let queue = queue_of(&[("a", "X "), ("b", " x"), ("c", "y")]);
        let summary = queue.summary();
        assert_eq!(summary.size, 3);
        assert_eq!(summary.unique_authors, 2);
        assert_eq!(summary.unique_sources, 1);
        assert!(summary.current.is_none());
    }

    fn assert_no_adjacent_authors(tracks: &[Track]) {
        for pair in tracks.windows(2) {
            let a = pair[0].info.author.trim().to_lowercase();
            let b = pair[1].info.author.trim().to_lowercase();
            assert_ne!(a, b, "adjacent tracks share author {a:?}");
        }
    }

    #[test]
    fn smart_shuffle_is_a_permutation_without_adjacency() {
        let input = [
            ("a1", "A"), ("a2", "A"), ("a3", "A"),
            ("b1", "B"), ("c1", "C"),
        ];
        for _ in 0..50 {
            let mut queue = queue_of(&input);
            queue.smart_shuffle();

            let mut ids: Vec<_> = queue.iter().map(|t| t.info.identifier.clone()).collect();
            assert_eq!(ids.len(), input.len());
            ids.sort();
            assert_eq!(ids, ["a1", "a2", "a3", "b1", "c1"]);

            let tracks: Vec<_> = queue.iter().cloned().collect();
            assert_no_adjacent_authors(&tracks);
        }
    }

    #[test]
    fn smart_shuffle_handles_case_folded_authors() {
        let mut queue = queue_of(&[("a1", "Artist"), ("a2", " artist "), ("b1", "Other")]);
        for _ in 0..50 {
            queue.smart_shuffle();
            let tracks: Vec<_> = queue.iter().cloned().collect();
            assert_no_adjacent_authors(&tracks);
        }
    }

    #[test]
    fn smart_shuffle_single_track_is_noop() {
        let mut queue = queue_of(&[("only", "A")]);
        queue.smart_shuffle();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().info.identifier, "only");
    }
}
