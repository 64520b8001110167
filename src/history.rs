//! Body-results history: recent detections plus the frames they came from.
//!
//! Written only by the body stage, read concurrently by the three dependent
//! stages and by the tracking-target service. Bounded FIFO, oldest evicted
//! first. A freshness mark plus condvar lets the Phase-2 manager block until
//! a new append.

use parking_lot::{Condvar, Mutex};

use crate::types::{BodyDetection, Frame, Rect};

/// One appended detection result with its source frame.
#[derive(Debug, Clone)]
pub struct BodyHistoryEntry {
    pub detections: Vec<BodyDetection>,
    pub frame: Frame,
}

struct Inner {
    entries: Vec<BodyHistoryEntry>,
    fresh: bool,
}

pub struct BodyHistory {
    capacity: usize,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl BodyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { entries: Vec::new(), fresh: false }),
            cond: Condvar::new(),
        }
    }

    /// Append a detection result, evicting the oldest entry at capacity,
    /// and wake the Phase-2 manager.
    pub fn push(&self, entry: BodyHistoryEntry) {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.capacity {
            inner.entries.remove(0);
        }
        inner.entries.push(entry);
        inner.fresh = true;
        self.cond.notify_one();
    }

    /// Block until a fresh append, then consume the freshness mark.
    pub fn wait_fresh(&self) {
        let mut inner = self.inner.lock();
        while !inner.fresh {
            self.cond.wait(&mut inner);
        }
        inner.fresh = false;
    }

    /// Copy of the newest entry, if any.
    pub fn latest(&self) -> Option<BodyHistoryEntry> {
        self.inner.lock().entries.last().cloned()
    }

    /// Find the best-IoU body over the history, most-recent-first. Returns
    /// the matched box and its source frame when the best IoU in some entry
    /// reaches `min_iou`.
    pub fn find_match(&self, region: &Rect, min_iou: f64) -> Option<(Rect, Frame)> {
        let inner = self.inner.lock();
        for entry in inner.entries.iter().rev() {
            let mut best: Option<(f64, Rect)> = None;
            for body in &entry.detections {
                let iou = body.rect.iou(region);
                if iou >= min_iou && best.map_or(true, |(b, _)| iou > b) {
                    best = Some((iou, body.rect));
                }
            }
            if let Some((_, rect)) = best {
                return Some((rect, entry.frame.clone()));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release a blocked `wait_fresh` without an append. Deactivation only.
    pub fn force_wake(&self) {
        let mut inner = self.inner.lock();
        if !inner.fresh {
            inner.fresh = true;
            self.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Image;

    fn frame(stamp: u64) -> Frame {
        Frame { image: Image::new(2, 2, vec![0; 12]), stamp_ns: stamp }
    }

    fn entry(stamp: u64, rects: &[Rect]) -> BodyHistoryEntry {
        BodyHistoryEntry {
            detections: rects
                .iter()
                .map(|r| BodyDetection { rect: *r, score: 0.9, reid: None })
                .collect(),
            frame: frame(stamp),
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let history = BodyHistory::new(3);
        for stamp in 0..5u64 {
            history.push(entry(stamp, &[Rect::new(0, 0, 10, 10)]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().frame.stamp_ns, 4);
    }

    #[test]
    fn test_find_match_most_recent_first() {
        let history = BodyHistory::new(6);
        let old_box = Rect::new(0, 0, 100, 100);
        let new_box = Rect::new(10, 10, 100, 100);
        history.push(entry(1, &[old_box]));
        history.push(entry(2, &[new_box]));

        let region = Rect::new(5, 5, 100, 100);
        let (matched, source) = history.find_match(&region, 0.5).unwrap();
        // Both entries overlap the region; the newest entry wins.
        assert_eq!(matched, new_box);
        assert_eq!(source.stamp_ns, 2);
    }

    #[test]
    fn test_find_match_below_threshold() {
        let history = BodyHistory::new(6);
        history.push(entry(1, &[Rect::new(0, 0, 10, 10)]));
        let region = Rect::new(500, 500, 10, 10);
        assert!(history.find_match(&region, 0.5).is_none());
    }

    #[test]
    fn test_fresh_mark_consumed_once() {
        let history = BodyHistory::new(2);
        history.push(entry(1, &[]));
        history.wait_fresh();
        history.force_wake();
        history.wait_fresh();
    }
}
