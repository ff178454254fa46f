use std::collections::{vec_deque, VecDeque};

use smartguard_types::frame::AnnotatedFrame;

/// Fixed-capacity history of annotated frames in capture order. Appending
/// to a full buffer evicts the oldest frame.
#[derive(Debug)]
pub struct RingBuffer {
    frames: VecDeque<AnnotatedFrame>,
    capacity: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// `history_secs` worth of frames at `fps`, never less than `floor`.
    pub fn capacity_for(fps: u32, history_secs: u64, floor: usize) -> usize {
        let by_rate = (fps as u64).saturating_mul(history_secs) as usize;
        by_rate.max(floor)
    }

    pub fn append(&mut self, frame: AnnotatedFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// View over `[from, to)`, clamped to the buffered range.
    pub fn window(&self, from: usize, to: usize) -> Window<'_> {
        let end = to.min(self.frames.len());
        let start = from.min(end);
        Window {
            frames: &self.frames,
            start,
            end,
        }
    }

    /// View over the newest `count` frames.
    pub fn latest(&self, count: usize) -> Window<'_> {
        let len = self.frames.len();
        self.window(len.saturating_sub(count), len)
    }
}

/// Borrowed view over a contiguous range of a [`RingBuffer`]. Iterating it
/// does not copy frames and can be repeated.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    frames: &'a VecDeque<AnnotatedFrame>,
    start: usize,
    end: usize,
}

impl<'a> Window<'a> {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn iter(&self) -> vec_deque::Iter<'a, AnnotatedFrame> {
        self.frames.range(self.start..self.end)
    }
}

impl<'a> IntoIterator for Window<'a> {
    type Item = &'a AnnotatedFrame;
    type IntoIter = vec_deque::Iter<'a, AnnotatedFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
