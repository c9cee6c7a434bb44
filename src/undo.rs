// Bounded undo/redo history that stores only changed regions.
//
// A record is the smallest rectangle covering every pixel that differs
// between two buffers, plus the *before* content of that rectangle. Memory
// therefore grows with the area a mutation touched, not with canvas size.

use std::collections::VecDeque;

use image::{RgbImage, imageops};
use tracing::{debug, warn};

use crate::types::Rect;

/// Saved block of pixels and where it goes.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub rect: Rect,
    pub pixels: RgbImage,
}

impl UndoRecord {
    fn capture(img: &RgbImage, rect: Rect) -> Self {
        let pixels = imageops::crop_imm(img, rect.x1, rect.y1, rect.width(), rect.height()).to_image();
        Self { rect, pixels }
    }

    fn apply(&self, img: &mut RgbImage) {
        imageops::replace(img, &self.pixels, self.rect.x1 as i64, self.rect.y1 as i64);
    }

    pub fn bytes(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

pub struct UndoManager {
    history: VecDeque<UndoRecord>,
    redo: Vec<UndoRecord>,
    max_history: usize,
}

impl UndoManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history.min(64)),
            redo: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Record the change from `before` to `after`.
    ///
    /// Returns `false` when nothing differs; nothing is stored then and the
    /// redo stack is left alone.
    pub fn record(&mut self, before: &RgbImage, after: &RgbImage) -> bool {
        if before.dimensions() != after.dimensions() {
            warn!(before = ?before.dimensions(), after = ?after.dimensions(), "size mismatch, undo skipped");
            return false;
        }
        let Some(rect) = changed_rect(before, after) else {
            return false;
        };

        self.history.push_back(UndoRecord::capture(before, rect));
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.redo.clear();
        debug!(?rect, depth = self.history.len(), "undo recorded");
        true
    }

    /// Put back the most recent record. The current content moves to redo.
    pub fn undo(&mut self, img: &mut RgbImage) -> bool {
        let Some(record) = self.history.pop_back() else {
            return false;
        };
        self.redo.push(UndoRecord::capture(img, record.rect));
        record.apply(img);
        true
    }

    pub fn redo(&mut self, img: &mut RgbImage) -> bool {
        let Some(record) = self.redo.pop() else {
            return false;
        };
        self.history.push_back(UndoRecord::capture(img, record.rect));
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }
        record.apply(img);
        true
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Bytes held by stored pixel blocks, undo and redo together.
    pub fn memory_usage(&self) -> usize {
        self.history.iter().chain(self.redo.iter()).map(UndoRecord::bytes).sum()
    }
}

/// Smallest half-open rectangle covering every differing pixel.
pub fn changed_rect(a: &RgbImage, b: &RgbImage) -> Option<Rect> {
    let (w, _) = a.dimensions();
    let stride = w as usize * 3;
    if stride == 0 {
        return None;
    }

    let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0u32, 0u32);
    let rows = a.as_raw().chunks_exact(stride).zip(b.as_raw().chunks_exact(stride));
    for (y, (ra, rb)) in rows.enumerate() {
        if ra == rb {
            continue;
        }
        let y = y as u32;
        for (x, (pa, pb)) in ra.chunks_exact(3).zip(rb.chunks_exact(3)).enumerate() {
            if pa != pb {
                let x = x as u32;
                x1 = x1.min(x);
                x2 = x2.max(x + 1);
            }
        }
        y1 = y1.min(y);
        y2 = y + 1;
    }

    (y1 != u32::MAX).then_some(Rect { x1, y1, x2, y2 })
}
