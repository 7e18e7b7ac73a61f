//! Window computation for the grid body.
//!
//! Row offsets are `index * estimate` plus a Fenwick tree of measured-size
//! deltas, so offsets stay O(log n) no matter how many rows have been
//! measured and offset to index lookups are O(log² n).

use std::collections::HashMap;

use crate::config::{GridConfig, MAX_OVERSCAN, MIN_OVERSCAN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAlign {
    Start,
    Center,
    End,
    /// Minimal movement that brings the row fully into view.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollRequest {
    pub offset: f64,
    pub behavior: ScrollBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualItem {
    pub index: usize,
    pub start: f64,
    pub size: f64,
}

impl VirtualItem {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.size
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualWindow {
    pub items: Vec<VirtualItem>,
    pub padding_top: f64,
    pub padding_bottom: f64,
    pub total_size: f64,
}

impl VirtualWindow {
    /// Inclusive index range of rendered rows.
    #[must_use]
    pub fn range(&self) -> Option<(usize, usize)> {
        let first = self.items.first()?;
        let last = self.items.last()?;
        Some((first.index, last.index))
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.range()
            .is_some_and(|(start, end)| (start..=end).contains(&index))
    }
}

#[derive(Debug, Clone, Default)]
struct Fenwick {
    tree: Vec<f64>,
}

impl Fenwick {
    fn new(len: usize) -> Self {
        Self {
            tree: vec![0.0; len + 1],
        }
    }

    fn add(&mut self, index: usize, delta: f64) {
        let mut position = index + 1;
        while position < self.tree.len() {
            self.tree[position] += delta;
            position += position & position.wrapping_neg();
        }
    }

    /// Sum of deltas for indices `[0, end)`.
    fn prefix(&self, end: usize) -> f64 {
        let mut position = end.min(self.tree.len().saturating_sub(1));
        let mut sum = 0.0;
        while position > 0 {
            sum += self.tree[position];
            position -= position & position.wrapping_neg();
        }
        sum
    }
}

#[derive(Debug, Clone)]
pub struct Virtualizer {
    count: usize,
    estimate: f64,
    overscan: usize,
    viewport: f64,
    scroll_offset: f64,
    smooth_max_distance: f64,
    measured: HashMap<usize, f64>,
    deltas: Fenwick,
}

impl Virtualizer {
    #[must_use]
    pub fn new(config: &GridConfig) -> Self {
        Self {
            count: 0,
            estimate: config.estimated_row_height,
            overscan: config.overscan.clamp(MIN_OVERSCAN, MAX_OVERSCAN),
            viewport: 0.0,
            scroll_offset: 0.0,
            smooth_max_distance: config.smooth_scroll_max_distance,
            measured: HashMap::new(),
            deltas: Fenwick::new(0),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn overscan(&self) -> usize {
        self.overscan
    }

    #[must_use]
    pub fn viewport_height(&self) -> f64 {
        self.viewport
    }

    #[must_use]
    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    /// Number of estimated-height rows that fit in the viewport.
    #[must_use]
    pub fn page_rows(&self) -> usize {
        // Truncation is intended: a partially visible row does not count.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rows = (self.viewport / self.estimate).floor() as usize;
        rows.max(1)
    }

    pub fn set_count(&mut self, count: usize) {
        if count == self.count {
            return;
        }
        self.count = count;
        self.measured.retain(|index, _| *index < count);
        self.deltas = Fenwick::new(count);
        for (index, size) in &self.measured {
            self.deltas.add(*index, size - self.estimate);
        }
        self.scroll_offset = self.clamp_offset(self.scroll_offset);
    }

    /// Drops all measurements, e.g. after the row order changed.
    pub fn reset_measurements(&mut self) {
        self.measured.clear();
        self.deltas = Fenwick::new(self.count);
        self.scroll_offset = self.clamp_offset(self.scroll_offset);
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport = if height.is_finite() { height.max(0.0) } else { 0.0 };
        self.scroll_offset = self.clamp_offset(self.scroll_offset);
    }

    pub fn scroll_to_offset(&mut self, offset: f64) {
        self.scroll_offset = self.clamp_offset(offset);
    }

    #[must_use]
    pub fn size_of(&self, index: usize) -> f64 {
        self.measured.get(&index).copied().unwrap_or(self.estimate)
    }

    /// Pixel offset of the top of `index`. `offset_of(count)` is the total size.
    #[must_use]
    pub fn offset_of(&self, index: usize) -> f64 {
        let index = index.min(self.count);
        #[allow(clippy::cast_precision_loss)]
        let base = index as f64 * self.estimate;
        base + self.deltas.prefix(index)
    }

    #[must_use]
    pub fn total_size(&self) -> f64 {
        self.offset_of(self.count)
    }

    /// Feeds back a rendered row's real height. When the row sits above the
    /// current scroll position the offset is shifted by the same delta, so
    /// the rows on screen do not move.
    pub fn measure(&mut self, index: usize, size: f64) -> bool {
        if index >= self.count || !size.is_finite() || size <= 0.0 {
            return false;
        }
        let previous = self.size_of(index);
        let delta = size - previous;
        if delta.abs() < f64::EPSILON {
            return false;
        }

        let starts_above_viewport = self.offset_of(index) < self.scroll_offset;
        self.measured.insert(index, size);
        self.deltas.add(index, delta);
        if starts_above_viewport {
            self.scroll_offset = self.clamp_offset(self.scroll_offset + delta);
        }
        true
    }

    /// Index of the row containing `offset`.
    #[must_use]
    pub fn index_at_offset(&self, offset: f64) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let (mut low, mut high) = (0, self.count - 1);
        while low < high {
            let middle = low + (high - low).div_ceil(2);
            if self.offset_of(middle) <= offset {
                low = middle;
            } else {
                high = middle - 1;
            }
        }
        Some(low)
    }

    /// Minimal contiguous range covering the viewport, widened by overscan
    /// and clamped to `[0, count - 1]`.
    #[must_use]
    pub fn visible_range(&self) -> Option<(usize, usize)> {
        if self.count == 0 || self.viewport <= 0.0 {
            return None;
        }
        let top = self.scroll_offset;
        let bottom = top + self.viewport;
        let first = self.index_at_offset(top)?;
        let mut last = self.index_at_offset(bottom)?;
        if last > first && self.offset_of(last) >= bottom {
            last -= 1;
        }

        let start = first.saturating_sub(self.overscan);
        let end = (last + self.overscan).min(self.count - 1);
        Some((start, end))
    }

    #[must_use]
    pub fn window(&self) -> VirtualWindow {
        let total_size = self.total_size();
        let Some((start, end)) = self.visible_range() else {
            return VirtualWindow {
                total_size,
                ..VirtualWindow::default()
            };
        };

        let mut items = Vec::with_capacity(end - start + 1);
        let mut cursor = self.offset_of(start);
        for index in start..=end {
            let size = self.size_of(index);
            items.push(VirtualItem {
                index,
                start: cursor,
                size,
            });
            cursor += size;
        }

        VirtualWindow {
            padding_top: self.offset_of(start),
            padding_bottom: (total_size - cursor).max(0.0),
            total_size,
            items,
        }
    }

    #[must_use]
    pub fn is_fully_visible(&self, index: usize) -> bool {
        if index >= self.count {
            return false;
        }
        let start = self.offset_of(index);
        let end = start + self.size_of(index);
        start >= self.scroll_offset && end <= self.scroll_offset + self.viewport
    }

    /// Jumps straight to the row; intermediate windows are never computed.
    /// The returned request tells the host whether animating is sensible.
    pub fn scroll_to_index(&mut self, index: usize, align: ScrollAlign) -> Option<ScrollRequest> {
        if self.count == 0 {
            return None;
        }
        let index = index.min(self.count - 1);
        let start = self.offset_of(index);
        let size = self.size_of(index);
        let target = match align {
            ScrollAlign::Start => start,
            ScrollAlign::End => start + size - self.viewport,
            ScrollAlign::Center => start + size / 2.0 - self.viewport / 2.0,
            ScrollAlign::Auto => {
                if start < self.scroll_offset {
                    start
                } else if start + size > self.scroll_offset + self.viewport {
                    start + size - self.viewport
                } else {
                    self.scroll_offset
                }
            }
        };
        let target = self.clamp_offset(target);

        let distance = (target - self.scroll_offset).abs();
        let behavior = if distance <= self.smooth_max_distance * self.viewport {
            ScrollBehavior::Smooth
        } else {
            ScrollBehavior::Instant
        };
        self.scroll_offset = target;
        Some(ScrollRequest {
            offset: target,
            behavior,
        })
    }

    pub fn scroll_into_view(&mut self, index: usize) -> Option<ScrollRequest> {
        if self.is_fully_visible(index) {
            return None;
        }
        self.scroll_to_index(index, ScrollAlign::Auto)
    }

    fn clamp_offset(&self, offset: f64) -> f64 {
        if !offset.is_finite() {
            return 0.0;
        }
        let max_offset = (self.total_size() - self.viewport).max(0.0);
        offset.clamp(0.0, max_offset)
    }
}
