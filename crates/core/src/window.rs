use crate::sparse_list::SparseList;

/// Progress of a window's id slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPhase {
    #[default]
    Empty,
    Requested,
    Loading,
    Ready,
}

/// Progress of the records behind a window's ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordsPhase {
    #[default]
    NotRequested,
    Requested,
    Loading,
    Ready,
}

/// Fetch status of one window. Records can only be ready while ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowStatus {
    ids: IdPhase,
    records: RecordsPhase,
}

impl WindowStatus {
    pub const EMPTY: WindowStatus = WindowStatus {
        ids: IdPhase::Empty,
        records: RecordsPhase::NotRequested,
    };

    pub fn new(ids: IdPhase, records: RecordsPhase) -> Self {
        let records = if records == RecordsPhase::Ready && ids != IdPhase::Ready {
            RecordsPhase::NotRequested
        } else {
            records
        };
        Self { ids, records }
    }

    pub fn ids(&self) -> IdPhase {
        self.ids
    }

    pub fn records(&self) -> RecordsPhase {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn ids_ready(&self) -> bool {
        self.ids == IdPhase::Ready
    }

    pub fn records_ready(&self) -> bool {
        self.records == RecordsPhase::Ready
    }

    /// Waiting for the coordinator to issue a request.
    pub fn is_requested(&self) -> bool {
        self.ids == IdPhase::Requested || self.records == RecordsPhase::Requested
    }

    pub fn set_ids(&mut self, ids: IdPhase) {
        self.ids = ids;
        if ids != IdPhase::Ready && self.records == RecordsPhase::Ready {
            self.records = RecordsPhase::NotRequested;
        }
    }

    /// Returns false, leaving the status alone, if records would become
    /// ready without ready ids.
    pub fn set_records(&mut self, records: RecordsPhase) -> bool {
        if records == RecordsPhase::Ready && self.ids != IdPhase::Ready {
            return false;
        }
        self.records = records;
        true
    }
}

/// Per-window fetch bookkeeping for one list.
///
/// Windows are created on first reference and only ever removed by
/// truncating the table when the list shrinks.
#[derive(Debug, Clone)]
pub struct WindowTable {
    window_size: usize,
    windows: Vec<WindowStatus>,
}

impl WindowTable {
    /// `window_size` must be non-zero.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            windows: Vec::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn window_of(&self, index: usize) -> usize {
        index / self.window_size
    }

    pub fn window_start(&self, window: usize) -> usize {
        window * self.window_size
    }

    /// Number of windows for a list of `length` entries, `None` if unknown.
    pub fn window_count(&self, length: Option<usize>) -> Option<usize> {
        length.map(|len| len.div_ceil(self.window_size))
    }

    /// Number of windows referenced so far.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn status(&self, window: usize) -> WindowStatus {
        self.windows.get(window).copied().unwrap_or_default()
    }

    pub fn status_mut(&mut self, window: usize) -> &mut WindowStatus {
        if window >= self.windows.len() {
            self.windows.resize(window + 1, WindowStatus::EMPTY);
        }
        &mut self.windows[window]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, WindowStatus)> + '_ {
        self.windows.iter().copied().enumerate()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }

    /// Mark an empty window's ids as requested. Returns whether anything
    /// changed.
    pub fn request_ids(&mut self, window: usize) -> bool {
        let status = self.status_mut(window);
        if status.ids == IdPhase::Empty {
            status.ids = IdPhase::Requested;
            true
        } else {
            false
        }
    }

    pub fn request_records(&mut self, window: usize) -> bool {
        let status = self.status_mut(window);
        if status.records == RecordsPhase::NotRequested {
            status.records = RecordsPhase::Requested;
            true
        } else {
            false
        }
    }

    pub fn mark_records_ready(&mut self, window: usize) -> bool {
        self.status_mut(window).set_records(RecordsPhase::Ready)
    }

    /// True if every window of a list with `window_count` windows has ids.
    pub fn all_ids_ready(&self, window_count: usize) -> bool {
        (0..window_count).all(|w| self.status(w).ids_ready())
    }

    /// Requests that were in flight are over; anything that didn't arrive
    /// goes back to empty so it can be requested again.
    pub fn finish_loading(&mut self) {
        for status in &mut self.windows {
            if status.ids == IdPhase::Loading {
                status.ids = IdPhase::Empty;
            }
            if status.records == RecordsPhase::Loading {
                status.records = RecordsPhase::NotRequested;
            }
        }
    }

    /// Mark ids ready for every window touching `[start, end)` whose span
    /// (clipped to `total`) has no gaps.
    pub fn mark_covered(&mut self, list: &SparseList, start: usize, end: usize, total: usize) {
        if start >= end {
            return;
        }
        let first = self.window_of(start);
        let last = self.window_of(end - 1);
        for window in first..=last {
            let window_start = self.window_start(window);
            let window_end = (window_start + self.window_size).min(total);
            if window_start < window_end && !list.has_gap_in(window_start, window_end) {
                self.status_mut(window).set_ids(IdPhase::Ready);
            }
        }
    }

    /// Re-derive window coverage after a structural change at `from_index`.
    ///
    /// Windows before the change are untouched. From the last window down to
    /// the one containing `from_index`, records-ready is always cleared (it
    /// is re-checked lazily on the next fetch) and ids-ready is recomputed
    /// from the list's gaps.
    pub fn recalculate(&mut self, list: &SparseList, from_index: usize, new_length: usize) {
        let count = new_length.div_ceil(self.window_size);
        self.windows.truncate(count);
        let first = self.window_of(from_index);
        for window in (first..count).rev() {
            let window_start = self.window_start(window);
            let window_end = (window_start + self.window_size).min(new_length);
            let covered = !list.has_gap_in(window_start, window_end);
            let status = self.status_mut(window);
            if status.records == RecordsPhase::Ready {
                status.records = RecordsPhase::NotRequested;
            }
            if covered {
                status.ids = IdPhase::Ready;
            } else if status.ids == IdPhase::Ready {
                status.ids = IdPhase::Empty;
            }
        }
    }
}
