//! Deciding what to ask the source for.
//!
//! Windows move from requested to loading when the source asks for the
//! batched request, and the request ranges are coalesced so adjacent windows
//! go out as a single `(start, count)` range.

use tracing::{debug, trace};

use winlist_core::ids::{QueryId, StateToken, StoreKey};
use winlist_core::window::{IdPhase, RecordsPhase};
use winlist_storage::Store;

use crate::error::EngineError;
use crate::source::Source;
use crate::WindowedQuery;

/// A contiguous run of list positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub start: usize,
    pub count: usize,
}

impl IndexRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Everything a query wants from one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub query: QueryId,
    pub state: Option<StateToken>,
    pub sort: String,
    pub filter: String,
    /// Ranges whose ids are needed.
    pub ids: Vec<IndexRange>,
    /// Ranges whose ids and records are needed.
    pub records: Vec<IndexRange>,
    /// Keys whose position must be found.
    pub index_of: Vec<StoreKey>,
    /// Ask for the delta from `state` to the server's current state.
    pub refresh: bool,
}

impl FetchRequest {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.records.is_empty() && self.index_of.is_empty() && !self.refresh
    }
}

/// Half-open `[a, b)` and `[c, d)` overlap.
fn intersects(a: usize, b: usize, c: usize, d: usize) -> bool {
    if a < c { c < b } else { a < d }
}

fn push_coalesced(ranges: &mut Vec<IndexRange>, start: usize, count: usize) {
    match ranges.last_mut() {
        Some(prev) if prev.end() == start => prev.count += count,
        _ => ranges.push(IndexRange { start, count }),
    }
}

impl WindowedQuery {
    /// Mark window `index` and its prefetch neighbours for fetching.
    pub fn fetch_window(
        &mut self,
        index: usize,
        fetch_records: bool,
        prefetch: Option<usize>,
        store: &dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        if self.status.obsolete {
            self.refresh(source);
        }

        let prefetch = prefetch.unwrap_or(self.config.prefetch);
        let first = index.saturating_sub(prefetch);
        let mut last = index + prefetch + 1;
        if let Some(count) = self.window_count() {
            last = last.min(count);
        }

        let mut do_fetch = false;
        for window in first..last {
            if self.windows.request_ids(window) {
                do_fetch = true;
            }
            if window == index
                && fetch_records
                && self.windows.status(window).records() == RecordsPhase::NotRequested
            {
                if self.windows.status(window).ids_ready()
                    && self.check_if_window_is_fetched(window, store)?
                {
                    self.windows.mark_records_ready(window);
                } else {
                    self.windows.request_records(window);
                    do_fetch = true;
                }
            }
        }

        if do_fetch {
            source.fetch_query(self.id);
        }
        Ok(())
    }

    /// Fetch the window holding `index`, plus the neighbouring window when
    /// `index` is within `trigger_point` of its edge.
    pub fn fetch_data_for_object_at(
        &mut self,
        index: usize,
        store: &dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        let window_size = self.config.window_size;
        let trigger = self.config.trigger_point;
        let window = index / window_size;
        let offset = index % window_size;

        self.fetch_window(window, true, None, store, source)?;
        if offset < trigger && window > 0 {
            self.fetch_window(window - 1, true, None, store, source)?;
        }
        if offset + trigger >= window_size {
            self.fetch_window(window + 1, true, None, store, source)?;
        }
        Ok(())
    }

    /// Every key in the window is known and its record is loaded.
    pub fn check_if_window_is_fetched(
        &self,
        window: usize,
        store: &dyn Store,
    ) -> Result<bool, EngineError> {
        let start = self.windows.window_start(window);
        let end = (start + self.config.window_size).min(self.list.effective_len());
        for index in start..end {
            let Some(key) = self.list.get(index) else {
                return Ok(false);
            };
            if !store.get_status(key)?.is_fetched() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Called by the source right before it goes to the network. Moves
    /// requested windows to loading and returns the batched request.
    pub fn source_will_fetch_query(&mut self) -> FetchRequest {
        let window_size = self.config.window_size;
        let margin = self.config.prefetch * window_size;
        let optimise = self.config.optimise_fetching;
        let explicit = std::mem::take(&mut self.is_explicit_id_fetch);
        let refresh = std::mem::take(&mut self.refresh_requested);

        let mut ids = Vec::new();
        let mut records = Vec::new();
        for window in 0..self.windows.len() {
            let mut status = self.windows.status(window);
            if !status.is_requested() {
                continue;
            }
            let start = window * window_size;
            let in_use = !optimise
                || self.ranges.values().any(|range| {
                    intersects(
                        start,
                        start + window_size,
                        range.start.saturating_sub(margin),
                        range.end + margin,
                    )
                });

            // Someone is waiting on an explicit id fetch, so its ids go out
            // even when nothing is observing the window.
            if status.ids() == IdPhase::Requested {
                if in_use || explicit {
                    status.set_ids(IdPhase::Loading);
                    push_coalesced(&mut ids, start, window_size);
                } else {
                    status.set_ids(IdPhase::Empty);
                }
            }
            if status.records() == RecordsPhase::Requested {
                if in_use {
                    status.set_records(RecordsPhase::Loading);
                    push_coalesced(&mut records, start, window_size);
                } else {
                    status.set_records(RecordsPhase::NotRequested);
                }
            }
            if !in_use {
                trace!(
                    query = %self.id,
                    window,
                    explicit,
                    "window no longer observed; dropping request"
                );
            }
            *self.windows.status_mut(window) = status;
        }

        if refresh {
            self.status.dirty = false;
        }

        let request = FetchRequest {
            query: self.id,
            state: self.state.clone(),
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            ids,
            records,
            index_of: self.pending_index_of.iter().map(|lookup| lookup.key).collect(),
            refresh,
        };
        if !request.is_empty() {
            self.status.loading = true;
        }
        debug!(
            query = %self.id,
            id_ranges = request.ids.len(),
            record_ranges = request.records.len(),
            index_of = request.index_of.len(),
            refresh,
            "issuing fetch"
        );
        request
    }

    /// Completion of the request returned by
    /// [`source_will_fetch_query`](Self::source_will_fetch_query): whatever
    /// didn't arrive can be requested again.
    pub fn source_did_complete_fetch(&mut self) {
        self.windows.finish_loading();
        self.status.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_half_open() {
        assert!(intersects(0, 30, 29, 40));
        assert!(!intersects(0, 30, 30, 40));
        assert!(intersects(30, 60, 0, 31));
        assert!(!intersects(30, 60, 0, 30));
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let mut ranges = Vec::new();
        push_coalesced(&mut ranges, 0, 30);
        push_coalesced(&mut ranges, 30, 30);
        push_coalesced(&mut ranges, 90, 30);
        assert_eq!(
            ranges,
            vec![
                IndexRange { start: 0, count: 60 },
                IndexRange { start: 90, count: 30 },
            ]
        );
    }
}
