pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod source;
pub mod status;

pub use config::QueryConfig;
pub use error::EngineError;
pub use events::{QueryEvent, QueryUpdated};
pub use fetch::{FetchRequest, IndexRange};
pub use source::Source;
pub use status::{QueryPhase, QueryStatus};

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use winlist_core::{
    CoreError,
    ids::{QueryId, StateToken, StoreKey},
    packets::{IdListPacket, UpdatePacket},
    sparse_list::SparseList,
    update::{self, ApplyOutcome, RawUpdate, Update},
    window::{WindowStatus, WindowTable},
};
use winlist_storage::Store;

/// Receives the keys in `[start, end)` once they are all known.
pub type RangeCallback = Box<dyn FnOnce(&[Option<StoreKey>], usize, usize)>;
/// Receives the index of a key, or `None` if the fully loaded list lacks it.
pub type IndexCallback = Box<dyn FnOnce(Option<usize>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// A span of the list some consumer is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedRange {
    pub start: usize,
    pub end: usize,
}

struct PendingRange {
    start: usize,
    end: usize,
    callback: RangeCallback,
}

struct PendingIndexOf {
    key: StoreKey,
    from: usize,
    callback: IndexCallback,
}

/// A server-ordered list that is loaded window by window and edited
/// optimistically.
///
/// Local edits go through [`client_did_generate_update`] and are applied at
/// once as preemptive updates; server answers come back through
/// [`source_did_fetch_id_list`] and [`source_did_fetch_update`], which
/// reconcile them against the outstanding preemptives.
///
/// [`client_did_generate_update`]: WindowedQuery::client_did_generate_update
/// [`source_did_fetch_id_list`]: WindowedQuery::source_did_fetch_id_list
/// [`source_did_fetch_update`]: WindowedQuery::source_did_fetch_update
pub struct WindowedQuery {
    id: QueryId,
    config: QueryConfig,
    type_name: String,
    sort: String,
    filter: String,
    state: Option<StateToken>,
    status: QueryStatus,
    list: SparseList,
    windows: WindowTable,
    preemptives: Vec<Update>,
    /// Id lists that arrived for a state we haven't caught up with yet.
    waiting_packets: Vec<IdListPacket>,
    pending_ranges: Vec<PendingRange>,
    pending_index_of: Vec<PendingIndexOf>,
    is_explicit_id_fetch: bool,
    refresh_requested: bool,
    ranges: BTreeMap<ObserverId, ObservedRange>,
    next_observer: u64,
    events: Vec<QueryEvent>,
}

impl WindowedQuery {
    pub fn new(type_name: &str, config: QueryConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            id: QueryId::new(),
            windows: WindowTable::new(config.window_size),
            config,
            type_name: type_name.to_string(),
            sort: String::new(),
            filter: String::new(),
            state: None,
            status: QueryStatus::default(),
            list: SparseList::new(),
            preemptives: Vec::new(),
            waiting_packets: Vec::new(),
            pending_ranges: Vec::new(),
            pending_index_of: Vec::new(),
            is_explicit_id_fetch: false,
            refresh_requested: false,
            ranges: BTreeMap::new(),
            next_observer: 0,
            events: Vec::new(),
        })
    }

    pub fn with_sort(mut self, sort: &str) -> Self {
        self.sort = sort.to_string();
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = filter.to_string();
        self
    }

    // ========================================================================
    // Observable state
    // ========================================================================

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn sort(&self) -> &str {
        &self.sort
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Server list length, once known.
    pub fn length(&self) -> Option<usize> {
        self.list.total()
    }

    pub fn state(&self) -> Option<&StateToken> {
        self.state.as_ref()
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn store_keys(&self) -> &SparseList {
        &self.list
    }

    pub fn window_status(&self, window: usize) -> WindowStatus {
        self.windows.status(window)
    }

    pub fn window_count(&self) -> Option<usize> {
        self.windows.window_count(self.length())
    }

    pub fn preemptive_count(&self) -> usize {
        self.preemptives.len()
    }

    pub fn all_ids_are_loaded(&self) -> bool {
        match self.window_count() {
            Some(count) => self.windows.all_ids_ready(count),
            None => false,
        }
    }

    /// Take the events fired since the last call.
    pub fn drain_events(&mut self) -> Vec<QueryEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Range observers
    // ========================================================================

    pub fn add_range_observer(&mut self, start: usize, end: usize) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.ranges.insert(id, ObservedRange { start, end });
        id
    }

    pub fn update_range_observer(&mut self, id: ObserverId, start: usize, end: usize) -> bool {
        match self.ranges.get_mut(&id) {
            Some(range) => {
                *range = ObservedRange { start, end };
                true
            }
            None => false,
        }
    }

    pub fn remove_range_observer(&mut self, id: ObserverId) -> bool {
        self.ranges.remove(&id).is_some()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn set_obsolete(&mut self) {
        self.status.obsolete = true;
    }

    /// Ask the source for the delta from our state to the server's.
    pub fn refresh(&mut self, source: &mut dyn Source) -> bool {
        self.refresh_requested = true;
        source.fetch_query(self.id)
    }

    /// Forget everything loaded. Pending lookups stay queued and resolve
    /// once the list is loaded again.
    pub fn reset(&mut self) {
        let old_length = self.list.effective_len();
        self.list.clear();
        self.windows.clear();
        self.preemptives.clear();
        self.waiting_packets.clear();
        self.is_explicit_id_fetch = false;
        self.refresh_requested = false;
        self.state = None;
        self.status = QueryStatus::default();
        if old_length > 0 {
            self.events.push(QueryEvent::RangeChanged {
                start: 0,
                end: old_length,
            });
        }
        self.events.push(QueryEvent::Reset);
        debug!(query = %self.id, "query reset");
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    /// Deliver the keys in `[start, end)` to `callback`, now if they are all
    /// known, otherwise once they have been fetched. Returns whether the data
    /// was complete.
    pub fn get_store_keys_for_objects_in_range(
        &mut self,
        start: usize,
        end: usize,
        callback: RangeCallback,
        store: &dyn Store,
        source: &mut dyn Source,
    ) -> Result<bool, EngineError> {
        let (start, end) = match self.length() {
            Some(length) => (start.min(length), end.min(length)),
            None => (start, end),
        };

        let mut complete = self.length().is_some();
        if start < end {
            let first = self.windows.window_of(start);
            let last = self.windows.window_of(end - 1);
            for window in first..=last {
                if !self.windows.status(window).ids_ready() {
                    complete = false;
                    self.is_explicit_id_fetch = true;
                    self.fetch_window(window, true, None, store, source)?;
                    // Without a length the range may be unbounded; the rest
                    // is requested as this window's ids arrive.
                    if self.length().is_none() {
                        break;
                    }
                }
            }
        }

        if complete {
            callback(&self.list.slice(start, end), start, end);
        } else {
            self.pending_ranges.push(PendingRange {
                start,
                end,
                callback,
            });
        }
        Ok(complete)
    }

    /// Find `key` at or after `from`. With a callback, a miss on a partially
    /// loaded list is retried as more ids arrive.
    pub fn index_of_store_key(
        &mut self,
        key: StoreKey,
        from: usize,
        callback: Option<IndexCallback>,
        source: &mut dyn Source,
    ) -> Option<usize> {
        let index = self.list.index_of(key, from);
        if let Some(callback) = callback {
            if index.is_some() || self.all_ids_are_loaded() {
                callback(index);
            } else {
                self.pending_index_of.push(PendingIndexOf {
                    key,
                    from,
                    callback,
                });
                source.fetch_query(self.id);
            }
        }
        index
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Apply a local edit straight away and remember it until the server
    /// confirms or contradicts it.
    pub fn client_did_generate_update(&mut self, raw: RawUpdate, source: &mut dyn Source) {
        let mut update = update::normalize(raw, &self.list);
        // Removals of keys we never loaded are simply ignored locally.
        update.truncate_at_first_gap = false;
        update.up_to = None;
        trace!(
            query = %self.id,
            removed = update.removed_keys.len(),
            added = update.added_keys.len(),
            "applying preemptive update"
        );
        self.apply_update(&update);
        self.preemptives.push(update);
        self.status.dirty = true;
        self.refresh(source);
    }

    /// A slice of ids from the server.
    pub fn source_did_fetch_id_list(
        &mut self,
        packet: IdListPacket,
        store: &mut dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        if !self.matches_criteria(&packet.sort, &packet.filter) {
            debug!(query = %self.id, "ignoring id list for different sort/filter");
            return Ok(());
        }
        packet.validate()?;
        let mut position = isize::try_from(packet.position).map_err(|_| {
            CoreError::InvalidUpdate(format!("id slice position {} out of range", packet.position))
        })?;

        let old_length = self.list.effective_len();
        let stale = matches!(&self.state, Some(state) if *state != packet.state);
        if stale && self.config.can_get_delta_updates {
            debug!(
                query = %self.id,
                ours = ?self.state,
                theirs = %packet.state,
                "id list from another state; waiting for delta"
            );
            self.waiting_packets.push(packet);
            self.set_obsolete();
            self.refresh(source);
            return Ok(());
        }
        let inform_all = stale;
        if stale {
            debug!(query = %self.id, "state changed without delta support; starting over");
            self.list.clear();
            self.windows.clear();
            self.preemptives.clear();
        }
        self.state = Some(packet.state.clone());

        let mut keys = packet
            .ids
            .iter()
            .map(|id| store.get_store_key(&self.type_name, id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut total = packet.total;

        // Line the server slice up with the locally displayed list.
        if let Some(composed) = update::compose_all(&self.preemptives) {
            for &removed in composed.removed_indexes.iter().rev() {
                let offset = removed as isize - position;
                if offset < keys.len() as isize {
                    if offset >= 0 {
                        keys.remove(offset as usize);
                    } else {
                        position -= 1;
                    }
                }
            }
            for (&added, &key) in composed.added_indexes.iter().zip(&composed.added_keys) {
                let offset = added as isize - position;
                if offset <= 0 {
                    position += 1;
                } else if offset < keys.len() as isize {
                    keys.insert(offset as usize, key);
                } else {
                    break;
                }
            }
            total = composed.total;
        }

        let position = position.max(0) as usize;
        let end = position + keys.len();
        for (i, key) in keys.into_iter().enumerate() {
            self.list.set(position + i, key);
        }
        if self.list.materialized_len() > total {
            self.list.truncate(total);
        }
        self.list.set_total(Some(total));
        if total < old_length {
            self.windows.recalculate(&self.list, total, total);
        }
        self.windows.mark_covered(&self.list, position, end, total);
        self.status.phase = QueryPhase::Ready;

        let (start, end) = if inform_all {
            (0, old_length.max(end))
        } else {
            (position, end)
        };
        if start < end {
            self.events.push(QueryEvent::RangeChanged { start, end });
        }
        self.events.push(QueryEvent::IdsLoaded);

        self.process_pending(store, source)
    }

    /// A delta from the server.
    pub fn source_did_fetch_update(
        &mut self,
        packet: UpdatePacket,
        store: &mut dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        if !self.matches_criteria(&packet.sort, &packet.filter) {
            debug!(query = %self.id, "ignoring delta for different sort/filter");
            return Ok(());
        }
        packet.validate()?;
        self.status.loading = false;

        if self.state.as_ref() == Some(&packet.new_state) {
            // Nothing happened server-side, so nothing we speculated did.
            if !self.status.dirty {
                if let Some(all) = update::compose_all(&self.preemptives) {
                    debug!(
                        query = %self.id,
                        count = self.preemptives.len(),
                        "rolling back unconfirmed preemptive updates"
                    );
                    self.preemptives.clear();
                    self.apply_update(&update::invert(&all));
                }
            }
            return self.finish_update(store, source);
        }

        if self.state.as_ref() != Some(&packet.old_state) {
            debug!(
                query = %self.id,
                ours = ?self.state,
                from = %packet.old_state,
                "delta does not start from our state; refreshing"
            );
            self.set_obsolete();
            self.refresh(source);
            return Ok(());
        }

        self.state = Some(packet.new_state.clone());
        self.status.obsolete = false;

        let removed = packet
            .removed
            .iter()
            .map(|id| store.get_store_key(&self.type_name, id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut added = Vec::with_capacity(packet.added.len());
        for (index, id) in &packet.added {
            added.push((*index, store.get_store_key(&self.type_name, id)?));
        }
        let up_to = match &packet.up_to_id {
            Some(id) => Some(store.get_store_key(&self.type_name, id)?),
            None => None,
        };

        if self.preemptives.is_empty() {
            let raw = RawUpdate {
                removed,
                added,
                total: Some(packet.total),
                up_to,
            };
            let update = update::normalize(raw, &self.list);
            self.apply_update(&update);
        } else {
            self.reconcile_preemptives(removed, added, packet.total, up_to);
        }

        // A reset while applying leaves us with no state to be ready at.
        if self.state.is_some() {
            self.status.phase = QueryPhase::Ready;
        }
        self.finish_update(store, source)
    }

    /// Match a server delta against the preemptive queue. `removed` and
    /// `added` are in the coordinates of the list before any preemptive.
    fn reconcile_preemptives(
        &mut self,
        removed: Vec<StoreKey>,
        mut added: Vec<(usize, StoreKey)>,
        total: usize,
        up_to: Option<StoreKey>,
    ) {
        let composed = update::compose_prefixes(&self.preemptives);
        let Some(all) = composed.last().cloned() else {
            return;
        };

        let mut truncate_at_first_gap = false;
        let mut removed_indexes = Vec::with_capacity(removed.len());
        let mut removed_keys = Vec::with_capacity(removed.len());
        let mut local_indexes = Vec::new();
        let mut local_keys = Vec::new();
        for key in removed {
            if let Some(j) = all.removed_keys.iter().position(|k| *k == key) {
                removed_indexes.push(all.removed_indexes[j]);
                removed_keys.push(key);
            } else if let Some(index) = self.list.index_of(key, 0) {
                local_indexes.push(index);
                local_keys.push(key);
            } else {
                truncate_at_first_gap = true;
            }
        }

        // Keys still on screen: translate their displayed position back to
        // where they were before the preemptives.
        if !local_indexes.is_empty() {
            update::sort_pairs(&mut local_indexes, &mut local_keys);
            let probe = Update {
                removed_indexes: local_indexes,
                removed_keys: local_keys.clone(),
                total: all.total.saturating_sub(local_keys.len()),
                ..Update::default()
            };
            let through = update::compose(&all, &probe);
            for key in local_keys {
                match through.removed_keys.iter().position(|k| *k == key) {
                    Some(j) => {
                        removed_indexes.push(through.removed_indexes[j]);
                        removed_keys.push(key);
                    }
                    None => truncate_at_first_gap = true,
                }
            }
        }
        update::sort_pairs(&mut removed_indexes, &mut removed_keys);

        added.sort_by_key(|(index, _)| *index);
        let (added_indexes, added_keys) =
            update::cancel_moves_in_place(&mut removed_indexes, &mut removed_keys, &added);

        let server = Update {
            removed_indexes,
            removed_keys,
            added_indexes,
            added_keys,
            truncate_at_first_gap,
            total,
            up_to,
        };

        match composed.iter().rposition(|prefix| prefix.is_equivalent(&server)) {
            Some(confirmed) => {
                debug!(
                    query = %self.id,
                    confirmed = confirmed + 1,
                    "server confirmed preemptive updates"
                );
                self.preemptives.drain(..=confirmed);
                if !self.status.dirty {
                    if let Some(rest) = update::compose_all(&self.preemptives) {
                        debug!(
                            query = %self.id,
                            count = self.preemptives.len(),
                            "dropping preemptive updates the server did not make"
                        );
                        self.preemptives.clear();
                        self.apply_update(&update::invert(&rest));
                    }
                }
                if server.truncate_at_first_gap || server.up_to.is_some() {
                    let trim = Update {
                        truncate_at_first_gap: server.truncate_at_first_gap,
                        up_to: server.up_to,
                        ..Update::identity(self.list.effective_len())
                    };
                    self.apply_update(&trim);
                }
            }
            None => {
                debug!(
                    query = %self.id,
                    count = self.preemptives.len(),
                    "preemptive updates diverged from server; rolling back"
                );
                self.preemptives.clear();
                let fix = update::compose(&update::invert(&all), &server);
                self.apply_update(&fix);
            }
        }
    }

    /// Apply `update` to the list and keep windows and events in step.
    fn apply_update(&mut self, update: &Update) {
        let old_length = self.list.effective_len();
        match update::apply(update, &mut self.list) {
            ApplyOutcome::NeedsReset => {
                warn!(query = %self.id, "delta boundary not in local list; resetting");
                self.reset();
            }
            ApplyOutcome::Applied {
                first_change,
                structural,
            } => {
                let new_length = update.total;
                if structural {
                    self.windows.recalculate(&self.list, first_change, new_length);
                }
                let end = old_length.max(new_length);
                if first_change < end {
                    self.events.push(QueryEvent::RangeChanged {
                        start: first_change,
                        end,
                    });
                }
                self.events.push(QueryEvent::Updated(QueryUpdated {
                    removed: update.removed_keys.clone(),
                    removed_indexes: update.removed_indexes.clone(),
                    added: update.added_keys.clone(),
                    added_indexes: update.added_indexes.clone(),
                }));
            }
        }
    }

    fn finish_update(
        &mut self,
        store: &mut dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        if self.preemptives.is_empty() {
            self.status.dirty = false;
        }

        // Packets from the state we just reached can go in now; anything
        // else describes a snapshot we will never be at.
        let waiting = std::mem::take(&mut self.waiting_packets);
        for packet in waiting {
            if self.state.as_ref() == Some(&packet.state) {
                self.source_did_fetch_id_list(packet, store, source)?;
            } else {
                trace!(query = %self.id, state = %packet.state, "discarding superseded id list");
            }
        }
        self.process_pending(store, source)
    }

    fn process_pending(
        &mut self,
        store: &dyn Store,
        source: &mut dyn Source,
    ) -> Result<(), EngineError> {
        for pending in std::mem::take(&mut self.pending_ranges) {
            self.get_store_keys_for_objects_in_range(
                pending.start,
                pending.end,
                pending.callback,
                store,
                source,
            )?;
        }

        for lookup in std::mem::take(&mut self.pending_index_of) {
            let index = self.list.index_of(lookup.key, lookup.from);
            if index.is_some() || self.all_ids_are_loaded() {
                (lookup.callback)(index);
            } else {
                self.pending_index_of.push(lookup);
            }
        }
        Ok(())
    }

    fn matches_criteria(&self, sort: &str, filter: &str) -> bool {
        self.sort == sort && self.filter == filter
    }
}
