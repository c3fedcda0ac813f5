use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use winlist_core::{ids::StoreKey, update::RawUpdate};
use winlist_engine::{
    EngineError, FetchRequest, ObserverId, QueryConfig, QueryEvent, WindowedQuery,
};
use winlist_storage::{MemoryStore, RecordStatus, Store};

use crate::server::TestServer;
use crate::source::TestSource;

const TYPE_NAME: &str = "Message";

/// Upper bound on round trips per pump, so a query that keeps asking for
/// more can't hang a test.
const MAX_ROUND_TRIPS: usize = 32;

/// A query wired to a [`TestSource`] and a store, answered by a
/// [`TestServer`] whenever the test pumps it.
pub struct TestClient<S: Store = MemoryStore> {
    pub query: WindowedQuery,
    pub store: S,
    pub source: TestSource,
}

impl TestClient<MemoryStore> {
    pub fn new(config: QueryConfig) -> Result<Self, EngineError> {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl<S: Store> TestClient<S> {
    pub fn with_store(store: S, config: QueryConfig) -> Result<Self, EngineError> {
        Ok(Self {
            query: WindowedQuery::new(TYPE_NAME, config)?,
            store,
            source: TestSource::new(),
        })
    }

    pub fn key(&mut self, id: &str) -> Result<StoreKey, EngineError> {
        Ok(self.store.get_store_key(TYPE_NAME, id)?)
    }

    /// The local list as ids, `"?"` for entries not loaded yet.
    pub fn ids(&self) -> Result<Vec<String>, EngineError> {
        let mut ids = Vec::with_capacity(self.query.store_keys().materialized_len());
        for entry in self.query.store_keys().entries() {
            let id = match entry {
                Some(key) => self.store.get_id(*key)?.unwrap_or_default(),
                None => "?".to_string(),
            };
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn events(&mut self) -> Vec<QueryEvent> {
        self.query.drain_events()
    }

    pub fn observe(&mut self, start: usize, end: usize) -> ObserverId {
        self.query.add_range_observer(start, end)
    }

    // ========================================================================
    // Driving the query
    // ========================================================================

    pub fn fetch_at(&mut self, index: usize) -> Result<(), EngineError> {
        self.query
            .fetch_data_for_object_at(index, &self.store, &mut self.source)
    }

    pub fn refresh(&mut self) {
        self.query.refresh(&mut self.source);
    }

    /// Ask for `[start, end)`. Returns the ids if they were already known.
    pub fn range(&mut self, start: usize, end: usize) -> Result<Option<Vec<String>>, EngineError> {
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        self.query.get_store_keys_for_objects_in_range(
            start,
            end,
            Box::new(move |keys: &[Option<StoreKey>], _, _| {
                *sink.borrow_mut() = Some(keys.to_vec());
            }),
            &self.store,
            &mut self.source,
        )?;

        let keys = seen.borrow_mut().take();
        match keys {
            None => Ok(None),
            Some(keys) => {
                let mut ids = Vec::with_capacity(keys.len());
                for key in keys.into_iter().flatten() {
                    ids.push(self.store.get_id(key)?.unwrap_or_default());
                }
                Ok(Some(ids))
            }
        }
    }

    /// Remove `id` locally, ahead of the server.
    pub fn remove(&mut self, id: &str) -> Result<(), EngineError> {
        let key = self.key(id)?;
        self.query
            .client_did_generate_update(RawUpdate::remove([key]), &mut self.source);
        Ok(())
    }

    /// Insert `id` at `index` locally, ahead of the server.
    pub fn insert(&mut self, index: usize, id: &str) -> Result<(), EngineError> {
        let key = self.key(id)?;
        self.query
            .client_did_generate_update(RawUpdate::insert([(index, key)]), &mut self.source);
        Ok(())
    }

    /// Answer fetches from `server` until the query stops asking. Returns the
    /// number of round trips made.
    pub fn pump(&mut self, server: &TestServer) -> Result<usize, EngineError> {
        let mut round_trips = 0;
        while self.source.has_pending() {
            if round_trips == MAX_ROUND_TRIPS {
                warn!(round_trips, "query still fetching; giving up");
                break;
            }
            self.source.take_pending();
            let request = self.query.source_will_fetch_query();
            if !request.is_empty() {
                self.respond(&request, server)?;
            }
            self.query.source_did_complete_fetch();
            round_trips += 1;
        }
        debug!(round_trips, "pump finished");
        Ok(round_trips)
    }

    fn respond(&mut self, request: &FetchRequest, server: &TestServer) -> Result<(), EngineError> {
        if request.refresh {
            if let Some(state) = &request.state {
                match server.delta_from(state) {
                    Some(delta) => {
                        self.query
                            .source_did_fetch_update(delta, &mut self.store, &mut self.source)?;
                    }
                    None => {
                        debug!(%state, "server has no delta from state; starting over");
                        self.query.reset();
                    }
                }
            }
        }

        for range in request.ids.iter().chain(&request.records) {
            let packet = server.id_list(range.start, range.count);
            self.query
                .source_did_fetch_id_list(packet, &mut self.store, &mut self.source)?;
        }

        for range in &request.records {
            let packet = server.id_list(range.start, range.count);
            for id in &packet.ids {
                let key = self.store.get_store_key(TYPE_NAME, id)?;
                self.store.set_status(key, RecordStatus::ready())?;
            }
        }

        let window_size = self.query.config().window_size;
        for key in &request.index_of {
            let Some(id) = self.store.get_id(*key)? else {
                continue;
            };
            match server.index_of(&id) {
                Some(index) => {
                    let start = index / window_size * window_size;
                    let packet = server.id_list(start, window_size);
                    self.query
                        .source_did_fetch_id_list(packet, &mut self.store, &mut self.source)?;
                }
                None => {
                    // Not on the server: load everything so the lookup can
                    // conclude it is absent.
                    let packet = server.id_list(0, server.len());
                    self.query
                        .source_did_fetch_id_list(packet, &mut self.store, &mut self.source)?;
                }
            }
        }
        Ok(())
    }
}
