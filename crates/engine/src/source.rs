use winlist_core::ids::QueryId;

/// The component that talks to the server on a query's behalf.
///
/// `fetch_query` only schedules work. When the source is ready to go to the
/// network it calls [`WindowedQuery::source_will_fetch_query`] for the
/// batched request, then answers through `source_did_fetch_id_list` /
/// `source_did_fetch_update` and finally `source_did_complete_fetch`.
///
/// [`WindowedQuery::source_will_fetch_query`]: crate::WindowedQuery::source_will_fetch_query
pub trait Source {
    /// Returns false if the source cannot fetch for this query.
    fn fetch_query(&mut self, query: QueryId) -> bool;
}
