use winlist_engine::{QueryConfig, QueryEvent};
use winlist_harness::{TestClient, TestServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn loaded_client(server: &TestServer) -> Result<TestClient, Box<dyn std::error::Error>> {
    let mut client = TestClient::new(QueryConfig::default())?;
    client.fetch_at(0)?;
    client.pump(server)?;
    assert_eq!(client.ids()?, server.ids());
    client.events();
    Ok(client)
}

// ============================================================================
// Preemptive updates
// ============================================================================

#[test]
fn confirmed_removal_survives_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::new(&["a", "b", "c", "d", "e"]);
    let mut client = loaded_client(&server)?;

    client.remove("b")?;
    assert_eq!(client.ids()?, ["a", "c", "d", "e"]);
    assert!(client.query.status().is_dirty());

    server.remove("b");
    client.pump(&server)?;

    assert_eq!(client.ids()?, ["a", "c", "d", "e"]);
    assert_eq!(client.query.preemptive_count(), 0);
    assert!(!client.query.status().is_dirty());
    assert_eq!(client.query.state(), Some(&server.state()));
    Ok(())
}

#[test]
fn confirmed_insert_survives_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::new(&["a", "b", "c"]);
    let mut client = loaded_client(&server)?;

    client.insert(1, "x")?;
    server.insert(1, "x");
    client.pump(&server)?;

    assert_eq!(client.ids()?, ["a", "x", "b", "c"]);
    assert_eq!(client.query.length(), Some(4));
    assert_eq!(client.query.preemptive_count(), 0);
    Ok(())
}

#[test]
fn rejected_edit_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let server = TestServer::new(&["a", "b", "c", "d", "e"]);
    let mut client = loaded_client(&server)?;

    client.remove("b")?;
    client.pump(&server)?;

    assert_eq!(client.ids()?, server.ids());
    assert_eq!(client.query.preemptive_count(), 0);
    Ok(())
}

#[test]
fn diverging_server_wins() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::new(&["a", "b", "c", "d", "e"]);
    let mut client = loaded_client(&server)?;

    client.remove("b")?;
    server.remove("c");
    client.pump(&server)?;

    assert_eq!(client.ids()?, ["a", "b", "d", "e"]);
    assert_eq!(client.query.preemptive_count(), 0);
    assert!(!client.query.status().is_dirty());
    Ok(())
}

// ============================================================================
// Server deltas
// ============================================================================

#[test]
fn server_move_is_applied() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::new(&["a", "b", "c", "d", "e"]);
    let mut client = loaded_client(&server)?;

    server.move_to("e", 0);
    client.refresh();
    client.pump(&server)?;

    assert_eq!(client.ids()?, ["e", "a", "b", "c", "d"]);
    let updated = client
        .events()
        .into_iter()
        .any(|event| matches!(event, QueryEvent::Updated(_)));
    assert!(updated);
    Ok(())
}

#[test]
fn unknown_state_starts_over() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::new(&["a", "b", "c"]);
    let mut client = loaded_client(&server)?;

    server.replace_all(&["x", "y"]);
    server.forget_history();
    client.refresh();
    client.pump(&server)?;

    assert!(client.events().contains(&QueryEvent::Reset));
    assert_eq!(client.query.length(), None);
    assert!(client.ids()?.is_empty());

    client.fetch_at(0)?;
    client.pump(&server)?;
    assert_eq!(client.ids()?, ["x", "y"]);
    assert_eq!(client.query.state(), Some(&server.state()));
    Ok(())
}

#[test]
fn window_from_newer_state_waits_for_delta() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut server = TestServer::numbered(10);
    let config = QueryConfig::default()
        .with_window_size(5)
        .with_prefetch(0)
        .with_trigger_point(1);
    let mut client = TestClient::new(config)?;
    client.fetch_at(0)?;
    client.pump(&server)?;
    assert_eq!(client.ids()?, ["m0", "m1", "m2", "m3", "m4"]);

    server.remove("m1");
    client.fetch_at(7)?;
    let round_trips = client.pump(&server)?;

    assert_eq!(round_trips, 2);
    assert_eq!(client.query.state(), Some(&server.state()));
    assert_eq!(
        client.ids()?,
        ["m0", "m2", "m3", "m4", "?", "m6", "m7", "m8", "m9"]
    );
    assert!(!client.query.window_status(0).ids_ready());
    assert!(client.query.window_status(1).ids_ready());

    client.fetch_at(0)?;
    client.pump(&server)?;
    assert_eq!(client.ids()?, server.ids());
    assert!(client.query.all_ids_are_loaded());
    Ok(())
}
