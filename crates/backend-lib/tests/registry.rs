//! End-to-end tests for the room registry actor, with stubbed upstream
//! fetchers. Timers use short real durations rather than mocked clocks, so
//! grace periods here are tens of milliseconds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use livecollab_backend_lib::error::AppError;
use livecollab_backend_lib::fetch::{MatchSource, TimeSeries};
use livecollab_backend_lib::room_actor::{ConnHandle, RegistryConfig, RegistryHandle};
use livecollab_common::{
    Identity, MatchOutcome, MatchResults, OhlcvPoint, Payload, RoomKind, ServerToClient,
};

struct StubSeries {
    calls: AtomicUsize,
    symbols: Mutex<Vec<String>>,
    points: Vec<OhlcvPoint>,
    fail: bool,
}

impl StubSeries {
    fn with_points(points: Vec<OhlcvPoint>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            symbols: Mutex::new(Vec::new()),
            points,
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            symbols: Mutex::new(Vec::new()),
            points: Vec::new(),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSeries for StubSeries {
    async fn fetch(&self, symbol: &str) -> Result<Vec<OhlcvPoint>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.symbols.lock().unwrap().push(symbol.to_string());
        if self.fail {
            return Err(AppError::Upstream("stub failure".to_string()));
        }
        Ok(self.points.clone())
    }
}

struct StubMatches {
    calls: AtomicUsize,
    results: MatchResults,
    delay: Duration,
    fail: bool,
}

impl StubMatches {
    fn slow(results: MatchResults, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            results,
            delay,
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            results: MatchResults::new(),
            delay: Duration::ZERO,
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchSource for StubMatches {
    async fn fetch(&self) -> Result<MatchResults, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        if self.fail {
            return Err(AppError::Upstream("stub failure".to_string()));
        }
        Ok(self.results.clone())
    }
}

fn point(date: &str, open: f64) -> OhlcvPoint {
    OhlcvPoint {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        open,
        high: open + 5.0,
        low: open - 5.0,
        close: open + 1.0,
        adjusted_close: open + 0.5,
        volume: 1000,
        dividend: 0.0,
    }
}

fn sample_results() -> MatchResults {
    let mut results = MatchResults::new();
    results.insert(
        "Arsenal".to_string(),
        vec![MatchOutcome::Win, MatchOutcome::Draw],
    );
    results
}

fn registry(
    grace: Duration,
    series: Arc<StubSeries>,
    matches: Arc<StubMatches>,
) -> RegistryHandle {
    RegistryHandle::spawn(
        RegistryConfig {
            grace,
            default_symbol: "IBM".to_string(),
        },
        series,
        matches,
    )
}

fn conn(identity: Option<Identity>) -> (ConnHandle, mpsc::Receiver<ServerToClient>) {
    let (tx, rx) = mpsc::channel(64);
    (
        ConnHandle {
            id: Uuid::new_v4(),
            identity,
            tx,
        },
        rx,
    )
}

fn user(id: &str, name: &str) -> Identity {
    Identity {
        id: id.to_string(),
        display_name: name.to_string(),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ServerToClient>) -> ServerToClient {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_payload(rx: &mut mpsc::Receiver<ServerToClient>) -> Payload {
    loop {
        if let ServerToClient::Payload { data, .. } = next_event(rx).await {
            return data;
        }
    }
}

#[tokio::test]
async fn join_broadcasts_roster_and_serves_payload() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series.clone(), matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let names = handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    assert_eq!(names, vec!["Alice"]);

    match next_event(&mut rx_a).await {
        ServerToClient::Roster {
            kind,
            room_id,
            names,
        } => {
            assert_eq!(kind, RoomKind::Stock);
            assert_eq!(room_id, "r1");
            assert_eq!(names, vec!["Alice"]);
        },
        other => panic!("expected roster, got {other:?}"),
    }

    // lazy fetch for the new room completes and is broadcast
    match next_payload(&mut rx_a).await {
        Payload::Stock(points) => assert_eq!(points.len(), 1),
        other => panic!("expected stock payload, got {other:?}"),
    }
    assert_eq!(series.calls(), 1);

    // second joiner appears after the first and gets the cached series
    // without another upstream call
    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    let names = handle
        .join(RoomKind::Stock, "r1".to_string(), b)
        .await
        .unwrap();
    assert_eq!(names, vec!["Alice", "Bob"]);

    match next_event(&mut rx_b).await {
        ServerToClient::Roster { names, .. } => assert_eq!(names, vec!["Alice", "Bob"]),
        other => panic!("expected roster, got {other:?}"),
    }
    match next_payload(&mut rx_b).await {
        Payload::Stock(points) => assert_eq!(points.len(), 1),
        other => panic!("expected stock payload, got {other:?}"),
    }
    assert_eq!(series.calls(), 1);
}

#[tokio::test]
async fn rejoin_is_idempotent() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series, matches);

    let (a, _rx_a) = conn(Some(user("u1", "Alice")));
    handle
        .join(RoomKind::Stock, "r1".to_string(), a.clone())
        .await
        .unwrap();
    let names = handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    assert_eq!(names, vec!["Alice"]);
}

#[tokio::test]
async fn guests_get_deterministic_labels() {
    let series = StubSeries::with_points(Vec::new());
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series, matches);

    let (g, _rx_g) = conn(None);
    let expected = format!("Guest-{}", &g.id.to_string()[..5]);
    let names = handle
        .join(RoomKind::Football, "prem".to_string(), g)
        .await
        .unwrap();
    assert_eq!(names, vec![expected]);
}

#[tokio::test]
async fn display_name_rules() {
    let series = StubSeries::with_points(Vec::new());
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series, matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let (g, _rx_g) = conn(None);
    let a_id = a.id;
    let g_id = g.id;

    handle
        .join(RoomKind::Football, "prem".to_string(), a)
        .await
        .unwrap();
    handle
        .join(RoomKind::Football, "prem".to_string(), g)
        .await
        .unwrap();
    // drain the two roster broadcasts seen by the first member
    next_event(&mut rx_a).await;
    next_event(&mut rx_a).await;

    // authenticated identity is authoritative: the requested override is
    // ignored and the rebroadcast roster is unchanged
    handle.set_display_name(
        RoomKind::Football,
        "prem".to_string(),
        a_id,
        "Mallory".to_string(),
    );
    match next_event(&mut rx_a).await {
        ServerToClient::Roster { names, .. } => assert_eq!(names[0], "Alice"),
        other => panic!("expected roster, got {other:?}"),
    }

    // guest takes the trimmed requested name
    handle.set_display_name(
        RoomKind::Football,
        "prem".to_string(),
        g_id,
        "  Bob  ".to_string(),
    );
    match next_event(&mut rx_a).await {
        ServerToClient::Roster { names, .. } => {
            assert_eq!(names[0], "Alice");
            assert_eq!(names[1], "Bob");
        },
        other => panic!("expected roster, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_match_requests_run_one_scrape() {
    let matches = StubMatches::slow(sample_results(), Duration::from_millis(100));
    let series = StubSeries::with_points(Vec::new());
    let handle = registry(Duration::from_secs(60), series, matches.clone());

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    let a_id = a.id;
    let b_id = b.id;

    handle
        .join(RoomKind::Football, "prem".to_string(), a)
        .await
        .unwrap();
    handle
        .join(RoomKind::Football, "prem".to_string(), b)
        .await
        .unwrap();

    handle.request_match_results("prem".to_string(), a_id);
    handle.request_match_results("prem".to_string(), b_id);

    // the deduplicated request is answered immediately with the previous
    // result, which is empty before the first completion
    match next_payload(&mut rx_b).await {
        Payload::Football(results) => assert!(results.is_empty()),
        other => panic!("expected football payload, got {other:?}"),
    }

    // the single in-flight scrape completes and is broadcast to the room
    match next_payload(&mut rx_a).await {
        Payload::Football(results) => {
            // skip the interleaved empty broadcast if it arrived first
            if results.is_empty() {
                match next_payload(&mut rx_a).await {
                    Payload::Football(results) => assert_eq!(results, sample_results()),
                    other => panic!("expected football payload, got {other:?}"),
                }
            } else {
                assert_eq!(results, sample_results());
            }
        },
        other => panic!("expected football payload, got {other:?}"),
    }

    assert_eq!(matches.calls(), 1);

    // drain whatever else the first round delivered to b
    while rx_b.try_recv().is_ok() {}

    // gate released: a later request launches a fresh scrape
    handle.request_match_results("prem".to_string(), a_id);
    match next_payload(&mut rx_b).await {
        Payload::Football(results) => assert_eq!(results, sample_results()),
        other => panic!("expected football payload, got {other:?}"),
    }
    assert_eq!(matches.calls(), 2);
}

#[tokio::test]
async fn empty_room_expires_after_grace() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_millis(100), series.clone(), matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let a_id = a.id;
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    next_payload(&mut rx_a).await;
    assert_eq!(series.calls(), 1);

    handle.disconnect(a_id);
    sleep(Duration::from_millis(250)).await;

    // the room was deleted, so this join recreates it and fetches again
    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    handle
        .join(RoomKind::Stock, "r1".to_string(), b)
        .await
        .unwrap();
    next_payload(&mut rx_b).await;
    assert_eq!(series.calls(), 2);
}

#[tokio::test]
async fn rejoin_within_grace_keeps_cached_payload() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series.clone(), matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let a_id = a.id;
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    next_payload(&mut rx_a).await;

    handle.disconnect(a_id);
    sleep(Duration::from_millis(50)).await;

    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    handle
        .join(RoomKind::Stock, "r1".to_string(), b)
        .await
        .unwrap();
    // cached payload served to the joiner, no new upstream call
    next_payload(&mut rx_b).await;
    assert_eq!(series.calls(), 1);
}

#[tokio::test]
async fn stock_payloads_are_sorted_ascending() {
    let series = StubSeries::with_points(vec![
        point("2025-02-14", 3.0),
        point("2025-01-31", 1.0),
        point("2025-02-07", 2.0),
    ]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series, matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();

    match next_payload(&mut rx_a).await {
        Payload::Stock(points) => {
            let dates: Vec<String> = points.iter().map(|p| p.date.to_string()).collect();
            assert_eq!(dates, vec!["2025-01-31", "2025-02-07", "2025-02-14"]);
        },
        other => panic!("expected stock payload, got {other:?}"),
    }
}

#[tokio::test]
async fn symbol_update_refetches_one_room_only() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series.clone(), matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    let a_id = a.id;

    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    handle
        .join(RoomKind::Stock, "r2".to_string(), b)
        .await
        .unwrap();
    next_payload(&mut rx_b).await;

    // quiesce: both rooms track the default symbol, so each completed
    // fetch is applied to both of them
    sleep(Duration::from_millis(100)).await;
    while rx_a.try_recv().is_ok() {}
    while rx_b.try_recv().is_ok() {}
    let before = series.calls();

    handle.update_symbol("r1".to_string(), "TSLA".to_string(), a_id);
    next_payload(&mut rx_a).await;
    assert_eq!(series.calls(), before + 1);
    assert!(series.symbols.lock().unwrap().contains(&"TSLA".to_string()));

    // the other room tracks a different symbol and saw nothing new
    sleep(Duration::from_millis(50)).await;
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn refresh_skips_empty_rooms() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series.clone(), matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let a_id = a.id;
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    next_payload(&mut rx_a).await;
    assert_eq!(series.calls(), 1);

    handle.disconnect(a_id);
    handle.refresh_tick();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(series.calls(), 1);
}

#[tokio::test]
async fn refresh_fetches_each_distinct_symbol_once() {
    let series = StubSeries::with_points(vec![point("2025-01-10", 100.0)]);
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series.clone(), matches);

    // two rooms on the default symbol, one on its own
    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let (b, mut rx_b) = conn(Some(user("u2", "Bob")));
    let (c, mut rx_c) = conn(Some(user("u3", "Carol")));
    let c_id = c.id;
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();
    handle
        .join(RoomKind::Stock, "r2".to_string(), b)
        .await
        .unwrap();
    handle
        .join(RoomKind::Stock, "r3".to_string(), c)
        .await
        .unwrap();
    next_payload(&mut rx_a).await;
    next_payload(&mut rx_b).await;
    next_payload(&mut rx_c).await;
    handle.update_symbol("r3".to_string(), "TSLA".to_string(), c_id);
    next_payload(&mut rx_c).await;

    // quiesce before measuring
    sleep(Duration::from_millis(100)).await;
    let before = series.calls();

    handle.refresh_tick();
    sleep(Duration::from_millis(100)).await;
    // one fetch for IBM (shared by r1 and r2), one for TSLA
    assert_eq!(series.calls(), before + 2);
}

#[tokio::test]
async fn failed_stock_fetch_broadcasts_empty_payload_and_reports_error() {
    let series = StubSeries::failing();
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let handle = registry(Duration::from_secs(60), series, matches);

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    handle
        .join(RoomKind::Stock, "r1".to_string(), a)
        .await
        .unwrap();

    // roster, then the error report, then the fail-soft empty payload
    let mut saw_error = false;
    let mut saw_empty_payload = false;
    for _ in 0..3 {
        match next_event(&mut rx_a).await {
            ServerToClient::Error { message } => {
                assert!(message.contains("IBM"));
                saw_error = true;
            },
            ServerToClient::Payload {
                data: Payload::Stock(points),
                ..
            } => {
                assert!(points.is_empty());
                saw_empty_payload = true;
            },
            ServerToClient::Roster { .. } => {},
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_error);
    assert!(saw_empty_payload);
}

#[tokio::test]
async fn failed_scrape_caches_empty_results() {
    let matches = StubMatches::failing();
    let series = StubSeries::with_points(Vec::new());
    let handle = registry(Duration::from_secs(60), series, matches.clone());

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let a_id = a.id;
    handle
        .join(RoomKind::Football, "prem".to_string(), a)
        .await
        .unwrap();
    next_event(&mut rx_a).await; // roster

    handle.request_match_results("prem".to_string(), a_id);

    let mut saw_error = false;
    let mut saw_empty_payload = false;
    for _ in 0..2 {
        match next_event(&mut rx_a).await {
            ServerToClient::Error { .. } => saw_error = true,
            ServerToClient::Payload {
                data: Payload::Football(results),
                ..
            } => {
                assert!(results.is_empty());
                saw_empty_payload = true;
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_error);
    assert!(saw_empty_payload);
    assert_eq!(matches.calls(), 1);
}

#[tokio::test]
async fn unknown_room_request_reports_error_to_requester() {
    let matches = StubMatches::slow(MatchResults::new(), Duration::ZERO);
    let series = StubSeries::with_points(Vec::new());
    let handle = registry(Duration::from_secs(60), series, matches.clone());

    let (a, mut rx_a) = conn(Some(user("u1", "Alice")));
    let a_id = a.id;
    handle
        .join(RoomKind::Football, "prem".to_string(), a)
        .await
        .unwrap();
    next_event(&mut rx_a).await; // roster

    handle.request_match_results("nope".to_string(), a_id);
    match next_event(&mut rx_a).await {
        ServerToClient::Error { message } => assert!(message.contains("nope")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(matches.calls(), 0);
}
