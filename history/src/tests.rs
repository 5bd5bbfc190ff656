use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatlog_kv::{ColumnStore, MemoryStore, Mutation, RedbStore, Row, RowResults, StoreError, StoreResult};
use chrono::{DateTime, TimeZone, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::{CompletionError, HistoryError};
use crate::gateway::{Completer, Gateway, GatewayConfig};
use crate::keys::{COLUMN_FAMILY, SENDER_QUALIFIER, TIMESTAMP_QUALIFIER, parse_row_key, row_key};
use crate::reader::HistoryReader;
use crate::types::{FALLBACK_REPLY, Role};
use crate::writer::TurnWriter;

// ---------------------------------------------------------------------------
// Fault-injecting store
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
struct Faults {
    fail_bulk: bool,
    fail_scan: bool,
    /// Reject rows whose key carries this role segment.
    reject_role: Option<Role>,
    /// Report only this many per-row results from a bulk call.
    truncate_results: Option<usize>,
    delay: Option<Duration>,
}

/// Wraps a [MemoryStore] and fails on demand. Counts every call.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<Faults>,
    calls: AtomicUsize,
}

impl FaultyStore {
    fn new() -> Self {
        Self::default()
    }

    fn inject(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.lock().unwrap());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn faults(&self) -> Faults {
        self.faults.lock().unwrap().clone()
    }
}

#[async_trait]
impl ColumnStore for FaultyStore {
    async fn apply_bulk(&self, keys: &[String], mutations: &[Mutation]) -> StoreResult<RowResults> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let faults = self.faults();
        if let Some(d) = faults.delay {
            tokio::time::sleep(d).await;
        }
        if faults.fail_bulk {
            return Err(StoreError::Storage("connection reset".into()));
        }

        let mut results = Vec::with_capacity(keys.len());
        for (key, mutation) in keys.iter().zip(mutations) {
            if faults
                .reject_role
                .is_some_and(|role| key.contains(&format!("#{role}#")))
            {
                results.push(Err(StoreError::RowRejected {
                    key: key.clone(),
                    reason: "injected".into(),
                }));
                continue;
            }
            let mut r = self
                .inner
                .apply_bulk(std::slice::from_ref(key), std::slice::from_ref(mutation))
                .await?;
            results.push(r.pop().unwrap_or(Ok(())));
        }
        if let Some(n) = faults.truncate_results {
            results.truncate(n);
        }
        Ok(results)
    }

    async fn read_rows(&self, prefix: &str) -> StoreResult<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let faults = self.faults();
        if let Some(d) = faults.delay {
            tokio::time::sleep(d).await;
        }
        if faults.fail_scan {
            return Err(StoreError::Storage("permission denied".into()));
        }
        self.inner.read_rows(prefix).await
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Clock that advances a fixed step on every call.
struct StepClock {
    next: AtomicI64,
    step: i64,
}

impl StepClock {
    fn starting_at(t: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: AtomicI64::new(t.timestamp_nanos_opt().unwrap()),
            step: step.as_nanos() as i64,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.next.fetch_add(self.step, Ordering::SeqCst))
    }
}

struct EchoCompleter;

#[async_trait]
impl Completer for EchoCompleter {
    async fn complete(&self, query: &str) -> Result<String, CompletionError> {
        Ok(format!("echo: {query}"))
    }
}

struct EmptyCompleter;

#[async_trait]
impl Completer for EmptyCompleter {
    async fn complete(&self, _query: &str) -> Result<String, CompletionError> {
        Ok("  ".into())
    }
}

struct FailingCompleter;

#[async_trait]
impl Completer for FailingCompleter {
    async fn complete(&self, _query: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Api {
            status: 503,
            message: "overloaded".into(),
        })
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap() + chrono::Duration::nanoseconds(123_456_789)
}

fn gateway_with(store: Arc<dyn ColumnStore>, completer: Arc<dyn Completer>) -> Gateway {
    Gateway::new(
        store,
        completer,
        Arc::new(StepClock::starting_at(t0(), Duration::from_micros(1))),
        GatewayConfig::default(),
    )
}

/// Row carrying only the non-text columns.
fn textless_mutation(raw_ts: &str, sender: &str) -> Mutation {
    let mut m = Mutation::new();
    m.set(COLUMN_FAMILY, TIMESTAMP_QUALIFIER, 1, raw_ts)
        .set(COLUMN_FAMILY, SENDER_QUALIFIER, 1, sender);
    m
}

// ---------------------------------------------------------------------------
// Turn writer + history reader
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pair_integrity() {
    let store = MemoryStore::new();
    let outcome = TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();
    assert!(outcome.is_complete());

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(history[0].sender, Role::User);
    assert_eq!(history[0].text, "hello");
    assert_eq!(history[1].sender, Role::Bot);
    assert_eq!(history[1].text, "hi there");
    for e in &history {
        assert_eq!(e.display_timestamp, "2024-06-01 08:30:00 UTC");
        assert_eq!(parse_row_key(&e.key).unwrap().timestamp, "20240601083000.123456789");
    }
}

#[tokio::test]
async fn test_writer_substitutes_fallback_for_empty_bot_text() {
    let store = MemoryStore::new();
    TurnWriter::new(&store)
        .write_turn_pair("u1", "anyone there?", "", t0())
        .await
        .unwrap();

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history[1].sender, Role::Bot);
    assert_eq!(history[1].text, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_writer_rejects_empty_user_text() {
    let store = FaultyStore::new();
    let err = TurnWriter::new(&store)
        .write_turn_pair("u1", "", "reply", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::EmptyUserText));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_prefix_isolation() {
    let store = MemoryStore::new();
    let writer = TurnWriter::new(&store);
    writer.write_turn_pair("alice", "a", "ra", t0()).await.unwrap();
    writer.write_turn_pair("alice2", "a2", "ra2", t0()).await.unwrap();
    writer.write_turn_pair("bob", "b", "rb", t0()).await.unwrap();

    let reader = HistoryReader::new(&store);
    let alice = reader.read_history("alice").await.unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|e| e.key.starts_with("alice#")));
    assert!(alice.iter().all(|e| e.text == "a" || e.text == "ra"));

    let bob = reader.read_history("bob").await.unwrap();
    assert_eq!(bob.len(), 2);
    assert!(bob.iter().all(|e| e.key.starts_with("bob#")));

    assert!(reader.read_history("ali").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_failure_bot_row() {
    let store = FaultyStore::new();
    store.inject(|f| f.reject_role = Some(Role::Bot));

    let outcome = TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.row_errors.len(), 1);
    assert_eq!(
        outcome.row_errors[0].key,
        row_key("u1", Role::Bot, t0()).unwrap()
    );

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, Role::User);
    assert_eq!(history[0].text, "hello");
}

#[tokio::test]
async fn test_missing_row_results_count_as_failed() {
    let store = FaultyStore::new();
    store.inject(|f| f.truncate_results = Some(1));

    let outcome = TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(!outcome.is_complete());
    assert_eq!(
        outcome.failed_keys().collect::<Vec<_>>(),
        vec![row_key("u1", Role::Bot, t0()).unwrap()]
    );
}

#[tokio::test]
async fn test_batch_failure_writes_nothing() {
    let store = FaultyStore::new();
    store.inject(|f| f.fail_bulk = true);

    let outcome = TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.row_errors.is_empty());

    store.inject(|f| f.fail_bulk = false);
    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_idempotent_read() {
    let store = MemoryStore::new();
    let writer = TurnWriter::new(&store);
    for i in 0..3 {
        let t = t0() + chrono::Duration::seconds(i);
        writer
            .write_turn_pair("u1", &format!("q{i}"), &format!("r{i}"), t)
            .await
            .unwrap();
    }

    let reader = HistoryReader::new(&store);
    let first = reader.read_history("u1").await.unwrap();
    let second = reader.read_history("u1").await.unwrap();
    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_malformed_row_skipped() {
    let store = MemoryStore::new();
    TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();

    let stray = row_key("u1", Role::User, t0() + chrono::Duration::seconds(5)).unwrap();
    store
        .apply(&stray, textless_mutation("2024-06-01T08:30:05Z", "user"))
        .await
        .unwrap();

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.key != stray));
}

#[tokio::test]
async fn test_timestamp_parse_failure_passthrough() {
    let store = MemoryStore::new();
    let key = row_key("u1", Role::User, t0()).unwrap();
    let mut m = textless_mutation("not-a-time", "user");
    m.set(COLUMN_FAMILY, Role::User.text_qualifier(), 1, "hello");
    store.apply(&key, m).await.unwrap();

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].display_timestamp, "not-a-time");
}

#[tokio::test]
async fn test_key_role_wins_over_sender_column() {
    let store = MemoryStore::new();
    let key = row_key("u1", Role::Bot, t0()).unwrap();
    let mut m = textless_mutation("2024-06-01T08:30:00Z", "user");
    m.set(COLUMN_FAMILY, Role::Bot.text_qualifier(), 1, "reply");
    store.apply(&key, m).await.unwrap();

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    assert_eq!(history[0].sender, Role::Bot);
}

#[tokio::test]
async fn test_scan_failure_is_error() {
    let store = FaultyStore::new();
    TurnWriter::new(&store)
        .write_turn_pair("u1", "hello", "hi there", t0())
        .await
        .unwrap();
    store.inject(|f| f.fail_scan = true);

    let err = HistoryReader::new(&store).read_history("u1").await.unwrap_err();
    assert!(matches!(err, HistoryError::Store(StoreError::Storage(_))));
    assert!(!err.is_invalid_input());
}

#[tokio::test]
async fn test_invalid_user_rejected_before_storage() {
    let store = FaultyStore::new();
    let writer = TurnWriter::new(&store);
    let reader = HistoryReader::new(&store);

    for bad in ["", "a#b", "#"] {
        let err = writer.write_turn_pair(bad, "q", "r", t0()).await.unwrap_err();
        assert!(err.is_invalid_input());
        let err = reader.read_history(bad).await.unwrap_err();
        assert!(err.is_invalid_input());
    }
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_same_timestamp_last_write_wins() {
    let store = MemoryStore::new();
    let writer = TurnWriter::new(&store);
    writer.write_turn_pair("u1", "first", "one", t0()).await.unwrap();
    writer.write_turn_pair("u1", "second", "two", t0()).await.unwrap();

    let history = HistoryReader::new(&store).read_history("u1").await.unwrap();
    let texts: Vec<&str> = history.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["second", "two"]);
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_history_ordering() {
    let gw = gateway_with(Arc::new(MemoryStore::new()), Arc::new(EchoCompleter));
    for i in 0..5 {
        let reply = gw.chat("u1", &format!("q{i}")).await.unwrap();
        assert_eq!(reply.response, format!("echo: q{i}"));
        assert!(reply.saved);
        assert!(reply.row_errors.is_empty());
    }

    let history = gw.history("u1").await.unwrap();
    assert_eq!(history.len(), 10);
    for (i, pair) in history.chunks(2).enumerate() {
        assert_eq!(pair[0].sender, Role::User);
        assert_eq!(pair[0].text, format!("q{i}"));
        assert_eq!(pair[1].sender, Role::Bot);
        assert_eq!(pair[1].text, format!("echo: q{i}"));
        assert_eq!(
            parse_row_key(&pair[0].key).unwrap().timestamp,
            parse_row_key(&pair[1].key).unwrap().timestamp
        );
    }
    let segments: Vec<&str> = history
        .iter()
        .map(|e| parse_row_key(&e.key).unwrap().timestamp)
        .collect();
    assert!(segments.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_chat_fallback_on_empty_completion() {
    let gw = gateway_with(Arc::new(MemoryStore::new()), Arc::new(EmptyCompleter));
    let reply = gw.chat("u1", "hello").await.unwrap();
    assert_eq!(reply.response, FALLBACK_REPLY);

    let history = gw.history("u1").await.unwrap();
    assert_eq!(history[1].text, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_chat_fallback_on_completion_error() {
    let gw = gateway_with(Arc::new(MemoryStore::new()), Arc::new(FailingCompleter));
    let reply = gw.chat("u1", "hello").await.unwrap();
    assert_eq!(reply.response, FALLBACK_REPLY);
    assert!(reply.saved);

    let history = gw.history("u1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| !e.text.is_empty()));
}

#[tokio::test]
async fn test_chat_returns_reply_when_save_fails() {
    let store = Arc::new(FaultyStore::new());
    store.inject(|f| f.fail_bulk = true);
    let gw = gateway_with(store.clone(), Arc::new(EchoCompleter));

    let reply = gw.chat("u1", "hello").await.unwrap();
    assert_eq!(reply.response, "echo: hello");
    assert!(!reply.saved);
}

#[tokio::test]
async fn test_chat_reports_row_errors() {
    let store = Arc::new(FaultyStore::new());
    store.inject(|f| f.reject_role = Some(Role::Bot));
    let gw = gateway_with(store.clone(), Arc::new(EchoCompleter));

    let reply = gw.chat("u1", "hello").await.unwrap();
    assert!(reply.saved);
    assert_eq!(reply.row_errors.len(), 1);
    assert!(reply.row_errors[0].key.contains("#bot#"));

    let history = gw.history("u1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, Role::User);
}

#[tokio::test]
async fn test_chat_rejects_invalid_input() {
    let store = Arc::new(FaultyStore::new());
    let gw = gateway_with(store.clone(), Arc::new(EchoCompleter));

    assert!(gw.chat("", "hello").await.unwrap_err().is_invalid_input());
    assert!(gw.chat("a#b", "hello").await.unwrap_err().is_invalid_input());
    assert!(matches!(
        gw.chat("u1", "   ").await.unwrap_err(),
        HistoryError::EmptyUserText
    ));
    assert!(gw.history("").await.unwrap_err().is_invalid_input());
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_store_timeout() {
    let store = Arc::new(FaultyStore::new());
    store.inject(|f| f.delay = Some(Duration::from_millis(500)));
    let gw = Gateway::new(
        store.clone(),
        Arc::new(EchoCompleter),
        Arc::new(SystemClock),
        GatewayConfig {
            store_timeout: Duration::from_millis(20),
        },
    );

    let reply = gw.chat("u1", "hello").await.unwrap();
    assert_eq!(reply.response, "echo: hello");
    assert!(!reply.saved);

    let err = gw.fetch_history("u1").await.unwrap_err();
    assert!(matches!(err, HistoryError::Timeout(d) if d == Duration::from_millis(20)));
}

#[tokio::test]
async fn test_concurrent_chats_keep_pairs_together() {
    let gw = Arc::new(Gateway::new(
        Arc::new(MemoryStore::new()),
        Arc::new(EchoCompleter),
        Arc::new(SystemClock),
        GatewayConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..20 {
        let gw = Arc::clone(&gw);
        handles.push(tokio::spawn(async move {
            let user = if i % 2 == 0 { "even" } else { "odd" };
            gw.chat(user, &format!("q{i}")).await.unwrap()
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().saved);
    }

    for user in ["even", "odd"] {
        let history = gw.history(user).await.unwrap();
        assert_eq!(history.len(), 20);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].sender, Role::User);
            assert_eq!(pair[1].sender, Role::Bot);
            assert_eq!(pair[1].text, format!("echo: {}", pair[0].text));
        }
    }
}

#[tokio::test]
async fn test_gateway_over_redb() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path().join("history.redb")).unwrap();
    let gw = gateway_with(Arc::new(store), Arc::new(EchoCompleter));

    gw.chat("u1", "first").await.unwrap();
    gw.chat("u1", "second").await.unwrap();
    gw.chat("u2", "other").await.unwrap();

    let history = gw.history("u1").await.unwrap();
    let texts: Vec<&str> = history.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "echo: first", "second", "echo: second"]);
}
