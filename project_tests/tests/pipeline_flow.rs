//! # Pipeline Integration Tests
//!
//! Runs the whole topology against a fake catalog source and a notifier that
//! records what would have been sent. State lives in a scratch directory so
//! restarts can be exercised against real files.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use lib_common::core::commands::Command;
use lib_common::core::pipeline::{self, PROCESSED_RECORDS_KEY, SUBSCRIPTIONS_KEY};
use lib_common::core::{
    CatalogSnapshot, ChatId, DeliveryError, Item, ItemKey, Lifecycle, Notifier, OutboundMessage, PipelineConfig,
    PipelineHandle, RouterConfig, SearchRequest, SnapshotSource, StateDir, StorageError,
};

const WAIT: Duration = Duration::from_secs(5);
const BASE: &str = "https://shop.example/p/";

/// Catalog whose contents the test swaps at will. Fails the first
/// `failures` fetches.
#[derive(Default)]
struct FakeCatalog {
    items: Mutex<CatalogSnapshot>,
    failures: AtomicU32,
    fetches: AtomicU32,
}

impl FakeCatalog {
    fn with(items: &[Item]) -> Arc<Self> {
        let catalog = Arc::new(Self::default());
        catalog.set(items);
        catalog
    }

    fn set(&self, items: &[Item]) {
        *self.items.lock().unwrap() = Arc::new(items.iter().cloned().collect::<HashSet<_>>());
    }
}

impl SnapshotSource for FakeCatalog {
    type Snapshot = CatalogSnapshot;
    type Error = String;

    async fn fetch(&self) -> Result<CatalogSnapshot, String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("catalog unavailable".to_string());
        }
        Ok(Arc::clone(&self.items.lock().unwrap()))
    }
}

/// Serves `snapshots` one per fetch once `rolling` is set, then keeps
/// returning the last one. Empty before that.
struct RotatingCatalog {
    snapshots: Vec<CatalogSnapshot>,
    rolling: AtomicBool,
    next: AtomicUsize,
}

impl RotatingCatalog {
    fn new(snapshots: Vec<CatalogSnapshot>) -> Arc<Self> {
        Arc::new(Self { snapshots, rolling: AtomicBool::new(false), next: AtomicUsize::new(0) })
    }

    fn fetched(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for RotatingCatalog {
    type Snapshot = CatalogSnapshot;
    type Error = String;

    async fn fetch(&self) -> Result<CatalogSnapshot, String> {
        if !self.rolling.load(Ordering::SeqCst) {
            return Ok(CatalogSnapshot::default());
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst).min(self.snapshots.len() - 1);
        Ok(Arc::clone(&self.snapshots[index]))
    }
}

/// Forwards every delivered message to the test. With a gate, every delivery
/// waits until the gate opens.
struct Recorder {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    gate: Option<watch::Receiver<bool>>,
}

impl Notifier for Recorder {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map(drop)
                .map_err(|_| DeliveryError::Rejected("test finished".to_string()))?;
        }
        self.tx
            .send(message.clone())
            .map_err(|_| DeliveryError::Rejected("test finished".to_string()))
    }
}

struct Running {
    handle: PipelineHandle,
    lifecycle: Lifecycle,
    commands: mpsc::Sender<Command>,
    sent: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Running {
    fn start(catalog: Arc<FakeCatalog>, state: &StateDir) -> Result<Self, StorageError> {
        Self::launch(catalog, state, Duration::from_millis(50), None)
    }

    fn launch<C>(
        catalog: Arc<C>,
        state: &StateDir,
        poll_interval: Duration,
        gate: Option<watch::Receiver<bool>>,
    ) -> Result<Self, StorageError>
    where
        C: SnapshotSource<Snapshot = CatalogSnapshot>,
    {
        let lifecycle = Lifecycle::new();
        let (commands, command_rx) = mpsc::channel(8);
        let (tx, sent) = mpsc::unbounded_channel();
        let config = PipelineConfig {
            poll_interval,
            flush_interval: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(20),
            router: RouterConfig::new(BASE),
        };
        let handle = pipeline::spawn(
            config,
            catalog,
            ReceiverStream::new(command_rx),
            Arc::new(Recorder { tx, gate }),
            state,
            &lifecycle,
        )?;
        Ok(Self { handle, lifecycle, commands, sent })
    }

    async fn send(&self, command: Command) {
        self.commands.send(command).await.unwrap();
    }

    async fn next_message(&mut self) -> (ChatId, String) {
        let message = tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("notifier dropped");
        (message.chat_id(), message.text().to_string())
    }

    async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(300), self.sent.recv()).await;
        assert!(extra.is_err(), "unexpected message: {extra:?}");
    }

    /// Waits until exactly `chats` (in order) hold subscriptions.
    async fn wait_for_subscribers(&self, chats: &[i64]) {
        let cell = self.handle.subscriptions.clone();
        let expected: Vec<ChatId> = chats.iter().copied().map(ChatId).collect();
        wait_until(move || {
            cell.get()
                .is_some_and(|set| set.iter().map(|sub| sub.chat_id).collect::<Vec<_>>() == expected)
        })
        .await;
    }

    async fn wait_for_catalog(&self, count: usize) {
        let cell = self.handle.catalog.clone();
        wait_until(move || cell.get().is_some_and(|items| items.len() == count)).await;
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn item(key: &str, title: &str, price: &str, path: &str) -> Item {
    Item {
        key: ItemKey(key.to_string()),
        title: title.to_string(),
        sales_price: Some(price.to_string()),
        list_price: None,
        discount_text: None,
        location: None,
        url_path: Some(path.to_string()),
    }
}

fn lamp() -> Item {
    item("1", "Lamp", "199,-", "lamp")
}

fn grey_sofa() -> Item {
    Item {
        discount_text: Some("-50%".to_string()),
        location: Some("Oslo".to_string()),
        ..item("2", "Grey Sofa", "4 990,-", "grey-sofa")
    }
}

fn blue_sofa() -> Item {
    item("3", "Blue Sofa", "5 990,-", "blue-sofa")
}

fn subscribe(chat: i64, filter: &str) -> Command {
    Command::Subscribe { chat_id: ChatId(chat), filter: filter.to_string() }
}

#[tokio::test]
async fn subscribe_alert_search_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = FakeCatalog::with(&[lamp()]);

    // --- First run ---
    let mut run = Running::start(Arc::clone(&catalog), &StateDir::new(dir.path())).unwrap();

    run.send(subscribe(42, "sofa")).await;
    assert_eq!(run.next_message().await, (ChatId(42), "You will now receive updates for \"sofa\".".to_string()));
    run.wait_for_subscribers(&[42]).await;

    catalog.set(&[lamp(), grey_sofa()]);
    assert_eq!(
        run.next_message().await,
        (ChatId(42), "New outlet item! Grey Sofa - 4 990,- - -50% - Oslo. https://shop.example/p/grey-sofa".to_string())
    );

    run.wait_for_catalog(2).await;
    run.send(Command::Search(SearchRequest { chat_id: ChatId(7), query: "LAMP".to_string() })).await;
    assert_eq!(run.next_message().await, (ChatId(7), "Found 1 matching items.\n* Lamp - 199,-".to_string()));

    run.send(subscribe(7, "no!")).await;
    assert_eq!(run.next_message().await, (ChatId(7), "Invalid subscription filter.".to_string()));

    run.lifecycle.shutdown().await;
    let stats = run.handle.dispatcher.await.unwrap();
    assert_eq!(stats.delivered, 4);

    let subscriptions: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(format!("{SUBSCRIPTIONS_KEY}.json"))).unwrap())
            .unwrap();
    assert_eq!(subscriptions, serde_json::json!([{"chatId": 42, "filter": "sofa"}]));

    let processed: Vec<String> = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(format!("{PROCESSED_RECORDS_KEY}.json"))).unwrap(),
    )
    .unwrap();
    assert_eq!(processed, vec!["1", "2"]);

    // --- Second run over the same state ---
    catalog.set(&[]);
    let mut run = Running::start(Arc::clone(&catalog), &StateDir::new(dir.path())).unwrap();
    run.wait_for_subscribers(&[42]).await;
    run.wait_for_catalog(0).await;

    // Already processed before the restart: no alert.
    catalog.set(&[lamp(), grey_sofa()]);
    run.wait_for_catalog(2).await;

    catalog.set(&[lamp(), grey_sofa(), blue_sofa()]);
    assert_eq!(
        run.next_message().await,
        (ChatId(42), "New outlet item! Blue Sofa - 5 990,-. https://shop.example/p/blue-sofa".to_string())
    );
    run.assert_quiet().await;

    run.lifecycle.shutdown().await;
}

#[tokio::test]
async fn unsubscribed_chat_gets_no_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = FakeCatalog::with(&[]);
    let mut run = Running::start(Arc::clone(&catalog), &StateDir::new(dir.path())).unwrap();

    run.send(subscribe(42, "sofa")).await;
    run.next_message().await;
    run.send(subscribe(7, "grey")).await;
    run.next_message().await;
    run.send(Command::Unsubscribe { chat_id: ChatId(42), filter: "sofa".to_string() }).await;
    assert_eq!(
        run.next_message().await,
        (ChatId(42), "You will no longer receive updates for \"sofa\".".to_string())
    );
    run.wait_for_subscribers(&[7]).await;

    catalog.set(&[grey_sofa()]);
    let (chat, text) = run.next_message().await;
    assert_eq!(chat, ChatId(7));
    assert!(text.starts_with("New outlet item! Grey Sofa"));
    run.assert_quiet().await;

    run.lifecycle.shutdown().await;
}

#[tokio::test]
async fn catalog_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = FakeCatalog::with(&[lamp(), grey_sofa()]);
    catalog.failures.store(2, Ordering::SeqCst);

    let mut run = Running::start(Arc::clone(&catalog), &StateDir::new(dir.path())).unwrap();

    run.send(Command::Search(SearchRequest { chat_id: ChatId(1), query: "sofa".to_string() })).await;
    let (_, early) = run.next_message().await;
    assert!(
        early == "The catalog has not been loaded yet, please try again shortly."
            || early.starts_with("Found 1 matching items."),
        "unexpected reply: {early}"
    );

    run.wait_for_catalog(2).await;
    assert!(catalog.fetches.load(Ordering::SeqCst) >= 3);

    run.send(Command::Search(SearchRequest { chat_id: ChatId(1), query: "sofa".to_string() })).await;
    assert_eq!(
        run.next_message().await,
        (ChatId(1), "Found 1 matching items.\n* Grey Sofa - 4 990,- - -50% - Oslo".to_string())
    );

    run.lifecycle.shutdown().await;
}

#[tokio::test]
async fn second_pipeline_on_the_same_state_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let run = Running::start(FakeCatalog::with(&[]), &state).unwrap();

    let second = Running::start(FakeCatalog::with(&[]), &state);
    assert!(matches!(second, Err(StorageError::KeyInUse(_))));

    run.lifecycle.shutdown().await;
}

#[tokio::test]
async fn stalled_notifier_loses_no_new_items() {
    const SNAPSHOTS: usize = 300;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(format!("{SUBSCRIPTIONS_KEY}.json")), r#"[{"chatId": 1, "filter": "sofa"}]"#)
        .unwrap();

    // Each snapshot holds a single sofa that the next one replaces.
    let snapshots = (0..SNAPSHOTS)
        .map(|n| {
            let sofa = item(&n.to_string(), &format!("Sofa {n}"), "100,-", &format!("sofa-{n}"));
            Arc::new(HashSet::from([sofa]))
        })
        .collect();
    let catalog = RotatingCatalog::new(snapshots);
    let (open, gate) = watch::channel(false);

    let mut run =
        Running::launch(Arc::clone(&catalog), &StateDir::new(dir.path()), Duration::from_millis(2), Some(gate))
            .unwrap();
    run.wait_for_subscribers(&[1]).await;
    catalog.rolling.store(true, Ordering::SeqCst);

    // Hold every delivery until the catalog is exhausted or polling has been
    // held back by the stalled dispatcher, whichever comes first.
    tokio::time::timeout(WAIT, async {
        let mut seen = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let fetched = catalog.fetched();
            if fetched >= SNAPSHOTS || fetched == seen {
                break;
            }
            seen = fetched;
        }
    })
    .await
    .expect("catalog fetching neither finished nor stalled");
    assert!(catalog.fetched() > 64, "only {} snapshots fetched", catalog.fetched());
    open.send(true).unwrap();

    let mut alerted = HashSet::new();
    for _ in 0..SNAPSHOTS {
        let (chat, text) = run.next_message().await;
        assert_eq!(chat, ChatId(1));
        assert!(alerted.insert(text.clone()), "alerted twice: {text}");
    }
    let expected: HashSet<String> = (0..SNAPSHOTS)
        .map(|n| format!("New outlet item! Sofa {n} - 100,-. https://shop.example/p/sofa-{n}"))
        .collect();
    assert_eq!(alerted, expected);
    run.assert_quiet().await;

    run.lifecycle.shutdown().await;
}
