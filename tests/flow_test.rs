// tests/flow_test.rs
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use mediabot::agent::TextGenerator;
use mediabot::channel::{ChatTransport, InboundMessage};
use mediabot::error::{BotError, BotResult, RetrievalKind};
use mediabot::fetch::{Artifact, Dispatcher, FetchOutcome, Fetcher, RetrievalFailure};
use mediabot::flow::{
    CommandRouter, ConversationState, FlowKind, FlowServices, MediaBot, MidFlowPolicy,
    SearchLimits, SessionStore, StepId,
};
use mediabot::search::{ResultDescriptor, SearchProvider};

#[derive(Default)]
struct MockSearch {
    audio: Vec<ResultDescriptor>,
    documents: Vec<ResultDescriptor>,
    fail: bool,
    calls: AtomicUsize,
    last_count: Mutex<Option<usize>>,
}

impl MockSearch {
    fn answer(&self, count: usize, items: &[ResultDescriptor]) -> BotResult<Vec<ResultDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_count.lock().unwrap() = Some(count);
        if self.fail {
            return Err(BotError::Provider("api error 5".into()));
        }
        Ok(items.iter().take(count).cloned().collect())
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search_audio(&self, _query: &str, count: usize) -> BotResult<Vec<ResultDescriptor>> {
        self.answer(count, &self.audio)
    }

    async fn search_documents(&self, _query: &str, count: usize) -> BotResult<Vec<ResultDescriptor>> {
        self.answer(count, &self.documents)
    }
}

/// Fails every locator containing `bad`.
#[derive(Default)]
struct MockFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, descriptor: &ResultDescriptor) -> FetchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if descriptor.locator.contains("bad") {
            FetchOutcome::Failed(RetrievalFailure {
                descriptor: descriptor.clone(),
                kind: RetrievalKind::Status(404),
            })
        } else {
            FetchOutcome::Fetched(Artifact::new(descriptor.clone(), b"payload".to_vec()))
        }
    }
}

struct EchoGenerator {
    fail: bool,
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> BotResult<String> {
        if self.fail {
            return Err(BotError::Generation("model offline".into()));
        }
        Ok(format!("generated: {prompt}"))
    }
}

/// Takes a while per call and records how many calls overlap.
#[derive(Default)]
struct SlowGenerator {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TextGenerator for SlowGenerator {
    async fn generate(&self, prompt: &str) -> BotResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("generated: {prompt}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Text(String, String),
    Audio(String, String),
    Document(String, String),
}

/// Records everything sent. Artifacts whose title contains `undeliverable`
/// are refused.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self, session: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(id, text) if id == session => Some(text),
                _ => None,
            })
            .collect()
    }

    fn artifacts(&self, session: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio(id, title) | Sent::Document(id, title) if id == session => Some(title),
                _ => None,
            })
            .collect()
    }

    fn record_artifact(&self, sent: Sent, artifact: &Artifact) -> BotResult<()> {
        if artifact.descriptor.title.contains("undeliverable") {
            return Err(BotError::Delivery("file too big".into()));
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, session_id: &str, text: &str) -> BotResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_audio(&self, session_id: &str, artifact: Artifact) -> BotResult<()> {
        let sent = Sent::Audio(session_id.to_string(), artifact.descriptor.title.clone());
        self.record_artifact(sent, &artifact)
    }

    async fn send_document(&self, session_id: &str, artifact: Artifact) -> BotResult<()> {
        let sent = Sent::Document(session_id.to_string(), artifact.descriptor.title.clone());
        self.record_artifact(sent, &artifact)
    }
}

struct Harness {
    bot: Arc<MediaBot>,
    search: Arc<MockSearch>,
    fetcher: Arc<MockFetcher>,
    transport: Arc<RecordingTransport>,
}

fn harness_with(search: MockSearch, generator_fails: bool, policy: MidFlowPolicy) -> Harness {
    let generator = Arc::new(EchoGenerator {
        fail: generator_fails,
    });
    build_harness(search, generator, policy)
}

fn build_harness(
    search: MockSearch,
    generator: Arc<dyn TextGenerator>,
    policy: MidFlowPolicy,
) -> Harness {
    let search = Arc::new(search);
    let fetcher = Arc::new(MockFetcher::default());
    let transport = Arc::new(RecordingTransport::default());
    let services = FlowServices {
        search: search.clone(),
        dispatcher: Dispatcher::new(fetcher.clone(), 8),
        generator,
        transport: transport.clone(),
        limits: SearchLimits::default(),
    };
    let bot = MediaBot::new(
        CommandRouter::with_default_flows(),
        SessionStore::new(60),
        services,
        policy,
    );
    Harness {
        bot,
        search,
        fetcher,
        transport,
    }
}

fn harness(search: MockSearch) -> Harness {
    harness_with(search, false, MidFlowPolicy::Replace)
}

fn tracks(names: &[&str]) -> Vec<ResultDescriptor> {
    names
        .iter()
        .map(|n| ResultDescriptor::audio(format!("https://cdn.test/{n}.mp3"), *n, Some("Artist".into()), Some(180)))
        .collect()
}

async fn say(h: &Harness, session: &str, text: &str) -> Vec<mediabot::flow::FlowReport> {
    h.bot.handle(session, InboundMessage::parse(text)).await
}

#[tokio::test]
async fn document_search_filters_overfetched_results() {
    let mut documents = Vec::new();
    for i in 0..20 {
        let ext = match i {
            1 | 4 | 7 | 10 | 13 | 16 => "pdf",
            _ => "jpg",
        };
        documents.push(ResultDescriptor::document(
            format!("https://docs.test/{i}"),
            format!("doc{i}"),
            ext,
        ));
    }
    let h = harness(MockSearch {
        documents,
        ..Default::default()
    });

    say(&h, "1", "/document").await;
    let reports = say(&h, "1", "rust book").await;

    assert_eq!(*h.search.last_count.lock().unwrap(), Some(20));
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].requested, 5);
    assert_eq!(reports[0].delivered, 5);
    assert_eq!(
        h.transport.artifacts("1"),
        vec!["doc1", "doc4", "doc7", "doc10", "doc13"]
    );
    assert!(h.bot.state_of("1").await.is_idle());
}

#[tokio::test]
async fn audio_without_results_sends_notice_and_fetches_nothing() {
    let h = harness(MockSearch::default());

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "nothing like this").await;

    assert_eq!(
        reports[0].aborted,
        Some(BotError::NoResults("nothing like this".into()))
    );
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.transport.texts("1").last().unwrap(),
        "Nothing found for \"nothing like this\"."
    );
    assert!(h.transport.artifacts("1").is_empty());
    assert!(h.bot.state_of("1").await.is_idle());
}

#[tokio::test]
async fn failed_fetches_are_dropped_and_the_rest_delivered_in_order() {
    let h = harness(MockSearch {
        audio: tracks(&["one", "bad-two", "three", "bad-four", "five"]),
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "mix").await;

    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 5);
    assert_eq!(reports[0].requested, 5);
    assert_eq!(reports[0].delivered, 3);
    assert_eq!(reports[0].retrieval_failures, 2);
    assert!(reports[0].aborted.is_none());
    assert_eq!(h.transport.artifacts("1"), vec!["one", "three", "five"]);
    assert!(h.bot.state_of("1").await.is_idle());
}

#[tokio::test]
async fn all_fetches_failing_sends_a_notice() {
    let h = harness(MockSearch {
        audio: tracks(&["bad-a", "bad-b"]),
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "mix").await;

    assert_eq!(reports[0].delivered, 0);
    assert_eq!(reports[0].retrieval_failures, 2);
    assert_eq!(
        h.transport.texts("1").last().unwrap(),
        "Could not download any of the results."
    );
    assert!(h.bot.state_of("1").await.is_idle());
}

#[tokio::test]
async fn delivery_failure_does_not_stop_the_batch() {
    let h = harness(MockSearch {
        audio: tracks(&["one", "undeliverable", "three"]),
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "mix").await;

    assert_eq!(reports[0].delivered, 2);
    assert_eq!(reports[0].delivery_failures, 1);
    assert_eq!(h.transport.artifacts("1"), vec!["one", "three"]);
}

#[tokio::test]
async fn provider_failure_aborts_with_notice() {
    let h = harness(MockSearch {
        fail: true,
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "anything").await;

    assert!(matches!(reports[0].aborted, Some(BotError::Provider(_))));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.transport.texts("1").last().unwrap(),
        "Search is unavailable right now, try again later."
    );
    assert!(h.bot.state_of("1").await.is_idle());
}

#[tokio::test]
async fn blank_query_never_reaches_the_provider() {
    let h = harness(MockSearch {
        audio: tracks(&["one"]),
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "   ").await;

    assert_eq!(reports[0].aborted, Some(BotError::NoResults(String::new())));
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_mid_flow_and_while_idle() {
    let h = harness(MockSearch::default());

    assert!(say(&h, "1", "/cancel").await.is_empty());
    assert!(h.transport.sent().is_empty());

    say(&h, "1", "/audio").await;
    assert_eq!(
        h.bot.state_of("1").await,
        ConversationState::AwaitingInput {
            flow: FlowKind::Audio,
            step: StepId::AwaitingQuery
        }
    );

    assert!(say(&h, "1", "/cancel").await.is_empty());
    assert!(h.bot.state_of("1").await.is_idle());
    assert_eq!(
        h.transport.texts("1"),
        vec!["Enter a track name or /cancel:", "Action cancelled"]
    );
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generate_flow_replies_with_generated_text() {
    let h = harness(MockSearch::default());

    say(&h, "7", "/generate").await;
    let reports = say(&h, "7", "a haiku about rust").await;

    assert_eq!(reports[0].flow, FlowKind::Generate);
    assert_eq!(reports[0].delivered, 1);
    assert_eq!(
        h.transport.texts("7"),
        vec!["Enter a prompt or /cancel:", "generated: a haiku about rust"]
    );
}

#[tokio::test]
async fn generation_failure_sends_notice() {
    let h = harness_with(MockSearch::default(), true, MidFlowPolicy::Replace);

    say(&h, "7", "/generate").await;
    let reports = say(&h, "7", "hello").await;

    assert!(matches!(reports[0].aborted, Some(BotError::Generation(_))));
    assert_eq!(
        h.transport.texts("7").last().unwrap(),
        "Could not generate an answer right now."
    );
    assert!(h.bot.state_of("7").await.is_idle());
}

#[tokio::test]
async fn sessions_are_independent() {
    let h = harness(MockSearch {
        audio: tracks(&["one"]),
        ..Default::default()
    });

    say(&h, "a", "/audio").await;
    say(&h, "b", "/generate").await;

    assert_eq!(h.bot.state_of("a").await.active_flow(), Some(FlowKind::Audio));
    assert_eq!(
        h.bot.state_of("b").await.active_flow(),
        Some(FlowKind::Generate)
    );

    say(&h, "a", "song").await;
    assert!(h.bot.state_of("a").await.is_idle());
    assert_eq!(
        h.bot.state_of("b").await.active_flow(),
        Some(FlowKind::Generate)
    );
    assert_eq!(h.transport.artifacts("a"), vec!["one"]);
    assert!(h.transport.artifacts("b").is_empty());
}

#[tokio::test]
async fn concurrent_sessions_complete_independently() {
    let h = harness(MockSearch {
        audio: tracks(&["one", "two"]),
        ..Default::default()
    });
    for id in ["a", "b", "c"] {
        say(&h, id, "/audio").await;
    }

    let mut handles = Vec::new();
    for id in ["a", "b", "c"] {
        let bot = h.bot.clone();
        handles.push(tokio::spawn(async move {
            bot.handle(id, InboundMessage::text("mix")).await
        }));
    }
    for handle in handles {
        let reports = handle.await.unwrap();
        assert_eq!(reports[0].delivered, 2);
    }
    for id in ["a", "b", "c"] {
        assert_eq!(h.transport.artifacts(id), vec!["one", "two"]);
        assert!(h.bot.state_of(id).await.is_idle());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_of_one_session_are_handled_one_at_a_time() {
    let generator = Arc::new(SlowGenerator::default());
    let h = build_harness(MockSearch::default(), generator.clone(), MidFlowPolicy::Replace);
    say(&h, "1", "/generate").await;

    let first = {
        let bot = h.bot.clone();
        tokio::spawn(async move { bot.handle("1", InboundMessage::text("first")).await })
    };
    let second = {
        let bot = h.bot.clone();
        tokio::spawn(async move { bot.handle("1", InboundMessage::text("second")).await })
    };
    let mut reports = vec![first.await.unwrap(), second.await.unwrap()];
    reports.sort_by_key(|r| r.len());

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.peak.load(Ordering::SeqCst), 1);
    // whichever message lost the race found the session idle and was ignored
    assert!(reports[0].is_empty());
    assert_eq!(reports[1].len(), 1);
    assert_eq!(reports[1][0].delivered, 1);
    assert_eq!(h.transport.texts("1").len(), 2);
    assert!(h.bot.state_of("1").await.is_idle());
    assert_eq!(h.bot.sessions().leased_count(), 0);
}

#[tokio::test]
async fn new_command_mid_flow_replaces_the_waiting_flow() {
    let h = harness(MockSearch {
        documents: vec![ResultDescriptor::document("https://docs.test/1", "book", "epub")],
        ..Default::default()
    });

    say(&h, "1", "/audio").await;
    say(&h, "1", "/document").await;
    assert_eq!(
        h.bot.state_of("1").await.active_flow(),
        Some(FlowKind::Document)
    );

    let reports = say(&h, "1", "book").await;
    assert_eq!(reports[0].flow, FlowKind::Document);
    assert_eq!(h.transport.artifacts("1"), vec!["book"]);
}

#[tokio::test]
async fn reject_policy_keeps_the_waiting_flow() {
    let h = harness_with(MockSearch::default(), false, MidFlowPolicy::Reject);

    say(&h, "1", "/audio").await;
    say(&h, "1", "/document").await;

    assert_eq!(h.bot.state_of("1").await.active_flow(), Some(FlowKind::Audio));
    assert!(
        h.transport
            .texts("1")
            .last()
            .unwrap()
            .contains("/cancel")
    );
}

#[tokio::test]
async fn help_mid_flow_answers_without_leaving_the_flow() {
    let h = harness(MockSearch::default());

    say(&h, "1", "/audio").await;
    let reports = say(&h, "1", "/help").await;

    assert!(reports.is_empty());
    assert!(h.transport.texts("1").last().unwrap().starts_with("Available commands:"));
    assert_eq!(h.bot.state_of("1").await.active_flow(), Some(FlowKind::Audio));
}

#[tokio::test]
async fn idle_text_is_ignored_and_unknown_commands_get_a_hint() {
    let h = harness(MockSearch::default());

    assert!(say(&h, "1", "hello there").await.is_empty());
    assert!(h.transport.sent().is_empty());

    say(&h, "1", "/video").await;
    assert!(h.transport.texts("1")[0].contains("/help"));
    assert!(h.bot.state_of("1").await.is_idle());
}
