use std::collections::{BTreeMap, BTreeSet};
use std::sync::{mpsc, Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use retract_core::{HaltReason, LoopLimits, MatchReason, TargetSet};
use retract_engine::{
    CancelFlag, CardFault, CardHandle, ChannelProgressSink, ClickStrategy, EngineEvent,
    FieldStrategy, ListError, ListSession, ProgressSink, SessionError, SiteProfile,
    WithdrawEngine, WithdrawSettings,
};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        engine_logging::initialize_for_tests();
    });
}

const CARD: &str = "div.card";
const PROFILE_LINK: &str = "a.profile";
const NAME: &str = "a.name";
const PARA: &str = "p";
const BUTTON: &str = "button";
const DIALOG: &str = "dialog.confirm";
const DIALOG_BUTTON: &str = "dialog.confirm button";

fn test_profile() -> SiteProfile {
    SiteProfile {
        login_url: "https://site.test/login".into(),
        list_url: "https://site.test/sent".into(),
        logged_in_marker: "nav.me".into(),
        card: CARD.into(),
        identity: vec![FieldStrategy::Attr {
            selector: PROFILE_LINK.into(),
            attr: "href".into(),
        }],
        display_name: vec![FieldStrategy::Text {
            selector: NAME.into(),
        }],
        headline: vec![FieldStrategy::NthText {
            selector: PARA.into(),
            index: 1,
        }],
        time_sent: vec![FieldStrategy::TextContaining {
            selector: PARA.into(),
            needle: "Sent".into(),
        }],
        withdraw_click: vec![ClickStrategy::TextMatch {
            selector: BUTTON.into(),
            needle: "Withdraw".into(),
        }],
        confirm_dialog: DIALOG.into(),
        confirm_click: vec![ClickStrategy::TextMatch {
            selector: DIALOG_BUTTON.into(),
            needle: "Withdraw".into(),
        }],
        cancel_click: vec![ClickStrategy::TextMatch {
            selector: DIALOG_BUTTON.into(),
            needle: "Cancel".into(),
        }],
    }
}

fn fast_settings() -> WithdrawSettings {
    WithdrawSettings {
        limits: LoopLimits {
            max_load_cycles: 10,
            stall_cycles: 2,
        },
        list_ready_timeout: Duration::from_millis(60),
        initial_settle: Duration::ZERO,
        confirm_timeout: Duration::from_millis(30),
        dialog_close_timeout: Duration::from_millis(30),
        post_action_delay: Duration::ZERO,
        load_settle: Duration::ZERO,
        scan_load_cycles: 0,
        max_withdrawals: None,
    }
}

fn engine() -> WithdrawEngine {
    WithdrawEngine::new(test_profile(), fast_settings())
        .with_clock(Arc::new(|| "2026-01-01T00:00:00+00:00".to_string()))
}

fn identity_targets(links: &[&str]) -> TargetSet {
    TargetSet::from_identities(links.iter().copied())
}

/// How one fake card behaves when its withdraw control is pressed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Prompt opens, confirming removes the card and closes the prompt.
    Confirm,
    /// The card renders no withdraw control at all.
    NoControl,
    /// Clicking removes the card without any prompt.
    Silent,
    /// Clicking does nothing and no prompt appears.
    SilentNoop,
    /// Prompt opens but swallows the confirm click and stays open.
    StuckDialog,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fields {
    Readable,
    /// The identity selector matches nothing.
    MissingIdentity,
    /// Reading the identity raises a driver error.
    ReadError,
}

#[derive(Clone)]
struct FakeCard {
    link: &'static str,
    name: &'static str,
    headline: &'static str,
    sent: &'static str,
    flow: Flow,
    fields: Fields,
}

impl FakeCard {
    fn new(link: &'static str, name: &'static str) -> Self {
        Self {
            link,
            name,
            headline: "Staff Engineer",
            sent: "Sent 3 weeks ago",
            flow: Flow::Confirm,
            fields: Fields::Readable,
        }
    }

    fn flow(mut self, flow: Flow) -> Self {
        self.flow = flow;
        self
    }

    fn fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }
}

/// Scripted list: batches become visible one per lazy-load trigger, and
/// withdrawn cards disappear from every later snapshot. Handles are
/// generation-checked exactly like the real adapter.
struct MockSession {
    batches: Vec<Vec<FakeCard>>,
    loads: usize,
    total_loads: u64,
    removed: BTreeSet<String>,
    snapshot: Vec<FakeCard>,
    generation: u64,
    dialog_for: Option<FakeCard>,
    list_ready: bool,
    grow_forever: bool,
    fail_load_after: Option<u64>,
    withdraw_clicks: BTreeMap<String, usize>,
    confirm_clicks: usize,
    cancel_clicks: usize,
    calls: usize,
}

impl MockSession {
    fn new(batches: Vec<Vec<FakeCard>>) -> Self {
        Self {
            batches,
            loads: 0,
            total_loads: 0,
            removed: BTreeSet::new(),
            snapshot: Vec::new(),
            generation: 0,
            dialog_for: None,
            list_ready: true,
            grow_forever: false,
            fail_load_after: None,
            withdraw_clicks: BTreeMap::new(),
            confirm_clicks: 0,
            cancel_clicks: 0,
            calls: 0,
        }
    }

    fn visible(&self) -> Vec<FakeCard> {
        if self.batches.is_empty() {
            return Vec::new();
        }
        let upto = self.loads.min(self.batches.len() - 1);
        self.batches[..=upto]
            .iter()
            .flatten()
            .filter(|card| !self.removed.contains(card.link))
            .cloned()
            .collect()
    }

    fn card(&self, handle: CardHandle) -> Result<FakeCard, SessionError> {
        if handle.generation() != self.generation {
            return Err(SessionError::StaleHandle {
                handle: handle.generation(),
                current: self.generation,
            });
        }
        self.snapshot
            .get(handle.index())
            .cloned()
            .ok_or_else(|| SessionError::Driver("card index out of range".into()))
    }

    fn clicks(&self, link: &str) -> usize {
        self.withdraw_clicks.get(link).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ListSession for MockSession {
    async fn snapshot_cards(&mut self, selector: &str) -> Result<Vec<CardHandle>, SessionError> {
        self.calls += 1;
        assert_eq!(selector, CARD);
        self.snapshot = self.visible();
        self.generation += 1;
        Ok((0..self.snapshot.len())
            .map(|index| CardHandle::new(self.generation, index))
            .collect())
    }

    async fn card_texts(
        &mut self,
        card: CardHandle,
        selector: &str,
    ) -> Result<Vec<String>, SessionError> {
        self.calls += 1;
        let card = self.card(card)?;
        Ok(match selector {
            NAME => vec![card.name.to_string()],
            PARA => vec![
                "3 mutual connections".to_string(),
                card.headline.to_string(),
                card.sent.to_string(),
            ],
            BUTTON => match card.flow {
                Flow::NoControl => Vec::new(),
                _ => vec!["Withdraw".to_string()],
            },
            _ => Vec::new(),
        })
    }

    async fn card_attr(
        &mut self,
        card: CardHandle,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, SessionError> {
        self.calls += 1;
        let card = self.card(card)?;
        if selector == PROFILE_LINK && attr == "href" {
            return match card.fields {
                Fields::Readable => Ok(Some(card.link.to_string())),
                Fields::MissingIdentity => Ok(None),
                Fields::ReadError => Err(SessionError::Driver("synthetic read failure".into())),
            };
        }
        Ok(None)
    }

    async fn click_in_card(
        &mut self,
        card: CardHandle,
        selector: &str,
        index: usize,
    ) -> Result<bool, SessionError> {
        self.calls += 1;
        let card = self.card(card)?;
        if selector != BUTTON || index != 0 || card.flow == Flow::NoControl {
            return Ok(false);
        }
        *self
            .withdraw_clicks
            .entry(card.link.to_string())
            .or_insert(0) += 1;
        match card.flow {
            Flow::Confirm | Flow::StuckDialog => self.dialog_for = Some(card),
            Flow::Silent => {
                self.removed.insert(card.link.to_string());
            }
            Flow::SilentNoop | Flow::NoControl => {}
        }
        Ok(true)
    }

    async fn page_texts(&mut self, selector: &str) -> Result<Vec<String>, SessionError> {
        self.calls += 1;
        Ok(if selector == DIALOG_BUTTON && self.dialog_for.is_some() {
            vec!["Cancel".to_string(), "Withdraw".to_string()]
        } else {
            Vec::new()
        })
    }

    async fn click_on_page(&mut self, selector: &str, index: usize) -> Result<bool, SessionError> {
        self.calls += 1;
        if selector != DIALOG_BUTTON {
            return Ok(false);
        }
        let Some(card) = self.dialog_for.clone() else {
            return Ok(false);
        };
        match index {
            // The dialog's own withdraw button.
            1 => {
                self.confirm_clicks += 1;
                if card.flow == Flow::Confirm {
                    self.removed.insert(card.link.to_string());
                    self.dialog_for = None;
                }
                Ok(true)
            }
            0 => {
                self.cancel_clicks += 1;
                self.dialog_for = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError> {
        self.calls += 1;
        Ok(match selector {
            CARD => self.list_ready && !self.visible().is_empty(),
            DIALOG => self.dialog_for.is_some(),
            _ => false,
        })
    }

    async fn trigger_lazy_load(&mut self) -> Result<(), SessionError> {
        self.calls += 1;
        self.total_loads += 1;
        if let Some(cap) = self.fail_load_after {
            if self.total_loads > cap {
                return Err(SessionError::Driver("tab crashed".into()));
            }
        }
        if self.loads + 1 < self.batches.len() {
            self.loads += 1;
        }
        Ok(())
    }

    async fn measure_extent(&mut self) -> Result<u64, SessionError> {
        self.calls += 1;
        Ok(if self.grow_forever {
            1_000 + 500 * self.total_loads
        } else {
            1_000 + 500 * self.loads as u64
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(2)
    }
}

#[derive(Default)]
struct TestSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl TestSink {
    fn new() -> Self {
        Self::default()
    }

    fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Raises the cancel flag as soon as a withdrawal goes unverified, like
/// an operator interrupting right after a prompt fails to appear.
struct CancelOnUnverified {
    flag: CancelFlag,
    events: Mutex<Vec<EngineEvent>>,
}

impl CancelOnUnverified {
    fn new(flag: CancelFlag) -> Self {
        Self {
            flag,
            events: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for CancelOnUnverified {
    fn emit(&self, event: EngineEvent) {
        if matches!(event, EngineEvent::WithdrawalUnverified { .. }) {
            self.flag.cancel();
        }
        self.events.lock().unwrap().push(event);
    }
}

fn confirmed_identities(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::WithdrawalConfirmed { identity } => Some(identity.clone()),
            _ => None,
        })
        .collect()
}

fn match_reasons(events: &[EngineEvent]) -> Vec<MatchReason> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::CandidateMatched { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn withdraws_single_target_and_halts_complete() {
    init_logging();
    let mut session = MockSession::new(vec![vec![
        FakeCard::new("https://example.com/in/ann", "Ann Barr"),
        FakeCard::new("https://example.com/in/other", "Someone Else"),
    ]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.withdrawn.len(), 1);
    let record = &report.withdrawn[0];
    assert_eq!(record.identity, "https://example.com/in/ann");
    assert_eq!(record.display_name.as_deref(), Some("Ann Barr"));
    assert_eq!(record.headline.as_deref(), Some("Staff Engineer"));
    assert_eq!(record.time_sent.as_deref(), Some("Sent 3 weeks ago"));
    assert_eq!(record.withdrawn_utc, "2026-01-01T00:00:00+00:00");
    assert!(report.failed.is_empty());
    assert!(report.unresolved.is_complete());

    assert_eq!(session.clicks("https://example.com/in/ann"), 1);
    assert_eq!(session.clicks("https://example.com/in/other"), 0);
    assert_eq!(session.confirm_clicks, 1);
    assert_eq!(session.cancel_clicks, 0);

    let events = sink.take();
    assert_eq!(
        confirmed_identities(&events),
        vec!["https://example.com/in/ann".to_string()]
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, EngineEvent::Halted { reason: HaltReason::Complete })));
}

#[tokio::test]
async fn progress_events_stream_in_order_over_a_channel() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )]]);
    let (tx, rx) = mpsc::channel();
    let sink = ChannelProgressSink::new(tx);

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run completes");
    assert_eq!(report.halt, HaltReason::Complete);

    drop(sink);
    let events: Vec<EngineEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            EngineEvent::CandidateMatched {
                identity: "https://example.com/in/ann".into(),
                display_name: Some("Ann Barr".into()),
                reason: MatchReason::Identity,
            },
            EngineEvent::WithdrawalConfirmed {
                identity: "https://example.com/in/ann".into(),
            },
            EngineEvent::Halted {
                reason: HaltReason::Complete,
            },
        ]
    );
}

#[tokio::test]
async fn absent_target_halts_stalled_and_stays_pending() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/bystander",
        "Búi Stander",
    )]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ghost"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Stalled);
    assert!(report.withdrawn.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.unresolved.remaining(), (1, 0));
    assert_eq!(
        report.unresolved.pending_identities().collect::<Vec<_>>(),
        vec!["https://example.com/in/ghost"]
    );
    // First cycle discovers the bystander, then two stalled cycles.
    assert_eq!(report.cycles_run, 3);
    assert_eq!(session.clicks("https://example.com/in/bystander"), 0);
}

#[tokio::test]
async fn identity_match_clears_the_name_channel_too() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )]]);
    let mut targets = TargetSet::new();
    targets.insert_identity("https://example.com/in/ann");
    targets.insert_name("Ann Barr");
    let sink = TestSink::new();

    let report = engine()
        .withdraw(&mut session, targets, &sink)
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.unresolved.remaining(), (0, 0));
    assert_eq!(match_reasons(&sink.take()), vec![MatchReason::Identity]);
}

#[tokio::test]
async fn duplicate_cards_are_withdrawn_once() {
    init_logging();
    // The list transiently renders the same invitation twice.
    let mut session = MockSession::new(vec![vec![
        FakeCard::new("https://example.com/in/john", "John Doe"),
        FakeCard::new("https://example.com/in/john", "John Doe"),
    ]]);
    let mut targets = TargetSet::new();
    targets.insert_name("John Doe");
    let sink = TestSink::new();

    let report = engine()
        .withdraw(&mut session, targets, &sink)
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.withdrawn.len(), 1);
    assert_eq!(session.clicks("https://example.com/in/john"), 1);
    assert_eq!(match_reasons(&sink.take()), vec![MatchReason::Name]);
}

#[tokio::test]
async fn deep_batch_is_reached_by_lazy_loading() {
    init_logging();
    let mut session = MockSession::new(vec![
        vec![FakeCard::new("https://example.com/in/first", "First")],
        vec![FakeCard::new("https://example.com/in/second", "Second")],
        vec![FakeCard::new("https://example.com/in/target", "Tara Gett")],
    ]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/target"]),
            &sink,
        )
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.cycles_run, 2);
    assert_eq!(report.withdrawn.len(), 1);
    assert_eq!(session.total_loads, 2);
}

#[tokio::test]
async fn missing_withdraw_control_is_a_failed_attempt() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )
    .flow(Flow::NoControl)]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Stalled);
    assert!(report.withdrawn.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].fault, CardFault::ActionUnavailable);
    // A failed attempt keeps its target pending for a later run.
    assert_eq!(report.unresolved.remaining(), (1, 0));
    // And is never retried within this run.
    assert_eq!(session.clicks("https://example.com/in/ann"), 0);
}

#[tokio::test]
async fn stuck_dialog_is_cancelled_and_other_cards_continue() {
    init_logging();
    let mut session = MockSession::new(vec![vec![
        FakeCard::new("https://example.com/in/stuck", "Stu Card").flow(Flow::StuckDialog),
        FakeCard::new("https://example.com/in/fine", "Fiona Fine"),
    ]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&[
                "https://example.com/in/stuck",
                "https://example.com/in/fine",
            ]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Stalled);
    assert_eq!(report.withdrawn.len(), 1);
    assert_eq!(report.withdrawn[0].identity, "https://example.com/in/fine");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].identity, "https://example.com/in/stuck");
    assert_eq!(
        report.failed[0].fault,
        CardFault::ConfirmFailed("dialog did not close".into())
    );
    // The stuck dialog was dismissed so the next card could proceed.
    assert_eq!(session.cancel_clicks, 1);
    assert_eq!(report.unresolved.remaining(), (1, 0));
}

#[tokio::test]
async fn silent_withdrawal_is_verified_by_disappearance() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )
    .flow(Flow::Silent)]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.withdrawn.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(session.confirm_clicks, 0);

    let events = sink.take();
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::WithdrawalUnverified { identity } if identity == "https://example.com/in/ann"
    )));
    assert_eq!(
        confirmed_identities(&events),
        vec!["https://example.com/in/ann".to_string()]
    );
}

#[tokio::test]
async fn silent_click_that_does_nothing_is_a_failed_attempt() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )
    .flow(Flow::SilentNoop)]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Stalled);
    assert!(report.withdrawn.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].fault, CardFault::StillPresent);
    assert_eq!(report.unresolved.remaining(), (1, 0));
    // The card that never responded is clicked exactly once.
    assert_eq!(session.clicks("https://example.com/in/ann"), 1);
}

#[tokio::test]
async fn cancelled_run_verifies_outstanding_silent_clicks() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )
    .flow(Flow::Silent)]]);
    let engine = engine();
    let sink = CancelOnUnverified::new(engine.cancel_flag());

    let report = engine
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Cancelled);
    assert_eq!(report.withdrawn.len(), 1);
    assert_eq!(report.withdrawn[0].identity, "https://example.com/in/ann");
    assert!(report.failed.is_empty());
    assert!(report.unresolved.is_complete());
    assert_eq!(report.cycles_run, 0);
    assert_eq!(session.total_loads, 0);

    // The silent click was settled by one more snapshot after the
    // cancellation, not assumed withdrawn and not dropped.
    let events = sink.take();
    assert_eq!(
        events,
        vec![
            EngineEvent::CandidateMatched {
                identity: "https://example.com/in/ann".into(),
                display_name: Some("Ann Barr".into()),
                reason: MatchReason::Identity,
            },
            EngineEvent::WithdrawalUnverified {
                identity: "https://example.com/in/ann".into(),
            },
            EngineEvent::WithdrawalConfirmed {
                identity: "https://example.com/in/ann".into(),
            },
            EngineEvent::Halted {
                reason: HaltReason::Cancelled,
            },
        ]
    );
}

#[tokio::test]
async fn unreadable_cards_are_skipped_not_fatal() {
    init_logging();
    let mut session = MockSession::new(vec![vec![
        FakeCard::new("https://example.com/in/blank", "Blank").fields(Fields::MissingIdentity),
        FakeCard::new("https://example.com/in/broken", "Broken").fields(Fields::ReadError),
        FakeCard::new("https://example.com/in/ann", "Ann Barr"),
    ]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect("run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.withdrawn.len(), 1);

    let skipped: Vec<String> = sink
        .take()
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::CandidateSkipped { detail } => Some(detail),
            _ => None,
        })
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped[0].contains("identity"));
    assert!(skipped[1].contains("synthetic read failure"));
}

#[tokio::test]
async fn withdrawal_cap_halts_the_run() {
    init_logging();
    let mut session = MockSession::new(vec![vec![
        FakeCard::new("https://example.com/in/ann", "Ann Barr"),
        FakeCard::new("https://example.com/in/bob", "Bob Dole"),
    ]]);
    let mut settings = fast_settings();
    settings.max_withdrawals = Some(1);
    let engine = WithdrawEngine::new(test_profile(), settings);
    let sink = TestSink::new();

    let report = engine
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann", "https://example.com/in/bob"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::LimitReached);
    assert_eq!(report.withdrawn.len(), 1);
    assert_eq!(report.unresolved.remaining(), (1, 0));
    assert_eq!(session.clicks("https://example.com/in/bob"), 0);
}

#[tokio::test]
async fn cancellation_halts_between_cycles() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/bystander",
        "Búi Stander",
    )]]);
    let engine = engine();
    engine.cancel_flag().cancel();
    let sink = TestSink::new();

    let report = engine
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ghost"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    assert_eq!(report.halt, HaltReason::Cancelled);
    assert!(report.withdrawn.is_empty());
    assert_eq!(report.cycles_run, 0);
    assert_eq!(session.total_loads, 0);
}

#[tokio::test]
async fn empty_targets_never_touch_the_page() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )]]);
    let sink = TestSink::new();

    let report = engine()
        .withdraw(&mut session, TargetSet::new(), &sink)
        .await
        .expect("empty run completes");

    assert_eq!(report.halt, HaltReason::Complete);
    assert_eq!(report.cycles_run, 0);
    assert_eq!(session.calls, 0);
}

#[tokio::test]
async fn list_never_ready_aborts_with_empty_partials() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )]]);
    session.list_ready = false;
    let sink = TestSink::new();

    let failure = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect_err("run aborts");

    assert!(matches!(failure.error, ListError::NotReady(_)));
    assert!(failure.withdrawn.is_empty());
    assert!(failure.failed.is_empty());
    assert_eq!(failure.unresolved.remaining(), (1, 0));
}

#[tokio::test]
async fn driver_failure_carries_partial_results() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )]]);
    // The first lazy-load works, the second one blows up.
    session.fail_load_after = Some(1);
    let sink = TestSink::new();

    let failure = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann", "https://example.com/in/gone"]),
            &sink,
        )
        .await
        .expect_err("run aborts");

    assert!(matches!(failure.error, ListError::Session(_)));
    assert_eq!(failure.withdrawn.len(), 1);
    assert_eq!(failure.withdrawn[0].identity, "https://example.com/in/ann");
    assert_eq!(failure.unresolved.remaining(), (1, 0));
}

#[tokio::test]
async fn aborted_run_reports_unverified_clicks_as_failed() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/ann",
        "Ann Barr",
    )
    .flow(Flow::Silent)]]);
    // The lazy-load right after the silent click blows up, so no later
    // snapshot can settle it.
    session.fail_load_after = Some(0);
    let sink = TestSink::new();

    let failure = engine()
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ann"]),
            &sink,
        )
        .await
        .expect_err("run aborts");

    assert!(matches!(failure.error, ListError::Session(_)));
    assert!(failure.withdrawn.is_empty());
    assert_eq!(failure.failed.len(), 1);
    assert_eq!(failure.failed[0].identity, "https://example.com/in/ann");
    assert_eq!(
        failure.failed[0].fault,
        CardFault::ConfirmFailed("run aborted before verification".into())
    );
    // The target stays pending for a later run; the click is never
    // retried inside this one.
    assert_eq!(failure.unresolved.remaining(), (1, 0));
    assert_eq!(session.clicks("https://example.com/in/ann"), 1);
}

#[tokio::test]
async fn cycle_ceiling_halts_a_list_that_keeps_growing() {
    init_logging();
    let mut session = MockSession::new(vec![vec![FakeCard::new(
        "https://example.com/in/bystander",
        "Búi Stander",
    )]]);
    session.grow_forever = true;
    let mut settings = fast_settings();
    settings.limits.max_load_cycles = 3;
    let engine = WithdrawEngine::new(test_profile(), settings);
    let sink = TestSink::new();

    let report = engine
        .withdraw(
            &mut session,
            identity_targets(&["https://example.com/in/ghost"]),
            &sink,
        )
        .await
        .expect("run halts cleanly");

    // Growth keeps the stall heuristic quiet, so only the ceiling stops it.
    assert_eq!(report.halt, HaltReason::CycleLimit);
    assert_eq!(report.cycles_run, 3);
}
