// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One operator's supervision view.
//!
//! [`SupervisionPanel`] wires the aggregator, state machine, and send
//! coordinator to the event bridge, the refresh coalescers, and the polling
//! fallback. Views are published on `watch` channels.
//!
//! Refreshes from every source (change events, polling, reconnects, operator
//! actions) go through one worker task. The worker batches whatever is
//! queued, refreshes the list at most once per batch, and drops message
//! refreshes for sessions that are no longer selected.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_config::VigilConfig;
use vigil_core::types::sort_transcript;
use vigil_core::{
    ChangeEvent, ChangeKind, ChangeStream, ContactInfo, Conversation, ConversationFilters,
    ErrorKind, EventMatcher, Message, MessageDispatcher, SupervisionState, SupervisionStore, Table,
    VigilError,
};

use crate::aggregator::{ConversationAggregator, ConversationStats, DataSource};
use crate::bridge::{Backoff, EventBridge, Listener, TopicHandle, TopicSpec};
use crate::coalescer::Coalescer;
use crate::coordinator::{SendCoordinator, SendError, SendReport, SendRequest};
use crate::poller::PollingFallback;
use crate::state_machine::{SupervisionMachine, TransitionOutcome};

/// Tunables for a panel, usually taken from [`VigilConfig`].
#[derive(Debug, Clone)]
pub struct PanelSettings {
    pub operator_id: String,
    pub conversation_view: String,
    pub legacy_view: String,
    pub page_size: usize,
    pub list_debounce: Duration,
    pub search_debounce: Duration,
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub dispatch_timeout: Duration,
}

impl PanelSettings {
    pub fn from_config(config: &VigilConfig) -> Self {
        Self {
            operator_id: config.operator.id.clone(),
            conversation_view: config.storage.conversation_view.clone(),
            legacy_view: config.storage.legacy_view.clone(),
            page_size: config.aggregator.page_size,
            list_debounce: config.realtime.list_debounce(),
            search_debounce: config.realtime.search_debounce(),
            poll_interval: config.realtime.poll_interval(),
            backoff: Backoff::new(
                config.realtime.reconnect_initial(),
                config.realtime.reconnect_max(),
            ),
            dispatch_timeout: config.dispatch.timeout(),
        }
    }
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self::from_config(&VigilConfig::default())
    }
}

/// The three collaborators a panel talks to.
#[derive(Clone)]
pub struct PanelDeps {
    pub store: Arc<dyn SupervisionStore>,
    pub stream: Arc<dyn ChangeStream>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
}

/// An error as shown next to a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&VigilError> for ViewError {
    fn from(e: &VigilError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// The conversation list as last refreshed.
///
/// `stats` counts only the rows in `conversations`, not every conversation
/// in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListView {
    pub conversations: Vec<Conversation>,
    pub stats: ConversationStats,
    pub source: DataSource,
    pub loading: bool,
    /// Last refresh failure. Rows from the previous refresh are kept.
    pub error: Option<ViewError>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for ListView {
    fn default() -> Self {
        Self {
            conversations: Vec::new(),
            stats: ConversationStats::default(),
            source: DataSource::Primary,
            loading: true,
            error: None,
            refreshed_at: None,
        }
    }
}

/// The selected conversation's transcript and details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesView {
    pub session_id: Option<String>,
    /// Ascending by `created_at`.
    pub messages: Vec<Message>,
    pub contact: Option<ContactInfo>,
    pub supervision: Option<SupervisionState>,
    pub loading: bool,
    pub error: Option<ViewError>,
}

/// What a handler sees about the panel when an event is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelContext {
    pub selected_session: Option<String>,
    pub filters: ConversationFilters,
}

pub type PanelHandler = Arc<dyn Fn(&ChangeEvent, &PanelContext) + Send + Sync>;

/// Optional callbacks per watched relation.
#[derive(Clone, Default)]
pub struct PanelHandlers {
    pub on_conversation: Option<PanelHandler>,
    pub on_supervision: Option<PanelHandler>,
    pub on_message: Option<PanelHandler>,
}

/// Returned by handler registration; pass to
/// [`SupervisionPanel::remove_handlers`].
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    handle: TopicHandle,
}

enum Refresh {
    List(Option<oneshot::Sender<()>>),
    Messages(String, Option<oneshot::Sender<()>>),
}

#[derive(Default)]
struct ViewState {
    filters: RwLock<ConversationFilters>,
    selected: RwLock<Option<String>>,
}

impl ViewState {
    fn filters(&self) -> ConversationFilters {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_filters(&self, filters: ConversationFilters) {
        *self.filters.write().unwrap_or_else(PoisonError::into_inner) = filters;
    }

    fn set_search(&self, term: String) {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .search = Some(term).filter(|t| !t.trim().is_empty());
    }

    fn selected(&self) -> Option<String> {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn select(&self, session_id: Option<String>) {
        *self
            .selected
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session_id;
    }

    fn is_selected(&self, session_id: &str) -> bool {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(session_id)
    }

    fn context(&self) -> PanelContext {
        PanelContext {
            selected_session: self.selected(),
            filters: self.filters(),
        }
    }
}

/// State the refresh worker needs. Holds nothing that owns a listener, so
/// listeners can hold it without forming a cycle.
struct Shared {
    aggregator: ConversationAggregator,
    store: Arc<dyn SupervisionStore>,
    view: Arc<ViewState>,
    list_tx: watch::Sender<ListView>,
    messages_tx: watch::Sender<MessagesView>,
    /// Sent messages not yet seen in a stored transcript.
    optimistic: Mutex<Vec<Message>>,
}

impl Shared {
    async fn refresh_list(&self) {
        let filters = self.view.filters();
        self.list_tx.send_modify(|v| v.loading = true);
        match self.aggregator.list(&filters).await {
            Ok(page) => {
                debug!(
                    conversations = page.conversations.len(),
                    source = ?page.source,
                    "list refreshed"
                );
                self.list_tx.send_modify(|v| {
                    v.conversations = page.conversations;
                    v.stats = page.stats;
                    v.source = page.source;
                    v.loading = false;
                    v.error = None;
                    v.refreshed_at = Some(Utc::now());
                });
            }
            Err(e) => {
                warn!(error = %e, error_kind = %e.kind(), "list refresh failed");
                self.list_tx.send_modify(|v| {
                    v.loading = false;
                    v.error = Some(ViewError::from(&e));
                });
            }
        }
    }

    async fn refresh_messages(&self, session_id: &str) {
        if !self.view.is_selected(session_id) {
            debug!(session_id, "skipping refresh for deselected session");
            return;
        }
        self.messages_tx.send_modify(|v| {
            if v.session_id.as_deref() == Some(session_id) {
                v.loading = true;
            }
        });

        let transcript = self.aggregator.transcript(session_id).await;
        let supervision = match self.store.get_supervision_state(session_id).await {
            Ok(state) => state,
            Err(e) => {
                debug!(session_id, error = %e, "supervision state unavailable");
                None
            }
        };

        // The selection may have moved while we were reading.
        if !self.view.is_selected(session_id) {
            return;
        }
        match transcript {
            Ok(transcript) => {
                let messages = self.merge_optimistic(session_id, transcript.messages);
                self.messages_tx.send_modify(|v| {
                    v.session_id = Some(session_id.to_string());
                    v.messages = messages;
                    v.contact = transcript.contact;
                    if supervision.is_some() || v.supervision.is_none() {
                        v.supervision = supervision;
                    }
                    v.loading = false;
                    v.error = None;
                });
            }
            Err(e) => {
                warn!(session_id, error = %e, error_kind = %e.kind(), "transcript refresh failed");
                self.messages_tx.send_modify(|v| {
                    v.loading = false;
                    v.error = Some(ViewError::from(&e));
                });
            }
        }
    }

    fn merge_optimistic(&self, session_id: &str, mut messages: Vec<Message>) -> Vec<Message> {
        let mut pending = self
            .optimistic
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.retain(|m| !messages.iter().any(|stored| stored.id == m.id));
        messages.extend(
            pending
                .iter()
                .filter(|m| m.session_id == session_id)
                .cloned(),
        );
        sort_transcript(&mut messages);
        messages
    }

    fn push_optimistic(&self, message: &Message) {
        self.optimistic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        self.messages_tx.send_modify(|v| {
            if v.session_id.as_deref() == Some(message.session_id.as_str())
                && !v.messages.iter().any(|m| m.id == message.id)
            {
                v.messages.push(message.clone());
                sort_transcript(&mut v.messages);
            }
        });
    }

    /// Show a simulated transition locally; the store has no row to re-read.
    fn apply_simulated(&self, state: &SupervisionState) {
        self.list_tx.send_modify(|v| {
            for c in v
                .conversations
                .iter_mut()
                .filter(|c| c.session_id == state.session_id)
            {
                c.status = state.status;
                c.ai_enabled = state.ai_enabled;
            }
            v.stats = ConversationStats::from_page(&v.conversations);
        });
        self.messages_tx.send_modify(|v| {
            if v.session_id.as_deref() == Some(state.session_id.as_str()) {
                v.supervision = Some(state.clone());
            }
        });
    }
}

#[derive(Default)]
struct Batch {
    list: bool,
    sessions: Vec<String>,
    acks: Vec<oneshot::Sender<()>>,
}

impl Batch {
    fn push(&mut self, refresh: Refresh) {
        let ack = match refresh {
            Refresh::List(ack) => {
                self.list = true;
                ack
            }
            Refresh::Messages(session_id, ack) => {
                if !self.sessions.contains(&session_id) {
                    self.sessions.push(session_id);
                }
                ack
            }
        };
        self.acks.extend(ack);
    }

    async fn run(&self, shared: &Shared) {
        if self.list {
            shared.refresh_list().await;
        }
        for session_id in &self.sessions {
            shared.refresh_messages(session_id).await;
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Refresh>,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(refresh) => refresh,
                None => break,
            },
        };
        let mut batch = Batch::default();
        batch.push(first);
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = batch.run(&shared) => {}
        }
        for ack in batch.acks {
            let _ = ack.send(());
        }
    }
    debug!("refresh worker stopped");
}

#[derive(Default)]
struct PanelTopics {
    panel: Option<TopicHandle>,
    conversation: Option<TopicHandle>,
}

struct PanelInner {
    shared: Arc<Shared>,
    machine: Arc<SupervisionMachine>,
    coordinator: SendCoordinator,
    bridge: EventBridge,
    list_coalescer: Arc<Coalescer>,
    search_coalescer: Coalescer,
    pending_search: Arc<Mutex<Option<String>>>,
    poller: PollingFallback,
    refresh_tx: mpsc::UnboundedSender<Refresh>,
    topics: Mutex<PanelTopics>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PanelInner {
    fn teardown(&self) {
        self.shutdown.cancel();
        self.bridge.close_all();
        self.list_coalescer.cancel();
        self.search_coalescer.cancel();
        self.poller.stop();
    }
}

impl Drop for PanelInner {
    fn drop(&mut self) {
        self.teardown();
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.abort();
        }
    }
}

fn panel_matchers() -> [EventMatcher; 3] {
    [
        EventMatcher::table(Table::Conversations),
        EventMatcher::table(Table::SupervisionState),
        EventMatcher::table(Table::Messages).kind(ChangeKind::Insert),
    ]
}

fn session_matchers(session_id: &str) -> [EventMatcher; 2] {
    [
        EventMatcher::table(Table::Messages)
            .kind(ChangeKind::Insert)
            .filter_eq("session_id", session_id),
        EventMatcher::table(Table::SupervisionState).filter_eq("session_id", session_id),
    ]
}

/// Live supervision view for one operator.
///
/// Cheap to clone. Background tasks stop on [`close`](Self::close) or when the
/// last clone is dropped. Handlers must not call back into the panel's
/// subscription methods.
#[derive(Clone)]
pub struct SupervisionPanel {
    inner: Arc<PanelInner>,
}

impl SupervisionPanel {
    /// Build the panel, open the cross-conversation topic, and queue the first
    /// list load.
    pub async fn start(settings: PanelSettings, deps: PanelDeps) -> Result<Self, VigilError> {
        let view = Arc::new(ViewState::default());
        let (list_tx, _) = watch::channel(ListView::default());
        let (messages_tx, _) = watch::channel(MessagesView::default());
        let shared = Arc::new(Shared {
            aggregator: ConversationAggregator::new(
                Arc::clone(&deps.store),
                settings.conversation_view.clone(),
                settings.legacy_view.clone(),
                settings.page_size,
            ),
            store: Arc::clone(&deps.store),
            view: Arc::clone(&view),
            list_tx,
            messages_tx,
            optimistic: Mutex::new(Vec::new()),
        });

        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            refresh_rx,
            shutdown.clone(),
        ));

        let list_coalescer = {
            let tx = refresh_tx.clone();
            Arc::new(Coalescer::new("list", settings.list_debounce, move || {
                let _ = tx.send(Refresh::List(None));
            }))
        };

        let pending_search: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let search_coalescer = {
            let tx = refresh_tx.clone();
            let pending = Arc::clone(&pending_search);
            let view = Arc::clone(&view);
            Coalescer::new("search", settings.search_debounce, move || {
                let term = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(term) = term {
                    view.set_search(term);
                    let _ = tx.send(Refresh::List(None));
                }
            })
        };

        let poller = {
            let tx = refresh_tx.clone();
            let view = Arc::clone(&view);
            PollingFallback::start(settings.poll_interval, move || {
                let _ = tx.send(Refresh::List(None));
                if let Some(session_id) = view.selected() {
                    let _ = tx.send(Refresh::Messages(session_id, None));
                }
            })
        };

        let machine = Arc::new(SupervisionMachine::new(
            Arc::clone(&deps.store),
            settings.operator_id.clone(),
        ));
        let coordinator = SendCoordinator::new(
            Arc::clone(&machine),
            Arc::clone(&deps.store),
            deps.dispatcher,
            settings.dispatch_timeout,
        );
        let bridge = EventBridge::new(deps.stream, settings.backoff);

        let inner = Arc::new(PanelInner {
            shared,
            machine,
            coordinator,
            bridge,
            list_coalescer,
            search_coalescer,
            pending_search,
            poller,
            refresh_tx,
            topics: Mutex::new(PanelTopics::default()),
            shutdown,
            worker: Mutex::new(Some(worker)),
        });
        let panel = Self { inner };
        panel.open_panel_topic().await?;

        let _ = panel.inner.refresh_tx.send(Refresh::List(None));
        info!(
            operator = %settings.operator_id,
            poll_interval_secs = settings.poll_interval.as_secs(),
            "supervision panel started"
        );
        Ok(panel)
    }

    async fn open_panel_topic(&self) -> Result<(), VigilError> {
        let bridge = &self.inner.bridge;
        let handle = bridge.subscribe(TopicSpec::panel());
        for matcher in panel_matchers() {
            let coalescer = Arc::clone(&self.inner.list_coalescer);
            let listener: Listener = Arc::new(move |_: &ChangeEvent| coalescer.trigger());
            bridge.on(&handle, matcher, listener).await?;
        }
        let tx = self.inner.refresh_tx.clone();
        let view = Arc::clone(&self.inner.shared.view);
        bridge.on_reconnect(
            &handle,
            Arc::new(move || {
                let _ = tx.send(Refresh::List(None));
                if let Some(session_id) = view.selected() {
                    let _ = tx.send(Refresh::Messages(session_id, None));
                }
            }),
        )?;
        self.topics().panel = Some(handle);
        Ok(())
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, PanelTopics> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), VigilError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(VigilError::Validation("supervision panel is closed".into()));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // -- list ---------------------------------------------------------------

    pub fn list_view(&self) -> ListView {
        self.inner.shared.list_tx.borrow().clone()
    }

    pub fn watch_list(&self) -> watch::Receiver<ListView> {
        self.inner.shared.list_tx.subscribe()
    }

    pub fn filters(&self) -> ConversationFilters {
        self.inner.shared.view.filters()
    }

    /// Replace the filter set and refresh right away. Discards a search term
    /// still waiting out its debounce.
    pub fn set_filters(&self, filters: ConversationFilters) {
        self.inner
            .pending_search
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.shared.view.set_filters(filters);
        let _ = self.inner.refresh_tx.send(Refresh::List(None));
    }

    /// Update the search text. The fetch happens once typing pauses for the
    /// search debounce window.
    pub fn set_search(&self, term: impl Into<String>) {
        *self
            .inner
            .pending_search
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(term.into());
        self.inner.search_coalescer.trigger();
    }

    /// Refresh the list now and wait for it to land.
    pub async fn refetch(&self) {
        let (ack, done) = oneshot::channel();
        if self.inner.refresh_tx.send(Refresh::List(Some(ack))).is_ok() {
            let _ = done.await;
        }
    }

    // -- selected conversation ----------------------------------------------

    pub fn selected_session(&self) -> Option<String> {
        self.inner.shared.view.selected()
    }

    pub fn messages_view(&self) -> MessagesView {
        self.inner.shared.messages_tx.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<MessagesView> {
        self.inner.shared.messages_tx.subscribe()
    }

    /// Make `session_id` the selected conversation.
    ///
    /// The previous session's subscription is closed before the new one
    /// opens. Returns once the transcript has been loaded.
    pub async fn select_conversation(&self, session_id: &str) -> Result<(), VigilError> {
        self.ensure_open()?;
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(VigilError::Validation(
                "session_id must not be empty".into(),
            ));
        }

        let previous = self.topics().conversation.take();
        if let Some(previous) = previous {
            self.inner.bridge.unsubscribe(&previous);
        }

        let shared = &self.inner.shared;
        shared.view.select(Some(session_id.to_string()));
        shared
            .optimistic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| m.session_id == session_id);
        shared.messages_tx.send_replace(MessagesView {
            session_id: Some(session_id.to_string()),
            loading: true,
            ..Default::default()
        });

        let handle = self
            .inner
            .bridge
            .subscribe(TopicSpec::conversation(session_id));
        for matcher in session_matchers(session_id) {
            let tx = self.inner.refresh_tx.clone();
            let coalescer = Arc::clone(&self.inner.list_coalescer);
            let session = session_id.to_string();
            // Messages for the open conversation skip the debounce; the list
            // refresh they imply does not.
            let listener: Listener = Arc::new(move |_: &ChangeEvent| {
                let _ = tx.send(Refresh::Messages(session.clone(), None));
                coalescer.trigger();
            });
            self.inner.bridge.on(&handle, matcher, listener).await?;
        }
        self.topics().conversation = Some(handle);
        debug!(session_id, "conversation selected");

        self.refetch_messages().await;
        Ok(())
    }

    /// Deselect and close the session-scoped subscription.
    pub fn clear_selection(&self) {
        if let Some(handle) = self.topics().conversation.take() {
            self.inner.bridge.unsubscribe(&handle);
        }
        self.inner.shared.view.select(None);
        self.inner
            .shared
            .messages_tx
            .send_replace(MessagesView::default());
    }

    /// Reload the selected transcript and wait for it to land.
    pub async fn refetch_messages(&self) {
        let Some(session_id) = self.selected_session() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if self
            .inner
            .refresh_tx
            .send(Refresh::Messages(session_id, Some(ack)))
            .is_ok()
        {
            let _ = done.await;
        }
    }

    // -- actions ------------------------------------------------------------

    fn invalidate(&self, session_id: &str) {
        if self.inner.shared.view.is_selected(session_id) {
            let _ = self
                .inner
                .refresh_tx
                .send(Refresh::Messages(session_id.to_string(), None));
        }
        self.inner.list_coalescer.trigger();
    }

    fn settle(
        &self,
        session_id: &str,
        result: Result<TransitionOutcome, VigilError>,
    ) -> Result<TransitionOutcome, VigilError> {
        let outcome = result?;
        if outcome.is_degraded() {
            self.inner.shared.apply_simulated(&outcome.state);
        } else {
            self.invalidate(session_id);
        }
        Ok(outcome)
    }

    pub async fn pause_ai(
        &self,
        session_id: &str,
        location_id: Option<&str>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.pause_ai(session_id, location_id).await;
        self.settle(session_id, result)
    }

    pub async fn resume_ai(&self, session_id: &str) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.resume_ai(session_id).await;
        self.settle(session_id, result)
    }

    pub async fn take_over(
        &self,
        session_id: &str,
        location_id: Option<&str>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.take_over(session_id, location_id).await;
        self.settle(session_id, result)
    }

    pub async fn mark_scheduled(
        &self,
        session_id: &str,
        scheduled_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self
            .inner
            .machine
            .mark_scheduled(session_id, scheduled_at, notes)
            .await;
        self.settle(session_id, result)
    }

    pub async fn mark_converted(
        &self,
        session_id: &str,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.mark_converted(session_id, notes).await;
        self.settle(session_id, result)
    }

    pub async fn add_note(
        &self,
        session_id: &str,
        notes: &str,
    ) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.add_note(session_id, notes).await;
        self.settle(session_id, result)
    }

    pub async fn archive(&self, session_id: &str) -> Result<TransitionOutcome, VigilError> {
        self.ensure_open()?;
        let result = self.inner.machine.archive(session_id).await;
        self.settle(session_id, result)
    }

    /// Send an operator message. On success the message shows up in the
    /// selected transcript immediately, before any change event arrives.
    pub async fn send_message(&self, request: SendRequest) -> Result<SendReport, SendError> {
        if self.is_closed() {
            return Err(SendError::Unknown("supervision panel is closed".into()));
        }
        let report = self.inner.coordinator.send(request).await?;
        self.inner.shared.push_optimistic(&report.message);
        if let Some(pause) = report.pause.as_ref().filter(|p| p.is_degraded()) {
            self.inner.shared.apply_simulated(&pause.state);
        }
        self.invalidate(&report.message.session_id);
        Ok(report)
    }

    // -- handlers -----------------------------------------------------------

    /// Register callbacks for cross-conversation changes.
    ///
    /// Shares the panel's own subscriptions; no extra stream subscription is
    /// opened for a relation the panel already watches.
    pub async fn on_panel_change(
        &self,
        handlers: PanelHandlers,
    ) -> Result<HandlerRegistration, VigilError> {
        self.ensure_open()?;
        let handle = self.inner.bridge.subscribe(TopicSpec::panel());
        let [conversations, supervision, messages] = panel_matchers();
        let pairs = [
            (conversations, handlers.on_conversation),
            (supervision, handlers.on_supervision),
            (messages, handlers.on_message),
        ];
        for (matcher, handler) in pairs {
            let Some(handler) = handler else { continue };
            let listener = self.context_listener(handler);
            if let Err(e) = self.inner.bridge.on(&handle, matcher, listener).await {
                self.inner.bridge.unsubscribe(&handle);
                return Err(e);
            }
        }
        Ok(HandlerRegistration { handle })
    }

    /// Register a callback for new messages and supervision changes on one
    /// session.
    ///
    /// One session is watched at a time: registering for a different session
    /// closes the previous watcher.
    pub async fn on_conversation_change(
        &self,
        session_id: &str,
        handler: PanelHandler,
    ) -> Result<HandlerRegistration, VigilError> {
        self.ensure_open()?;
        let handle = self
            .inner
            .bridge
            .subscribe(TopicSpec::new("conversation-watch", session_id));
        for matcher in session_matchers(session_id) {
            let listener = self.context_listener(Arc::clone(&handler));
            if let Err(e) = self.inner.bridge.on(&handle, matcher, listener).await {
                self.inner.bridge.unsubscribe(&handle);
                return Err(e);
            }
        }
        Ok(HandlerRegistration { handle })
    }

    /// Unregister handlers. No handler of `registration` fires after this
    /// returns.
    pub fn remove_handlers(&self, registration: &HandlerRegistration) {
        self.inner.bridge.unsubscribe(&registration.handle);
    }

    fn context_listener(&self, handler: PanelHandler) -> Listener {
        let view = Arc::clone(&self.inner.shared.view);
        Arc::new(move |event: &ChangeEvent| handler(event, &view.context()))
    }

    /// Tear the panel down: every subscription, debounce timer, the poller,
    /// and the refresh worker. No handler fires after this returns.
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.teardown();
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("supervision panel closed");
    }
}
