// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topic-scoped change-event subscriptions with reconnection.
//!
//! A topic is one logical concern ("every supervision change", "messages for
//! session X"). At most one topic is open per concern: opening the same
//! concern with a different key closes the old topic first. Opening the same
//! (concern, key) again shares the open topic and bumps its reference count.
//!
//! Each distinct [`EventMatcher`] registered on a topic gets exactly one
//! underlying stream subscription, driven by a pump task that resubscribes
//! with exponential backoff when the stream drops.
//!
//! Listeners run on the pump task while the topic's read lock is held, and
//! [`EventBridge::unsubscribe`] takes the write lock, so once it returns no
//! listener of that handle fires again. Listeners must not call back into the
//! bridge.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{ChangeEvent, ChangeStream, ChangeSubscription, EventMatcher, VigilError};

/// Callback for matching change events.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callback fired after a dropped subscription is re-established.
pub type ReconnectListener = Arc<dyn Fn() + Send + Sync>;

/// Names a topic: a concern plus the key currently open for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSpec {
    pub concern: String,
    pub key: String,
}

impl TopicSpec {
    pub fn new(concern: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            concern: concern.into(),
            key: key.into(),
        }
    }

    /// Cross-conversation changes feeding the list view.
    pub fn panel() -> Self {
        Self::new("panel", "all")
    }

    /// Changes scoped to a single session.
    pub fn conversation(session_id: impl Into<String>) -> Self {
        Self::new("conversation", session_id)
    }
}

impl fmt::Display for TopicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.concern, self.key)
    }
}

/// A caller's reference to an open topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHandle {
    id: u64,
    topic_id: u64,
    spec: TopicSpec,
}

impl TopicHandle {
    pub fn spec(&self) -> &TopicSpec {
        &self.spec
    }
}

/// Reconnect delay policy: doubles from `initial` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10))
    }
}

struct Registration {
    handle: u64,
    matcher: EventMatcher,
    listener: Listener,
}

#[derive(Default)]
struct TopicState {
    closed: bool,
    listeners: Vec<Registration>,
    reconnect: Vec<(u64, ReconnectListener)>,
    /// One pump per distinct matcher.
    pumps: HashMap<EventMatcher, Pump>,
}

struct Pump {
    cancel: CancellationToken,
    /// Flips to `true` once the first subscribe attempt has finished.
    ready: watch::Receiver<bool>,
}

struct Topic {
    id: u64,
    spec: TopicSpec,
    state: RwLock<TopicState>,
    cancel: CancellationToken,
}

impl Topic {
    fn new(id: u64, spec: TopicSpec) -> Self {
        Self {
            id,
            spec,
            state: RwLock::new(TopicState::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn deliver(&self, matcher: &EventMatcher, event: &ChangeEvent) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.closed || !matcher.matches(event) {
            return;
        }
        for reg in state.listeners.iter().filter(|r| &r.matcher == matcher) {
            (reg.listener)(event);
        }
    }

    fn reconnected(&self) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        for (_, listener) in &state.reconnect {
            listener();
        }
    }

    /// Drop every registration owned by `handle` and stop pumps nobody
    /// listens on any more.
    fn release(&self, handle: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.listeners.retain(|r| r.handle != handle);
        state.reconnect.retain(|(h, _)| *h != handle);
        let live: HashSet<EventMatcher> =
            state.listeners.iter().map(|r| r.matcher.clone()).collect();
        state.pumps.retain(|matcher, pump| {
            let keep = live.contains(matcher);
            if !keep {
                pump.cancel.cancel();
            }
            keep
        });
    }

    fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.listeners.clear();
        state.reconnect.clear();
        state.pumps.clear();
        self.cancel.cancel();
    }
}

struct OpenTopic {
    topic: Arc<Topic>,
    handles: HashSet<u64>,
}

/// Reference-counted topics over a [`ChangeStream`].
pub struct EventBridge {
    stream: Arc<dyn ChangeStream>,
    backoff: Backoff,
    topics: Mutex<HashMap<String, OpenTopic>>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new(stream: Arc<dyn ChangeStream>, backoff: Backoff) -> Self {
        Self {
            stream,
            backoff,
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open (or share) the topic for `spec`.
    ///
    /// If the concern is already open under a different key, that topic is
    /// closed for every holder before the new one opens.
    pub fn subscribe(&self, spec: TopicSpec) -> TopicHandle {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let handle_id = self.next_id();

        if let Some(open) = topics.get_mut(&spec.concern) {
            if open.topic.spec.key == spec.key {
                open.handles.insert(handle_id);
                debug!(topic = %spec, refs = open.handles.len(), "topic shared");
                return TopicHandle {
                    id: handle_id,
                    topic_id: open.topic.id,
                    spec,
                };
            }
            debug!(old = %open.topic.spec, new = %spec, "replacing topic for concern");
            open.topic.close();
            topics.remove(&spec.concern);
        }

        let topic = Arc::new(Topic::new(self.next_id(), spec.clone()));
        let handle = TopicHandle {
            id: handle_id,
            topic_id: topic.id,
            spec: spec.clone(),
        };
        topics.insert(
            spec.concern.clone(),
            OpenTopic {
                topic,
                handles: HashSet::from([handle_id]),
            },
        );
        debug!(topic = %spec, "topic opened");
        handle
    }

    /// Release a handle. The topic closes when its last handle is released.
    ///
    /// Synchronous: no listener registered through `handle` fires after this
    /// returns. Releasing a stale or already-released handle is a no-op.
    pub fn unsubscribe(&self, handle: &TopicHandle) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(open) = topics.get_mut(&handle.spec.concern) else {
            return;
        };
        if open.topic.id != handle.topic_id || !open.handles.remove(&handle.id) {
            return;
        }
        if open.handles.is_empty() {
            open.topic.close();
            topics.remove(&handle.spec.concern);
            debug!(topic = %handle.spec, "topic closed");
        } else {
            open.topic.release(handle.id);
            debug!(topic = %handle.spec, refs = open.handles.len(), "topic released");
        }
    }

    /// Close every open topic.
    pub fn close_all(&self) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, open) in topics.drain() {
            open.topic.close();
        }
    }

    /// Whether `handle` still refers to an open topic.
    pub fn is_open(&self, handle: &TopicHandle) -> bool {
        self.topic_for(handle).is_some()
    }

    /// Number of holders of the topic `handle` points at, 0 if closed.
    pub fn ref_count(&self, handle: &TopicHandle) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(&handle.spec.concern)
            .filter(|open| open.topic.id == handle.topic_id)
            .map_or(0, |open| open.handles.len())
    }

    /// Number of underlying stream subscriptions across all topics.
    pub fn active_pumps(&self) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .values()
            .map(|open| {
                open.topic
                    .state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pumps
                    .len()
            })
            .sum()
    }

    fn topic_for(&self, handle: &TopicHandle) -> Option<Arc<Topic>> {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(&handle.spec.concern)
            .filter(|open| open.topic.id == handle.topic_id && open.handles.contains(&handle.id))
            .map(|open| Arc::clone(&open.topic))
    }

    /// Register `listener` for events selected by `matcher` on the topic.
    ///
    /// Identical matchers on one topic share a single stream subscription.
    /// When this returns, the subscription for `matcher` is live, unless the
    /// stream refused it, in which case the pump keeps retrying in the
    /// background. A caller sharing a subscription that is still being opened
    /// waits for that first attempt.
    pub async fn on(
        &self,
        handle: &TopicHandle,
        matcher: EventMatcher,
        listener: Listener,
    ) -> Result<(), VigilError> {
        let topic = self
            .topic_for(handle)
            .ok_or_else(|| VigilError::Validation(format!("topic {} is closed", handle.spec)))?;

        let opened = {
            let mut state = topic.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Err(VigilError::Validation(format!(
                    "topic {} is closed",
                    handle.spec
                )));
            }
            state.listeners.push(Registration {
                handle: handle.id,
                matcher: matcher.clone(),
                listener,
            });
            if let Some(existing) = state.pumps.get(&matcher) {
                let ready = existing.ready.clone();
                drop(state);
                Err(ready)
            } else {
                let token = topic.cancel.child_token();
                let (ready_tx, ready) = watch::channel(false);
                state.pumps.insert(
                    matcher.clone(),
                    Pump {
                        cancel: token.clone(),
                        ready,
                    },
                );
                Ok((token, ready_tx))
            }
        };
        let (pump_token, ready_tx) = match opened {
            Ok(opened) => opened,
            Err(mut ready) => {
                // An error means the pump was torn down before it finished.
                let _ = ready.wait_for(|ready| *ready).await;
                return Ok(());
            }
        };

        let first = match self.stream.subscribe(&matcher).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(
                    topic = %handle.spec,
                    table = %matcher.table,
                    error = %e,
                    error_kind = %e.kind(),
                    "change subscription failed, retrying in background"
                );
                None
            }
        };
        ready_tx.send_replace(true);

        tokio::spawn(pump(
            Arc::clone(&self.stream),
            topic,
            matcher,
            self.backoff,
            pump_token,
            first,
        ));
        Ok(())
    }

    /// Register a callback fired whenever a dropped subscription on the topic
    /// is re-established. Events may have been lost in the gap.
    pub fn on_reconnect(
        &self,
        handle: &TopicHandle,
        listener: ReconnectListener,
    ) -> Result<(), VigilError> {
        let topic = self
            .topic_for(handle)
            .ok_or_else(|| VigilError::Validation(format!("topic {} is closed", handle.spec)))?;
        let mut state = topic.state.write().unwrap_or_else(PoisonError::into_inner);
        state.reconnect.push((handle.id, listener));
        Ok(())
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn pump(
    stream: Arc<dyn ChangeStream>,
    topic: Arc<Topic>,
    matcher: EventMatcher,
    backoff: Backoff,
    cancel: CancellationToken,
    first: Option<ChangeSubscription>,
) {
    let mut current = first;
    let mut delay = backoff.initial;
    let mut reconnecting = false;

    loop {
        if let Some(mut sub) = current.take() {
            if reconnecting {
                info!(topic = %topic.spec, table = %matcher.table, "change subscription restored");
                topic.reconnected();
            }
            delay = backoff.initial;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = sub.recv() => match event {
                        Some(event) => topic.deliver(&matcher, &event),
                        None => break,
                    },
                }
            }
            warn!(topic = %topic.spec, table = %matcher.table, "change subscription dropped");
        }

        reconnecting = true;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = backoff.next(delay);

        match stream.subscribe(&matcher).await {
            Ok(sub) => current = Some(sub),
            Err(e) => {
                debug!(
                    topic = %topic.spec,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "resubscribe failed"
                );
            }
        }
        if cancel.is_cancelled() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use vigil_bus::ChangeFeed;
    use vigil_core::{AdapterType, ChangeKind, Collaborator, HealthStatus, Table};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Arc::new(move |_: &ChangeEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn message_event(session: &str) -> ChangeEvent {
        ChangeEvent::insert(Table::Messages, json!({ "session_id": session }))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn bridge(feed: &ChangeFeed) -> EventBridge {
        EventBridge::new(
            Arc::new(feed.clone()),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(
            b.next(Duration::from_millis(250)),
            Duration::from_millis(500)
        );
        assert_eq!(b.next(Duration::from_millis(800)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn same_key_is_reference_counted() {
        let feed = ChangeFeed::new(16);
        let bridge = bridge(&feed);

        let a = bridge.subscribe(TopicSpec::panel());
        let b = bridge.subscribe(TopicSpec::panel());
        assert_eq!(bridge.ref_count(&a), 2);

        bridge.unsubscribe(&a);
        assert!(bridge.is_open(&b));
        assert_eq!(bridge.ref_count(&b), 1);

        bridge.unsubscribe(&b);
        assert!(!bridge.is_open(&b));
        // Releasing twice is harmless.
        bridge.unsubscribe(&b);
    }

    #[tokio::test]
    async fn new_key_replaces_open_concern() {
        let feed = ChangeFeed::new(16);
        let bridge = bridge(&feed);

        let first = bridge.subscribe(TopicSpec::conversation("s1"));
        let (count, listener) = counter();
        bridge
            .on(
                &first,
                EventMatcher::table(Table::Messages).filter_eq("session_id", "s1"),
                listener,
            )
            .await
            .unwrap();

        let second = bridge.subscribe(TopicSpec::conversation("s2"));
        assert!(!bridge.is_open(&first));
        assert!(bridge.is_open(&second));

        feed.publish(message_event("s1"));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // The stale handle cannot register anything.
        let (_, listener) = counter();
        assert!(
            bridge
                .on(&first, EventMatcher::table(Table::Messages), listener)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn identical_matchers_share_one_subscription() {
        let feed = ChangeFeed::new(16);
        let bridge = bridge(&feed);
        let handle = bridge.subscribe(TopicSpec::panel());
        let matcher = EventMatcher::table(Table::SupervisionState);

        let (a, la) = counter();
        let (b, lb) = counter();
        bridge.on(&handle, matcher.clone(), la).await.unwrap();
        bridge.on(&handle, matcher, lb).await.unwrap();
        assert_eq!(bridge.active_pumps(), 1);

        feed.publish(ChangeEvent::insert(
            Table::SupervisionState,
            json!({ "session_id": "s1" }),
        ));
        settle().await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    /// Subscribes through a feed after a fixed delay.
    struct SlowStream {
        feed: ChangeFeed,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Collaborator for SlowStream {
        fn name(&self) -> &str {
            self.feed.name()
        }

        fn version(&self) -> semver::Version {
            self.feed.version()
        }

        fn adapter_type(&self) -> AdapterType {
            self.feed.adapter_type()
        }

        async fn health_check(&self) -> Result<HealthStatus, VigilError> {
            self.feed.health_check().await
        }

        async fn shutdown(&self) -> Result<(), VigilError> {
            self.feed.shutdown().await
        }
    }

    #[async_trait::async_trait]
    impl ChangeStream for SlowStream {
        async fn subscribe(
            &self,
            matcher: &EventMatcher,
        ) -> Result<ChangeSubscription, VigilError> {
            tokio::time::sleep(self.delay).await;
            self.feed.subscribe(matcher).await
        }
    }

    #[tokio::test]
    async fn shared_matcher_waits_for_subscription_in_flight() {
        let feed = ChangeFeed::new(16);
        let bridge = Arc::new(EventBridge::new(
            Arc::new(SlowStream {
                feed: feed.clone(),
                delay: Duration::from_millis(50),
            }),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        ));
        let handle = bridge.subscribe(TopicSpec::panel());
        let matcher = EventMatcher::table(Table::SupervisionState);

        let (a, la) = counter();
        let first = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            let handle = handle.clone();
            let matcher = matcher.clone();
            async move { bridge.on(&handle, matcher, la).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (b, lb) = counter();
        bridge.on(&handle, matcher, lb).await.unwrap();
        // Published as soon as the second registration returns.
        feed.publish(ChangeEvent::insert(
            Table::SupervisionState,
            json!({ "session_id": "s1" }),
        ));
        first.await.unwrap().unwrap();
        settle().await;

        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.active_pumps(), 1);
    }

    #[tokio::test]
    async fn no_callback_after_unsubscribe_returns() {
        let feed = ChangeFeed::new(64);
        let bridge = bridge(&feed);
        let handle = bridge.subscribe(TopicSpec::panel());
        let (count, listener) = counter();
        bridge
            .on(&handle, EventMatcher::table(Table::Messages), listener)
            .await
            .unwrap();

        feed.publish(message_event("s1"));
        settle().await;
        bridge.unsubscribe(&handle);
        let seen = count.load(Ordering::SeqCst);

        for _ in 0..10 {
            feed.publish(message_event("s1"));
        }
        settle().await;
        assert_eq!(seen, 1);
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn releasing_one_holder_keeps_the_others_listening() {
        let feed = ChangeFeed::new(16);
        let bridge = bridge(&feed);
        let a = bridge.subscribe(TopicSpec::panel());
        let b = bridge.subscribe(TopicSpec::panel());
        let (ca, la) = counter();
        let (cb, lb) = counter();
        bridge
            .on(&a, EventMatcher::table(Table::Messages), la)
            .await
            .unwrap();
        bridge
            .on(&b, EventMatcher::table(Table::Messages), lb)
            .await
            .unwrap();

        bridge.unsubscribe(&a);
        feed.publish(message_event("s1"));
        settle().await;
        assert_eq!(ca.load(Ordering::SeqCst), 0);
        assert_eq!(cb.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resubscribes_after_connection_drop() {
        let feed = ChangeFeed::new(16);
        let bridge = bridge(&feed);
        let handle = bridge.subscribe(TopicSpec::panel());
        let (count, listener) = counter();
        let reconnects = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&reconnects);
        bridge
            .on(
                &handle,
                EventMatcher::table(Table::Messages).kind(ChangeKind::Insert),
                listener,
            )
            .await
            .unwrap();
        bridge
            .on_reconnect(
                &handle,
                Arc::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        feed.disconnect_all();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);

        feed.publish(message_event("s1"));
        settle().await;
        // Exactly once: the resubscription did not duplicate the listener.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.active_pumps(), 1);
    }
}
