// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervision status transitions.
//!
//! Every operation is an upsert keyed by `session_id`: the current row is
//! read, the transition is validated against
//! [`SupervisionStatus::can_transition_to`], and the new row is written.
//! Writers for the same session are serialized inside this process; the store
//! resolves writers from other processes by last-write-wins, atomically when
//! it supports a native upsert.
//!
//! A store without the supervision relation does not fail the operation. The
//! caller gets the state it asked for with `persisted == false`, and the
//! event is logged at `warn` with `degraded = true`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vigil_core::{ErrorKind, SupervisionState, SupervisionStatus, SupervisionStore, VigilError};

/// Result of a supervision operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The row as written (or as it would have been written).
    pub state: SupervisionState,
    /// Status before the operation, `None` when the row did not exist.
    pub previous: Option<SupervisionStatus>,
    /// `false` when the store lacks the relation and the write was simulated.
    pub persisted: bool,
}

impl TransitionOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.persisted
    }
}

#[derive(Debug, Clone)]
enum Change {
    Status(SupervisionStatus),
    Schedule {
        at: DateTime<Utc>,
        notes: Option<String>,
    },
    Convert {
        notes: Option<String>,
    },
    Note(Option<String>),
    /// Disable the agent before a human message goes out.
    Suppress,
}

impl Change {
    fn op(&self) -> &'static str {
        match self {
            Change::Status(SupervisionStatus::AiPaused) => "pause_ai",
            Change::Status(SupervisionStatus::AiActive) => "resume_ai",
            Change::Status(SupervisionStatus::ManualTakeover) => "take_over",
            Change::Status(SupervisionStatus::Archived) => "archive",
            Change::Status(_) => "set_status",
            Change::Schedule { .. } => "mark_scheduled",
            Change::Convert { .. } => "mark_converted",
            Change::Note(_) => "add_note",
            Change::Suppress => "suppress_ai",
        }
    }

    /// Target status given the current one.
    fn target(&self, current: SupervisionStatus) -> SupervisionStatus {
        match self {
            Change::Status(to) => *to,
            Change::Schedule { .. } => SupervisionStatus::Scheduled,
            Change::Convert { .. } => SupervisionStatus::Converted,
            Change::Note(_) => current,
            Change::Suppress if current.ai_enabled() => SupervisionStatus::AiPaused,
            Change::Suppress => current,
        }
    }

    fn validate(&self, current: SupervisionStatus) -> Result<SupervisionStatus, VigilError> {
        let to = self.target(current);
        let allowed = match self {
            // Notes can be edited in any status. A human message always stops
            // the agent, including a scheduled one.
            Change::Note(_) | Change::Suppress => true,
            _ => current.can_transition_to(to),
        };
        if allowed {
            Ok(to)
        } else {
            Err(VigilError::InvalidTransition { from: current, to })
        }
    }

    fn apply(self, state: &mut SupervisionState, to: SupervisionStatus, now: DateTime<Utc>) {
        state.status = to;
        state.ai_enabled = to.ai_enabled();
        match self {
            Change::Schedule { at, notes } => {
                state.scheduled_at = Some(at);
                if notes.is_some() {
                    state.notes = notes;
                }
            }
            Change::Convert { notes } => {
                state.converted_at = Some(now);
                if notes.is_some() {
                    state.notes = notes;
                }
            }
            Change::Note(notes) => state.notes = notes,
            Change::Status(_) | Change::Suppress => {}
        }
    }
}

/// Drives supervision status per session.
pub struct SupervisionMachine {
    store: Arc<dyn SupervisionStore>,
    actor: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SupervisionMachine {
    /// `actor` is recorded as `updated_by` on every row this machine writes.
    pub fn new(store: Arc<dyn SupervisionStore>, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
            locks: DashMap::new(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Stop the agent: `ai_paused`.
    pub async fn pause_ai(
        &self,
        session_id: &str,
        location_id: Option<&str>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.transition(
            session_id,
            location_id,
            Change::Status(SupervisionStatus::AiPaused),
        )
        .await
    }

    /// Hand the conversation back to the agent: `ai_active`.
    pub async fn resume_ai(&self, session_id: &str) -> Result<TransitionOutcome, VigilError> {
        self.transition(
            session_id,
            None,
            Change::Status(SupervisionStatus::AiActive),
        )
        .await
    }

    /// A human is chatting in place of the agent: `manual_takeover`.
    pub async fn take_over(
        &self,
        session_id: &str,
        location_id: Option<&str>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.transition(
            session_id,
            location_id,
            Change::Status(SupervisionStatus::ManualTakeover),
        )
        .await
    }

    pub async fn mark_scheduled(
        &self,
        session_id: &str,
        scheduled_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.transition(
            session_id,
            None,
            Change::Schedule {
                at: scheduled_at,
                notes,
            },
        )
        .await
    }

    /// `converted`, stamping `converted_at` with the current time.
    pub async fn mark_converted(
        &self,
        session_id: &str,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.transition(session_id, None, Change::Convert { notes })
            .await
    }

    /// Replace the notes. A blank note clears them.
    pub async fn add_note(
        &self,
        session_id: &str,
        notes: &str,
    ) -> Result<TransitionOutcome, VigilError> {
        let notes = Some(notes.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.transition(session_id, None, Change::Note(notes)).await
    }

    /// Terminal: nothing leaves `archived`.
    pub async fn archive(&self, session_id: &str) -> Result<TransitionOutcome, VigilError> {
        self.transition(
            session_id,
            None,
            Change::Status(SupervisionStatus::Archived),
        )
        .await
    }

    /// Make sure the agent is disabled before an operator message goes out.
    ///
    /// Moves `ai_active` and `scheduled` to `ai_paused`. Statuses that already
    /// disable the agent are kept as they are, so a `manual_takeover` stays a
    /// takeover.
    pub async fn suppress_ai(
        &self,
        session_id: &str,
        location_id: Option<&str>,
    ) -> Result<TransitionOutcome, VigilError> {
        self.transition(session_id, location_id, Change::Suppress)
            .await
    }

    async fn transition(
        &self,
        session_id: &str,
        location_id: Option<&str>,
        change: Change,
    ) -> Result<TransitionOutcome, VigilError> {
        if session_id.trim().is_empty() {
            return Err(VigilError::Validation(
                "session_id must not be empty".into(),
            ));
        }

        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(session_id, location_id, change)
                .await
        };
        drop(lock);
        self.locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn transition_locked(
        &self,
        session_id: &str,
        location_id: Option<&str>,
        change: Change,
    ) -> Result<TransitionOutcome, VigilError> {
        let op = change.op();
        let now = Utc::now();

        let (current, mut persisted) = match self.store.get_supervision_state(session_id).await {
            Ok(current) => (current, true),
            Err(e) if e.kind() == ErrorKind::RelationMissing => (None, false),
            Err(e) => return Err(e),
        };
        let previous = current.as_ref().map(|s| s.status);

        let mut next = current.clone().unwrap_or_else(|| {
            SupervisionState::new(
                session_id,
                location_id.map(str::to_string),
                &self.actor,
                now,
            )
        });
        let from = next.status;
        let to = change.validate(from)?;
        change.apply(&mut next, to, now);
        if let Some(loc) = location_id {
            next.location_id = Some(loc.to_string());
        }
        if current.as_ref() == Some(&next) {
            debug!(session_id, op, status = %to, "supervision state unchanged, skipping write");
            return Ok(TransitionOutcome {
                state: next,
                previous,
                persisted: true,
            });
        }
        next.updated_by = self.actor.clone();
        next.updated_at = now;
        debug_assert!(next.is_consistent());

        if persisted {
            let write = if self.store.supports_native_upsert() {
                self.store.upsert_supervision_state(&next).await
            } else if current.is_some() {
                self.store.update_supervision_state(&next).await
            } else {
                self.store.insert_supervision_state(&next).await
            };
            match write {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::RelationMissing => persisted = false,
                Err(e) => {
                    warn!(
                        session_id,
                        op,
                        error = %e,
                        error_kind = %e.kind(),
                        "supervision write failed"
                    );
                    return Err(e);
                }
            }
        }

        if persisted {
            info!(session_id, op, from = %from, to = %to, "supervision state updated");
        } else {
            warn!(
                session_id,
                op,
                to = %to,
                degraded = true,
                error_kind = %ErrorKind::RelationMissing,
                "supervision relation missing, transition simulated"
            );
        }
        debug!(
            session_id,
            ai_enabled = next.ai_enabled,
            "transition applied"
        );

        Ok(TransitionOutcome {
            state: next,
            previous,
            persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tracing_test::traced_test;
    use vigil_test_utils::MockStore;

    use super::*;

    fn machine(store: &Arc<MockStore>) -> SupervisionMachine {
        let store: Arc<dyn SupervisionStore> = store.clone();
        SupervisionMachine::new(store, "ana")
    }

    #[tokio::test]
    async fn first_action_creates_the_row() {
        let store = Arc::new(MockStore::new());
        let out = machine(&store).pause_ai("s1", Some("loc-1")).await.unwrap();

        assert!(out.persisted);
        assert_eq!(out.previous, None);
        let row = store.state("s1").unwrap();
        assert_eq!(row.status, SupervisionStatus::AiPaused);
        assert!(!row.ai_enabled);
        assert_eq!(row.location_id.as_deref(), Some("loc-1"));
        assert_eq!(row.updated_by, "ana");
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);
        m.pause_ai("s1", None).await.unwrap();
        let second = m.pause_ai("s1", None).await.unwrap();

        assert_eq!(second.previous, Some(SupervisionStatus::AiPaused));
        assert_eq!(store.state_count(), 1);
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::AiPaused
        );
    }

    #[tokio::test]
    async fn repeated_pause_does_not_rewrite_the_row() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);
        let first = m.pause_ai("s1", Some("loc-1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = m.pause_ai("s1", Some("loc-1")).await.unwrap();
        assert!(second.persisted);
        assert_eq!(second.state, first.state);
        assert_eq!(
            store.state("s1").unwrap().updated_at,
            first.state.updated_at
        );

        // A real change still writes.
        let resumed = m.resume_ai("s1").await.unwrap();
        assert!(resumed.state.updated_at > first.state.updated_at);
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::AiActive
        );
    }

    #[tokio::test]
    async fn every_operation_keeps_ai_enabled_consistent() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 15, 0, 0).unwrap();

        let outcomes = [
            m.pause_ai("s1", None).await.unwrap(),
            m.resume_ai("s1").await.unwrap(),
            m.take_over("s1", None).await.unwrap(),
            m.resume_ai("s1").await.unwrap(),
            m.mark_scheduled("s1", at, Some("visit".into()))
                .await
                .unwrap(),
            m.add_note("s1", "call first").await.unwrap(),
            m.mark_converted("s1", None).await.unwrap(),
            m.archive("s1").await.unwrap(),
        ];
        for out in &outcomes {
            assert!(out.state.is_consistent(), "{:?}", out.state);
        }
        let row = store.state("s1").unwrap();
        assert_eq!(row.status, SupervisionStatus::Archived);
        assert_eq!(row.scheduled_at, Some(at));
        assert!(row.converted_at.is_some());
        assert_eq!(row.notes.as_deref(), Some("call first"));
    }

    #[tokio::test]
    async fn archived_is_terminal() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);
        m.archive("s1").await.unwrap();

        let err = m.resume_ai("s1").await.unwrap_err();
        assert!(matches!(
            err,
            VigilError::InvalidTransition {
                from: SupervisionStatus::Archived,
                to: SupervisionStatus::AiActive
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);
        // Notes are still editable.
        m.add_note("s1", "closed by request").await.unwrap();
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::Archived
        );
    }

    #[tokio::test]
    async fn rejected_transition_leaves_row_untouched() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);
        m.pause_ai("s1", None).await.unwrap();
        let before = store.state("s1").unwrap();

        let at = Utc.with_ymd_and_hms(2026, 4, 1, 15, 0, 0).unwrap();
        assert!(m.mark_scheduled("s1", at, None).await.is_err());
        assert_eq!(store.state("s1").unwrap(), before);
    }

    #[tokio::test]
    async fn suppress_keeps_takeover_and_pauses_scheduled() {
        let store = Arc::new(MockStore::new());
        let m = machine(&store);

        m.take_over("s1", None).await.unwrap();
        m.suppress_ai("s1", None).await.unwrap();
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::ManualTakeover
        );

        let at = Utc.with_ymd_and_hms(2026, 4, 1, 15, 0, 0).unwrap();
        m.mark_scheduled("s2", at, None).await.unwrap();
        m.suppress_ai("s2", None).await.unwrap();
        let row = store.state("s2").unwrap();
        assert_eq!(row.status, SupervisionStatus::AiPaused);
        assert!(!row.ai_enabled);
    }

    #[tokio::test]
    async fn fallback_path_without_native_upsert() {
        let store = Arc::new(MockStore::new().without_native_upsert());
        let m = machine(&store);
        m.pause_ai("s1", None).await.unwrap();
        m.resume_ai("s1").await.unwrap();
        assert_eq!(store.state_count(), 1);
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::AiActive
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn missing_relation_simulates_success() {
        let store = Arc::new(MockStore::new());
        store.drop_relation("supervision_state");

        let out = machine(&store).pause_ai("s1", None).await.unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.state.status, SupervisionStatus::AiPaused);
        assert!(!out.state.ai_enabled);
        assert_eq!(store.state_count(), 0);
        assert!(logs_contain("degraded=true"));
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let store = Arc::new(MockStore::new());
        store.fail_state_writes_with(|| VigilError::transport("connection reset"));

        let err = machine(&store).pause_ai("s1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(store.state("s1").is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_session_leave_one_row() {
        let store = Arc::new(MockStore::new().without_native_upsert());
        let m = Arc::new(machine(&store));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let m = Arc::clone(&m);
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    m.pause_ai("s1", None).await
                } else {
                    m.resume_ai("s1").await
                }
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(store.state_count(), 1);
        assert_eq!(store.insert_conflicts(), 0);
        assert!(m.locks.is_empty());
    }

    #[tokio::test]
    async fn empty_session_id_is_rejected() {
        let store = Arc::new(MockStore::new());
        let err = machine(&store).pause_ai("  ", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
