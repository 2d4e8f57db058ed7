// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change events for the store's own writes.
//!
//! Writes go through tokio-rusqlite's single background thread, so events are
//! published in commit order for any given row.

use serde::Serialize;
use tracing::warn;
use vigil_bus::ChangeFeed;
use vigil_core::{ChangeEvent, Table};

/// Publishes a [`ChangeEvent`] for every committed write, when a feed is attached.
#[derive(Clone, Default)]
pub struct ChangePublisher {
    feed: Option<ChangeFeed>,
}

impl ChangePublisher {
    pub fn new(feed: Option<ChangeFeed>) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> Option<&ChangeFeed> {
        self.feed.as_ref()
    }

    pub fn inserted<T: Serialize>(&self, table: Table, row: &T) {
        let Some(feed) = &self.feed else { return };
        if let Some(after) = to_row(table, row) {
            feed.publish(ChangeEvent::insert(table, after));
        }
    }

    pub fn updated<T: Serialize>(&self, table: Table, before: Option<&T>, after: &T) {
        let Some(feed) = &self.feed else { return };
        let before = before.and_then(|row| to_row(table, row));
        if let Some(after) = to_row(table, after) {
            feed.publish(ChangeEvent::update(table, before, after));
        }
    }
}

fn to_row<T: Serialize>(table: Table, row: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(row) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%table, error = %e, "change event row not serializable, event dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use vigil_core::{ChangeKind, ChangeStream, EventMatcher, SupervisionState};

    use super::*;

    #[test]
    fn without_feed_is_silent() {
        let publisher = ChangePublisher::default();
        let state = SupervisionState::new("s1", None, "ana", Utc::now());
        publisher.inserted(Table::SupervisionState, &state);
        assert!(publisher.feed().is_none());
    }

    #[tokio::test]
    async fn update_carries_both_images() {
        let feed = ChangeFeed::new(8);
        let mut sub = feed
            .subscribe(&EventMatcher::table(Table::SupervisionState))
            .await
            .unwrap();
        let publisher = ChangePublisher::new(Some(feed));

        let before = SupervisionState::new("s1", None, "ana", Utc::now());
        let mut after = before.clone();
        after.notes = Some("vip".into());
        publisher.updated(Table::SupervisionState, Some(&before), &after);

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert!(event.before.is_some());
        assert_eq!(event.column("notes").as_deref(), Some("vip"));
    }
}
