// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation list filters.
//!
//! Stores translate [`ConversationFilters`] into their own query language;
//! [`ConversationFilters::matches`] is the reference semantics and is also
//! applied in memory after every fetch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VigilError;
use crate::types::{Channel, Conversation, SupervisionStatus};

/// Status selector for the conversation list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Only(SupervisionStatus),
}

impl StatusFilter {
    pub fn accepts(self, status: SupervisionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => wanted == status,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => write!(f, "all"),
            StatusFilter::Only(status) => write!(f, "{status}"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        SupervisionStatus::from_str(s)
            .map(StatusFilter::Only)
            .map_err(|_| VigilError::Validation(format!("unknown status filter `{s}`")))
    }
}

/// Inclusive range on `last_message_at`. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Whether `ts` falls inside the range. A missing timestamp only
    /// satisfies an unbounded range.
    pub fn contains(&self, ts: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(ts) = ts else {
            return false;
        };
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts <= to)
    }
}

/// The filter set an operator applies to the conversation list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationFilters {
    pub status: StatusFilter,
    /// Free text matched against contact name, phone, and last message.
    pub search: Option<String>,
    pub date_range: DateRange,
    pub location_id: Option<String>,
    pub channel: Option<Channel>,
    pub assignee: Option<String>,
    /// Only conversations where the lead spoke last.
    pub no_response: bool,
}

impl ConversationFilters {
    /// Normalized search term: trimmed, lowercased, `None` when blank.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, conversation: &Conversation) -> bool {
        if !self.status.accepts(conversation.status) {
            return false;
        }
        if self
            .location_id
            .as_ref()
            .is_some_and(|loc| *loc != conversation.location_id)
        {
            return false;
        }
        if self.channel.is_some_and(|ch| ch != conversation.channel) {
            return false;
        }
        if self
            .assignee
            .as_ref()
            .is_some_and(|who| conversation.assignee.as_ref() != Some(who))
        {
            return false;
        }
        if self.no_response && !conversation.awaiting_response() {
            return false;
        }
        if !self.date_range.contains(conversation.last_message_at) {
            return false;
        }
        match self.search_term() {
            Some(term) => [
                Some(conversation.contact_name.as_str()),
                conversation.contact_phone.as_deref(),
                conversation.last_message.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&term)),
            None => true,
        }
    }
}

/// A page request against a conversation relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationQuery {
    pub filters: ConversationFilters,
    /// Maximum rows to return, ordered by `last_message_at` descending.
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;
    use chrono::TimeZone;

    fn conversation() -> Conversation {
        Conversation {
            conversation_id: "c1".into(),
            session_id: "s1".into(),
            location_id: "loc-1".into(),
            contact_name: "Maria Souza".into(),
            contact_phone: Some("+5511999990000".into()),
            channel: Channel::Whatsapp,
            last_message: Some("Quero agendar uma visita".into()),
            last_message_role: Some(MessageRole::User),
            last_message_at: Some(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()),
            message_count: 4,
            status: SupervisionStatus::AiActive,
            ai_enabled: true,
            assignee: Some("ana".into()),
        }
    }

    #[test]
    fn default_filters_match_everything() {
        assert!(ConversationFilters::default().matches(&conversation()));
    }

    #[test]
    fn search_covers_name_phone_and_last_message() {
        let c = conversation();
        for term in ["maria", "99999", "AGENDAR", "  souza "] {
            let filters = ConversationFilters {
                search: Some(term.into()),
                ..Default::default()
            };
            assert!(filters.matches(&c), "term {term:?} should match");
        }
        let filters = ConversationFilters {
            search: Some("pedro".into()),
            ..Default::default()
        };
        assert!(!filters.matches(&c));
    }

    #[test]
    fn blank_search_is_ignored() {
        let filters = ConversationFilters {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(filters.search_term(), None);
        assert!(filters.matches(&conversation()));
    }

    #[test]
    fn status_channel_location_assignee() {
        let c = conversation();
        let paused = ConversationFilters {
            status: StatusFilter::Only(SupervisionStatus::AiPaused),
            ..Default::default()
        };
        assert!(!paused.matches(&c));

        let sms = ConversationFilters {
            channel: Some(Channel::Sms),
            ..Default::default()
        };
        assert!(!sms.matches(&c));

        let other_location = ConversationFilters {
            location_id: Some("loc-2".into()),
            ..Default::default()
        };
        assert!(!other_location.matches(&c));

        let other_assignee = ConversationFilters {
            assignee: Some("bruno".into()),
            ..Default::default()
        };
        assert!(!other_assignee.matches(&c));
    }

    #[test]
    fn no_response_requires_user_last() {
        let mut c = conversation();
        let filters = ConversationFilters {
            no_response: true,
            ..Default::default()
        };
        assert!(filters.matches(&c));
        c.last_message_role = Some(MessageRole::Assistant);
        assert!(!filters.matches(&c));
    }

    #[test]
    fn date_range_is_inclusive() {
        let c = conversation();
        let at = c.last_message_at;
        let filters = ConversationFilters {
            date_range: DateRange { from: at, to: at },
            ..Default::default()
        };
        assert!(filters.matches(&c));

        let mut undated = c.clone();
        undated.last_message_at = None;
        assert!(!filters.matches(&undated));
    }

    #[test]
    fn status_filter_parses() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "scheduled".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(SupervisionStatus::Scheduled)
        );
        assert!("bogus".parse::<StatusFilter>().is_err());
    }
}
