//! Core domain types shared across the sync and retrieval pipeline.
//!
//! Synced records are a closed set of tagged variants, one per source shape,
//! each knowing how to project itself into a retrieval-ready `ContextItem`.
//! Dispatch is by pattern match; nothing downstream probes for fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;

/// External services the sync pipeline can pull from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Mail,
    Calendar,
    IssueTracker,
    Chat,
    Docs,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Mail,
        Provider::Calendar,
        Provider::IssueTracker,
        Provider::Chat,
        Provider::Docs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Mail => "mail",
            Provider::Calendar => "calendar",
            Provider::IssueTracker => "issue_tracker",
            Provider::Chat => "chat",
            Provider::Docs => "docs",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel delivery toggles for the daily brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelToggles {
    #[serde(default = "default_true")]
    pub email_enabled: bool,
    #[serde(default)]
    pub chat_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            email_enabled: true,
            chat_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    /// Local hour (0-23) the daily brief should be ready by.
    #[serde(default = "default_brief_hour")]
    pub brief_hour: u8,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub channels: ChannelToggles,
}

fn default_brief_hour() -> u8 {
    7
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            brief_hour: 7,
            timezone: "UTC".to_string(),
            channels: ChannelToggles::default(),
        }
    }
}

/// A user of the system. Never hard-deleted; `is_active` is a soft status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One connected integration per (user, provider).
///
/// Deactivated on disconnect, never removed, so the audit trail stays intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub user_id: UserId,
    pub provider: Provider,
    pub access_credential: String,
    #[serde(default)]
    pub refresh_credential: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Integration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Half-open time range a provider sync should cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering the last `days` days up to `now`.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - chrono::Duration::days(days),
            end: now,
        }
    }

    /// Window from `days_back` before `now` to `days_forward` after.
    /// Calendar syncs look both directions.
    pub fn around(now: DateTime<Utc>, days_back: i64, days_forward: i64) -> Self {
        Self {
            start: now - chrono::Duration::days(days_back),
            end: now + chrono::Duration::days(days_forward),
        }
    }
}

// ============================================================================
// Synced records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub source_id: String,
    pub subject: String,
    pub from_name: Option<String>,
    pub from_email: String,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventRecord {
    pub source_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub source_id: String,
    pub identifier: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub state_name: Option<String>,
    pub state_type: Option<String>,
    pub priority: Option<i32>,
    pub project_name: Option<String>,
    pub team_name: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last-updated time reported by the issue tracker, used for recency ordering.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub source_id: String,
    pub name: String,
    pub state: Option<String>,
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub source_id: String,
    pub channel_name: String,
    pub user_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source_id: String,
    pub title: String,
    pub doc_type: Option<String>,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of source shapes a provider sync can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Email(EmailRecord),
    CalendarEvent(CalendarEventRecord),
    Issue(IssueRecord),
    Project(ProjectRecord),
    ChatMessage(ChatMessageRecord),
    Document(DocumentRecord),
}

impl RecordPayload {
    /// Provider-native id. Combined with (user, provider) this keys the upsert.
    pub fn source_id(&self) -> &str {
        match self {
            RecordPayload::Email(r) => &r.source_id,
            RecordPayload::CalendarEvent(r) => &r.source_id,
            RecordPayload::Issue(r) => &r.source_id,
            RecordPayload::Project(r) => &r.source_id,
            RecordPayload::ChatMessage(r) => &r.source_id,
            RecordPayload::Document(r) => &r.source_id,
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            RecordPayload::Email(_) => "email",
            RecordPayload::CalendarEvent(_) => "calendar_event",
            RecordPayload::Issue(_) => "issue",
            RecordPayload::Project(_) => "project",
            RecordPayload::ChatMessage(_) => "chat_message",
            RecordPayload::Document(_) => "document",
        }
    }

    /// Text used for embedding generation. `None` for shapes that carry no
    /// prose worth indexing.
    pub fn embedding_text(&self) -> Option<String> {
        match self {
            RecordPayload::Email(r) => Some(format!(
                "From: {}\nSubject: {}\n\n{}",
                r.from_email, r.subject, r.body_text
            )),
            RecordPayload::Issue(r) => Some(format!(
                "{}\n{}",
                r.title,
                r.description.as_deref().unwrap_or("")
            )),
            RecordPayload::ChatMessage(r) => Some(r.text.clone()),
            RecordPayload::Document(r) => Some(format!("{}\n\n{}", r.title, r.content)),
            RecordPayload::CalendarEvent(_) | RecordPayload::Project(_) => None,
        }
    }
}

/// Unique key for a synced record: (user, provider, provider-native id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: UserId,
    pub provider: Provider,
    pub source_id: String,
}

/// A normalized record owned by exactly one user, written only by sync passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub user_id: UserId,
    pub provider: Provider,
    pub payload: RecordPayload,
    /// Derived relevance/priority score, when computed.
    #[serde(default)]
    pub relevance: Option<f32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl SyncedRecord {
    pub fn new(user_id: impl Into<UserId>, provider: Provider, payload: RecordPayload) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            payload,
            relevance: None,
            category: None,
            embedding: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            user_id: self.user_id.clone(),
            provider: self.provider,
            source_id: self.payload.source_id().to_string(),
        }
    }

    /// Project this record into the normalized retrieval shape.
    pub fn to_context_item(&self, similarity: Option<f32>) -> ContextItem {
        let text = match &self.payload {
            RecordPayload::Email(r) => format!(
                "Email from {} <{}>: {}\n{}",
                r.from_name.as_deref().unwrap_or("Unknown"),
                r.from_email,
                r.subject,
                truncate_chars(&r.body_text, 500)
            ),
            RecordPayload::CalendarEvent(r) => format!(
                "Event: {} ({} - {}), {} attendees",
                r.title,
                r.start_time.format("%Y-%m-%d %H:%M"),
                r.end_time.format("%H:%M"),
                r.attendees.len()
            ),
            RecordPayload::Issue(r) => {
                let status = r
                    .state_name
                    .as_deref()
                    .map(|s| format!("[{}]", s))
                    .unwrap_or_default();
                let completed = if r.completed_at.is_some() {
                    " (Completed)"
                } else {
                    ""
                };
                let project = r
                    .project_name
                    .as_deref()
                    .map(|p| format!(" in {}", p))
                    .unwrap_or_default();
                let team = r
                    .team_name
                    .as_deref()
                    .map(|t| format!(" ({})", t))
                    .unwrap_or_default();
                format!(
                    "Issue {}{}: {}{}{}\n{}",
                    status,
                    completed,
                    r.title,
                    project,
                    team,
                    truncate_chars(r.description.as_deref().unwrap_or(""), 500)
                )
            }
            RecordPayload::Project(r) => format!(
                "Project: {} ({})",
                r.name,
                r.state.as_deref().unwrap_or("active")
            ),
            RecordPayload::ChatMessage(r) => {
                format!("[{}] {}: {}", r.channel_name, r.user_name, r.text)
            }
            RecordPayload::Document(r) => {
                format!("{}\n\n{}", r.title, truncate_chars(&r.content, 2000))
            }
        };

        ContextItem {
            id: self.payload.source_id().to_string(),
            source_type: self.payload.source_type().to_string(),
            text,
            similarity,
        }
    }
}

/// Retrieval-ready projection of any stored record. Ephemeral: built at query
/// time, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub source_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Business context captured at onboarding, consumed by prompt assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub quarterly_goals: Vec<String>,
    #[serde(default)]
    pub current_challenges: Vec<String>,
}

// ============================================================================
// Briefs
// ============================================================================

/// One actionable focus item in a daily brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    pub task: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Minutes needed.
    #[serde(default)]
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Suggested focus block on the day's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub start_time: String,
    pub end_time: String,
    pub purpose: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Task under ~15 minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickWin {
    pub task: String,
    #[serde(default)]
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Urgent item needing immediate attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    #[serde(rename = "type", default)]
    pub flag_type: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action_required: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Generated per-day brief. Upsert semantics: regenerating for the same date
/// overwrites, never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    pub id: String,
    pub user_id: UserId,
    pub brief_date: NaiveDate,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub time_blocks: Vec<TimeBlock>,
    #[serde(default)]
    pub quick_wins: Vec<QuickWin>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    pub brief_text: String,
    #[serde(default)]
    pub reasoning: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Conversations (Q&A)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Q&A thread: ordered messages plus the context-item ids used to answer the
/// latest question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub context_used: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_record() -> SyncedRecord {
        SyncedRecord::new(
            "u1",
            Provider::IssueTracker,
            RecordPayload::Issue(IssueRecord {
                source_id: "ISS-1".to_string(),
                identifier: Some("ENG-42".to_string()),
                title: "Fix login flow".to_string(),
                description: Some("Session cookie expires early".to_string()),
                state_name: Some("In Progress".to_string()),
                state_type: Some("started".to_string()),
                priority: Some(2),
                project_name: Some("Auth".to_string()),
                team_name: Some("Platform".to_string()),
                completed_at: None,
                updated_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn test_record_key_uses_native_id() {
        let record = issue_record();
        let key = record.key();
        assert_eq!(key.source_id, "ISS-1");
        assert_eq!(key.provider, Provider::IssueTracker);
        assert_eq!(key.user_id, "u1");
    }

    #[test]
    fn test_issue_context_item_annotations() {
        let item = issue_record().to_context_item(Some(0.9));
        assert_eq!(item.source_type, "issue");
        assert!(item.text.contains("[In Progress]"));
        assert!(item.text.contains("in Auth"));
        assert!(item.text.contains("(Platform)"));
        assert_eq!(item.similarity, Some(0.9));
    }

    #[test]
    fn test_calendar_event_has_no_embedding_text() {
        let payload = RecordPayload::CalendarEvent(CalendarEventRecord {
            source_id: "ev1".to_string(),
            title: "Standup".to_string(),
            description: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            attendees: vec![],
            location: None,
        });
        assert!(payload.embedding_text().is_none());
    }

    #[test]
    fn test_integration_expiry() {
        let now = Utc::now();
        let mut integration = Integration {
            user_id: "u1".to_string(),
            provider: Provider::Mail,
            access_credential: "tok".to_string(),
            refresh_credential: None,
            expires_at: Some(now - chrono::Duration::minutes(1)),
            is_active: true,
            last_synced_at: None,
        };
        assert!(integration.is_expired(now));
        integration.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(!integration.is_expired(now));
        integration.expires_at = None;
        assert!(!integration.is_expired(now));
    }

    #[test]
    fn test_truncate_chars_boundary() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
    }
}
