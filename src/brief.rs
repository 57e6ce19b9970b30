//! Daily brief generation.
//!
//! Assembles one generation request from structured inputs (business profile,
//! active projects, recent communications, retrieved context) and parses the
//! JSON-shaped response into typed sections. Fields the model omitted default
//! to empty collections; a partially-useful brief beats a hard failure.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::ContextRetriever;
use crate::embeddings::Embedder;
use crate::error::{BriefError, GenerationParseError};
use crate::generation::{GenerationRequest, ResponseShape, TextGenerator};
use crate::store::RecordStore;
use crate::types::{
    Brief, BusinessProfile, ContextItem, Flag, Priority, QuickWin, RecordPayload, Role,
    SyncedRecord, TimeBlock, TimeWindow, truncate_chars,
};

/// Emails folded into one brief prompt.
const MAX_EMAILS_IN_PROMPT: usize = 20;
/// Context items retrieved to ground the brief.
const BRIEF_CONTEXT_LIMIT: usize = 10;

const BRIEF_SYSTEM_PROMPT: &str = "You are an AI Chief of Staff for a busy founder. \
Analyze their emails, calendar, projects and context, then generate a concise daily \
brief with actionable priorities, time blocks, quick wins, and urgent flags. Be \
specific, practical, and focused on high-impact work. Return ONLY valid JSON.";

/// Typed view of the model's JSON response. Every section is optional on the
/// wire; absent sections become empty collections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BriefAnalysis {
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub time_blocks: Vec<TimeBlock>,
    #[serde(default)]
    pub quick_wins: Vec<QuickWin>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub reasoning: serde_json::Value,
}

/// Find the first complete JSON object `{...}` in the text.
///
/// Tolerates prose or markdown fences around the object.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the generation response into a `BriefAnalysis`.
///
/// Malformed output is surfaced as `GenerationParseError` carrying the raw
/// body; the caller decides whether to retry or report.
pub fn parse_brief_response(raw: &str) -> Result<BriefAnalysis, GenerationParseError> {
    let json_str = extract_json_object(raw).ok_or_else(|| GenerationParseError {
        message: "no JSON object in response".to_string(),
        raw: raw.to_string(),
    })?;

    serde_json::from_str(&json_str).map_err(|e| GenerationParseError {
        message: e.to_string(),
        raw: raw.to_string(),
    })
}

/// Render the brief's plain-text form.
pub fn render_brief_text(analysis: &BriefAnalysis, date: NaiveDate) -> String {
    let mut lines = vec![
        format!("Daily Brief for {}", date.format("%A, %B %d, %Y")),
        "=".repeat(60),
        String::new(),
        "TOP PRIORITIES".to_string(),
        "-".repeat(60),
    ];

    if analysis.priorities.is_empty() {
        lines.push("Nothing urgent surfaced today.".to_string());
        lines.push(String::new());
    }
    for (i, p) in analysis.priorities.iter().enumerate() {
        let time = p
            .estimated_time
            .map(|m| format!(" ({} min)", m))
            .unwrap_or_default();
        lines.push(format!("{}. {}{}", i + 1, p.task, time));
        if let Some(reasoning) = &p.reasoning {
            lines.push(format!("   Why: {}", reasoning));
        }
        lines.push(String::new());
    }

    if !analysis.time_blocks.is_empty() {
        lines.push("SUGGESTED TIME BLOCKS".to_string());
        lines.push("-".repeat(60));
        for tb in &analysis.time_blocks {
            lines.push(format!("{} - {}: {}", tb.start_time, tb.end_time, tb.purpose));
            if let Some(reasoning) = &tb.reasoning {
                lines.push(format!("   {}", reasoning));
            }
            lines.push(String::new());
        }
    }

    if !analysis.quick_wins.is_empty() {
        lines.push("QUICK WINS (< 15 min)".to_string());
        lines.push("-".repeat(60));
        for qw in &analysis.quick_wins {
            let time = qw
                .estimated_time
                .map(|m| format!(" ({} min)", m))
                .unwrap_or_default();
            lines.push(format!("- {}{}", qw.task, time));
        }
        lines.push(String::new());
    }

    if !analysis.flags.is_empty() {
        lines.push("FLAGS - NEEDS ATTENTION".to_string());
        lines.push("-".repeat(60));
        for flag in &analysis.flags {
            lines.push(format!("! {}", flag.title));
            if let Some(description) = &flag.description {
                lines.push(format!("   {}", description));
            }
            if let Some(action) = &flag.action_required {
                lines.push(format!("   Action: {}", action));
            }
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

pub struct BriefGenerator {
    store: Arc<dyn RecordStore>,
    retriever: Arc<ContextRetriever>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
}

impl BriefGenerator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        retriever: Arc<ContextRetriever>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            retriever,
            embedder,
            generator,
        }
    }

    /// Generate (or regenerate) the brief for one user and date.
    ///
    /// Idempotent per (user, date): the stored brief is overwritten, never
    /// duplicated. A parse failure writes nothing.
    pub async fn generate_brief(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Brief, BriefError> {
        log::info!("Generating brief for user {} on {}", user_id, date);

        let profile = self
            .store
            .business_profile(user_id)
            .await?
            .ok_or_else(|| BriefError::MissingProfile(user_id.to_string()))?;

        let now = Utc::now();
        let projects = self.store.active_projects(user_id).await?;
        let emails = self
            .store
            .recent_emails(user_id, now - chrono::Duration::days(1), 50)
            .await?;
        let events = self
            .store
            .events_in_window(user_id, day_window(date))
            .await?;

        let context_query = profile_query_text(&profile);
        let context = self
            .retriever
            .retrieve(
                user_id,
                &self.embedder.embed(&context_query),
                BRIEF_CONTEXT_LIMIT,
            )
            .await;

        let mut request = GenerationRequest::new(BRIEF_SYSTEM_PROMPT, ResponseShape::JsonObject);
        request.push(
            Role::User,
            build_brief_prompt(&profile, &projects, &emails, &events, &context, date),
        );

        let raw = self.generator.generate(request).await?;
        let analysis = match parse_brief_response(&raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                log::error!(
                    "Brief response parse failed for user {}: {} (raw: {})",
                    user_id,
                    e.message,
                    truncate_chars(&e.raw, 500)
                );
                return Err(e.into());
            }
        };

        let brief_text = render_brief_text(&analysis, date);
        let brief = Brief {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            brief_date: date,
            priorities: analysis.priorities,
            time_blocks: analysis.time_blocks,
            quick_wins: analysis.quick_wins,
            flags: analysis.flags,
            brief_text,
            reasoning: analysis.reasoning,
            generated_at: now,
        };

        let stored = self.store.upsert_brief(brief).await?;
        log::info!("Brief generated and saved for user {}", user_id);
        Ok(stored)
    }
}

/// UTC window covering the brief date.
fn day_window(date: NaiveDate) -> TimeWindow {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    TimeWindow {
        start,
        end: start + chrono::Duration::days(1),
    }
}

fn profile_query_text(profile: &BusinessProfile) -> String {
    let mut parts = Vec::new();
    if let Some(mission) = &profile.mission {
        parts.push(mission.clone());
    }
    parts.extend(profile.quarterly_goals.iter().cloned());
    parts.extend(profile.current_challenges.iter().cloned());
    if parts.is_empty() {
        parts.push("current priorities".to_string());
    }
    parts.join(" ")
}

fn build_brief_prompt(
    profile: &BusinessProfile,
    projects: &[SyncedRecord],
    emails: &[SyncedRecord],
    events: &[SyncedRecord],
    context: &[ContextItem],
    date: NaiveDate,
) -> String {
    let mut sections = vec![format!("Today is {}.", date.format("%A, %B %d, %Y"))];

    sections.push(format!(
        "Business context:\n- Mission: {}\n- Stage: {}\n- Goals: {}\n- Challenges: {}",
        profile.mission.as_deref().unwrap_or("N/A"),
        profile.stage.as_deref().unwrap_or("N/A"),
        profile.quarterly_goals.join(", "),
        profile.current_challenges.join(", ")
    ));

    let projects_text: Vec<String> = projects
        .iter()
        .filter_map(|r| match &r.payload {
            RecordPayload::Project(p) => Some(format!(
                "- {} ({}){}",
                p.name,
                p.state.as_deref().unwrap_or("active"),
                p.target_date
                    .map(|d| format!(", target {}", d))
                    .unwrap_or_default()
            )),
            _ => None,
        })
        .collect();
    sections.push(format!(
        "Active projects ({}):\n{}",
        projects_text.len(),
        if projects_text.is_empty() {
            "No active projects".to_string()
        } else {
            projects_text.join("\n")
        }
    ));

    let emails_text: Vec<String> = emails
        .iter()
        .take(MAX_EMAILS_IN_PROMPT)
        .filter_map(|r| match &r.payload {
            RecordPayload::Email(e) => Some(format!(
                "- [{}] From: {} <{}>\n  Subject: {}\n  Preview: {}",
                e.received_at.format("%Y-%m-%d %H:%M"),
                e.from_name.as_deref().unwrap_or("Unknown"),
                e.from_email,
                e.subject,
                truncate_chars(&e.body_text, 200)
            )),
            _ => None,
        })
        .collect();
    sections.push(format!(
        "Recent emails ({}):\n{}",
        emails_text.len(),
        if emails_text.is_empty() {
            "No recent emails".to_string()
        } else {
            emails_text.join("\n")
        }
    ));

    let events_text: Vec<String> = events
        .iter()
        .filter_map(|r| match &r.payload {
            RecordPayload::CalendarEvent(e) => Some(format!(
                "- {} - {}: {} ({} attendees)",
                e.start_time.format("%H:%M"),
                e.end_time.format("%H:%M"),
                e.title,
                e.attendees.len()
            )),
            _ => None,
        })
        .collect();
    sections.push(format!(
        "Today's calendar ({} events):\n{}",
        events_text.len(),
        if events_text.is_empty() {
            "No events scheduled".to_string()
        } else {
            events_text.join("\n")
        }
    ));

    if !context.is_empty() {
        let context_text: Vec<String> = context
            .iter()
            .map(|item| format!("[{}]: {}", item.source_type, item.text))
            .collect();
        sections.push(format!(
            "Additional context:\n{}",
            context_text.join("\n---\n")
        ));
    }

    sections.push(
        "Generate a daily brief as a JSON object with keys: priorities (array of \
{task, reasoning, estimated_time, source, source_id}, max 3), time_blocks (array of \
{start_time, end_time, purpose, reasoning}), quick_wins (array of {task, \
estimated_time, source}), flags (array of {type, title, description, \
action_required, source_id}), reasoning ({key_insights, assumptions}). Link \
priorities to specific projects and deadlines."
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embeddings::{HashEmbedder, MemoryVectorIndex};
    use crate::error::GenerationError;
    use crate::store::MemoryStore;
    use crate::types::{EmailRecord, Provider};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CannedGenerator {
        responses: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| GenerationError::Backend("no canned response left".to_string()))
        }
    }

    fn generator_with(
        store: Arc<MemoryStore>,
        generation: Arc<dyn TextGenerator>,
    ) -> BriefGenerator {
        let embedder = Arc::new(HashEmbedder::default());
        let retriever = Arc::new(ContextRetriever::new(
            store.clone(),
            Arc::new(MemoryVectorIndex::new(store.clone())),
            RetrievalConfig::default(),
        ));
        BriefGenerator::new(store, retriever, embedder, generation)
    }

    async fn seed_profile(store: &MemoryStore, user: &str) {
        store
            .upsert_business_profile(BusinessProfile {
                user_id: user.to_string(),
                mission: Some("Ship the product".to_string()),
                stage: Some("seed".to_string()),
                quarterly_goals: vec!["Close 10 design partners".to_string()],
                current_challenges: vec!["Hiring".to_string()],
            })
            .await
            .expect("profile");
    }

    #[test]
    fn test_parse_tolerates_markdown_fences() {
        let raw = "```json\n{\"priorities\": [{\"task\": \"Review deck\"}]}\n```";
        let analysis = parse_brief_response(raw).expect("parse");
        assert_eq!(analysis.priorities.len(), 1);
        assert_eq!(analysis.priorities[0].task, "Review deck");
    }

    #[test]
    fn test_missing_flags_default_to_empty() {
        let raw = r#"{"priorities": [], "time_blocks": [], "quick_wins": []}"#;
        let analysis = parse_brief_response(raw).expect("parse");
        assert!(analysis.flags.is_empty());
    }

    #[test]
    fn test_malformed_response_is_parse_error_with_raw() {
        let err = parse_brief_response("I could not produce a brief today.").unwrap_err();
        assert!(err.raw.contains("could not produce"));
    }

    #[test]
    fn test_render_includes_sections() {
        let analysis = BriefAnalysis {
            priorities: vec![Priority {
                task: "Close the Acme deal".to_string(),
                reasoning: Some("Deadline Friday".to_string()),
                estimated_time: Some(90),
                source: None,
                source_id: None,
            }],
            flags: vec![Flag {
                flag_type: Some("urgent_email".to_string()),
                title: "Investor reply overdue".to_string(),
                description: None,
                action_required: Some("Reply today".to_string()),
                source_id: None,
            }],
            ..BriefAnalysis::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).expect("date");
        let text = render_brief_text(&analysis, date);
        assert!(text.contains("TOP PRIORITIES"));
        assert!(text.contains("Close the Acme deal (90 min)"));
        assert!(text.contains("FLAGS - NEEDS ATTENTION"));
        assert!(text.contains("Action: Reply today"));
    }

    #[tokio::test]
    async fn test_generate_brief_defaults_missing_sections() {
        let store = MemoryStore::shared();
        seed_profile(&store, "u1").await;
        let generation = CannedGenerator::new(vec![
            r#"{"priorities": [{"task": "Prep board update"}], "time_blocks": []}"#,
        ]);

        let brief = generator_with(store.clone(), generation)
            .generate_brief("u1", NaiveDate::from_ymd_opt(2026, 8, 7).expect("date"))
            .await
            .expect("brief");

        assert_eq!(brief.priorities.len(), 1);
        assert!(brief.flags.is_empty());
        assert!(brief.quick_wins.is_empty());
    }

    #[tokio::test]
    async fn test_regeneration_overwrites_same_date() {
        let store = MemoryStore::shared();
        seed_profile(&store, "u1").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).expect("date");
        let generation = CannedGenerator::new(vec![
            r#"{"priorities": [{"task": "first"}]}"#,
            r#"{"priorities": [{"task": "second"}]}"#,
        ]);

        let briefs = generator_with(store.clone(), generation);
        briefs.generate_brief("u1", date).await.expect("first");
        briefs.generate_brief("u1", date).await.expect("second");

        let stored = store
            .brief_for_date("u1", date)
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(stored.priorities[0].task, "second");
    }

    #[tokio::test]
    async fn test_parse_failure_writes_nothing() {
        let store = MemoryStore::shared();
        seed_profile(&store, "u1").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).expect("date");
        let generation = CannedGenerator::new(vec!["no json here"]);

        let result = generator_with(store.clone(), generation)
            .generate_brief("u1", date)
            .await;
        assert!(matches!(result, Err(BriefError::Parse(_))));
        assert!(store
            .brief_for_date("u1", date)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_profile_is_typed_error() {
        let store = MemoryStore::shared();
        let generation = CannedGenerator::new(vec![]);
        let result = generator_with(store, generation)
            .generate_brief("u1", NaiveDate::from_ymd_opt(2026, 8, 7).expect("date"))
            .await;
        assert!(matches!(result, Err(BriefError::MissingProfile(_))));
    }

    #[tokio::test]
    async fn test_prompt_includes_recent_emails() {
        let store = MemoryStore::shared();
        seed_profile(&store, "u1").await;
        store
            .upsert_records(&[SyncedRecord::new(
                "u1",
                Provider::Mail,
                RecordPayload::Email(EmailRecord {
                    source_id: "m1".to_string(),
                    subject: "Term sheet attached".to_string(),
                    from_name: Some("Alex".to_string()),
                    from_email: "alex@vc.example".to_string(),
                    body_text: "See attached".to_string(),
                    received_at: Utc::now(),
                    is_read: false,
                    labels: vec![],
                }),
            )])
            .await
            .expect("upsert");

        let profile = store
            .business_profile("u1")
            .await
            .expect("query")
            .expect("exists");
        let emails = store
            .recent_emails("u1", Utc::now() - chrono::Duration::days(1), 50)
            .await
            .expect("emails");
        let prompt = build_brief_prompt(
            &profile,
            &[],
            &emails,
            &[],
            &[],
            NaiveDate::from_ymd_opt(2026, 8, 7).expect("date"),
        );
        assert!(prompt.contains("Term sheet attached"));
        assert!(prompt.contains("Ship the product"));
    }
}
