//! Event envelopes: the normalized, immutable form of an inbound repository event.
//!
//! Raw deliveries arrive as a GitHub-style event name plus JSON payload
//! ([`RawEvent`]). [`EventEnvelope::from_raw`] extracts the discriminator
//! fields the dispatcher needs and rejects anything it cannot classify.
//! Trust is never inferred from payload shape: the caller states whether the
//! sender was verified through [`SenderVerification`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EnvelopeError;

/// Repository event kinds the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CommentCreated,
    CommentEdited,
    PullRequestOpened,
    PullRequestSynchronized,
    PullRequestReopened,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CommentCreated => "comment_created",
            EventKind::CommentEdited => "comment_edited",
            EventKind::PullRequestOpened => "pull_request_opened",
            EventKind::PullRequestSynchronized => "pull_request_synchronized",
            EventKind::PullRequestReopened => "pull_request_reopened",
        }
    }

    /// Map a GitHub `(event, action)` pair onto a kind.
    pub fn from_github(event: &str, action: &str) -> Option<Self> {
        match (event, action) {
            ("issue_comment", "created") => Some(EventKind::CommentCreated),
            ("issue_comment", "edited") => Some(EventKind::CommentEdited),
            ("pull_request" | "pull_request_target", "opened") => {
                Some(EventKind::PullRequestOpened)
            }
            ("pull_request" | "pull_request_target", "synchronize") => {
                Some(EventKind::PullRequestSynchronized)
            }
            ("pull_request" | "pull_request_target", "reopened") => {
                Some(EventKind::PullRequestReopened)
            }
            _ => None,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, EventKind::CommentCreated | EventKind::CommentEdited)
    }

    fn is_known_event(event: &str) -> bool {
        matches!(event, "issue_comment" | "pull_request" | "pull_request_target")
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery as received from the transport, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event name, e.g. `issue_comment` or `pull_request`.
    pub event: String,

    /// Transport-level delivery id, if the transport provides one.
    #[serde(default)]
    pub delivery_id: Option<String>,

    pub payload: Value,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            delivery_id: None,
            payload,
        }
    }
}

/// Whether the caller verified the delivery's origin (webhook signature,
/// platform-provided context, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderVerification {
    Verified,
    Unverified,
}

/// Repository the event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// `owner/name`.
    pub full_name: String,
    pub default_branch: String,
}

impl Repository {
    pub fn new(full_name: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            default_branch: default_branch.into(),
        }
    }
}

/// Pull request facts carried by an envelope.
///
/// Comment events only reveal that the issue is a pull request, so refs and
/// fork status are unknown for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub state: String,
    pub is_fork: Option<bool>,
}

impl PullRequestRef {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            base_ref: None,
            head_ref: None,
            state: "open".to_string(),
            is_fork: None,
        }
    }

    pub fn with_refs(mut self, base_ref: &str, head_ref: &str) -> Self {
        self.base_ref = Some(base_ref.to_string());
        self.head_ref = Some(head_ref.to_string());
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_fork(mut self, is_fork: bool) -> Self {
        self.is_fork = Some(is_fork);
        self
    }
}

/// Normalized inbound event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    delivery_id: String,
    kind: EventKind,
    actor: String,
    sender_verified: bool,
    repository: Repository,
    issue_number: Option<u64>,
    comment_body: Option<String>,
    pull_request: Option<PullRequestRef>,
    received_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Normalize a raw GitHub-style delivery.
    pub fn from_raw(
        raw: &RawEvent,
        verification: SenderVerification,
    ) -> Result<Self, EnvelopeError> {
        let payload = &raw.payload;
        let malformed = |field: &str| EnvelopeError::Malformed {
            event: raw.event.clone(),
            field: field.to_string(),
        };

        let action = match str_at(payload, "/action") {
            Some(action) => action,
            None if !EventKind::is_known_event(&raw.event) => {
                return Err(EnvelopeError::Unsupported {
                    event: raw.event.clone(),
                    action: String::new(),
                })
            }
            None => return Err(malformed("action")),
        };
        let kind =
            EventKind::from_github(&raw.event, action).ok_or_else(|| EnvelopeError::Unsupported {
                event: raw.event.clone(),
                action: action.to_string(),
            })?;

        let actor = str_at(payload, "/sender/login").ok_or_else(|| malformed("sender.login"))?;
        let full_name = str_at(payload, "/repository/full_name")
            .ok_or_else(|| malformed("repository.full_name"))?;
        let default_branch = str_at(payload, "/repository/default_branch").unwrap_or("main");

        let (issue_number, comment_body, pull_request) = if kind.is_comment() {
            let body = str_at(payload, "/comment/body").ok_or_else(|| malformed("comment.body"))?;
            let number = payload
                .pointer("/issue/number")
                .and_then(Value::as_u64)
                .ok_or_else(|| malformed("issue.number"))?;
            let is_pull_request = payload
                .pointer("/issue/pull_request")
                .is_some_and(|v| !v.is_null());
            let pull_request = is_pull_request.then(|| {
                PullRequestRef::new(number)
                    .with_state(str_at(payload, "/issue/state").unwrap_or("open"))
            });
            (Some(number), Some(body.to_string()), pull_request)
        } else {
            let pr = payload
                .get("pull_request")
                .filter(|v| v.is_object())
                .ok_or_else(|| malformed("pull_request"))?;
            let number = pr
                .get("number")
                .or_else(|| payload.get("number"))
                .and_then(Value::as_u64)
                .ok_or_else(|| malformed("pull_request.number"))?;
            let is_fork = match (
                str_at(pr, "/head/repo/full_name"),
                str_at(pr, "/base/repo/full_name"),
            ) {
                (Some(head), Some(base)) => Some(head != base),
                // A deleted head repository can only have been a fork.
                (None, Some(_)) => Some(true),
                _ => None,
            };
            let pull_request = PullRequestRef {
                number,
                base_ref: str_at(pr, "/base/ref").map(str::to_string),
                head_ref: str_at(pr, "/head/ref").map(str::to_string),
                state: str_at(pr, "/state").unwrap_or("open").to_string(),
                is_fork,
            };
            (Some(number), None, Some(pull_request))
        };

        Ok(Self {
            delivery_id: raw
                .delivery_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind,
            actor: actor.to_string(),
            sender_verified: verification == SenderVerification::Verified,
            repository: Repository::new(full_name, default_branch),
            issue_number,
            comment_body,
            pull_request,
            received_at: Utc::now(),
        })
    }

    /// Start building an envelope directly, bypassing payload parsing.
    pub fn builder(kind: EventKind, actor: &str) -> EnvelopeBuilder {
        EnvelopeBuilder {
            envelope: Self {
                delivery_id: Uuid::new_v4().to_string(),
                kind,
                actor: actor.to_string(),
                sender_verified: false,
                repository: Repository::new("owner/repo", "main"),
                issue_number: None,
                comment_body: None,
                pull_request: None,
                received_at: Utc::now(),
            },
        }
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn sender_verified(&self) -> bool {
        self.sender_verified
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Issue or pull request number a comment should be posted to.
    pub fn issue_number(&self) -> Option<u64> {
        self.issue_number
    }

    pub fn comment_body(&self) -> Option<&str> {
        self.comment_body.as_deref()
    }

    pub fn pull_request(&self) -> Option<&PullRequestRef> {
        self.pull_request.as_ref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Builder for [`EventEnvelope`], mostly for tests and embedders.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    envelope: EventEnvelope,
}

impl EnvelopeBuilder {
    pub fn delivery_id(mut self, id: &str) -> Self {
        self.envelope.delivery_id = id.to_string();
        self
    }

    pub fn repository(mut self, full_name: &str, default_branch: &str) -> Self {
        self.envelope.repository = Repository::new(full_name, default_branch);
        self
    }

    pub fn comment(mut self, body: &str) -> Self {
        self.envelope.comment_body = Some(body.to_string());
        self
    }

    pub fn issue(mut self, number: u64) -> Self {
        self.envelope.issue_number = Some(number);
        self
    }

    /// Attach pull request facts; also targets comments at the PR.
    pub fn pull_request(mut self, pull_request: PullRequestRef) -> Self {
        self.envelope.issue_number.get_or_insert(pull_request.number);
        self.envelope.pull_request = Some(pull_request);
        self
    }

    pub fn verified(mut self) -> Self {
        self.envelope.sender_verified = true;
        self
    }

    pub fn build(self) -> EventEnvelope {
        self.envelope
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment_payload(body: &str, on_pr: bool) -> Value {
        let mut issue = json!({ "number": 42, "state": "open" });
        if on_pr {
            issue["pull_request"] = json!({ "url": "https://api.github.com/repos/acme/app/pulls/42" });
        }
        json!({
            "action": "created",
            "sender": { "login": "octocat" },
            "repository": { "full_name": "acme/app", "default_branch": "develop" },
            "issue": issue,
            "comment": { "body": body },
        })
    }

    fn pr_payload(action: &str, head_repo: Option<&str>) -> Value {
        let head = match head_repo {
            Some(name) => json!({ "ref": "feature", "repo": { "full_name": name } }),
            None => json!({ "ref": "feature", "repo": null }),
        };
        json!({
            "action": action,
            "number": 7,
            "sender": { "login": "dependabot[bot]" },
            "repository": { "full_name": "acme/app", "default_branch": "main" },
            "pull_request": {
                "number": 7,
                "state": "open",
                "base": { "ref": "main", "repo": { "full_name": "acme/app" } },
                "head": head,
            },
        })
    }

    #[test]
    fn test_comment_on_pull_request() {
        let raw = RawEvent::new("issue_comment", comment_payload("/deploy-dev", true));
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap();

        assert_eq!(env.kind(), EventKind::CommentCreated);
        assert_eq!(env.actor(), "octocat");
        assert_eq!(env.comment_body(), Some("/deploy-dev"));
        assert_eq!(env.issue_number(), Some(42));
        assert_eq!(env.repository().default_branch, "develop");
        assert!(!env.sender_verified());

        let pr = env.pull_request().expect("comment on PR carries PR facts");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.base_ref, None);
        assert_eq!(pr.is_fork, None);
    }

    #[test]
    fn test_comment_on_plain_issue_has_no_pull_request() {
        let raw = RawEvent::new("issue_comment", comment_payload("hello", false));
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Verified).unwrap();
        assert!(env.pull_request().is_none());
        assert!(env.sender_verified());
    }

    #[test]
    fn test_pull_request_same_repo_is_not_fork() {
        let raw = RawEvent::new("pull_request", pr_payload("opened", Some("acme/app")));
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap();
        assert_eq!(env.kind(), EventKind::PullRequestOpened);
        let pr = env.pull_request().unwrap();
        assert_eq!(pr.base_ref.as_deref(), Some("main"));
        assert_eq!(pr.head_ref.as_deref(), Some("feature"));
        assert_eq!(pr.is_fork, Some(false));
        assert_eq!(env.issue_number(), Some(7));
    }

    #[test]
    fn test_pull_request_from_fork() {
        let raw = RawEvent::new("pull_request_target", pr_payload("synchronize", Some("mallory/app")));
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap();
        assert_eq!(env.kind(), EventKind::PullRequestSynchronized);
        assert_eq!(env.pull_request().unwrap().is_fork, Some(true));
    }

    #[test]
    fn test_deleted_head_repo_counts_as_fork() {
        let raw = RawEvent::new("pull_request", pr_payload("reopened", None));
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap();
        assert_eq!(env.pull_request().unwrap().is_fork, Some(true));
    }

    #[test]
    fn test_missing_comment_body_is_malformed() {
        let mut payload = comment_payload("x", true);
        payload["comment"] = json!({});
        let raw = RawEvent::new("issue_comment", payload);
        match EventEnvelope::from_raw(&raw, SenderVerification::Unverified) {
            Err(EnvelopeError::Malformed { field, .. }) => assert_eq!(field, "comment.body"),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_sender_is_malformed() {
        let mut payload = pr_payload("opened", Some("acme/app"));
        payload.as_object_mut().unwrap().remove("sender");
        let raw = RawEvent::new("pull_request", payload);
        let err = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap_err();
        assert!(err.to_string().contains("sender.login"));
    }

    #[test]
    fn test_unknown_action_is_unsupported() {
        let raw = RawEvent::new("pull_request", pr_payload("closed", Some("acme/app")));
        let err = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_push_event_is_unsupported_not_malformed() {
        let raw = RawEvent::new("push", json!({ "ref": "refs/heads/main" }));
        let err = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_delivery_id_is_preserved() {
        let mut raw = RawEvent::new("issue_comment", comment_payload("hi", false));
        raw.delivery_id = Some("abc-123".into());
        let env = EventEnvelope::from_raw(&raw, SenderVerification::Unverified).unwrap();
        assert_eq!(env.delivery_id(), "abc-123");
    }

    #[test]
    fn test_builder_targets_pull_request_number() {
        let env = EventEnvelope::builder(EventKind::PullRequestOpened, "alice")
            .pull_request(PullRequestRef::new(9).with_refs("main", "topic"))
            .build();
        assert_eq!(env.issue_number(), Some(9));
        assert_eq!(env.pull_request().unwrap().head_ref.as_deref(), Some("topic"));
    }
}
