//! Predicates over event envelopes.
//!
//! A [`Predicate`] is a tagged tree evaluated by a pure interpreter. Every
//! primitive is total: a reference to a field the envelope does not carry
//! evaluates to `false` rather than failing. `And` / `Or` short-circuit
//! left to right.

use std::borrow::Cow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::envelope::{EventEnvelope, EventKind};

/// Envelope fields a predicate or template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    Actor,
    CommentBody,
    IssueNumber,
    PullRequestNumber,
    PullRequestBaseRef,
    PullRequestHeadRef,
    PullRequestState,
    PullRequestIsFork,
    Repository,
    SenderVerified,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Actor,
        Field::CommentBody,
        Field::IssueNumber,
        Field::PullRequestNumber,
        Field::PullRequestBaseRef,
        Field::PullRequestHeadRef,
        Field::PullRequestState,
        Field::PullRequestIsFork,
        Field::Repository,
        Field::SenderVerified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Actor => "actor",
            Field::CommentBody => "comment.body",
            Field::IssueNumber => "issue.number",
            Field::PullRequestNumber => "pull_request.number",
            Field::PullRequestBaseRef => "pull_request.base_ref",
            Field::PullRequestHeadRef => "pull_request.head_ref",
            Field::PullRequestState => "pull_request.state",
            Field::PullRequestIsFork => "pull_request.is_fork",
            Field::Repository => "repository",
            Field::SenderVerified => "sender.verified",
        }
    }

    /// Read the field from an envelope, `None` when the envelope lacks it.
    pub fn resolve<'a>(&self, envelope: &'a EventEnvelope) -> Option<Cow<'a, str>> {
        let pr = envelope.pull_request();
        match self {
            Field::Actor => Some(Cow::Borrowed(envelope.actor())),
            Field::CommentBody => envelope.comment_body().map(Cow::Borrowed),
            Field::IssueNumber => envelope.issue_number().map(|n| Cow::Owned(n.to_string())),
            Field::PullRequestNumber => pr.map(|pr| Cow::Owned(pr.number.to_string())),
            Field::PullRequestBaseRef => pr.and_then(|pr| pr.base_ref.as_deref()).map(Cow::Borrowed),
            Field::PullRequestHeadRef => pr.and_then(|pr| pr.head_ref.as_deref()).map(Cow::Borrowed),
            Field::PullRequestState => pr.map(|pr| Cow::Borrowed(pr.state.as_str())),
            Field::PullRequestIsFork => pr
                .and_then(|pr| pr.is_fork)
                .map(|fork| Cow::Borrowed(bool_str(fork))),
            Field::Repository => Some(Cow::Borrowed(envelope.repository().full_name.as_str())),
            Field::SenderVerified => Some(Cow::Borrowed(bool_str(envelope.sender_verified()))),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}

impl TryFrom<String> for Field {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.as_str().to_string()
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// A literal compared against a field's rendered value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(u64),
    Text(String),
}

impl Literal {
    fn matches(&self, value: &str) -> bool {
        match self {
            Literal::Bool(b) => value == bool_str(*b),
            Literal::Number(n) => value.parse::<u64>().is_ok_and(|v| v == *n),
            Literal::Text(t) => value == t,
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<u64> for Literal {
    fn from(value: u64) -> Self {
        Literal::Number(value)
    }
}

/// Condition deciding whether a job runs for an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    Kind(Vec<EventKind>),
    Equals {
        field: Field,
        value: Literal,
    },
    Contains {
        field: Field,
        value: String,
    },
    OneOf {
        field: Field,
        values: Vec<Literal>,
    },
    Present(Field),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn kind(kind: EventKind) -> Self {
        Predicate::Kind(vec![kind])
    }

    pub fn equals(field: Field, value: impl Into<Literal>) -> Self {
        Predicate::Equals {
            field,
            value: value.into(),
        }
    }

    pub fn contains(field: Field, value: &str) -> Self {
        Predicate::Contains {
            field,
            value: value.to_string(),
        }
    }

    pub fn one_of<I, L>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        Predicate::OneOf {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn present(field: Field) -> Self {
        Predicate::Present(field)
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Reject trees that can never be meaningful (empty combinators or lists).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::Kind(kinds) if kinds.is_empty() => Err("`kind` needs at least one event kind".into()),
            Predicate::OneOf { field, values } if values.is_empty() => {
                Err(format!("`one_of` on {field} needs at least one value"))
            }
            Predicate::And(ps) | Predicate::Or(ps) if ps.is_empty() => {
                Err("`and` / `or` need at least one operand".into())
            }
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().try_for_each(Predicate::validate),
            Predicate::Not(inner) => inner.validate(),
            _ => Ok(()),
        }
    }
}

/// Evaluate `predicate` against `envelope`.
pub fn evaluate(predicate: &Predicate, envelope: &EventEnvelope) -> bool {
    evaluate_counted(predicate, envelope).0
}

/// Evaluate and also report how many predicate nodes were visited.
pub fn evaluate_counted(predicate: &Predicate, envelope: &EventEnvelope) -> (bool, usize) {
    let mut visited = 0;
    let matched = eval(predicate, envelope, &mut visited);
    (matched, visited)
}

fn eval(predicate: &Predicate, envelope: &EventEnvelope, visited: &mut usize) -> bool {
    *visited += 1;
    match predicate {
        Predicate::Always => true,
        Predicate::Kind(kinds) => kinds.contains(&envelope.kind()),
        Predicate::Equals { field, value } => field
            .resolve(envelope)
            .is_some_and(|actual| value.matches(&actual)),
        Predicate::Contains { field, value } => field
            .resolve(envelope)
            .is_some_and(|actual| actual.contains(value.as_str())),
        Predicate::OneOf { field, values } => field
            .resolve(envelope)
            .is_some_and(|actual| values.iter().any(|v| v.matches(&actual))),
        Predicate::Present(field) => field.resolve(envelope).is_some(),
        Predicate::And(ps) => ps.iter().all(|p| eval(p, envelope, visited)),
        Predicate::Or(ps) => ps.iter().any(|p| eval(p, envelope, visited)),
        Predicate::Not(inner) => !eval(inner, envelope, visited),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::PullRequestRef;

    fn bare_comment(body: &str) -> EventEnvelope {
        EventEnvelope::builder(EventKind::CommentCreated, "octocat")
            .comment(body)
            .issue(3)
            .build()
    }

    fn open_pr(actor: &str) -> EventEnvelope {
        EventEnvelope::builder(EventKind::PullRequestOpened, actor)
            .pull_request(PullRequestRef::new(5).with_refs("main", "bump").with_fork(false))
            .build()
    }

    #[test]
    fn test_absent_pull_request_fields_are_false() {
        let env = bare_comment("/deploy-dev");
        for field in [
            Field::PullRequestNumber,
            Field::PullRequestBaseRef,
            Field::PullRequestHeadRef,
            Field::PullRequestState,
            Field::PullRequestIsFork,
        ] {
            assert!(!evaluate(&Predicate::equals(field, "open"), &env), "{field}");
            assert!(!evaluate(&Predicate::contains(field, ""), &env), "{field}");
            assert!(!evaluate(&Predicate::one_of(field, ["open", "closed"]), &env), "{field}");
            assert!(!evaluate(&Predicate::present(field), &env), "{field}");
        }
    }

    #[test]
    fn test_missing_comment_body_is_false() {
        let env = open_pr("alice");
        assert!(!evaluate(&Predicate::contains(Field::CommentBody, "/run"), &env));
    }

    #[test]
    fn test_kind_match() {
        let env = open_pr("alice");
        assert!(evaluate(&Predicate::kind(EventKind::PullRequestOpened), &env));
        assert!(!evaluate(&Predicate::kind(EventKind::CommentCreated), &env));
    }

    #[test]
    fn test_literal_matching() {
        let env = open_pr("dependabot[bot]");
        assert!(evaluate(&Predicate::equals(Field::PullRequestNumber, 5u64), &env));
        assert!(evaluate(&Predicate::equals(Field::PullRequestIsFork, false), &env));
        assert!(evaluate(&Predicate::equals(Field::PullRequestState, "open"), &env));
        assert!(evaluate(&Predicate::equals(Field::Actor, "dependabot[bot]"), &env));
        assert!(!evaluate(&Predicate::equals(Field::PullRequestIsFork, true), &env));
    }

    #[test]
    fn test_actor_membership() {
        let allow = Predicate::one_of(Field::Actor, ["alice", "bob"]);
        assert!(evaluate(&allow, &open_pr("bob")));
        assert!(!evaluate(&allow, &open_pr("mallory")));
    }

    #[test]
    fn test_and_short_circuits() {
        let p = Predicate::and(vec![
            Predicate::kind(EventKind::CommentCreated),
            Predicate::contains(Field::CommentBody, "x"),
            Predicate::Always,
        ]);
        let (matched, visited) = evaluate_counted(&p, &open_pr("alice"));
        assert!(!matched);
        assert_eq!(visited, 2, "only the root and the failing first operand");
    }

    #[test]
    fn test_or_short_circuits() {
        let p = Predicate::or(vec![
            Predicate::Always,
            Predicate::contains(Field::CommentBody, "x"),
        ]);
        let (matched, visited) = evaluate_counted(&p, &open_pr("alice"));
        assert!(matched);
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_not_inverts() {
        let not_fork = Predicate::not(Predicate::equals(Field::PullRequestIsFork, true));
        assert!(evaluate(&not_fork, &open_pr("alice")));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let p = Predicate::and(vec![
            Predicate::kind(EventKind::CommentCreated),
            Predicate::contains(Field::CommentBody, "/deploy"),
            Predicate::not(Predicate::present(Field::PullRequestNumber)),
        ]);
        let env = bare_comment("/deploy-dev");
        let first = evaluate(&p, &env);
        let second = evaluate(&p, &env);
        assert!(first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_field_parse_roundtrip() {
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>().unwrap(), field);
        }
        assert!("pull_request.title".parse::<Field>().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_combinators() {
        assert!(Predicate::and(vec![]).validate().is_err());
        assert!(Predicate::Kind(vec![]).validate().is_err());
        assert!(Predicate::not(Predicate::or(vec![])).validate().is_err());
        assert!(Predicate::one_of(Field::Actor, Vec::<&str>::new()).validate().is_err());
        assert!(Predicate::and(vec![Predicate::Always]).validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
and:
  - contains: { field: comment.body, value: "/deploy-dev" }
  - present: pull_request.number
  - not:
      equals: { field: pull_request.is_fork, value: true }
"#;
        let p: Predicate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            p,
            Predicate::and(vec![
                Predicate::contains(Field::CommentBody, "/deploy-dev"),
                Predicate::present(Field::PullRequestNumber),
                Predicate::not(Predicate::equals(Field::PullRequestIsFork, true)),
            ])
        );
    }

    #[test]
    fn test_unknown_field_fails_to_deserialize() {
        let yaml = "present: pull_request.title";
        assert!(serde_yaml::from_str::<Predicate>(yaml).is_err());
    }
}
