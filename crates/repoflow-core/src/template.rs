//! `${{ field }}` substitution in step parameters.
//!
//! Placeholders name an envelope [`Field`]. Unknown fields are rejected when
//! a job is validated; a field the envelope lacks renders as an empty string.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::envelope::EventEnvelope;
use crate::predicate::Field;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

pub fn has_placeholders(template: &str) -> bool {
    placeholder().is_match(template)
}

/// Check that every placeholder names a known field.
pub fn validate(template: &str) -> Result<(), String> {
    placeholder()
        .captures_iter(template)
        .try_for_each(|caps| caps[1].parse::<Field>().map(|_| ()))
}

pub fn render(template: &str, envelope: &EventEnvelope) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match caps[1].parse::<Field>() {
            Ok(field) => field
                .resolve(envelope)
                .map(|value| value.into_owned())
                .unwrap_or_default(),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EventKind, PullRequestRef};

    fn env() -> EventEnvelope {
        EventEnvelope::builder(EventKind::PullRequestOpened, "dependabot[bot]")
            .pull_request(PullRequestRef::new(12).with_refs("main", "deps/bump"))
            .build()
    }

    #[test]
    fn test_render_known_fields() {
        let out = render(
            "Merged #${{ pull_request.number }} from ${{pull_request.head_ref}} by ${{ actor }}",
            &env(),
        );
        assert_eq!(out, "Merged #12 from deps/bump by dependabot[bot]");
    }

    #[test]
    fn test_render_absent_field_is_empty() {
        assert_eq!(render("body=[${{ comment.body }}]", &env()), "body=[]");
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        assert!(validate("${{ pull_request.number }}").is_ok());
        assert!(validate("${{ secrets.TOKEN }}").is_err());
        assert!(validate("no placeholders here").is_ok());
    }

    #[test]
    fn test_has_placeholders() {
        assert!(has_placeholders("echo ${{ comment.body }}"));
        assert!(!has_placeholders("echo $HOME"));
    }
}
