//! Call scripts and knowledge snippets fed into the agent instructions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A ranked piece of domain knowledge returned by retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub title: String,
    pub content: String,
}

impl KnowledgeSnippet {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Per-course script with policies and canned objection answers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallScript {
    pub name: String,
    /// `None` applies to every course
    pub course: Option<String>,
    pub opening_text: Option<String>,
    pub closing_text: Option<String>,
    /// Free-form rules, e.g. `pode_dar_desconto: false`
    pub policies: BTreeMap<String, String>,
    /// Objection keyword -> suggested answer
    pub objection_responses: BTreeMap<String, String>,
    pub system_prompt_override: Option<String>,
    pub is_active: bool,
}

impl CallScript {
    fn matches_course(&self, course: &str) -> bool {
        self.course
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(course.trim()))
    }

    /// Course-specific active script first, then the first generic one
    pub fn select<'a>(scripts: &'a [CallScript], course: &str) -> Option<&'a CallScript> {
        let active = || scripts.iter().filter(|s| s.is_active);
        active()
            .find(|s| s.matches_course(course))
            .or_else(|| active().find(|s| s.course.is_none()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(name: &str, course: Option<&str>, active: bool) -> CallScript {
        CallScript {
            name: name.into(),
            course: course.map(Into::into),
            is_active: active,
            ..Default::default()
        }
    }

    #[test]
    fn test_course_specific_script_wins() {
        let scripts = vec![
            script("generic", None, true),
            script("mba", Some("MBA Executivo"), true),
        ];
        assert_eq!(
            CallScript::select(&scripts, "mba executivo").map(|s| s.name.as_str()),
            Some("mba")
        );
        assert_eq!(
            CallScript::select(&scripts, "Direito").map(|s| s.name.as_str()),
            Some("generic")
        );
    }

    #[test]
    fn test_inactive_scripts_are_skipped() {
        let scripts = vec![script("mba", Some("MBA"), false)];
        assert!(CallScript::select(&scripts, "MBA").is_none());
    }
}
