use clap::ValueEnum;

use crate::engine::PlanDetail;
use crate::error::AppError;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum SearchMode {
    /// Any term may match.
    Any,
    /// Every term must match somewhere in the searched text.
    #[default]
    All,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum SearchField {
    /// Title, content and comment of the plan itself.
    #[default]
    Plan,
    Title,
    Content,
    Comment,
    Steps,
    Goals,
    All,
}

impl SearchField {
    fn covers(self, part: SearchField) -> bool {
        match self {
            Self::All => true,
            Self::Plan => matches!(part, Self::Title | Self::Content | Self::Comment),
            other => other == part,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlanQuery {
    terms: Vec<String>,
    mode: SearchMode,
    field: SearchField,
    match_case: bool,
}

impl PlanQuery {
    pub fn new(
        terms: Vec<String>,
        mode: SearchMode,
        field: SearchField,
        match_case: bool,
    ) -> Result<Self, AppError> {
        let terms: Vec<String> = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .map(|term| fold(term, match_case))
            .collect();
        if terms.is_empty() {
            return Err(AppError::invalid(
                "plan search requires at least one non-empty --search term",
            ));
        }
        Ok(Self {
            terms,
            mode,
            field,
            match_case,
        })
    }

    pub fn matches(&self, detail: &PlanDetail) -> bool {
        let haystack = self.haystack(detail);
        let found = |term: &String| haystack.iter().any(|text| text.contains(term.as_str()));
        match self.mode {
            SearchMode::Any => self.terms.iter().any(found),
            SearchMode::All => self.terms.iter().all(found),
        }
    }

    fn haystack(&self, detail: &PlanDetail) -> Vec<String> {
        let mut texts: Vec<&str> = Vec::new();
        let plan = &detail.plan;
        if self.field.covers(SearchField::Title) {
            texts.push(&plan.title);
        }
        if self.field.covers(SearchField::Content) {
            texts.push(&plan.content);
        }
        if self.field.covers(SearchField::Comment) {
            texts.extend(plan.comment.as_deref());
        }
        if self.field.covers(SearchField::Steps) {
            for step in &detail.steps {
                texts.push(&step.content);
                texts.extend(step.comment.as_deref());
            }
        }
        if self.field.covers(SearchField::Goals) {
            for goal in detail.goals.values().flatten() {
                texts.push(&goal.content);
                texts.extend(goal.comment.as_deref());
            }
        }
        texts
            .into_iter()
            .map(|text| fold(text, self.match_case))
            .collect()
    }
}

fn fold(text: &str, match_case: bool) -> String {
    if match_case {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::entities::{goal, plan, step};
    use crate::model::{Executor, Status};

    fn detail() -> PlanDetail {
        let now = Utc::now();
        let mut goals = HashMap::new();
        goals.insert(
            10,
            vec![goal::Model {
                id: 20,
                step_id: 10,
                content: "Benchmark the Cache".to_string(),
                status: Status::Todo,
                comment: None,
                created_at: now,
                updated_at: now,
            }],
        );
        PlanDetail {
            plan: plan::Model {
                id: 1,
                title: "Storage rewrite".to_string(),
                content: "Replace the index".to_string(),
                status: Status::Todo,
                comment: Some("blocked on review".to_string()),
                created_at: now,
                updated_at: now,
            },
            steps: vec![step::Model {
                id: 10,
                plan_id: 1,
                content: "Port the writer".to_string(),
                status: Status::Todo,
                executor: Executor::Ai,
                position: 1,
                comment: None,
                created_at: now,
                updated_at: now,
            }],
            goals,
        }
    }

    fn query(terms: &[&str], mode: SearchMode, field: SearchField, case: bool) -> PlanQuery {
        let terms = terms.iter().map(|term| term.to_string()).collect();
        PlanQuery::new(terms, mode, field, case).expect("query")
    }

    #[test]
    fn plan_field_covers_title_content_and_comment_only() {
        let detail = detail();
        assert!(query(&["storage"], SearchMode::All, SearchField::Plan, false).matches(&detail));
        assert!(query(&["review"], SearchMode::All, SearchField::Plan, false).matches(&detail));
        assert!(!query(&["writer"], SearchMode::All, SearchField::Plan, false).matches(&detail));
        assert!(query(&["writer"], SearchMode::All, SearchField::Steps, false).matches(&detail));
        assert!(query(&["cache"], SearchMode::All, SearchField::Goals, false).matches(&detail));
    }

    #[test]
    fn all_mode_needs_every_term_any_mode_needs_one() {
        let detail = detail();
        let terms = ["storage", "missing"];
        assert!(!query(&terms, SearchMode::All, SearchField::All, false).matches(&detail));
        assert!(query(&terms, SearchMode::Any, SearchField::All, false).matches(&detail));
    }

    #[test]
    fn match_case_is_exact() {
        let detail = detail();
        assert!(!query(&["cache"], SearchMode::All, SearchField::Goals, true).matches(&detail));
        assert!(query(&["Cache"], SearchMode::All, SearchField::Goals, true).matches(&detail));
    }

    #[test]
    fn blank_terms_are_rejected() {
        let err = PlanQuery::new(
            vec!["  ".to_string()],
            SearchMode::All,
            SearchField::Plan,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--search"));
    }
}
