use std::fmt;

use clap::ValueEnum;
use sea_orm::entity::prelude::*;

/// Two-state lifecycle shared by plans, steps and goals.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    ValueEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum Status {
    #[sea_orm(string_value = "todo")]
    Todo,
    #[sea_orm(string_value = "done")]
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Who is expected to carry out a step.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    ValueEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum Executor {
    #[sea_orm(string_value = "ai")]
    Ai,
    #[sea_orm(string_value = "human")]
    Human,
}

impl Executor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Human => "human",
        }
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EntityKind {
    Plan,
    Step,
    Goal,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Step => "step",
            Self::Goal => "goal",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Step => "Step",
            Self::Goal => "Goal",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Clone, Debug)]
pub struct PlanDraft {
    pub title: String,
    pub content: String,
}

/// A step to create, optionally with its goals, in a single tree insert.
#[derive(Clone, Debug)]
pub struct StepDraft {
    pub content: String,
    pub executor: Executor,
    pub goals: Vec<String>,
}

impl StepDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            executor: Executor::Ai,
            goals: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub status: Option<Status>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct StepPatch {
    pub content: Option<String>,
    pub status: Option<Status>,
    pub executor: Option<Executor>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct GoalPatch {
    pub content: Option<String>,
    pub status: Option<Status>,
    pub comment: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum PlanOrder {
    Id,
    Title,
    Created,
    #[default]
    Updated,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum StepOrder {
    #[default]
    Position,
    Id,
    Created,
    Updated,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum GoalOrder {
    #[default]
    Id,
    Created,
    Updated,
}

/// Status filter plus paging. `status: None` means every status.
#[derive(Clone, Copy, Debug, Default)]
pub struct Window {
    pub status: Option<Status>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub descending: bool,
}

impl Window {
    pub fn todo() -> Self {
        Self {
            status: Some(Status::Todo),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlanFilter {
    pub window: Window,
    pub order: PlanOrder,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StepFilter {
    pub window: Window,
    pub executor: Option<Executor>,
    pub order: StepOrder,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GoalFilter {
    pub window: Window,
    pub order: GoalOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_values_match_command_line_names() {
        for status in [Status::Todo, Status::Done] {
            assert_eq!(status.to_value(), status.as_str());
            assert_eq!(<Status as ValueEnum>::from_str(status.as_str(), true), Ok(status));
        }
        for executor in [Executor::Ai, Executor::Human] {
            assert_eq!(executor.to_value(), executor.as_str());
            assert_eq!(<Executor as ValueEnum>::from_str(executor.as_str(), true), Ok(executor));
        }
    }

    #[test]
    fn labels_respect_column_width() {
        assert_eq!(format!("[{:<6}]", Status::Done), "[done  ]");
        assert_eq!(format!("[{:>5}]", Executor::Ai), "[   ai]");
        assert_eq!(format!("[{:<5}]", EntityKind::Goal), "[goal ]");
    }
}
