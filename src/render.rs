use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::{GoalDetail, PlanDetail, StepDetail};
use crate::entities::{goal, plan, step};
use crate::model::Status;
use crate::rollup::Report;

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn note(comment: &Option<String>) -> Option<&str> {
    comment
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn done_count<'a, I>(statuses: I) -> usize
where
    I: IntoIterator<Item = &'a Status>,
{
    statuses.into_iter().filter(|status| status.is_done()).count()
}

/// Text block with labeled lines, indented sub-items and trailing-space trimming.
#[derive(Default)]
struct Block {
    lines: Vec<String>,
}

impl Block {
    fn line(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(text.into());
        self
    }

    fn field(&mut self, label: &str, value: impl std::fmt::Display) -> &mut Self {
        self.line(format!("{label}: {value}"))
    }

    fn comment(&mut self, indent: &str, label: &str, comment: &Option<String>) -> &mut Self {
        if let Some(text) = note(comment) {
            self.line(format!("{indent}{label}: {text}"));
        }
        self
    }

    fn blank(&mut self) -> &mut Self {
        self.line(String::new())
    }

    fn finish(&self) -> String {
        self.lines.join("\n").trim_end().to_string()
    }
}

fn push_goals(block: &mut Block, indent: &str, goals: &[goal::Model]) {
    for goal in goals {
        block.line(format!(
            "{indent}- [{}] {} (goal id {})",
            goal.status, goal.content, goal.id
        ));
        block.comment(&format!("{indent}  "), "Comment", &goal.comment);
    }
}

pub fn step_detail(detail: &StepDetail) -> String {
    step_with_goals(&detail.step, &detail.goals)
}

pub fn step_with_goals(step: &step::Model, goals: &[goal::Model]) -> String {
    let mut block = Block::default();
    block
        .field("Step ID", step.id)
        .field("Plan ID", step.plan_id)
        .field("Position", step.position)
        .field("Status", step.status)
        .field("Executor", step.executor)
        .field("Content", &step.content)
        .comment("", "Comment", &step.comment)
        .field("Updated", timestamp(step.updated_at))
        .blank();
    if goals.is_empty() {
        block.line("Goals: (none)");
    } else {
        let done = done_count(goals.iter().map(|goal| &goal.status));
        block.line(format!("Goals ({done}/{} done):", goals.len()));
        push_goals(&mut block, "", goals);
    }
    block.finish()
}

pub fn goal_detail(detail: &GoalDetail) -> String {
    let GoalDetail { goal, step } = detail;
    let mut block = Block::default();
    block
        .field("Goal ID", goal.id)
        .field("Step ID", goal.step_id)
        .field("Plan ID", step.plan_id)
        .field("Status", goal.status)
        .field("Content", &goal.content)
        .comment("", "Comment", &goal.comment)
        .field("Created", timestamp(goal.created_at))
        .field("Updated", timestamp(goal.updated_at))
        .blank()
        .line(format!(
            "Step: [{}] {} (executor {})",
            step.status, step.content, step.executor
        ));
    block.finish()
}

pub fn plan_detail(detail: &PlanDetail) -> String {
    let PlanDetail { plan, steps, goals } = detail;
    let mut block = Block::default();
    block
        .field("Plan ID", plan.id)
        .field("Title", &plan.title)
        .field("Status", plan.status)
        .field("Content", &plan.content)
        .comment("", "Comment", &plan.comment)
        .field("Created", timestamp(plan.created_at))
        .field("Updated", timestamp(plan.updated_at))
        .blank();
    if steps.is_empty() {
        block.line("Steps: (none)");
        return block.finish();
    }
    let done = done_count(steps.iter().map(|step| &step.status));
    block.line(format!("Steps ({done}/{} done):", steps.len()));
    for step in steps {
        let step_goals = goals.get(&step.id).map(Vec::as_slice).unwrap_or(&[]);
        let progress = if step_goals.is_empty() {
            String::new()
        } else {
            format!(
                ", goals {}/{}",
                done_count(step_goals.iter().map(|goal| &goal.status)),
                step_goals.len()
            )
        };
        block.line(format!(
            "{}. [{}] {} (step id {}, {}{progress})",
            step.position, step.status, step.content, step.id, step.executor
        ));
        block.comment("   ", "Comment", &step.comment);
        push_goals(&mut block, "   ", step_goals);
    }
    block.finish()
}

pub fn plan_table(plans: &[plan::Model], progress: &HashMap<i64, (usize, usize)>) -> String {
    let mut block = Block::default();
    block.line(format!(
        "{:<5} {:<6} {:<7} {}",
        "ID", "STATUS", "STEPS", "TITLE"
    ));
    for plan in plans {
        let (done, total) = progress.get(&plan.id).copied().unwrap_or((0, 0));
        block.line(format!(
            "{:<5} {:<6} {:<7} {}",
            plan.id,
            plan.status,
            format!("{done}/{total}"),
            plan.title
        ));
    }
    block.finish()
}

pub fn step_table(steps: &[step::Model], goals: &HashMap<i64, Vec<goal::Model>>) -> String {
    let mut block = Block::default();
    block.line(format!(
        "{:<5} {:<4} {:<6} {:<6} {:<6} {}",
        "ID", "POS", "STATUS", "EXEC", "GOALS", "CONTENT"
    ));
    for step in steps {
        let step_goals = goals.get(&step.id).map(Vec::as_slice).unwrap_or(&[]);
        let tally = format!(
            "{}/{}",
            done_count(step_goals.iter().map(|goal| &goal.status)),
            step_goals.len()
        );
        block.line(format!(
            "{:<5} {:<4} {:<6} {:<6} {:<6} {}",
            step.id, step.position, step.status, step.executor, tally, step.content
        ));
    }
    block.finish()
}

pub fn goal_table(goals: &[goal::Model]) -> String {
    let mut block = Block::default();
    block.line(format!("{:<5} {:<6} {}", "ID", "STATUS", "CONTENT"));
    for goal in goals {
        block.line(format!("{:<5} {:<6} {}", goal.id, goal.status, goal.content));
    }
    block.finish()
}

/// `Auto status updates:` block, or `None` when nothing moved.
pub fn report(report: &Report) -> Option<String> {
    if report.is_empty() {
        return None;
    }
    let mut block = Block::default();
    block.line("Auto status updates:");
    for change in &report.changes {
        block.line(format!(
            "- {} ID: {} status auto-updated from {} to {} ({}).",
            change.kind.title(),
            change.id,
            change.from,
            change.to,
            change.reason
        ));
    }
    for released in &report.released {
        block.line(format!(
            "- Session {} released plan ID: {} (plan is done).",
            released.session_id, released.plan_id
        ));
    }
    Some(block.finish())
}

pub fn plan_markdown(detail: &PlanDetail, holder: Option<&str>) -> String {
    let PlanDetail { plan, steps, goals } = detail;
    let tick = |status: Status| if status.is_done() { "x" } else { " " };
    let heading = plan
        .title
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" / ");

    let mut block = Block::default();
    block
        .line(format!("# {heading}"))
        .blank()
        .line(format!("- **Plan ID:** `{}`", plan.id))
        .line(format!("- **Status:** `{}`", plan.status));
    if let Some(session) = holder {
        block.line(format!("- **Active in session:** `{session}`"));
    }
    if let Some(text) = note(&plan.comment) {
        block.line(format!("- **Comment:** {text}"));
    }
    block
        .line(format!("- **Created:** {}", timestamp(plan.created_at)))
        .line(format!("- **Updated:** {}", timestamp(plan.updated_at)))
        .blank()
        .line("## Content")
        .blank();
    for line in plan.content.lines() {
        block.line(if line.is_empty() {
            ">".to_string()
        } else {
            format!("> {line}")
        });
    }
    block.blank().line("## Steps").blank();
    if steps.is_empty() {
        block.line("*No steps*");
        return block.finish();
    }
    for step in steps {
        block.line(format!(
            "- [{}] **{}** *(step {}, {})*",
            tick(step.status),
            step.content.lines().next().unwrap_or_default(),
            step.id,
            step.executor
        ));
        for extra in step.content.lines().skip(1).filter(|line| !line.trim().is_empty()) {
            block.line(format!("  {extra}"));
        }
        if let Some(text) = note(&step.comment) {
            block.line(format!("  - Comment: {text}"));
        }
        for goal in goals.get(&step.id).map(Vec::as_slice).unwrap_or(&[]) {
            block.line(format!(
                "  - [{}] {} *(goal {})*",
                tick(goal.status),
                goal.content,
                goal.id
            ));
        }
    }
    block.finish()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::{EntityKind, Executor};
    use crate::rollup::{Released, StatusChange};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn step(id: i64, position: i32, status: Status) -> step::Model {
        step::Model {
            id,
            plan_id: 1,
            content: format!("Step {id}"),
            status,
            executor: Executor::Ai,
            position,
            comment: None,
            created_at: at(),
            updated_at: at(),
        }
    }

    fn goal(id: i64, step_id: i64, status: Status) -> goal::Model {
        goal::Model {
            id,
            step_id,
            content: format!("Goal {id}"),
            status,
            comment: Some("see notes".to_string()),
            created_at: at(),
            updated_at: at(),
        }
    }

    #[test]
    fn step_detail_lists_goals_with_status() {
        let text = step_with_goals(
            &step(3, 1, Status::Todo),
            &[goal(1, 3, Status::Done), goal(2, 3, Status::Todo)],
        );
        assert!(text.starts_with("Step ID: 3\nPlan ID: 1\nPosition: 1\nStatus: todo"));
        assert!(text.contains("Executor: ai"));
        assert!(text.contains("Goals (1/2 done):"));
        assert!(text.contains("- [done] Goal 1 (goal id 1)\n  Comment: see notes"));
        assert!(text.ends_with("- [todo] Goal 2 (goal id 2)\n  Comment: see notes"));
    }

    #[test]
    fn step_detail_without_goals_says_none() {
        let text = step_with_goals(&step(3, 1, Status::Todo), &[]);
        assert!(text.ends_with("Goals: (none)"));
        assert!(!text.contains("Comment:"));
    }

    #[test]
    fn report_renders_changes_then_releases() {
        let rendered = report(&Report {
            changes: vec![StatusChange {
                kind: EntityKind::Plan,
                id: 2,
                from: Status::Todo,
                to: Status::Done,
                reason: "all steps done (1/1)".to_string(),
            }],
            released: vec![Released {
                plan_id: 2,
                session_id: "s1".to_string(),
            }],
        })
        .unwrap();
        assert_eq!(
            rendered,
            "Auto status updates:\n\
             - Plan ID: 2 status auto-updated from todo to done (all steps done (1/1)).\n\
             - Session s1 released plan ID: 2 (plan is done)."
        );
        assert!(report(&Report::default()).is_none());
    }

    #[test]
    fn markdown_ticks_done_items() {
        let plan = plan::Model {
            id: 1,
            title: "Ship it".to_string(),
            content: "Line one\n\nLine two".to_string(),
            status: Status::Todo,
            comment: None,
            created_at: at(),
            updated_at: at(),
        };
        let mut goals = HashMap::new();
        goals.insert(1, vec![goal(5, 1, Status::Done)]);
        let detail = PlanDetail {
            plan,
            steps: vec![step(1, 1, Status::Done), step(2, 2, Status::Todo)],
            goals,
        };
        let text = plan_markdown(&detail, Some("s1"));
        assert!(text.starts_with("# Ship it\n"));
        assert!(text.contains("> Line one\n>\n> Line two"));
        assert!(text.contains("- [x] **Step 1** *(step 1, ai)*"));
        assert!(text.contains("  - [x] Goal 5 *(goal 5)*"));
        assert!(text.contains("- [ ] **Step 2** *(step 2, ai)*"));
        assert!(text.contains("Active in session:** `s1`"));
    }
}
