use std::fs;

use super::{conclude, parse_comment_pairs};
use crate::cli::{PlanCommand, PlanList, PlanSearch};
use crate::engine::{ActivePlan, Engine};
use crate::error::{ensure_non_empty, AppError};
use crate::model::{EntityKind, Executor, PlanDraft, PlanFilter, PlanPatch, StepDraft, Window};
use crate::render;
use crate::search::PlanQuery;
use crate::session::Activation;

pub(super) async fn run(engine: &Engine, command: PlanCommand) -> Result<(), AppError> {
    match command {
        PlanCommand::Add(args) => {
            let plan = engine
                .add_plan(PlanDraft {
                    title: args.title,
                    content: args.content,
                })
                .await?;
            println!("Created plan ID: {}: {}", plan.id, plan.title);
        }
        PlanCommand::AddTree(args) => {
            let drafts = parse_tree_steps(&args.args)?;
            let draft = PlanDraft {
                title: args.title,
                content: args.content,
            };
            let (plan, steps, goals) = engine.add_plan_tree(draft, drafts).await?;
            println!(
                "Created plan ID: {}: {} (steps: {steps}, goals: {goals})",
                plan.id, plan.title
            );
        }
        PlanCommand::List(args) => list(engine, args).await?,
        PlanCommand::Search(args) => search(engine, args).await?,
        PlanCommand::Show(args) => {
            let detail = engine.plan_detail(args.id).await?;
            println!("{}", render::plan_detail(&detail));
        }
        PlanCommand::ShowActive => match engine.active_plan().await? {
            ActivePlan::None => println!("No active plan."),
            ActivePlan::Missing(plan_id) => println!("Active plan ID: {plan_id} not found."),
            ActivePlan::Found(detail) => println!("{}", render::plan_detail(&detail)),
        },
        PlanCommand::Export(args) => {
            let detail = engine.plan_detail(args.id).await?;
            let holder = engine.holder(args.id).await?;
            if let Some(parent) = args.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&args.path, render::plan_markdown(&detail, holder.as_deref()))?;
            println!(
                "Exported plan ID: {} to {}",
                detail.plan.id,
                args.path.display()
            );
        }
        PlanCommand::Comment(args) => {
            let pairs = parse_comment_pairs(EntityKind::Plan, args.pairs)?;
            let first = pairs.first().map(|(id, _)| *id);
            let updated = engine.comment_plans(pairs).await?;
            match (updated, first) {
                (1, Some(id)) => println!("Updated plan comment for plan ID: {id}."),
                _ => println!("Updated plan comments for {updated} plans."),
            }
        }
        PlanCommand::Update(args) => {
            let outcome = engine
                .update_plan(
                    args.id,
                    PlanPatch {
                        title: args.title,
                        content: args.content,
                        status: args.status,
                        comment: args.comment,
                    },
                )
                .await?;
            let plan = outcome.value;
            println!("Updated plan ID: {}: {}", plan.id, plan.title);
            let finished = plan.status.is_done().then_some(plan.id);
            conclude(engine, &outcome.report, &[], finished.as_slice()).await?;
        }
        PlanCommand::Done(args) => {
            let outcome = engine.complete_plan(args.id, args.all_steps).await?;
            println!("Plan ID: {} marked done.", outcome.value.id);
            conclude(engine, &outcome.report, &[], &[outcome.value.id]).await?;
        }
        PlanCommand::Remove(args) => {
            let holder = engine.remove_plan(args.id).await?;
            println!("Plan ID: {} removed.", args.id);
            if let Some(session) = holder {
                println!("Session {session} released plan ID: {} (plan removed).", args.id);
            }
        }
        PlanCommand::Activate(args) => {
            let (plan, activation) = engine.activate(args.id, args.force).await?;
            match activation {
                Activation::Fresh => println!("Active plan set to {}: {}", plan.id, plan.title),
                Activation::Unchanged => {
                    println!("Plan ID: {} is already active in this session.", plan.id)
                }
                Activation::TookOver { previous } => println!(
                    "Active plan set to {}: {} (taken over from session {previous})",
                    plan.id, plan.title
                ),
            }
        }
        PlanCommand::Deactivate => match engine.deactivate().await? {
            Some(plan_id) => println!("Active plan deactivated (plan ID: {plan_id})."),
            None => println!("No active plan."),
        },
    }
    Ok(())
}

async fn list(engine: &Engine, args: PlanList) -> Result<(), AppError> {
    let window = args.window.window();
    if args.window.count {
        println!("Total: {}", engine.count_plans(&window).await?);
        return Ok(());
    }
    let filter = PlanFilter {
        window,
        order: args.order,
    };
    let plans = engine.list_plans(&filter).await?;
    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }
    let ids: Vec<i64> = plans.iter().map(|plan| plan.id).collect();
    let progress = engine.plan_progress(&ids).await?;
    println!("{}", render::plan_table(&plans, &progress));
    Ok(())
}

async fn search(engine: &Engine, args: PlanSearch) -> Result<(), AppError> {
    let query = PlanQuery::new(args.search, args.mode, args.field, args.match_case)?;
    let window = match (args.all, args.status) {
        (true, _) => Window::all(),
        (false, None) => Window::todo(),
        (false, status) => Window {
            status,
            ..Window::default()
        },
    };
    let plans: Vec<_> = engine
        .plan_details(&window)
        .await?
        .into_iter()
        .filter(|detail| query.matches(detail))
        .map(|detail| detail.plan)
        .collect();
    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }
    let ids: Vec<i64> = plans.iter().map(|plan| plan.id).collect();
    let progress = engine.plan_progress(&ids).await?;
    println!("{}", render::plan_table(&plans, &progress));
    Ok(())
}

/// Parses `--step <content> [--executor ai|human] [--goal <goal>]...`
/// repeated once per step.
fn parse_tree_steps(args: &[String]) -> Result<Vec<StepDraft>, AppError> {
    let mut steps: Vec<StepDraft> = Vec::new();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        if flag == "--" {
            continue;
        }
        let mut value = || {
            iter.next()
                .ok_or_else(|| AppError::invalid(format!("plan add-tree {flag} requires a value")))
        };
        match flag.as_str() {
            "--step" => {
                let content = value()?;
                ensure_non_empty("plan add-tree --step", content)?;
                steps.push(StepDraft::new(content.as_str()));
            }
            "--executor" => {
                let executor = parse_executor(value()?)?;
                current(&mut steps, flag)?.executor = executor;
            }
            "--goal" => {
                let goal = value()?.clone();
                current(&mut steps, flag)?.goals.push(goal);
            }
            unexpected => {
                return Err(AppError::invalid(format!(
                    "plan add-tree unexpected argument: {unexpected}"
                )));
            }
        }
    }
    if steps.is_empty() {
        return Err(AppError::invalid("plan add-tree requires at least one --step"));
    }
    Ok(steps)
}

fn current<'a>(steps: &'a mut [StepDraft], flag: &str) -> Result<&'a mut StepDraft, AppError> {
    steps
        .last_mut()
        .ok_or_else(|| AppError::invalid(format!("plan add-tree {flag} must follow a --step")))
}

fn parse_executor(value: &str) -> Result<Executor, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "ai" => Ok(Executor::Ai),
        "human" => Ok(Executor::Human),
        _ => Err(AppError::invalid(format!(
            "invalid executor '{value}', expected ai|human"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(values: &[&str]) -> Result<Vec<StepDraft>, AppError> {
        let args: Vec<String> = values.iter().map(|value| value.to_string()).collect();
        parse_tree_steps(&args)
    }

    #[test]
    fn tree_steps_collect_executor_and_goals() {
        let steps = parse(&[
            "--step", "design", "--goal", "sketch", "--goal", "review", "--step", "ship",
            "--executor", "Human",
        ])
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].content, "design");
        assert_eq!(steps[0].executor, Executor::Ai);
        assert_eq!(steps[0].goals, ["sketch", "review"]);
        assert_eq!(steps[1].executor, Executor::Human);
        assert!(steps[1].goals.is_empty());
    }

    #[test]
    fn tree_steps_reject_malformed_input() {
        for (args, expected) in [
            (vec![], "at least one --step"),
            (vec!["--goal", "orphan"], "--goal must follow a --step"),
            (vec!["--step"], "--step requires a value"),
            (vec!["--step", " "], "cannot be empty"),
            (vec!["--step", "a", "--executor", "robot"], "invalid executor 'robot'"),
            (vec!["--step", "a", "extra"], "unexpected argument: extra"),
        ] {
            let err = parse(&args).unwrap_err();
            assert!(err.to_string().contains(expected), "{err}");
        }
    }
}
