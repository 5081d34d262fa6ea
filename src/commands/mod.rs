//! Command handlers: call the engine, print what happened.

mod goal;
mod plan;
mod step;

use std::collections::BTreeSet;

use crate::cli::Command;
use crate::engine::Engine;
use crate::error::{ensure_non_empty, AppError};
use crate::model::{EntityKind, Executor};
use crate::render;
use crate::rollup::Report;

pub async fn dispatch(engine: &Engine, command: Command) -> Result<(), AppError> {
    match command {
        Command::Plan(command) => plan::run(engine, command).await,
        Command::Step(command) => step::run(engine, command).await,
        Command::Goal(command) => goal::run(engine, command).await,
        Command::Hook(_) => Err(AppError::invalid("hooks do not open the store")),
    }
}

/// Splits `<id> <comment> [<id> <comment>]...` into pairs.
fn parse_comment_pairs(kind: EntityKind, pairs: Vec<String>) -> Result<Vec<(i64, String)>, AppError> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(AppError::invalid(format!(
            "{kind} comment expects <id> <comment> pairs"
        )));
    }
    let mut parsed = Vec::with_capacity(pairs.len() / 2);
    let mut iter = pairs.into_iter();
    while let (Some(id), Some(comment)) = (iter.next(), iter.next()) {
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::invalid(format!("{kind} comment id '{id}' is invalid")))?;
        ensure_non_empty("comment", &comment)?;
        parsed.push((id, comment));
    }
    Ok(parsed)
}

fn print_report(report: &Report) {
    if let Some(block) = render::report(report) {
        println!("{block}");
    }
}

/// Prints the rollup block, then tells the agent what comes next for every
/// plan that advanced (`advanced` plus plans of auto-completed steps) and
/// every plan that finished (`finished` plus auto-completed plans).
async fn conclude(
    engine: &Engine,
    report: &Report,
    advanced: &[i64],
    finished: &[i64],
) -> Result<(), AppError> {
    print_report(report);

    let mut advanced: BTreeSet<i64> = advanced.iter().copied().collect();
    for step_id in report.completed(EntityKind::Step) {
        advanced.insert(engine.step(step_id).await?.plan_id);
    }
    let mut finished: BTreeSet<i64> = finished.iter().copied().collect();
    finished.extend(report.completed(EntityKind::Plan));

    for plan_id in advanced.difference(&finished) {
        announce_next_step(engine, *plan_id).await?;
    }
    for plan_id in finished {
        println!(
            "Plan ID: {plan_id} is complete. Summarize the completed results to the user, then end this turn."
        );
    }
    Ok(())
}

async fn announce_next_step(engine: &Engine, plan_id: i64) -> Result<(), AppError> {
    let Some(next) = engine.pending_step(plan_id).await? else {
        return Ok(());
    };
    match next.step.executor {
        Executor::Ai => println!(
            "Next step is assigned to ai (step ID: {}). End this turn so the stop hook can surface it.",
            next.step.id
        ),
        Executor::Human => {
            println!("Next step requires human action:");
            println!("{}", render::step_detail(&next));
            println!(
                "Tell the user to complete the above step and goals. Confirm each goal when done, then end this turn."
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn comment_pairs_parse_in_order() {
        let pairs = parse_comment_pairs(EntityKind::Step, args(&["3", "first", " 4", "second"])).unwrap();
        assert_eq!(pairs, vec![(3, "first".to_string()), (4, "second".to_string())]);
    }

    #[test]
    fn comment_pairs_reject_odd_or_bad_input() {
        assert!(parse_comment_pairs(EntityKind::Plan, args(&["1"])).is_err());
        let err = parse_comment_pairs(EntityKind::Goal, args(&["x", "note"])).unwrap_err();
        assert!(err.to_string().contains("goal comment id 'x' is invalid"));
        let err = parse_comment_pairs(EntityKind::Goal, args(&["1", "  "])).unwrap_err();
        assert!(err.to_string().contains("comment cannot be empty"));
    }
}
