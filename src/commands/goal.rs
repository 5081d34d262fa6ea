use super::{conclude, parse_comment_pairs};
use crate::cli::{GoalCommand, GoalList};
use crate::engine::Engine;
use crate::error::AppError;
use crate::model::{EntityKind, GoalFilter, GoalPatch};
use crate::render;

pub(super) async fn run(engine: &Engine, command: GoalCommand) -> Result<(), AppError> {
    match command {
        GoalCommand::Add(args) => {
            let outcome = engine.add_goals(args.step_id, args.contents).await?;
            match outcome.value.as_slice() {
                [goal] => println!("Created goal ID: {} for step ID: {}", goal.id, goal.step_id),
                goals => println!("Created {} goals for step ID: {}", goals.len(), args.step_id),
            }
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
        GoalCommand::List(args) => list(engine, args).await?,
        GoalCommand::Show(args) => {
            let detail = engine.goal_detail(args.id).await?;
            println!("{}", render::goal_detail(&detail));
        }
        GoalCommand::Comment(args) => {
            let pairs = parse_comment_pairs(EntityKind::Goal, args.pairs)?;
            match engine.comment_goals(pairs).await?.as_slice() {
                [plan_id] => println!("Updated goal comments for plan ID: {plan_id}."),
                plan_ids => println!("Updated goal comments for {} plans.", plan_ids.len()),
            }
        }
        GoalCommand::Update(args) => {
            let outcome = engine
                .update_goal(
                    args.id,
                    GoalPatch {
                        content: args.content,
                        status: args.status,
                        comment: args.comment,
                    },
                )
                .await?;
            println!("Updated goal ID: {}.", outcome.value.id);
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
        GoalCommand::Done(args) => {
            let outcome = engine.complete_goals(&args.ids).await?;
            match outcome.value.as_slice() {
                [goal] => println!("Goal ID: {} marked done.", goal.id),
                goals => println!("Goals marked done: {}.", goals.len()),
            }
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
        GoalCommand::Remove(args) => {
            let outcome = engine.remove_goals(&args.ids).await?;
            match args.ids.as_slice() {
                [id] => println!("Goal ID: {id} removed."),
                _ => println!("Removed {} goals.", outcome.value),
            }
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
    }
    Ok(())
}

async fn list(engine: &Engine, args: GoalList) -> Result<(), AppError> {
    let filter = GoalFilter {
        window: args.window.window(),
        order: args.order,
    };
    if args.window.count {
        println!("Total: {}", engine.count_goals(args.step_id, &filter).await?);
        return Ok(());
    }
    let goals = engine.list_goals(args.step_id, &filter).await?;
    if goals.is_empty() {
        println!("No goals found for step ID: {}.", args.step_id);
        return Ok(());
    }
    println!("{}", render::goal_table(&goals));
    Ok(())
}
