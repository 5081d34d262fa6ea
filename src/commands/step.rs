use super::{conclude, parse_comment_pairs, print_report};
use crate::cli::{StepCommand, StepList};
use crate::engine::{Engine, NextStep};
use crate::error::AppError;
use crate::model::{EntityKind, StepDraft, StepFilter, StepPatch};
use crate::render;

pub(super) async fn run(engine: &Engine, command: StepCommand) -> Result<(), AppError> {
    match command {
        StepCommand::Add(args) => {
            let outcome = engine
                .add_steps(args.plan_id, args.contents, args.executor, args.at)
                .await?;
            match outcome.value.as_slice() {
                [step] => println!("Created step ID: {} for plan ID: {}", step.id, step.plan_id),
                steps => println!("Created {} steps for plan ID: {}", steps.len(), args.plan_id),
            }
            print_report(&outcome.report);
        }
        StepCommand::AddTree(args) => {
            let goals = args.goals.len();
            let draft = StepDraft {
                content: args.content,
                executor: args.executor,
                goals: args.goals,
            };
            let outcome = engine.add_step_tree(args.plan_id, draft).await?;
            let step = &outcome.value;
            println!(
                "Created step ID: {} for plan ID: {} (goals: {goals})",
                step.id, step.plan_id
            );
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
        StepCommand::List(args) => list(engine, args).await?,
        StepCommand::Show(args) => {
            let detail = engine.step_detail(args.id).await?;
            println!("{}", render::step_detail(&detail));
        }
        StepCommand::ShowNext => match engine.next_step().await? {
            NextStep::NoActivePlan => println!("No active plan."),
            NextStep::Missing(plan_id) => println!("Active plan ID: {plan_id} not found."),
            NextStep::Idle(plan) => println!("No pending step for plan ID: {}.", plan.id),
            NextStep::Ready(detail) => println!("{}", render::step_detail(&detail)),
        },
        StepCommand::Comment(args) => {
            let pairs = parse_comment_pairs(EntityKind::Step, args.pairs)?;
            match engine.comment_steps(pairs).await?.as_slice() {
                [plan_id] => println!("Updated step comments for plan ID: {plan_id}."),
                plan_ids => println!("Updated step comments for {} plans.", plan_ids.len()),
            }
        }
        StepCommand::Update(args) => {
            let outcome = engine
                .update_step(
                    args.id,
                    StepPatch {
                        content: args.content,
                        status: args.status,
                        executor: args.executor,
                        comment: args.comment,
                    },
                )
                .await?;
            let step = &outcome.value;
            println!("Updated step ID: {}.", step.id);
            let advanced = step.status.is_done().then_some(step.plan_id);
            conclude(engine, &outcome.report, advanced.as_slice(), &[]).await?;
        }
        StepCommand::Done(args) => {
            let outcome = engine.complete_step(args.id, args.all_goals).await?;
            let step = &outcome.value;
            println!("Step ID: {} marked done.", step.id);
            conclude(engine, &outcome.report, &[step.plan_id], &[]).await?;
        }
        StepCommand::Move(args) => {
            let steps = engine.move_step(args.id, args.to).await?;
            let Some(plan_id) = steps.first().map(|step| step.plan_id) else {
                return Ok(());
            };
            let ids: Vec<i64> = steps.iter().map(|step| step.id).collect();
            let goals = engine.goals_for_steps(&ids).await?;
            println!("Reordered steps for plan ID: {plan_id}:");
            println!("{}", render::step_table(&steps, &goals));
        }
        StepCommand::Remove(args) => {
            let outcome = engine.remove_steps(&args.ids).await?;
            match args.ids.as_slice() {
                [id] => println!("Step ID: {id} removed."),
                _ => println!("Removed {} steps.", outcome.value),
            }
            conclude(engine, &outcome.report, &[], &[]).await?;
        }
    }
    Ok(())
}

async fn list(engine: &Engine, args: StepList) -> Result<(), AppError> {
    let filter = StepFilter {
        window: args.window.window(),
        executor: args.executor,
        order: args.order,
    };
    if args.window.count {
        println!("Total: {}", engine.count_steps(args.plan_id, &filter).await?);
        return Ok(());
    }
    let steps = engine.list_steps(args.plan_id, &filter).await?;
    if steps.is_empty() {
        println!("No steps found for plan ID: {}.", args.plan_id);
        return Ok(());
    }
    let ids: Vec<i64> = steps.iter().map(|step| step.id).collect();
    let goals = engine.goals_for_steps(&ids).await?;
    println!("{}", render::step_table(&steps, &goals));
    Ok(())
}
