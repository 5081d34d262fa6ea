use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::{goal, step};
use crate::error::AppError;
use crate::model::Status;

/// Child counts that drive a parent's derived status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    pub total: u64,
    pub done: u64,
}

pub async fn steps_of_plan<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
) -> Result<Vec<step::Model>, AppError> {
    Ok(step::Entity::find()
        .filter(step::Column::PlanId.eq(plan_id))
        .order_by_asc(step::Column::Position)
        .order_by_asc(step::Column::Id)
        .all(db)
        .await?)
}

pub async fn goals_of_step<C: ConnectionTrait>(
    db: &C,
    step_id: i64,
) -> Result<Vec<goal::Model>, AppError> {
    Ok(goal::Entity::find()
        .filter(goal::Column::StepId.eq(step_id))
        .order_by_asc(goal::Column::Id)
        .all(db)
        .await?)
}

pub async fn goals_by_step<C: ConnectionTrait>(
    db: &C,
    step_ids: &[i64],
) -> Result<HashMap<i64, Vec<goal::Model>>, AppError> {
    let mut grouped: HashMap<i64, Vec<goal::Model>> = HashMap::new();
    if step_ids.is_empty() {
        return Ok(grouped);
    }
    let goals = goal::Entity::find()
        .filter(goal::Column::StepId.is_in(step_ids.iter().copied()))
        .order_by_asc(goal::Column::Id)
        .all(db)
        .await?;
    for goal in goals {
        grouped.entry(goal.step_id).or_default().push(goal);
    }
    Ok(grouped)
}

/// Lowest-position pending step; equal positions fall back to id.
pub async fn next_pending_step<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
) -> Result<Option<step::Model>, AppError> {
    Ok(step::Entity::find()
        .filter(step::Column::PlanId.eq(plan_id))
        .filter(step::Column::Status.eq(Status::Todo))
        .order_by_asc(step::Column::Position)
        .order_by_asc(step::Column::Id)
        .one(db)
        .await?)
}

pub async fn first_pending_goal<C: ConnectionTrait>(
    db: &C,
    step_id: i64,
) -> Result<Option<goal::Model>, AppError> {
    Ok(goal::Entity::find()
        .filter(goal::Column::StepId.eq(step_id))
        .filter(goal::Column::Status.eq(Status::Todo))
        .order_by_asc(goal::Column::Id)
        .one(db)
        .await?)
}

pub async fn goal_tally<C: ConnectionTrait>(db: &C, step_id: i64) -> Result<Tally, AppError> {
    let scope = goal::Entity::find().filter(goal::Column::StepId.eq(step_id));
    let total = scope.clone().count(db).await?;
    let done = scope
        .filter(goal::Column::Status.eq(Status::Done))
        .count(db)
        .await?;
    Ok(Tally { total, done })
}

pub async fn step_tally<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<Tally, AppError> {
    let scope = step::Entity::find().filter(step::Column::PlanId.eq(plan_id));
    let total = scope.clone().count(db).await?;
    let done = scope
        .filter(step::Column::Status.eq(Status::Done))
        .count(db)
        .await?;
    Ok(Tally { total, done })
}

/// Rewrites positions of `steps` (already in the desired order) to `1..=n`,
/// touching only rows whose position changes.
pub async fn write_positions<C: ConnectionTrait>(
    db: &C,
    steps: &mut [step::Model],
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    for (idx, model) in steps.iter_mut().enumerate() {
        let position = idx as i32 + 1;
        if model.position == position {
            continue;
        }
        let mut active: step::ActiveModel = model.clone().into();
        active.position = Set(position);
        active.updated_at = Set(now);
        active.update(db).await?;
        model.position = position;
        model.updated_at = now;
    }
    Ok(())
}

pub async fn renumber<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<step::Model>, AppError> {
    let mut steps = steps_of_plan(db, plan_id).await?;
    write_positions(db, &mut steps, now).await?;
    Ok(steps)
}
