//! One method per operation. Each mutating method opens a transaction,
//! performs its writes, settles rollup for whatever it touched and commits,
//! so no other invocation can see a half-updated tree.

mod goals;
mod plans;
mod steps;

use std::collections::HashMap;

use sea_orm::{ConnectionTrait, EntityTrait, Order, QueryOrder, QuerySelect, Select};

pub use plans::ActivePlan;
pub use steps::NextStep;

use crate::entities::{goal, plan, step};
use crate::error::AppError;
use crate::model::Window;
use crate::rollup::Report;
use crate::store::{queries, tracked, Store};

pub struct Engine {
    store: Store,
    session_id: String,
}

/// Result of a mutation plus the automatic status changes it caused.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub report: Report,
}

impl<T> Outcome<T> {
    fn new(value: T, report: Report) -> Self {
        Self { value, report }
    }
}

#[derive(Clone, Debug)]
pub struct PlanDetail {
    pub plan: plan::Model,
    pub steps: Vec<step::Model>,
    pub goals: HashMap<i64, Vec<goal::Model>>,
}

#[derive(Clone, Debug)]
pub struct StepDetail {
    pub step: step::Model,
    pub goals: Vec<goal::Model>,
}

#[derive(Clone, Debug)]
pub struct GoalDetail {
    pub goal: goal::Model,
    pub step: step::Model,
}

impl Engine {
    pub fn new(store: Store, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

fn direction(window: &Window) -> Order {
    if window.descending {
        Order::Desc
    } else {
        Order::Asc
    }
}

/// Applies ordering and paging. Rows tied on `primary` (or everything,
/// when ordering by id alone) fall back to `id`.
fn arrange<E: EntityTrait>(
    select: Select<E>,
    window: &Window,
    primary: Option<E::Column>,
    id: E::Column,
) -> Select<E> {
    let order = direction(window);
    let select = match primary {
        Some(column) => select.order_by(column, order.clone()).order_by(id, order),
        None => select.order_by(id, order),
    };
    select.limit(window.limit).offset(window.offset)
}

async fn load_plan_detail<C: ConnectionTrait>(
    db: &C,
    plan: plan::Model,
) -> Result<PlanDetail, AppError> {
    let steps = queries::steps_of_plan(db, plan.id).await?;
    let step_ids: Vec<i64> = steps.iter().map(|step| step.id).collect();
    let goals = queries::goals_by_step(db, &step_ids).await?;
    Ok(PlanDetail { plan, steps, goals })
}

async fn load_step_detail<C: ConnectionTrait>(
    db: &C,
    step: step::Model,
) -> Result<StepDetail, AppError> {
    let goals = queries::goals_of_step(db, step.id).await?;
    Ok(StepDetail { step, goals })
}

async fn plan_ids_of_steps<C: ConnectionTrait>(
    db: &C,
    step_ids: &[i64],
) -> Result<Vec<i64>, AppError> {
    let mut plan_ids = Vec::new();
    for id in step_ids {
        let step = tracked::fetch::<step::Entity, _>(db, *id).await?;
        if !plan_ids.contains(&step.plan_id) {
            plan_ids.push(step.plan_id);
        }
    }
    Ok(plan_ids)
}
