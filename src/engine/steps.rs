use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Select, Set,
};

use super::{arrange, load_step_detail, plan_ids_of_steps, Engine, Outcome, StepDetail};
use crate::entities::{goal, plan, step};
use crate::error::{ensure_non_empty, AppError};
use crate::model::{Executor, Status, StepDraft, StepFilter, StepOrder, StepPatch};
use crate::rollup::{self, Dirty, Report};
use crate::session::{self, Bound};
use crate::store::{finish, queries, tracked};

/// What `step show-next` found for the current session.
#[derive(Debug)]
pub enum NextStep {
    NoActivePlan,
    Missing(i64),
    /// The active plan has no pending step.
    Idle(plan::Model),
    Ready(StepDetail),
}

impl Engine {
    /// Inserts steps at 1-based position `at` (clamped to the end), shifting
    /// later siblings. Without `at` the steps are appended.
    pub async fn add_steps(
        &self,
        plan_id: i64,
        contents: Vec<String>,
        executor: Executor,
        at: Option<usize>,
    ) -> Result<Outcome<Vec<step::Model>>, AppError> {
        if at == Some(0) {
            return Err(AppError::invalid("position starts at 1"));
        }
        for content in &contents {
            ensure_non_empty("step content", content)?;
        }

        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            tracked::fetch::<plan::Entity, _>(&txn, plan_id).await?;
            if contents.is_empty() {
                return Ok(Outcome::new(Vec::new(), Report::default()));
            }
            let start = open_slots(&txn, plan_id, at, contents.len(), now).await?;

            let mut created = Vec::with_capacity(contents.len());
            for (offset, content) in contents.into_iter().enumerate() {
                let draft = StepDraft {
                    content,
                    executor,
                    goals: Vec::new(),
                };
                let position = start + offset as i32;
                created.push(insert_step_tree(&txn, plan_id, position, draft, now).await?);
            }

            let mut dirty = Dirty::default();
            dirty.plan(plan_id);
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(created, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Appends one step with its goals.
    pub async fn add_step_tree(
        &self,
        plan_id: i64,
        draft: StepDraft,
    ) -> Result<Outcome<step::Model>, AppError> {
        ensure_non_empty("step content", &draft.content)?;
        for goal in &draft.goals {
            ensure_non_empty("goal content", goal)?;
        }

        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            tracked::fetch::<plan::Entity, _>(&txn, plan_id).await?;
            let start = open_slots(&txn, plan_id, None, 1, now).await?;
            let step = insert_step_tree(&txn, plan_id, start, draft, now).await?;
            let mut dirty = Dirty::default();
            dirty.step(step.id).plan(plan_id);
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(step, report))
        }
        .await;
        finish(txn, result).await
    }

    pub async fn list_steps(
        &self,
        plan_id: i64,
        filter: &StepFilter,
    ) -> Result<Vec<step::Model>, AppError> {
        let db = self.store.conn();
        tracked::fetch::<plan::Entity, _>(db, plan_id).await?;
        let primary = match filter.order {
            StepOrder::Position => Some(step::Column::Position),
            StepOrder::Id => None,
            StepOrder::Created => Some(step::Column::CreatedAt),
            StepOrder::Updated => Some(step::Column::UpdatedAt),
        };
        let select = arrange(
            step_scope(plan_id, filter),
            &filter.window,
            primary,
            step::Column::Id,
        );
        Ok(select.all(db).await?)
    }

    pub async fn count_steps(&self, plan_id: i64, filter: &StepFilter) -> Result<u64, AppError> {
        let db = self.store.conn();
        tracked::fetch::<plan::Entity, _>(db, plan_id).await?;
        Ok(step_scope(plan_id, filter).count(db).await?)
    }

    pub async fn goals_for_steps(
        &self,
        step_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<goal::Model>>, AppError> {
        queries::goals_by_step(self.store.conn(), step_ids).await
    }

    pub async fn step(&self, id: i64) -> Result<step::Model, AppError> {
        tracked::fetch::<step::Entity, _>(self.store.conn(), id).await
    }

    pub async fn step_detail(&self, id: i64) -> Result<StepDetail, AppError> {
        let db = self.store.conn();
        let step = tracked::fetch::<step::Entity, _>(db, id).await?;
        load_step_detail(db, step).await
    }

    /// Lowest-position pending step of the plan, with its goals.
    pub async fn pending_step(&self, plan_id: i64) -> Result<Option<StepDetail>, AppError> {
        let db = self.store.conn();
        match queries::next_pending_step(db, plan_id).await? {
            Some(step) => Ok(Some(load_step_detail(db, step).await?)),
            None => Ok(None),
        }
    }

    pub async fn next_step(&self) -> Result<NextStep, AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let plan = match session::resolve(&txn, &self.session_id).await? {
                Bound::Unbound => return Ok(NextStep::NoActivePlan),
                Bound::Stale(plan_id) => return Ok(NextStep::Missing(plan_id)),
                Bound::Plan(plan) => plan,
            };
            Ok(match queries::next_pending_step(&txn, plan.id).await? {
                Some(step) => NextStep::Ready(load_step_detail(&txn, step).await?),
                None => NextStep::Idle(plan),
            })
        }
        .await;
        finish(txn, result).await
    }

    pub async fn comment_steps(&self, pairs: Vec<(i64, String)>) -> Result<Vec<i64>, AppError> {
        let pairs = tracked::merge_comment_pairs(pairs);
        for (_, comment) in &pairs {
            ensure_non_empty("step comment", comment)?;
        }
        let ids: Vec<i64> = pairs.iter().map(|(id, _)| *id).collect();
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            tracked::ensure_exist::<step::Entity, _>(&txn, &ids).await?;
            tracked::set_comments::<step::Entity, _>(&txn, &pairs, Utc::now()).await?;
            plan_ids_of_steps(&txn, &ids).await
        }
        .await;
        finish(txn, result).await
    }

    pub async fn update_step(
        &self,
        id: i64,
        patch: StepPatch,
    ) -> Result<Outcome<step::Model>, AppError> {
        if let Some(content) = &patch.content {
            ensure_non_empty("step content", content)?;
        }
        if let Some(comment) = &patch.comment {
            ensure_non_empty("step comment", comment)?;
        }

        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let current = tracked::fetch::<step::Entity, _>(&txn, id).await?;
            let plan_id = current.plan_id;
            let target = patch.status.filter(|status| *status != current.status);
            if let Some(status) = target {
                check_manual_status(&txn, &current, status).await?;
            }

            let mut active: step::ActiveModel = current.into();
            if let Some(content) = patch.content {
                active.content = Set(content);
            }
            if let Some(executor) = patch.executor {
                active.executor = Set(executor);
            }
            if let Some(comment) = patch.comment {
                active.comment = Set(Some(comment));
            }
            if let Some(status) = target {
                active.status = Set(status);
            }
            active.updated_at = Set(now);
            let step = active.update(&txn).await?;

            let report = if target.is_some() {
                let mut dirty = Dirty::default();
                dirty.plan(plan_id);
                rollup::settle(&txn, dirty, now).await?
            } else {
                Report::default()
            };
            Ok(Outcome::new(step, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Marks a step done. With `all_goals` its goals are completed first in
    /// the same transaction; otherwise a pending goal rejects the request.
    pub async fn complete_step(
        &self,
        id: i64,
        all_goals: bool,
    ) -> Result<Outcome<step::Model>, AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let current = tracked::fetch::<step::Entity, _>(&txn, id).await?;
            if current.status.is_done() {
                return Ok(Outcome::new(current, Report::default()));
            }

            let mut report = Report::default();
            if all_goals {
                goal::Entity::update_many()
                    .col_expr(goal::Column::Status, Expr::value(Status::Done))
                    .col_expr(goal::Column::UpdatedAt, Expr::value(now))
                    .filter(goal::Column::StepId.eq(id))
                    .filter(goal::Column::Status.eq(Status::Todo))
                    .exec(&txn)
                    .await?;
                let mut dirty = Dirty::default();
                dirty.step(id);
                report = rollup::settle(&txn, dirty, now).await?;
            } else {
                check_manual_status(&txn, &current, Status::Done).await?;
            }

            let step = tracked::fetch::<step::Entity, _>(&txn, id).await?;
            if step.status.is_done() {
                return Ok(Outcome::new(step, report));
            }
            let plan_id = step.plan_id;
            let step = set_status(&txn, step, Status::Done, now).await?;
            let mut dirty = Dirty::default();
            dirty.plan(plan_id);
            report.absorb(rollup::settle(&txn, dirty, now).await?);
            Ok(Outcome::new(step, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Moves a step to 1-based position `to` (clamped) and renumbers its
    /// siblings. Returns the plan's steps in their new order.
    pub async fn move_step(&self, id: i64, to: usize) -> Result<Vec<step::Model>, AppError> {
        if to == 0 {
            return Err(AppError::invalid("position starts at 1"));
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let moving = tracked::fetch::<step::Entity, _>(&txn, id).await?;
            let mut steps = queries::steps_of_plan(&txn, moving.plan_id).await?;
            let Some(from) = steps.iter().position(|step| step.id == id) else {
                return Err(AppError::not_found(crate::model::EntityKind::Step, id));
            };
            let step = steps.remove(from);
            let slot = (to - 1).min(steps.len());
            steps.insert(slot, step);
            queries::write_positions(&txn, &mut steps, now).await?;
            Ok(steps)
        }
        .await;
        finish(txn, result).await
    }

    /// Deletes steps with their goals, renumbers what remains and settles
    /// the owning plans.
    pub async fn remove_steps(&self, ids: &[i64]) -> Result<Outcome<u64>, AppError> {
        let ids = tracked::unique_ids(ids);
        if ids.is_empty() {
            return Err(AppError::invalid("no step ids provided"));
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            tracked::ensure_exist::<step::Entity, _>(&txn, &ids).await?;
            let plan_ids = plan_ids_of_steps(&txn, &ids).await?;
            goal::Entity::delete_many()
                .filter(goal::Column::StepId.is_in(ids.iter().copied()))
                .exec(&txn)
                .await?;
            let removed = tracked::delete_ids::<step::Entity, _>(&txn, &ids).await?;
            for plan_id in &plan_ids {
                queries::renumber(&txn, *plan_id, now).await?;
            }
            let mut dirty = Dirty::default();
            dirty.plans(plan_ids);
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(removed, report))
        }
        .await;
        finish(txn, result).await
    }
}

fn step_scope(plan_id: i64, filter: &StepFilter) -> Select<step::Entity> {
    let mut select = step::Entity::find().filter(step::Column::PlanId.eq(plan_id));
    if let Some(status) = filter.window.status {
        select = select.filter(step::Column::Status.eq(status));
    }
    if let Some(executor) = filter.executor {
        select = select.filter(step::Column::Executor.eq(executor));
    }
    select
}

/// Compacts the plan's positions and frees `count` slots starting at `at`.
/// Returns the first free position.
async fn open_slots<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
    at: Option<usize>,
    count: usize,
    now: DateTime<Utc>,
) -> Result<i32, AppError> {
    let mut steps = queries::renumber(db, plan_id, now).await?;
    let start = at.unwrap_or(usize::MAX).min(steps.len() + 1) as i32;
    let shift = count as i32;
    for model in steps.iter_mut().rev() {
        if model.position < start {
            break;
        }
        let mut active: step::ActiveModel = model.clone().into();
        active.position = Set(model.position + shift);
        active.updated_at = Set(now);
        active.update(db).await?;
        model.position += shift;
    }
    Ok(start)
}

pub(super) async fn insert_step_tree<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
    position: i32,
    draft: StepDraft,
    now: DateTime<Utc>,
) -> Result<step::Model, AppError> {
    let step = step::ActiveModel {
        plan_id: Set(plan_id),
        content: Set(draft.content),
        status: Set(Status::Todo),
        executor: Set(draft.executor),
        position: Set(position),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    super::goals::insert_goals(db, step.id, draft.goals, now).await?;
    Ok(step)
}

pub(super) async fn set_status<C: ConnectionTrait>(
    db: &C,
    step: step::Model,
    status: Status,
    now: DateTime<Utc>,
) -> Result<step::Model, AppError> {
    let mut active: step::ActiveModel = step.into();
    active.status = Set(status);
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}

async fn check_manual_status<C: ConnectionTrait>(
    db: &C,
    step: &step::Model,
    target: Status,
) -> Result<(), AppError> {
    match target {
        Status::Done => {
            if let Some(goal) = queries::first_pending_goal(db, step.id).await? {
                return Err(AppError::InvalidInput(format!(
                    "cannot mark step done; next pending goal: {} (id {})",
                    goal.content, goal.id
                )));
            }
        }
        Status::Todo => {
            let tally = queries::goal_tally(db, step.id).await?;
            if tally.total > 0 && tally.done == tally.total {
                return Err(AppError::InvalidInput(format!(
                    "cannot reopen step id {}; all goals are done ({}/{}), reopen a goal instead",
                    step.id, tally.done, tally.total
                )));
            }
        }
    }
    Ok(())
}
