use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};

use super::{arrange, load_plan_detail, Engine, Outcome, PlanDetail};
use crate::entities::{goal, plan, step};
use crate::error::{ensure_non_empty, AppError};
use crate::model::{PlanDraft, PlanFilter, PlanOrder, PlanPatch, Status, StepDraft, Window};
use crate::render;
use crate::rollup::{self, Dirty, Report};
use crate::session::{self, Activation, Bound};
use crate::store::{finish, queries, tracked};

/// What `show-active` found for the current session.
#[derive(Debug)]
pub enum ActivePlan {
    None,
    /// The binding pointed at a plan that no longer exists; it was cleared.
    Missing(i64),
    Found(PlanDetail),
}

impl Engine {
    pub async fn add_plan(&self, draft: PlanDraft) -> Result<plan::Model, AppError> {
        ensure_non_empty("plan title", &draft.title)?;
        ensure_non_empty("plan content", &draft.content)?;
        let txn = self.store.begin().await?;
        let result = insert_plan(&txn, draft, Utc::now()).await;
        finish(txn, result).await
    }

    /// Creates a plan with its steps and goals in one transaction. Returns
    /// the plan with the number of steps and goals created.
    pub async fn add_plan_tree(
        &self,
        draft: PlanDraft,
        steps: Vec<StepDraft>,
    ) -> Result<(plan::Model, usize, usize), AppError> {
        ensure_non_empty("plan title", &draft.title)?;
        ensure_non_empty("plan content", &draft.content)?;
        for step in &steps {
            ensure_non_empty("step content", &step.content)?;
            for goal in &step.goals {
                ensure_non_empty("goal content", goal)?;
            }
        }

        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let plan = insert_plan(&txn, draft, now).await?;
            let mut goal_count = 0;
            let step_count = steps.len();
            for (idx, draft) in steps.into_iter().enumerate() {
                goal_count += draft.goals.len();
                super::steps::insert_step_tree(&txn, plan.id, idx as i32 + 1, draft, now).await?;
            }
            Ok((plan, step_count, goal_count))
        }
        .await;
        finish(txn, result).await
    }

    pub async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<plan::Model>, AppError> {
        let window = &filter.window;
        let primary = match filter.order {
            PlanOrder::Id => None,
            PlanOrder::Title => Some(plan::Column::Title),
            PlanOrder::Created => Some(plan::Column::CreatedAt),
            PlanOrder::Updated => Some(plan::Column::UpdatedAt),
        };
        let select = arrange(plan_scope(window), window, primary, plan::Column::Id);
        Ok(select.all(self.store.conn()).await?)
    }

    pub async fn count_plans(&self, window: &Window) -> Result<u64, AppError> {
        Ok(plan_scope(window).count(self.store.conn()).await?)
    }

    /// `(done, total)` step counts per plan.
    pub async fn plan_progress(
        &self,
        plan_ids: &[i64],
    ) -> Result<HashMap<i64, (usize, usize)>, AppError> {
        let mut progress: HashMap<i64, (usize, usize)> = HashMap::new();
        if plan_ids.is_empty() {
            return Ok(progress);
        }
        let steps = step::Entity::find()
            .filter(step::Column::PlanId.is_in(plan_ids.iter().copied()))
            .all(self.store.conn())
            .await?;
        for step in steps {
            let entry = progress.entry(step.plan_id).or_default();
            entry.1 += 1;
            if step.status.is_done() {
                entry.0 += 1;
            }
        }
        Ok(progress)
    }

    #[cfg(test)]
    pub async fn plan(&self, id: i64) -> Result<plan::Model, AppError> {
        tracked::fetch::<plan::Entity, _>(self.store.conn(), id).await
    }

    pub async fn plan_detail(&self, id: i64) -> Result<PlanDetail, AppError> {
        let db = self.store.conn();
        let plan = tracked::fetch::<plan::Entity, _>(db, id).await?;
        load_plan_detail(db, plan).await
    }

    pub async fn plan_details(&self, window: &Window) -> Result<Vec<PlanDetail>, AppError> {
        let db = self.store.conn();
        let plans = arrange(plan_scope(window), window, None, plan::Column::Id)
            .all(db)
            .await?;
        let mut details = Vec::with_capacity(plans.len());
        for plan in plans {
            details.push(load_plan_detail(db, plan).await?);
        }
        Ok(details)
    }

    pub async fn holder(&self, plan_id: i64) -> Result<Option<String>, AppError> {
        session::holder(self.store.conn(), plan_id).await
    }

    pub async fn comment_plans(&self, pairs: Vec<(i64, String)>) -> Result<usize, AppError> {
        let pairs = tracked::merge_comment_pairs(pairs);
        for (_, comment) in &pairs {
            ensure_non_empty("plan comment", comment)?;
        }
        let ids: Vec<i64> = pairs.iter().map(|(id, _)| *id).collect();
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            tracked::ensure_exist::<plan::Entity, _>(&txn, &ids).await?;
            tracked::set_comments::<plan::Entity, _>(&txn, &pairs, Utc::now()).await?;
            Ok(pairs.len())
        }
        .await;
        finish(txn, result).await
    }

    pub async fn update_plan(
        &self,
        id: i64,
        patch: PlanPatch,
    ) -> Result<Outcome<plan::Model>, AppError> {
        if let Some(title) = &patch.title {
            ensure_non_empty("plan title", title)?;
        }
        if let Some(content) = &patch.content {
            ensure_non_empty("plan content", content)?;
        }
        if let Some(comment) = &patch.comment {
            ensure_non_empty("plan comment", comment)?;
        }

        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let current = tracked::fetch::<plan::Entity, _>(&txn, id).await?;
            let target = patch.status.filter(|status| *status != current.status);
            if let Some(status) = target {
                check_manual_status(&txn, &current, status).await?;
            }

            let mut active: plan::ActiveModel = current.into();
            if let Some(title) = patch.title {
                active.title = Set(title);
            }
            if let Some(content) = patch.content {
                active.content = Set(content);
            }
            if let Some(comment) = patch.comment {
                active.comment = Set(Some(comment));
            }
            if let Some(status) = target {
                active.status = Set(status);
            }
            active.updated_at = Set(now);
            let plan = active.update(&txn).await?;

            let mut report = Report::default();
            if target == Some(Status::Done) {
                report.released.extend(rollup::release_finished(&txn, id).await?);
            }
            Ok(Outcome::new(plan, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Marks a plan done. With `all_steps`, every goal and step beneath it is
    /// completed first; otherwise pending steps reject the request.
    pub async fn complete_plan(
        &self,
        id: i64,
        all_steps: bool,
    ) -> Result<Outcome<plan::Model>, AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let current = tracked::fetch::<plan::Entity, _>(&txn, id).await?;
            if current.status.is_done() {
                return Ok(Outcome::new(current, Report::default()));
            }

            let mut report = Report::default();
            if all_steps {
                report = force_steps_done(&txn, id, now).await?;
            } else {
                check_manual_status(&txn, &current, Status::Done).await?;
            }

            let plan = tracked::fetch::<plan::Entity, _>(&txn, id).await?;
            if plan.status.is_done() {
                return Ok(Outcome::new(plan, report));
            }
            let plan = set_status(&txn, plan, Status::Done, now).await?;
            report.released.extend(rollup::release_finished(&txn, id).await?);
            Ok(Outcome::new(plan, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Deletes the plan with all of its steps and goals. Returns the session
    /// that held it, if any.
    pub async fn remove_plan(&self, id: i64) -> Result<Option<String>, AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            tracked::fetch::<plan::Entity, _>(&txn, id).await?;
            let step_ids: Vec<i64> = queries::steps_of_plan(&txn, id)
                .await?
                .into_iter()
                .map(|step| step.id)
                .collect();
            if !step_ids.is_empty() {
                goal::Entity::delete_many()
                    .filter(goal::Column::StepId.is_in(step_ids))
                    .exec(&txn)
                    .await?;
            }
            step::Entity::delete_many()
                .filter(step::Column::PlanId.eq(id))
                .exec(&txn)
                .await?;
            let holder = session::release(&txn, id).await?;
            tracked::delete_ids::<plan::Entity, _>(&txn, &[id]).await?;
            Ok(holder)
        }
        .await;
        finish(txn, result).await
    }

    pub async fn activate(
        &self,
        id: i64,
        force: bool,
    ) -> Result<(plan::Model, Activation), AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let plan = tracked::fetch::<plan::Entity, _>(&txn, id).await?;
            let activation =
                session::activate(&txn, &plan, &self.session_id, force, Utc::now()).await?;
            Ok((plan, activation))
        }
        .await;
        finish(txn, result).await
    }

    pub async fn deactivate(&self) -> Result<Option<i64>, AppError> {
        let txn = self.store.begin().await?;
        let result = session::deactivate(&txn, &self.session_id).await;
        finish(txn, result).await
    }

    /// Plan bound to this session. A binding to a deleted plan is cleared on
    /// the way out.
    pub async fn active_plan(&self) -> Result<ActivePlan, AppError> {
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            Ok(match session::resolve(&txn, &self.session_id).await? {
                Bound::Unbound => ActivePlan::None,
                Bound::Stale(plan_id) => ActivePlan::Missing(plan_id),
                Bound::Plan(plan) => ActivePlan::Found(load_plan_detail(&txn, plan).await?),
            })
        }
        .await;
        finish(txn, result).await
    }
}

fn plan_scope(window: &Window) -> sea_orm::Select<plan::Entity> {
    let select = plan::Entity::find();
    match window.status {
        Some(status) => select.filter(plan::Column::Status.eq(status)),
        None => select,
    }
}

async fn insert_plan<C: ConnectionTrait>(
    db: &C,
    draft: PlanDraft,
    now: DateTime<Utc>,
) -> Result<plan::Model, AppError> {
    Ok(plan::ActiveModel {
        title: Set(draft.title),
        content: Set(draft.content),
        status: Set(Status::Todo),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

async fn set_status<C: ConnectionTrait>(
    db: &C,
    plan: plan::Model,
    status: Status,
    now: DateTime<Utc>,
) -> Result<plan::Model, AppError> {
    let mut active: plan::ActiveModel = plan.into();
    active.status = Set(status);
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}

/// Rejects a hand-made status change that would contradict the plan's steps.
async fn check_manual_status<C: ConnectionTrait>(
    db: &C,
    plan: &plan::Model,
    target: Status,
) -> Result<(), AppError> {
    let tally = queries::step_tally(db, plan.id).await?;
    match target {
        Status::Done => {
            if let Some(step) = queries::next_pending_step(db, plan.id).await? {
                let goals = queries::goals_of_step(db, step.id).await?;
                return Err(AppError::InvalidInput(format!(
                    "cannot mark plan done; next pending step:\n{}",
                    render::step_with_goals(&step, &goals)
                )));
            }
        }
        Status::Todo => {
            if tally.total > 0 && tally.done == tally.total {
                return Err(AppError::InvalidInput(format!(
                    "cannot reopen plan id {}; all steps are done ({}/{}), reopen a step instead",
                    plan.id, tally.done, tally.total
                )));
            }
        }
    }
    Ok(())
}

async fn force_steps_done<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
    now: DateTime<Utc>,
) -> Result<Report, AppError> {
    let steps = queries::steps_of_plan(db, plan_id).await?;
    let step_ids: Vec<i64> = steps.iter().map(|step| step.id).collect();
    if !step_ids.is_empty() {
        goal::Entity::update_many()
            .col_expr(goal::Column::Status, Expr::value(Status::Done))
            .col_expr(goal::Column::UpdatedAt, Expr::value(now))
            .filter(goal::Column::StepId.is_in(step_ids.iter().copied()))
            .filter(goal::Column::Status.eq(Status::Todo))
            .exec(db)
            .await?;
    }
    for step in steps {
        if step.status.is_done() {
            continue;
        }
        if queries::goal_tally(db, step.id).await?.total == 0 {
            super::steps::set_status(db, step, Status::Done, now).await?;
        }
    }

    let mut dirty = Dirty::default();
    dirty.steps(step_ids).plan(plan_id);
    rollup::settle(db, dirty, now).await
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::entities::session_binding;
    use crate::model::{EntityKind, Executor};

    #[tokio::test]
    async fn removing_a_plan_removes_descendants_and_binding() {
        let (_dir, engine) = engine().await;
        let plan = tree(&engine, &["one", "two"], 2).await;
        engine.activate(plan.id, false).await.unwrap();

        let holder = engine.remove_plan(plan.id).await.unwrap();
        assert_eq!(holder.as_deref(), Some(SESSION));

        let db = engine.store().conn();
        assert_eq!(step::Entity::find().count(db).await.unwrap(), 0);
        assert_eq!(goal::Entity::find().count(db).await.unwrap(), 0);
        assert!(matches!(engine.plan(plan.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.step(1).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.goal(1).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.active_plan().await.unwrap(), ActivePlan::None));
    }

    #[tokio::test]
    async fn manual_done_names_first_pending_step() {
        let (_dir, engine) = engine().await;
        let plan = tree(&engine, &["first", "second"], 1).await;

        let err = engine.complete_plan(plan.id, false).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid input:\ncannot mark plan done; next pending step:\n"));
        assert!(message.contains("Content: first"));
        assert!(message.contains("- [todo] first goal 1"));
        assert_eq!(engine.plan(plan.id).await.unwrap().status, Status::Todo);
    }

    #[tokio::test]
    async fn childless_plan_is_completed_by_hand() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Empty").await;
        engine.activate(plan.id, false).await.unwrap();

        let outcome = engine.complete_plan(plan.id, false).await.unwrap();
        assert_eq!(outcome.value.status, Status::Done);
        assert!(outcome.report.changes.is_empty());
        assert_eq!(outcome.report.released.len(), 1);
        assert!(engine.holder(plan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_complete_finishes_every_descendant() {
        let (_dir, engine) = engine().await;
        let plan = tree(&engine, &["a", "b"], 2).await;
        step_for(&engine, plan.id, "bare", Executor::Human).await;
        engine.activate(plan.id, false).await.unwrap();

        let outcome = engine.complete_plan(plan.id, true).await.unwrap();
        assert_eq!(outcome.value.status, Status::Done);
        assert_eq!(outcome.report.completed(EntityKind::Step).len(), 2);
        assert_eq!(outcome.report.completed(EntityKind::Plan), vec![plan.id]);
        assert_eq!(outcome.report.released.len(), 1);

        let detail = engine.plan_detail(plan.id).await.unwrap();
        assert!(detail.steps.iter().all(|step| step.status.is_done()));
        assert!(detail
            .goals
            .values()
            .flatten()
            .all(|goal| goal.status.is_done()));
    }

    #[tokio::test]
    async fn reopening_fully_done_plan_is_rejected() {
        let (_dir, engine) = engine().await;
        let plan = tree(&engine, &["a"], 1).await;
        engine.complete_plan(plan.id, true).await.unwrap();

        let err = engine
            .update_plan(
                plan.id,
                PlanPatch {
                    status: Some(Status::Todo),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reopen a step instead"));
    }

    #[tokio::test]
    async fn stale_binding_is_reported_and_cleared() {
        let (_dir, engine) = engine().await;
        let db = engine.store().conn();
        session_binding::Entity::insert(session_binding::ActiveModel {
            plan_id: Set(99),
            session_id: Set(SESSION.to_string()),
            bound_at: Set(Utc::now()),
        })
        .exec_without_returning(db)
        .await
        .unwrap();

        assert!(matches!(
            engine.active_plan().await.unwrap(),
            ActivePlan::Missing(99)
        ));
        assert!(matches!(engine.active_plan().await.unwrap(), ActivePlan::None));
    }

    #[tokio::test]
    async fn list_defaults_to_todo_and_pages() {
        let (_dir, engine) = engine().await;
        for title in ["a", "b", "c"] {
            plan(&engine, title).await;
        }
        let done = plan(&engine, "d").await;
        engine.complete_plan(done.id, false).await.unwrap();

        let filter = PlanFilter {
            window: Window {
                limit: Some(2),
                offset: Some(1),
                ..Window::todo()
            },
            order: PlanOrder::Id,
        };
        let titles: Vec<String> = engine
            .list_plans(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|plan| plan.title)
            .collect();
        assert_eq!(titles, vec!["b", "c"]);
        assert_eq!(engine.count_plans(&Window::todo()).await.unwrap(), 3);
        assert_eq!(engine.count_plans(&Window::all()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn title_order_breaks_ties_by_id_in_both_directions() {
        let (_dir, engine) = engine().await;
        let first_beta = plan(&engine, "beta").await;
        let alpha = plan(&engine, "alpha").await;
        let second_beta = plan(&engine, "beta").await;

        let mut filter = PlanFilter {
            window: Window::all(),
            order: PlanOrder::Title,
        };
        let ids = |plans: Vec<plan::Model>| -> Vec<i64> {
            plans.iter().map(|plan| plan.id).collect()
        };
        assert_eq!(
            ids(engine.list_plans(&filter).await.unwrap()),
            vec![alpha.id, first_beta.id, second_beta.id]
        );

        filter.window.descending = true;
        assert_eq!(
            ids(engine.list_plans(&filter).await.unwrap()),
            vec![second_beta.id, first_beta.id, alpha.id]
        );
    }

    #[tokio::test]
    async fn comment_batch_fails_whole_on_missing_id() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        let err = engine
            .comment_plans(vec![(plan.id, "note".to_string()), (40, "x".to_string())])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not found: plan id(s) not found: 40");
        assert!(engine.plan(plan.id).await.unwrap().comment.is_none());
    }
}
