use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Select, Set,
};

use super::{arrange, plan_ids_of_steps, Engine, GoalDetail, Outcome};
use crate::entities::{goal, step};
use crate::error::{ensure_non_empty, AppError};
use crate::model::{GoalFilter, GoalOrder, GoalPatch, Status};
use crate::rollup::{self, Dirty};
use crate::store::{finish, tracked};

impl Engine {
    pub async fn add_goals(
        &self,
        step_id: i64,
        contents: Vec<String>,
    ) -> Result<Outcome<Vec<goal::Model>>, AppError> {
        for content in &contents {
            ensure_non_empty("goal content", content)?;
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            tracked::fetch::<step::Entity, _>(&txn, step_id).await?;
            let created = insert_goals(&txn, step_id, contents, now).await?;
            let mut dirty = Dirty::default();
            dirty.step(step_id);
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(created, report))
        }
        .await;
        finish(txn, result).await
    }

    pub async fn list_goals(
        &self,
        step_id: i64,
        filter: &GoalFilter,
    ) -> Result<Vec<goal::Model>, AppError> {
        let db = self.store.conn();
        tracked::fetch::<step::Entity, _>(db, step_id).await?;
        let primary = match filter.order {
            GoalOrder::Id => None,
            GoalOrder::Created => Some(goal::Column::CreatedAt),
            GoalOrder::Updated => Some(goal::Column::UpdatedAt),
        };
        let select = arrange(
            goal_scope(step_id, filter),
            &filter.window,
            primary,
            goal::Column::Id,
        );
        Ok(select.all(db).await?)
    }

    pub async fn count_goals(&self, step_id: i64, filter: &GoalFilter) -> Result<u64, AppError> {
        let db = self.store.conn();
        tracked::fetch::<step::Entity, _>(db, step_id).await?;
        Ok(goal_scope(step_id, filter).count(db).await?)
    }

    #[cfg(test)]
    pub async fn goal(&self, id: i64) -> Result<goal::Model, AppError> {
        tracked::fetch::<goal::Entity, _>(self.store.conn(), id).await
    }

    pub async fn goal_detail(&self, id: i64) -> Result<GoalDetail, AppError> {
        let db = self.store.conn();
        let goal = tracked::fetch::<goal::Entity, _>(db, id).await?;
        let step = tracked::fetch::<step::Entity, _>(db, goal.step_id).await?;
        Ok(GoalDetail { goal, step })
    }

    /// Returns the plans whose goals were commented.
    pub async fn comment_goals(&self, pairs: Vec<(i64, String)>) -> Result<Vec<i64>, AppError> {
        let pairs = tracked::merge_comment_pairs(pairs);
        for (_, comment) in &pairs {
            ensure_non_empty("goal comment", comment)?;
        }
        let ids: Vec<i64> = pairs.iter().map(|(id, _)| *id).collect();
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            tracked::ensure_exist::<goal::Entity, _>(&txn, &ids).await?;
            tracked::set_comments::<goal::Entity, _>(&txn, &pairs, Utc::now()).await?;
            let step_ids = step_ids_of_goals(&txn, &ids).await?;
            plan_ids_of_steps(&txn, &step_ids).await
        }
        .await;
        finish(txn, result).await
    }

    pub async fn update_goal(
        &self,
        id: i64,
        patch: GoalPatch,
    ) -> Result<Outcome<goal::Model>, AppError> {
        if let Some(content) = &patch.content {
            ensure_non_empty("goal content", content)?;
        }
        if let Some(comment) = &patch.comment {
            ensure_non_empty("goal comment", comment)?;
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            let current = tracked::fetch::<goal::Entity, _>(&txn, id).await?;
            let step_id = current.step_id;
            let flipped = patch.status.filter(|status| *status != current.status);

            let mut active: goal::ActiveModel = current.into();
            if let Some(content) = patch.content {
                active.content = Set(content);
            }
            if let Some(comment) = patch.comment {
                active.comment = Set(Some(comment));
            }
            if let Some(status) = flipped {
                active.status = Set(status);
            }
            active.updated_at = Set(now);
            let goal = active.update(&txn).await?;

            let mut dirty = Dirty::default();
            if flipped.is_some() {
                dirty.step(step_id);
            }
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(goal, report))
        }
        .await;
        finish(txn, result).await
    }

    /// Marks goals done. Goals already done are left untouched, so repeating
    /// the call reports nothing new.
    pub async fn complete_goals(&self, ids: &[i64]) -> Result<Outcome<Vec<goal::Model>>, AppError> {
        let ids = tracked::unique_ids(ids);
        if ids.is_empty() {
            return Err(AppError::invalid("no goal ids provided"));
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            let now = Utc::now();
            tracked::ensure_exist::<goal::Entity, _>(&txn, &ids).await?;
            let mut dirty = Dirty::default();
            let mut goals = Vec::with_capacity(ids.len());
            for id in &ids {
                let current = tracked::fetch::<goal::Entity, _>(&txn, *id).await?;
                if current.status.is_done() {
                    goals.push(current);
                    continue;
                }
                dirty.step(current.step_id);
                let mut active: goal::ActiveModel = current.into();
                active.status = Set(Status::Done);
                active.updated_at = Set(now);
                goals.push(active.update(&txn).await?);
            }
            let report = rollup::settle(&txn, dirty, now).await?;
            Ok(Outcome::new(goals, report))
        }
        .await;
        finish(txn, result).await
    }

    pub async fn remove_goals(&self, ids: &[i64]) -> Result<Outcome<u64>, AppError> {
        let ids = tracked::unique_ids(ids);
        if ids.is_empty() {
            return Err(AppError::invalid("no goal ids provided"));
        }
        let txn = self.store.begin().await?;
        let result: Result<_, AppError> = async {
            tracked::ensure_exist::<goal::Entity, _>(&txn, &ids).await?;
            let step_ids = step_ids_of_goals(&txn, &ids).await?;
            let removed = tracked::delete_ids::<goal::Entity, _>(&txn, &ids).await?;
            let mut dirty = Dirty::default();
            dirty.steps(step_ids);
            let report = rollup::settle(&txn, dirty, Utc::now()).await?;
            Ok(Outcome::new(removed, report))
        }
        .await;
        finish(txn, result).await
    }
}

fn goal_scope(step_id: i64, filter: &GoalFilter) -> Select<goal::Entity> {
    let select = goal::Entity::find().filter(goal::Column::StepId.eq(step_id));
    match filter.window.status {
        Some(status) => select.filter(goal::Column::Status.eq(status)),
        None => select,
    }
}

async fn step_ids_of_goals<C: ConnectionTrait>(db: &C, ids: &[i64]) -> Result<Vec<i64>, AppError> {
    let mut step_ids = Vec::new();
    for id in ids {
        let goal = tracked::fetch::<goal::Entity, _>(db, *id).await?;
        if !step_ids.contains(&goal.step_id) {
            step_ids.push(goal.step_id);
        }
    }
    Ok(step_ids)
}

pub(super) async fn insert_goals<C: ConnectionTrait>(
    db: &C,
    step_id: i64,
    contents: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Vec<goal::Model>, AppError> {
    let mut created = Vec::with_capacity(contents.len());
    for content in contents {
        let goal = goal::ActiveModel {
            step_id: Set(step_id),
            content: Set(content),
            status: Set(Status::Todo),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
        created.push(goal);
    }
    Ok(created)
}
