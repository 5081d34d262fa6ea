//! Operations shared by every entity kind, written once over [`Tracked`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};

use crate::entities::{goal, plan, step};
use crate::error::AppError;
use crate::model::EntityKind;

pub trait Tracked: EntityTrait {
    const KIND: EntityKind;

    fn id_column() -> Self::Column;
    fn comment_column() -> Self::Column;
    fn updated_column() -> Self::Column;
}

impl Tracked for plan::Entity {
    const KIND: EntityKind = EntityKind::Plan;

    fn id_column() -> Self::Column {
        plan::Column::Id
    }
    fn comment_column() -> Self::Column {
        plan::Column::Comment
    }
    fn updated_column() -> Self::Column {
        plan::Column::UpdatedAt
    }
}

impl Tracked for step::Entity {
    const KIND: EntityKind = EntityKind::Step;

    fn id_column() -> Self::Column {
        step::Column::Id
    }
    fn comment_column() -> Self::Column {
        step::Column::Comment
    }
    fn updated_column() -> Self::Column {
        step::Column::UpdatedAt
    }
}

impl Tracked for goal::Entity {
    const KIND: EntityKind = EntityKind::Goal;

    fn id_column() -> Self::Column {
        goal::Column::Id
    }
    fn comment_column() -> Self::Column {
        goal::Column::Comment
    }
    fn updated_column() -> Self::Column {
        goal::Column::UpdatedAt
    }
}

pub async fn fetch<E, C>(db: &C, id: i64) -> Result<E::Model, AppError>
where
    E: Tracked,
    C: ConnectionTrait,
{
    E::find()
        .filter(E::id_column().eq(id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(E::KIND, id))
}

pub async fn find<E, C>(db: &C, id: i64) -> Result<Option<E::Model>, AppError>
where
    E: Tracked,
    C: ConnectionTrait,
{
    Ok(E::find().filter(E::id_column().eq(id)).one(db).await?)
}

/// Fails with a single NotFound naming every id that does not exist.
pub async fn ensure_exist<E, C>(db: &C, ids: &[i64]) -> Result<(), AppError>
where
    E: Tracked,
    C: ConnectionTrait,
{
    if ids.is_empty() {
        return Ok(());
    }
    let found: HashSet<i64> = E::find()
        .select_only()
        .column(E::id_column())
        .filter(E::id_column().is_in(ids.iter().copied()))
        .into_tuple::<i64>()
        .all(db)
        .await?
        .into_iter()
        .collect();
    let missing: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| !found.contains(id))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::missing(E::KIND, &missing))
    }
}

pub async fn set_comments<E, C>(
    db: &C,
    entries: &[(i64, String)],
    now: DateTime<Utc>,
) -> Result<(), AppError>
where
    E: Tracked,
    C: ConnectionTrait,
{
    for (id, comment) in entries {
        E::update_many()
            .col_expr(E::comment_column(), Expr::value(comment.clone()))
            .col_expr(E::updated_column(), Expr::value(now))
            .filter(E::id_column().eq(*id))
            .exec(db)
            .await?;
    }
    Ok(())
}

pub async fn delete_ids<E, C>(db: &C, ids: &[i64]) -> Result<u64, AppError>
where
    E: Tracked,
    C: ConnectionTrait,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let result = E::delete_many()
        .filter(E::id_column().is_in(ids.iter().copied()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// First-seen order, duplicates dropped.
pub fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// A repeated id keeps its first slot and takes the last comment.
pub fn merge_comment_pairs(entries: Vec<(i64, String)>) -> Vec<(i64, String)> {
    let mut slots: HashMap<i64, usize> = HashMap::new();
    let mut merged: Vec<(i64, String)> = Vec::with_capacity(entries.len());
    for (id, comment) in entries {
        match slots.get(&id) {
            Some(&slot) => merged[slot].1 = comment,
            None => {
                slots.insert(id, merged.len());
                merged.push((id, comment));
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    #[test]
    fn unique_ids_keeps_first_occurrence() {
        assert_eq!(unique_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn merged_comments_keep_slot_take_last_text() {
        let merged = merge_comment_pairs(vec![
            (2, "a".to_string()),
            (5, "b".to_string()),
            (2, "c".to_string()),
        ]);
        assert_eq!(merged, vec![(2, "c".to_string()), (5, "b".to_string())]);
    }

    #[tokio::test]
    async fn ensure_exist_reports_all_missing() {
        let (_dir, store) = temp_store().await;
        let err = ensure_exist::<step::Entity, _>(store.conn(), &[7, 8])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not found: step id(s) not found: 7, 8");
    }

    #[tokio::test]
    async fn fetch_names_kind_and_id() {
        let (_dir, store) = temp_store().await;
        let err = fetch::<goal::Entity, _>(store.conn(), 42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(message) if message == "goal id 42"));
    }
}
