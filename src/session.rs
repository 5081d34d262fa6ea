//! Session bindings: which logical session currently drives which plan.
//!
//! A plan has at most one holder (`plan_id` is the table key) and a session
//! holds at most one plan. All functions take a connection so callers run
//! check-then-set sequences inside their own transaction.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{info, warn};

use crate::entities::{plan, session_binding};
use crate::error::AppError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Activation {
    Fresh,
    Unchanged,
    TookOver { previous: String },
}

/// What a session's binding resolves to.
#[derive(Clone, Debug)]
pub enum Bound {
    Unbound,
    /// Pointed at a plan that no longer exists. The binding has been removed.
    Stale(i64),
    Plan(plan::Model),
}

pub async fn holder<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<Option<String>, AppError> {
    Ok(session_binding::Entity::find_by_id(plan_id)
        .one(db)
        .await?
        .map(|binding| binding.session_id))
}

pub async fn binding_for_session<C: ConnectionTrait>(
    db: &C,
    session_id: &str,
) -> Result<Option<session_binding::Model>, AppError> {
    Ok(session_binding::Entity::find()
        .filter(session_binding::Column::SessionId.eq(session_id))
        .one(db)
        .await?)
}

pub async fn activate<C: ConnectionTrait>(
    db: &C,
    plan: &plan::Model,
    session_id: &str,
    force: bool,
    now: DateTime<Utc>,
) -> Result<Activation, AppError> {
    if plan.status.is_done() {
        return Err(AppError::invalid("cannot activate plan; plan is done"));
    }

    let previous = holder(db, plan.id).await?;
    let activation = match previous {
        Some(current) if current == session_id => return Ok(Activation::Unchanged),
        Some(current) if !force => {
            return Err(AppError::InvalidInput(format!(
                "plan id {} is already active in session {current} (use --force to take over)",
                plan.id
            )));
        }
        Some(current) => Activation::TookOver { previous: current },
        None => Activation::Fresh,
    };

    session_binding::Entity::delete_many()
        .filter(
            session_binding::Column::PlanId
                .eq(plan.id)
                .or(session_binding::Column::SessionId.eq(session_id)),
        )
        .exec(db)
        .await?;
    session_binding::Entity::insert(session_binding::ActiveModel {
        plan_id: Set(plan.id),
        session_id: Set(session_id.to_string()),
        bound_at: Set(now),
    })
    .exec_without_returning(db)
    .await?;

    if let Activation::TookOver { previous } = &activation {
        info!(plan_id = plan.id, %previous, session = session_id, "plan taken over");
    }
    Ok(activation)
}

pub async fn resolve<C: ConnectionTrait>(db: &C, session_id: &str) -> Result<Bound, AppError> {
    let Some(binding) = binding_for_session(db, session_id).await? else {
        return Ok(Bound::Unbound);
    };
    match plan::Entity::find_by_id(binding.plan_id).one(db).await? {
        Some(plan) => Ok(Bound::Plan(plan)),
        None => {
            warn!(
                plan_id = binding.plan_id,
                session = session_id,
                "clearing binding to missing plan"
            );
            session_binding::Entity::delete_by_id(binding.plan_id)
                .exec(db)
                .await?;
            Ok(Bound::Stale(binding.plan_id))
        }
    }
}

/// Clears the session's binding and returns the plan it pointed at.
pub async fn deactivate<C: ConnectionTrait>(
    db: &C,
    session_id: &str,
) -> Result<Option<i64>, AppError> {
    let Some(binding) = binding_for_session(db, session_id).await? else {
        return Ok(None);
    };
    session_binding::Entity::delete_by_id(binding.plan_id)
        .exec(db)
        .await?;
    Ok(Some(binding.plan_id))
}

/// Removes whatever binding the plan has and returns its former holder.
pub async fn release<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
) -> Result<Option<String>, AppError> {
    let previous = holder(db, plan_id).await?;
    if previous.is_some() {
        session_binding::Entity::delete_by_id(plan_id)
            .exec(db)
            .await?;
    }
    Ok(previous)
}
