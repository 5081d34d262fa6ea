//! Derived status for steps (from goals) and plans (from steps).
//!
//! Mutations record which steps and plans they touched in a [`Dirty`] set
//! and hand it to [`settle`] once, before commit. Settling walks leaf to
//! root: every dirty step first, then every plan that owns one of them or
//! was marked directly. A parent whose stored status already matches its
//! children is left alone, timestamp included.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tracing::debug;

use crate::entities::{plan, step};
use crate::error::AppError;
use crate::model::{EntityKind, Status};
use crate::session;
use crate::store::queries::{self, Tally};
use crate::store::tracked;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusChange {
    pub kind: EntityKind,
    pub id: i64,
    pub from: Status,
    pub to: Status,
    pub reason: String,
}

/// A session binding dropped because its plan finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Released {
    pub plan_id: i64,
    pub session_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct Report {
    pub changes: Vec<StatusChange>,
    pub released: Vec<Released>,
}

impl Report {
    pub fn absorb(&mut self, other: Report) {
        self.changes.extend(other.changes);
        self.released.extend(other.released);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.released.is_empty()
    }

    /// Ids of entities of `kind` that this report moved to done.
    pub fn completed(&self, kind: EntityKind) -> Vec<i64> {
        self.changes
            .iter()
            .filter(|change| change.kind == kind && change.to == Status::Done)
            .map(|change| change.id)
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dirty {
    steps: BTreeSet<i64>,
    plans: BTreeSet<i64>,
}

impl Dirty {
    pub fn step(&mut self, id: i64) -> &mut Self {
        self.steps.insert(id);
        self
    }

    pub fn plan(&mut self, id: i64) -> &mut Self {
        self.plans.insert(id);
        self
    }

    pub fn steps(&mut self, ids: impl IntoIterator<Item = i64>) -> &mut Self {
        self.steps.extend(ids);
        self
    }

    pub fn plans(&mut self, ids: impl IntoIterator<Item = i64>) -> &mut Self {
        self.plans.extend(ids);
        self
    }
}

/// Status implied by a parent's children, or `None` when it has none and
/// is therefore managed by hand.
pub fn derive(tally: Tally) -> Option<Status> {
    if tally.total == 0 {
        None
    } else if tally.done == tally.total {
        Some(Status::Done)
    } else {
        Some(Status::Todo)
    }
}

fn reason(child: &str, to: Status, tally: Tally) -> String {
    match to {
        Status::Done => format!("all {child}s done ({}/{})", tally.done, tally.total),
        Status::Todo => format!(
            "{child} became incomplete ({}/{} done)",
            tally.done, tally.total
        ),
    }
}

pub async fn settle<C: ConnectionTrait>(
    db: &C,
    dirty: Dirty,
    now: DateTime<Utc>,
) -> Result<Report, AppError> {
    let mut report = Report::default();
    let Dirty { steps, mut plans } = dirty;

    for step_id in steps {
        let Some(model) = tracked::find::<step::Entity, _>(db, step_id).await? else {
            continue;
        };
        plans.insert(model.plan_id);
        let tally = queries::goal_tally(db, step_id).await?;
        let Some(target) = derive(tally) else {
            continue;
        };
        if target == model.status {
            continue;
        }
        let from = model.status;
        let mut active: step::ActiveModel = model.into();
        active.status = Set(target);
        active.updated_at = Set(now);
        active.update(db).await?;
        debug!(step_id, %from, to = %target, "step status rolled up");
        report.changes.push(StatusChange {
            kind: EntityKind::Step,
            id: step_id,
            from,
            to: target,
            reason: reason("goal", target, tally),
        });
    }

    for plan_id in plans {
        let Some(model) = tracked::find::<plan::Entity, _>(db, plan_id).await? else {
            continue;
        };
        let tally = queries::step_tally(db, plan_id).await?;
        let Some(target) = derive(tally) else {
            continue;
        };
        if target == model.status {
            continue;
        }
        let from = model.status;
        let mut active: plan::ActiveModel = model.into();
        active.status = Set(target);
        active.updated_at = Set(now);
        active.update(db).await?;
        debug!(plan_id, %from, to = %target, "plan status rolled up");
        report.changes.push(StatusChange {
            kind: EntityKind::Plan,
            id: plan_id,
            from,
            to: target,
            reason: reason("step", target, tally),
        });
        if target == Status::Done {
            report.released.extend(release_finished(db, plan_id).await?);
        }
    }

    Ok(report)
}

/// Drops the binding of a plan that just reached done.
pub async fn release_finished<C: ConnectionTrait>(
    db: &C,
    plan_id: i64,
) -> Result<Option<Released>, AppError> {
    Ok(session::release(db, plan_id)
        .await?
        .map(|session_id| Released {
            plan_id,
            session_id,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn childless_parents_have_no_derived_status() {
        assert_eq!(derive(Tally { total: 0, done: 0 }), None);
    }

    #[test]
    fn derived_status_requires_every_child_done() {
        assert_eq!(derive(Tally { total: 3, done: 3 }), Some(Status::Done));
        assert_eq!(derive(Tally { total: 3, done: 2 }), Some(Status::Todo));
        assert_eq!(derive(Tally { total: 1, done: 0 }), Some(Status::Todo));
    }

    #[test]
    fn reasons_carry_counts() {
        let tally = Tally { total: 2, done: 2 };
        assert_eq!(reason("goal", Status::Done, tally), "all goals done (2/2)");
        let tally = Tally { total: 3, done: 1 };
        assert_eq!(
            reason("step", Status::Todo, tally),
            "step became incomplete (1/3 done)"
        );
    }

    #[test]
    fn completed_filters_by_kind_and_direction() {
        let report = Report {
            changes: vec![
                StatusChange {
                    kind: EntityKind::Step,
                    id: 4,
                    from: Status::Todo,
                    to: Status::Done,
                    reason: String::new(),
                },
                StatusChange {
                    kind: EntityKind::Plan,
                    id: 1,
                    from: Status::Done,
                    to: Status::Todo,
                    reason: String::new(),
                },
            ],
            released: Vec::new(),
        };
        assert_eq!(report.completed(EntityKind::Step), vec![4]);
        assert!(report.completed(EntityKind::Plan).is_empty());
    }
}
