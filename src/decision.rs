//! Whether the agent may end its turn.
//!
//! The only write here is clearing a binding whose plan is gone or already
//! done; everything else is a read over the session's active plan.

use serde::Serialize;

use crate::engine::{Engine, StepDetail};
use crate::entities::plan;
use crate::error::AppError;
use crate::model::Executor;
use crate::render;
use crate::session::{self, Bound};
use crate::store::{finish, queries};

pub const MARKER: &str = "Planloop (auto):";

const GUIDANCE: &str = "The active plan has a pending step assigned to ai. \
Work through it and its goals now, record implementation notes with step or goal comments, \
and mark goals done as they are verified. Do not ask for confirmation; proceed and report results.";

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum StopDecision {
    Approve,
    Block { reason: String },
}

impl StopDecision {
    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classifies an active plan and its lowest pending step.
pub fn classify(plan: &plan::Model, next: Option<&StepDetail>) -> StopDecision {
    if plan.status.is_done() {
        return StopDecision::Approve;
    }
    match next {
        Some(detail) if detail.step.executor == Executor::Ai => StopDecision::Block {
            reason: block_reason(detail),
        },
        _ => StopDecision::Approve,
    }
}

pub fn block_reason(detail: &StepDetail) -> String {
    format!("{MARKER}\n{GUIDANCE}\n\n{}", render::step_detail(detail))
}

pub async fn decide(engine: &Engine) -> Result<StopDecision, AppError> {
    let store = engine.store();
    let txn = store.begin().await?;
    let result: Result<_, AppError> = async {
        let plan = match session::resolve(&txn, engine.session_id()).await? {
            Bound::Unbound | Bound::Stale(_) => return Ok(StopDecision::Approve),
            Bound::Plan(plan) => plan,
        };
        if plan.status.is_done() {
            session::release(&txn, plan.id).await?;
            return Ok(StopDecision::Approve);
        }
        let next = match queries::next_pending_step(&txn, plan.id).await? {
            Some(step) => {
                let goals = queries::goals_of_step(&txn, step.id).await?;
                Some(StepDetail { step, goals })
            }
            None => None,
        };
        Ok(classify(&plan, next.as_ref()))
    }
    .await;
    finish(txn, result).await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Set};

    use super::*;
    use crate::engine::test_support::*;
    use crate::model::{Executor, Status, StepPatch};

    fn approve() -> StopDecision {
        StopDecision::Approve
    }

    #[test]
    fn decisions_serialize_as_tagged_json() {
        assert_eq!(approve().to_json().unwrap(), r#"{"decision":"approve"}"#);
        let block = StopDecision::Block {
            reason: "go".to_string(),
        };
        assert_eq!(
            block.to_json().unwrap(),
            r#"{"decision":"block","reason":"go"}"#
        );
    }

    #[tokio::test]
    async fn no_active_plan_approves() {
        let (_dir, engine) = engine().await;
        plan(&engine, "Idle").await;
        assert_eq!(decide(&engine).await.unwrap(), approve());
    }

    #[tokio::test]
    async fn human_step_approves() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        step_for(&engine, plan.id, "review the diff", Executor::Human).await;
        step_for(&engine, plan.id, "ship", Executor::Ai).await;
        engine.activate(plan.id, false).await.unwrap();
        assert_eq!(decide(&engine).await.unwrap(), approve());
    }

    #[tokio::test]
    async fn ai_step_blocks_with_marker_and_detail() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        let step = step_for(&engine, plan.id, "write the parser", Executor::Ai).await;
        goal(&engine, step.id, "handles escapes").await;
        engine.activate(plan.id, false).await.unwrap();

        let StopDecision::Block { reason } = decide(&engine).await.unwrap() else {
            panic!("expected block");
        };
        assert!(reason.starts_with("Planloop (auto):\n"));
        assert!(reason.contains("Content: write the parser"));
        assert!(reason.contains("- [todo] handles escapes"));
        assert!(reason.contains(&format!("Step ID: {}", step.id)));
    }

    #[tokio::test]
    async fn done_plan_approves_and_clears_binding() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        engine.activate(plan.id, false).await.unwrap();
        // A binding can outlive completion only if written behind our back.
        let mut active: plan::ActiveModel = engine.plan(plan.id).await.unwrap().into();
        active.status = Set(Status::Done);
        active.updated_at = Set(Utc::now());
        active.update(engine.store().conn()).await.unwrap();

        assert_eq!(decide(&engine).await.unwrap(), approve());
        assert!(engine.holder(plan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plan_without_pending_steps_approves() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        engine.activate(plan.id, false).await.unwrap();
        assert_eq!(decide(&engine).await.unwrap(), approve());
    }

    #[tokio::test]
    async fn decision_follows_lowest_position() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        let human = step_for(&engine, plan.id, "human", Executor::Human).await;
        let ai = step_for(&engine, plan.id, "ai", Executor::Ai).await;
        engine.activate(plan.id, false).await.unwrap();
        assert_eq!(decide(&engine).await.unwrap(), approve());

        engine.move_step(ai.id, 1).await.unwrap();
        assert!(matches!(
            decide(&engine).await.unwrap(),
            StopDecision::Block { .. }
        ));

        engine
            .update_step(
                ai.id,
                StepPatch {
                    executor: Some(Executor::Human),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(decide(&engine).await.unwrap(), approve());
        assert!(engine.step(human.id).await.is_ok());
    }

    #[tokio::test]
    async fn other_sessions_do_not_block() {
        let (_dir, engine) = engine().await;
        let plan = plan(&engine, "Plan").await;
        step(&engine, plan.id, "ai work").await;
        engine.activate(plan.id, false).await.unwrap();

        let other = Engine::new(engine.store().clone(), "someone-else");
        assert_eq!(decide(&other).await.unwrap(), approve());
    }
}
