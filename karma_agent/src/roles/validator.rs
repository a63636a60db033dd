//! Validator (spec.md §4.8): applies to tasks in the `validation` category,
//! scores whatever evidence the assignment references, and submits the
//! score as its own evidence so the publisher can approve and pay for the
//! validation like any other trade. Never publishes or buys anything.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use karma_common::{EvidenceKind, TaskState};
use karma_escrow::{EscrowEvent, EscrowMachine, EscrowRecord};
use karma_marketplace::{ApplyOutcome, BrowseFilter};
use log::{info, warn};
use serde_json::{json, Value};

use super::RolePlan;
use crate::runtime::RuntimeContext;

const VALIDATION_CATEGORY: &str = "validation";

pub struct ValidatorPlan;

#[async_trait]
impl RolePlan for ValidatorPlan {
    /// Applies to every open task in the `validation` category this agent
    /// hasn't already applied to.
    async fn apply(&self, ctx: &mut RuntimeContext) -> Result<()> {
        ctx.rate_limiter.wait().await;
        let tasks = ctx
            .client
            .browse(&BrowseFilter {
                category: Some(VALIDATION_CATEGORY.to_string()),
                limit: None,
            })
            .await?;

        let known_task_ids: std::collections::BTreeSet<_> = ctx
            .store
            .list_escrow_records()
            .await?
            .into_iter()
            .map(|r| r.task_id)
            .collect();

        for task in tasks {
            if task.state != TaskState::Published || known_task_ids.contains(&task.task_id) {
                continue;
            }

            ctx.rate_limiter.wait().await;
            let message = format!("{} can validate this", ctx.agent.name);
            match ctx.client.apply(task.task_id, &message).await {
                Ok(outcome) => {
                    let mut machine = EscrowMachine::new(
                        EscrowRecord::new(task.task_id, task.publisher_address)
                            .with_product(task.title.clone())
                            .with_deadline(task.deadline),
                    );
                    // The record starts at `Unknown`; this agent only
                    // observes the task after it was already published, so
                    // catch it up to `Published` before applying the event
                    // the marketplace actually returned.
                    let event = match outcome {
                        ApplyOutcome::Applied { application_id } => EscrowEvent::Applied { application_id },
                        ApplyOutcome::AlreadyApplied => EscrowEvent::AlreadyApplied,
                    };
                    if machine.apply_event(EscrowEvent::TaskCreated).is_ok()
                        && machine.apply_event(event).is_ok()
                    {
                        ctx.store.save_escrow(machine.record()).await?;
                        info!("{} applied to validate task {}", ctx.agent.name, task.task_id);
                    }
                }
                Err(e) => warn!("validation apply failed for task {}: {e}", task.task_id),
            }
        }
        Ok(())
    }

    /// Scores the referenced data and submits the score as
    /// `StructuredData` evidence, billing the publisher for the
    /// validation once it is approved.
    async fn submit(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = super::refresh_records(ctx).await?;
        let mine: Vec<_> = records
            .into_iter()
            .filter(|r| r.assignee_address == Some(ctx.address()) && r.state == TaskState::Assigned)
            .collect();
        if mine.is_empty() {
            return Ok(());
        }

        ctx.rate_limiter.wait().await;
        let tasks = ctx.client.browse(&BrowseFilter::default()).await?;

        for record in mine {
            let Some(task) = tasks.iter().find(|t| t.task_id == record.task_id) else {
                continue;
            };
            let score = score_subject(&task.title, &task.description);
            let mut evidence: BTreeMap<EvidenceKind, Value> = BTreeMap::new();
            evidence.insert(
                EvidenceKind::StructuredData,
                json!({ "score": score, "validator": ctx.agent.name }),
            );

            ctx.rate_limiter.wait().await;
            match ctx.client.submit(record.task_id, &ctx.agent.name, &evidence).await {
                Ok(submission_id) => {
                    let mut machine = EscrowMachine::new(record);
                    if machine.apply_event(EscrowEvent::Submitted { submission_id }).is_ok() {
                        ctx.store.save_escrow(machine.record()).await?;
                        info!("{} submitted a validation score of {score} for task {}", ctx.agent.name, task.task_id);
                    }
                }
                Err(e) => warn!("validation submit failed for task {}: {e}", task.task_id),
            }
        }
        Ok(())
    }
}

/// A deterministic, reproducible stand-in for real content scoring: this
/// core treats the judgment itself as out of scope (spec.md §1), so the
/// score is derived from the subject's own bytes rather than invented.
fn score_subject(title: &str, description: &str) -> u8 {
    let bytes = format!("{title}{description}");
    let sum: u64 = bytes.bytes().map(u64::from).sum();
    (sum % 100) as u8
}
