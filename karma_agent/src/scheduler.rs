//! C8's tick loop (spec.md §4.8, SPEC_FULL.md §4.8.1): fires `role.heartbeat`
//! on a fixed interval, bounding each tick to 80% of the period so a stuck
//! call never stalls the next one, and records every tick — successful or
//! not — to the append-only heartbeat log.

use std::time::Duration as StdDuration;

use karma_common::{HeartbeatRecord, HeartbeatStatus};
use log::{error, info};
use tokio::time::MissedTickBehavior;

use crate::runtime::RuntimeContext;

/// Fraction of `tick_period` a single heartbeat is allowed to run before
/// being cancelled, per spec.md §4.8's cancellation rule.
const TICK_BUDGET_FRACTION: f64 = 0.8;

pub struct Scheduler {
    tick_period: StdDuration,
}

impl Scheduler {
    pub fn new(tick_period: StdDuration) -> Self {
        Self { tick_period }
    }

    /// Runs ticks forever, until a persistent-422 loop is detected on some
    /// task (spec.md §6/§7's exit code 2) and propagated as a fatal error.
    /// Cancellation (ctrl-c) is the caller's responsibility via
    /// `tokio::select!` around this future.
    pub async fn run(&mut self, ctx: &mut RuntimeContext) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let budget = self.tick_period.mul_f64(TICK_BUDGET_FRACTION);
        loop {
            interval.tick().await;
            ctx.step += 1;
            if let Ok(records) = ctx.store.list_escrow_records().await {
                ctx.reputation.refresh_if_due(&records);
            }

            let (record, fatal) = self.run_one_tick(ctx, budget).await;
            if let Err(e) = ctx.store.append_heartbeat(&record).await {
                error!("{} failed to append heartbeat record: {e}", ctx.agent.name);
            }
            if let Some(fatal) = fatal {
                return Err(fatal);
            }
        }
    }

    /// Runs one tick, returning the `HeartbeatRecord` to log plus `Some`
    /// fatal error when the tick's failure should end the process rather
    /// than just be logged (currently: `AgentError::PersistentSchemaInvalid`).
    async fn run_one_tick(
        &self,
        ctx: &mut RuntimeContext,
        budget: StdDuration,
    ) -> (HeartbeatRecord, Option<anyhow::Error>) {
        let at = chrono::Utc::now();
        let step = ctx.step;
        match tokio::time::timeout(budget, crate::roles::run_tick(ctx)).await {
            Ok(Ok(action)) => {
                info!("{} step {step}: {action}", ctx.agent.name);
                let record = HeartbeatRecord {
                    at,
                    agent_name: ctx.agent.name.clone(),
                    step,
                    action,
                    state_delta: String::new(),
                    status: HeartbeatStatus::Ok,
                };
                (record, None)
            }
            Ok(Err(e)) => {
                error!("{} step {step} failed: {e:#}", ctx.agent.name);
                let fatal = e
                    .downcast_ref::<crate::error::AgentError>()
                    .filter(|err| matches!(err, crate::error::AgentError::PersistentSchemaInvalid { .. }))
                    .is_some();
                let record = HeartbeatRecord {
                    at,
                    agent_name: ctx.agent.name.clone(),
                    step,
                    action: "heartbeat failed".to_string(),
                    state_delta: e.to_string(),
                    status: HeartbeatStatus::Error,
                };
                (record, fatal.then_some(e))
            }
            Err(_) => {
                error!("{} step {step} timed out after {budget:?}", ctx.agent.name);
                let record = HeartbeatRecord {
                    at,
                    agent_name: ctx.agent.name.clone(),
                    step,
                    action: "heartbeat cancelled".to_string(),
                    state_delta: "tick budget exceeded".to_string(),
                    status: HeartbeatStatus::Error,
                };
                (record, None)
            }
        }
    }
}
