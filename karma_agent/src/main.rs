use clap::Parser;
use karma_agent::config::{init_logger, AgentConfig, CliArgs};
use karma_agent::error::AgentError;
use karma_agent::runtime::RuntimeContext;
use karma_agent::scheduler::Scheduler;
use log::info;

/// Fatal config/secret error, per spec.md §6's exit-code table.
const EXIT_CONFIG_ERROR: i32 = 1;
/// A persistent-422 loop on a single task/subject, per spec.md §6.
const EXIT_SCHEMA_LOOP: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match AgentConfig::from_cli(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("karma_agent: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = init_logger(&config) {
        eprintln!("karma_agent: {e}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    if let Err(e) = run(config).await {
        eprintln!("karma_agent: fatal error: {e:#}");
        let exit_code = if e.downcast_ref::<AgentError>().is_some_and(|e| matches!(e, AgentError::PersistentSchemaInvalid { .. })) {
            EXIT_SCHEMA_LOOP
        } else {
            EXIT_CONFIG_ERROR
        };
        std::process::exit(exit_code);
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let mut ctx = RuntimeContext::build(config).await?;
    info!(
        "{} starting as {:?} at {} (degraded={})",
        ctx.agent.name,
        ctx.role(),
        ctx.address(),
        ctx.is_degraded()
    );

    let mut scheduler = Scheduler::new(ctx.config.tick_period);
    tokio::select! {
        result = scheduler.run(&mut ctx) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("{} received shutdown signal, exiting cleanly", ctx.agent.name);
        }
    }
    Ok(())
}
