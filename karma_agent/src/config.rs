use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use karma_common::{EvidenceKind, Role};
use log::LevelFilter;
use serde::Deserialize;
use url::Url;

use crate::error::AgentError;

/// One entry in a seller/buyer-seller's product catalog, loaded from the
/// JSON file at `--catalog` (spec.md §3's `Product`, minus the
/// `seller_address`, which the runtime fills in from the resolved
/// identity rather than the file).
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub price_decimal: f64,
    pub evidence_kind: EvidenceKind,
    pub category: String,
}

/// Matches `ai_miner::main::CliConfig`'s `LogLevel` enum shape, rendered as
/// a `clap::ValueEnum` rather than through a shared prompt crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// `clap`-derive surface per SPEC_FULL.md §6.1, modeled on
/// `ai_miner::main::CliConfig`. Every flag falls back to an environment
/// variable named in spec.md §6.
#[derive(Parser, Debug)]
#[command(name = "karma_agent", about = "A KarmaCadabra autonomous trading agent")]
pub struct CliArgs {
    /// Stable agent identifier, used as the chat nick and registry name.
    #[arg(long, env = "AGENT_NAME")]
    pub name: String,

    /// Root directory for this agent's local store.
    #[arg(long, env = "KARMA_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Scheduler period in seconds.
    #[arg(long, default_value_t = 300)]
    pub tick: u64,

    /// Role-specific plan this agent runs.
    #[arg(long, value_enum)]
    pub role: CliRole,

    /// Daily spend cap, in the stablecoin's decimal units.
    #[arg(long, default_value_t = 1.0)]
    pub budget: f64,

    #[arg(long, env = "MARKETPLACE_URL")]
    pub marketplace_url: Url,

    #[arg(long, env = "FACILITATOR_URL")]
    pub facilitator_url: Option<Url>,

    #[arg(long, env = "CHAIN_RPC_URL")]
    pub chain_rpc_url: Option<Url>,

    #[arg(long, env = "CHAT_SERVER")]
    pub chat_server: Option<String>,

    #[arg(long, env = "WALLET_ADDRESS")]
    pub wallet_address: Option<String>,

    /// Hex-encoded secp256k1 private key; when absent, derived from
    /// `KARMA_SWARM_MNEMONIC` at `derivation_index`.
    #[arg(long, env = "PRIVATE_KEY")]
    pub private_key: Option<String>,

    #[arg(long, env = "KARMA_SWARM_MNEMONIC")]
    pub swarm_mnemonic: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub derivation_index: u32,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long)]
    pub disable_file_logging: bool,

    #[arg(long)]
    pub disable_log_color: bool,

    /// Path to a JSON catalog file (array of `CatalogEntry`) describing
    /// products this agent offers, for seller/buyer-seller roles.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Comma-separated ordered product dependency chain for pipeline
    /// consumers (spec.md §4.9), e.g.
    /// `raw_logs,skill_profile,voice_profile,soul_bundle`.
    #[arg(long, value_delimiter = ',')]
    pub supply_chain: Vec<String>,

    /// Marketplace category this agent's role queries/publishes against.
    #[arg(long, default_value = "data")]
    pub category: String,

    /// Stablecoin contract address the signed authorizations target.
    /// Required so the domain-separator digest never hard-codes a token
    /// (spec.md §9's Open Question: "treat the token as a configuration
    /// parameter; do not hard-code").
    #[arg(long, env = "TOKEN_CONTRACT")]
    pub token_contract: karma_common::Address,

    #[arg(long, env = "CHAIN_ID", default_value_t = 0)]
    pub token_chain_id: u64,

    #[arg(long, default_value = "USD Coin")]
    pub token_name: String,

    #[arg(long, default_value = "2")]
    pub token_version: String,

    #[arg(long, default_value_t = 6)]
    pub token_decimals: u8,
}

/// Role as read from the CLI. Kept distinct from `karma_common::Role` so
/// `clap::ValueEnum` doesn't have to live on the shared data-model crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliRole {
    Seller,
    Buyer,
    BuyerSeller,
    Validator,
    Coordinator,
    CommunityBuyer,
}

impl From<CliRole> for Role {
    fn from(value: CliRole) -> Self {
        match value {
            CliRole::Seller => Role::Seller,
            CliRole::Buyer => Role::Buyer,
            CliRole::BuyerSeller => Role::BuyerSeller,
            CliRole::Validator => Role::Validator,
            CliRole::Coordinator => Role::Coordinator,
            CliRole::CommunityBuyer => Role::CommunityBuyer,
        }
    }
}

/// The resolved, validated runtime configuration `main` builds every other
/// component from. Distinct from `CliArgs` so defaults/env-merging happen
/// once, matching the `CliConfig -> ValidatedConfig` split in
/// `ai_miner::main`/`ai_miner::config`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub data_dir: PathBuf,
    pub tick_period: Duration,
    pub role: Role,
    pub daily_budget_smallest_unit: u64,
    pub marketplace_url: Url,
    pub facilitator_url: Option<Url>,
    pub chain_rpc_url: Option<Url>,
    pub chat_server: Option<String>,
    pub private_key: Option<[u8; 32]>,
    pub swarm_mnemonic: Option<String>,
    pub derivation_index: u32,
    pub log_level: LogLevel,
    pub disable_file_logging: bool,
    pub disable_log_color: bool,
    pub token: karma_signer::TokenConfig,
    pub catalog: Option<PathBuf>,
    pub supply_chain: Vec<String>,
    pub category: String,
}

impl AgentConfig {
    pub fn from_cli(args: CliArgs) -> Result<Self, AgentError> {
        if args.tick == 0 {
            return Err(AgentError::InvalidConfig("--tick must be greater than zero".into()));
        }
        if args.budget < 0.0 || !args.budget.is_finite() {
            return Err(AgentError::InvalidConfig(
                "--budget must be a non-negative, finite decimal".into(),
            ));
        }
        if args.private_key.is_none() && args.swarm_mnemonic.is_none() {
            return Err(AgentError::MissingSecret);
        }

        let private_key = args
            .private_key
            .as_deref()
            .map(parse_private_key)
            .transpose()?;

        let token = karma_signer::TokenConfig {
            contract: args.token_contract,
            chain_id: args.token_chain_id,
            name: args.token_name,
            version: args.token_version,
            decimals: args.token_decimals,
        };

        let daily_budget_smallest_unit = karma_signer::to_smallest_unit(args.budget, token.decimals)
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            name: args.name,
            data_dir: args.data_dir,
            tick_period: Duration::from_secs(args.tick),
            role: args.role.into(),
            daily_budget_smallest_unit,
            marketplace_url: args.marketplace_url,
            facilitator_url: args.facilitator_url,
            chain_rpc_url: args.chain_rpc_url,
            chat_server: args.chat_server,
            private_key,
            swarm_mnemonic: args.swarm_mnemonic,
            derivation_index: args.derivation_index,
            log_level: args.log_level,
            disable_file_logging: args.disable_file_logging,
            disable_log_color: args.disable_log_color,
            token,
            catalog: args.catalog,
            supply_chain: args.supply_chain,
            category: args.category,
        })
    }
}

/// Loads the seller/buyer-seller product catalog from `--catalog`. A
/// missing `--catalog` flag is not an error: the role simply has nothing
/// to offer and falls through to its other responsibilities.
pub async fn load_catalog(path: &std::path::Path) -> Result<Vec<CatalogEntry>, AgentError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| AgentError::DataDir {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AgentError::InvalidConfig(format!("catalog {} is malformed: {e}", path.display())))
}

fn parse_private_key(value: &str) -> Result<[u8; 32], AgentError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(stripped, &mut bytes)
        .map_err(|e| AgentError::InvalidConfig(format!("PRIVATE_KEY is not valid hex: {e}")))?;
    Ok(bytes)
}

/// Colored terminal output plus a rotating-by-day file sink under
/// `<data-dir>/logs/`, written from scratch in `fern`'s conventional
/// builder style since the teacher declares `fern` as a dependency but
/// never exercises it directly.
pub fn init_logger(config: &AgentConfig) -> Result<(), AgentError> {
    let level: LevelFilter = config.log_level.into();

    let colors = fern::colors::ColoredLevelConfig::new()
        .error(fern::colors::Color::Red)
        .warn(fern::colors::Color::Yellow)
        .info(fern::colors::Color::Green)
        .debug(fern::colors::Color::Blue)
        .trace(fern::colors::Color::Magenta);

    let agent_name = config.name.clone();
    let mut dispatch = fern::Dispatch::new().level(level);

    let stdout_colors = colors;
    let disable_color = config.disable_log_color;
    let stdout_agent_name = agent_name.clone();
    dispatch = dispatch.chain(
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if disable_color {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                        record.level(),
                        stdout_agent_name,
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                        stdout_colors.color(record.level()),
                        stdout_agent_name,
                        message
                    ))
                }
            })
            .chain(std::io::stdout()),
    );

    if !config.disable_file_logging {
        let logs_dir = config.data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir).map_err(|e| AgentError::DataDir {
            path: logs_dir.display().to_string(),
            source: e,
        })?;
        let log_path = logs_dir.join(format!(
            "{}-{}.log",
            agent_name,
            chrono::Utc::now().format("%Y-%m-%d")
        ));
        let file = fern::log_file(&log_path).map_err(|e| {
            AgentError::DataDir {
                path: log_path.display().to_string(),
                source: e,
            }
        })?;
        let file_agent_name = agent_name.clone();
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                        record.level(),
                        file_agent_name,
                        message
                    ))
                })
                .chain(file),
        );
    }

    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_private_key_accepts_0x_prefix() {
        let hex64 = "11".repeat(32);
        let key = parse_private_key(&format!("0x{hex64}")).unwrap();
        assert_eq!(key, [0x11u8; 32]);
    }

    #[test]
    fn parse_private_key_rejects_bad_hex() {
        assert!(parse_private_key("zz").is_err());
    }
}
