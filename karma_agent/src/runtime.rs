//! Composes C1-C7 into the shared context every role plan ticks against
//! (spec.md §4.8: "scheduler fires -> role handler consults local store ->
//! queries marketplace and chat -> drives the escrow state machine ->
//! requests payment signatures -> updates local store -> rates
//! counterparties -> writes a heartbeat artifact").

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;
use karma_chat::{ChatTransport, TcpChatTransport};
use karma_common::{Agent, Role};
use karma_keystore::{
    address_from_signing_key, load_secret, resolve_registry_id, HttpIdentityRegistry,
    IdentityRegistry, KeystoreConfig, NullIdentityRegistry,
};
use karma_marketplace::MarketplaceClient;
use karma_signer::TokenConfig;
use karma_store::AgentStore;
use log::{info, warn};

use crate::budget::BudgetTracker;
use crate::config::{load_catalog, AgentConfig, CatalogEntry};
use crate::rate_limiter::RateLimiter;
use crate::reputation::ReputationCache;
use crate::supply_chain::SupplyChain;

/// Reputation snapshots are refreshed independently of the heartbeat
/// cadence (spec.md §4.5); five minutes is a reasonable default
/// independent of `--tick`.
const REPUTATION_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Everything a `RolePlan` needs for one tick, owned exclusively by this
/// agent's single scheduler task (spec.md §5: "no cross-agent shared
/// mutable state").
pub struct RuntimeContext {
    pub config: AgentConfig,
    pub agent: Agent,
    pub signing_key: SigningKey,
    pub token: TokenConfig,
    pub store: AgentStore,
    pub client: MarketplaceClient,
    pub chat: Option<Box<dyn ChatTransport>>,
    pub rate_limiter: RateLimiter,
    pub budget: BudgetTracker,
    pub reputation: ReputationCache,
    pub supply_chain: Option<SupplyChain>,
    pub catalog: Vec<CatalogEntry>,
    pub step: u64,
    schema_invalid_streak: std::collections::HashMap<String, u32>,
    degraded: bool,
}

/// Consecutive 422s against the same subject before a tick is treated as a
/// fatal persistent-422 loop (spec.md §7) rather than an isolated rejection.
const SCHEMA_INVALID_THRESHOLD: u32 = 3;

impl RuntimeContext {
    /// Resolves identity (C1), builds the store (C7), the marketplace
    /// client (C3), and an optional chat transport (C6), then loads
    /// whatever catalog/supply-chain configuration this role needs.
    pub async fn build(config: AgentConfig) -> Result<Self> {
        let keystore_config = KeystoreConfig {
            explicit_private_key: config.private_key,
            mnemonic: config.swarm_mnemonic.clone(),
            derivation_index: config.derivation_index,
        };
        let signing_key = load_secret(&keystore_config).context("resolving private key material")?;
        let address = address_from_signing_key(&signing_key);

        let registry: Box<dyn IdentityRegistry> = match &config.chain_rpc_url {
            Some(url) => Box::new(HttpIdentityRegistry::new(url.clone())),
            None => Box::new(NullIdentityRegistry),
        };
        let (registry_id, degraded) =
            resolve_registry_id(registry.as_ref(), address, &config.name, "karmacadabra.local").await;
        if degraded {
            warn!("{} running in degraded mode: no on-chain identity/reputation reads", config.name);
        }

        let store = AgentStore::new(config.data_dir.clone())
            .await
            .context("bootstrapping local store")?;

        let agent = match store.load_agent().await.context("loading agent.json")? {
            Some(mut existing) => {
                existing.registry_id = registry_id.or(existing.registry_id);
                existing
            }
            None => Agent {
                name: config.name.clone(),
                address,
                registry_id,
                role: config.role,
                derivation_index: config.derivation_index,
                offered_products: Vec::new(),
                desired_products: Vec::new(),
            },
        };
        store.save_agent(&agent).await.context("persisting agent.json")?;

        let client = MarketplaceClient::new(config.marketplace_url.clone(), address)
            .context("constructing marketplace client")?;

        let chat: Option<Box<dyn ChatTransport>> = match &config.chat_server {
            Some(server) => {
                let mut transport = TcpChatTransport::new(server, true, config.name.clone());
                match transport.connect().await {
                    Ok(()) => {
                        if let Err(e) = transport.join(karma_chat::PROTOCOL_CHANNEL).await {
                            warn!("failed to join chat channel, continuing without chat: {e}");
                            None
                        } else {
                            Some(Box::new(transport) as Box<dyn ChatTransport>)
                        }
                    }
                    Err(e) => {
                        warn!("chat transport unavailable, continuing without chat (spec.md §4.6 best-effort): {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let token = config.token.clone();

        let catalog = match &config.catalog {
            Some(path) => load_catalog(path).await.context("loading product catalog")?,
            None => Vec::new(),
        };

        let supply_chain = if config.supply_chain.is_empty() {
            None
        } else {
            Some(SupplyChain::new(config.supply_chain.clone()))
        };

        let budget = BudgetTracker::new(address, config.daily_budget_smallest_unit);
        let rate_limiter = RateLimiter::default();
        let reputation = ReputationCache::new(REPUTATION_REFRESH_INTERVAL);

        info!(
            "{} resolved identity {address} (registry_id={:?}, role={})",
            config.name,
            agent.registry_id,
            config.role.as_str()
        );

        Ok(Self {
            config,
            agent,
            signing_key,
            token,
            store,
            client,
            chat,
            rate_limiter,
            budget,
            reputation,
            supply_chain,
            catalog,
            step: 0,
            schema_invalid_streak: std::collections::HashMap::new(),
            degraded,
        })
    }

    pub fn address(&self) -> karma_common::Address {
        self.agent.address
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Records a 422 against `subject` (a task id or buy-task product
    /// name); once the same subject has failed this way three ticks in a
    /// row, returns the fatal error the scheduler escalates into exit code
    /// 2 rather than letting the role loop on the same rejection forever.
    pub fn record_schema_invalid(&mut self, subject: &str) -> Result<(), crate::error::AgentError> {
        let streak = self.schema_invalid_streak.entry(subject.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= SCHEMA_INVALID_THRESHOLD {
            return Err(crate::error::AgentError::PersistentSchemaInvalid {
                subject: subject.to_string(),
                consecutive: *streak,
            });
        }
        Ok(())
    }

    /// Clears any tracked 422 streak for `subject` after it succeeds.
    pub fn clear_schema_invalid(&mut self, subject: &str) {
        self.schema_invalid_streak.remove(subject);
    }
}
