//! C3: a stateless HTTP client over the external task/escrow marketplace
//! (spec.md §4.3 / §6). One authentication header, `X-Agent-Wallet`; five
//! operations; retryable-vs-fatal error mapping.

mod client;
mod error;
mod types;

pub use client::{MarketplaceClient, MarketplaceClientConfig};
pub use error::MarketplaceError;
pub use types::{ApplyOutcome, BrowseFilter, CreateTaskFields};
