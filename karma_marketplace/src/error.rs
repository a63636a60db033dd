use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("network error talking to the marketplace: {0}")]
    Network(#[from] reqwest::Error),
    #[error("marketplace rate-limited the request (429)")]
    RateLimited,
    #[error("marketplace reported a conflict (409)")]
    Conflict,
    #[error("marketplace rejected the request schema (422): {body}")]
    SchemaInvalid { body: String },
    #[error("marketplace denied the request (403)")]
    Unauthorized,
    #[error("marketplace returned unexpected status {status}")]
    Unexpected { status: u16 },
    #[error("evidence_required must be non-empty")]
    EmptyEvidenceRequired,
    #[error("bounty {bounty} is below the minimum of {minimum}")]
    BountyTooLow { bounty: u64, minimum: u64 },
    #[error("evidence payload is not shaped as {{kind: payload}}: {reason}")]
    MalformedEvidence { reason: String },
    #[error("exceeded {attempts} retry attempts against the marketplace")]
    RetriesExhausted { attempts: u32 },
    #[error("failed to build request URL: {0}")]
    BadUrl(#[from] url::ParseError),
}

impl MarketplaceError {
    /// Matches spec.md §4.3/§7: network errors and 429s are retryable, 409
    /// is consumed by the caller, everything else is fatal for that call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketplaceError::Network(_) | MarketplaceError::RateLimited)
    }
}
