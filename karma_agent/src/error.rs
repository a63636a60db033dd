use thiserror::Error;

/// Startup-phase failures, the only ones `main` converts into a process
/// exit code rather than an error heartbeat, per spec.md §7's "Config"
/// error kind.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no private key material available: set --private-key, PRIVATE_KEY, or a swarm mnemonic")]
    MissingSecret,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to initialize logging: {0}")]
    LoggerInit(#[from] log::SetLoggerError),
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// spec.md §6/§7's exit code 2: a consecutive-failure counter on a
    /// single subject (a task or a buy-task product) tripped the
    /// persistent-422 threshold, rather than an isolated rejection.
    #[error("{subject} was rejected with a 422 {consecutive} times in a row, giving up")]
    PersistentSchemaInvalid { subject: String, consecutive: u32 },
}
