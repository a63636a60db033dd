pub mod address;
pub mod types;

pub use address::{Address, AddressError};
pub use types::{
    Agent, Application, EvidenceKind, HeartbeatRecord, HeartbeatStatus, PaymentAuthorization,
    Product, ReputationLayer, ReputationSnapshot, ReputationTier, Role, Submission, Task,
    TaskState,
};
