//! C6: a line-oriented, full-duplex chat transport with channels-as-topics
//! (spec.md §4.6). Best-effort: the marketplace, never chat, is the
//! authoritative source for any economic transition.

mod protocol;
mod tcp;
mod transport;

pub use protocol::{MarketplaceAnnouncement, PROTOCOL_CHANNEL};
pub use tcp::TcpChatTransport;
pub use transport::{ChatError, ChatMessage, ChatTransport};
