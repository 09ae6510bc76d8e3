/// Ledger synchronization for full and lite nodes.
///
/// - **Full Node**: builds the ledger from a trusted local full node and
///   serves it to peers
/// - **Lite Node**: requests blocks from seed nodes and relays new-block
///   broadcasts
/// - **Request Handler**: one request/response exchange with a single peer,
///   bounded by a timeout
/// - **Pending Blocks**: blocks that arrived ahead of the ledger tip
/// - **Peer Manager**: seed node selection for lite nodes
///
/// ## Architecture
///
/// Each sync component runs as a single actor on one task. It owns its maps
/// and queues and consumes network events, source pushes, timer firings and
/// request completions from channels one at a time, so nothing inside needs
/// locking. Only the ledger is shared, behind a mutex.
///
/// ## State Machine (full node)
///
/// - **INITIALIZING**: head height of the trusted source not yet known
/// - **CATCHING_UP**: fetching blocks up to the source head
/// - **LIVE**: applying pushed blocks; drops back to CATCHING_UP on a gap
pub mod config;
pub mod full_node;
pub mod lite_node;
pub mod node;
pub mod peer_manager;
pub mod pending_blocks;
pub mod request_handler;
pub mod states;

pub use config::*;
pub use full_node::{FullNodeSync, SourceError, SyncError, SyncNotification, TrustedSource};
pub use lite_node::{LiteNodeCommand, LiteNodeHandle, LiteNodeNotification, LiteNodeSync};
pub use node::{ChainSyncNode, NodeLifecycle};
pub use peer_manager::SeedNodeSelector;
pub use pending_blocks::PendingBlocks;
pub use request_handler::{BlockRequestHandler, RequestCompletion, RequestFault, RequestHandle};
pub use states::FullNodeState;

#[cfg(test)]
mod tests;
