pub mod command_repository;
pub mod connectivity;
pub mod query_repository;
pub mod sync_drainer;

pub use command_repository::{CommandRepository, MutationReceipt, RemoteStatus};
pub use connectivity::{ConnectivityKind, ConnectivityMonitor};
pub use query_repository::{CacheTtls, QueryRepository};
pub use sync_drainer::SyncDrainer;
