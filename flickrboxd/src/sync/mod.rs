pub mod engine;
pub mod local_watcher;
pub mod paths;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod tickets;
pub mod transfer;
