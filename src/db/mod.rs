//! Database connection layer

pub mod manager;
pub mod mongo;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{
    ConnectionConfig, ConnectionManager, Connector, CredentialPresence, LiveHandle, LiveState,
    LiveStateCell, StatusSnapshot,
};
pub use mongo::{MongoConnector, MongoSession};
