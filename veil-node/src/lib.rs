pub mod client_actor;
pub mod config;
pub mod contracts;
pub mod coordinator;
pub mod endorsement;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod node;
pub mod peer;
pub mod state_store;
