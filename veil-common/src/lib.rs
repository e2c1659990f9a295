pub mod crypto;
pub mod message;
pub mod types;

pub use message::*;
pub use types::*;
