pub mod context;
pub mod control;
pub mod messages;
pub mod node;
pub mod transfer;
pub mod transport;
