pub mod behaviour;
pub mod node;
pub mod protocol;
pub mod transport;
