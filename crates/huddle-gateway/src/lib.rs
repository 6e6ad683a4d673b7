pub mod broadcast;
pub mod connection;
pub mod registry;

pub use broadcast::Broadcaster;
pub use registry::{ChannelKey, ChannelRegistry};
