pub mod client;
pub mod host;
pub mod hotplug;
pub mod wire;
