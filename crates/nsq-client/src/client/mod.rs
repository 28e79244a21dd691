// Client façade and the publish/subscribe engines behind it.
mod client;
pub(crate) mod publisher;
pub(crate) mod subscription;

pub use client::{Client, StopHandle};
pub use publisher::Consistency;
