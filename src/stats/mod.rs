//! Live migration statistics: the status wire format, listener channels,
//! the Stat Publisher and the listener side used by `shadowd stat`.

mod channel;
mod listener;
mod publisher;
mod wire;

pub use channel::{ListenerChannel, ListenerTransport, QueueStats, SysvTransport};
pub use listener::{ListenerInterrupt, StatusListener};
pub use publisher::{discover_listeners, spawn_publisher, PublishReport, StatPublisher};
pub use wire::{
    build_batch, format_row, parse_batch, parse_row, MessageKind, StatusMessage, NO_MIGRATIONS,
};
