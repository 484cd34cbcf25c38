//! Store change notifications.
//!
//! The store publishes a [`ConversationChange`] on the [`ChangeBus`] after
//! every mutation. Views subscribe, filter by conversation id, and reload.
//! Dropping (or calling [`ChangeReceiver::unsubscribe`] on) a receiver
//! unsubscribes it.

mod bus;
mod types;

pub use bus::{BusError, ChangeBus, ChangeReceiver};
pub use types::{ChangeKind, ConversationChange};
