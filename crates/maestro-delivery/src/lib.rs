//! Strictly ordered per-user outbound delivery.
//!
//! Everything the engine says to a user flows through one
//! [`DeliveryQueue`] per user: enqueue is instant, a single drain loop
//! sends items in FIFO order, long texts are chunked to the transport's
//! limit, and a failed item is logged without blocking the items behind
//! it.
//!
//! # Main types
//!
//! - [`DeliveryQueue`] — The per-user FIFO lane; also implements
//!   [`maestro_core::Notifier`].
//! - [`Transport`] — The raw send seam implemented by embedders.
//! - [`QueuedMessage`] — Text or file items in the lane.

/// Text chunking helpers.
pub mod chunk;
/// The ordered delivery lane.
pub mod queue;
/// The outbound transport seam.
pub mod transport;

pub use chunk::chunk_text;
pub use queue::{DeliveryQueue, QueuedMessage};
pub use transport::Transport;
