use std::time::Duration;

pub mod bus;
pub mod error;
pub mod registry;
pub mod session;
pub mod store;
pub mod wire;

// Each open window is an independent process with no shared memory. The only
// thing they share is a broadcast channel, so presence is built entirely out
// of repetition: every session re-announces its own position on every
// heartbeat tick, and every receiver applies announcements last-write-wins.
// Dropped messages heal themselves on the next tick; a peer that goes silent
// without a departure message does not (see `registry`).

// The session loop owns all mutable state. Transport receipt, heartbeat
// ticks and shutdown are non-overlapping turns of a single select! loop, so
// there is no lock around the registry and no cross-turn iterator to
// invalidate. Concurrency exists only between sessions, which communicate
// solely through the bus.

/// Channel name shared by every session that wants to appear in the same
/// mesh.
pub const DEFAULT_TOPIC: &str = "multi_window_shenanigans";

/// Time between heartbeat ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);
