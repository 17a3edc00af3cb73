//! Channel directory
//!
//! Each prism a viewer is registered with keeps its own directory of the
//! broadcast channels it relays, keyed by broadcaster peer id.
//!
//! ```text
//!                 Viewer dispatch loop
//!          ┌──────────────────────────────────┐
//!          │ prisms: HashMap<PeerId, Prism {  │
//!          │   directory: ChannelDirectory {  │
//!          │     broadcaster -> Channel {     │
//!          │       info, session,             │
//!          │     }                            │
//!          │   }                              │
//!          │ }>                               │
//!          └──────────────────────────────────┘
//! ```
//!
//! The directory has no internal locking: it is owned by the loop that
//! handles that prism's messages, so updates are applied in arrival order.

pub mod entry;
pub mod store;

pub use entry::Channel;
pub use store::ChannelDirectory;
