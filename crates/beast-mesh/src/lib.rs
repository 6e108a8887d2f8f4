//! # Beast Mesh
//!
//! Beast Mode coordination layer: agents sharing one pub/sub topic announce
//! their presence, keep a view of their peers and use an optimistic claim
//! protocol to avoid duplicating work.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beast_core::{AgentIdentity, ClaimId, ClaimOutcome, Platform, WorkCoordinator};
//! use beast_mesh::{Coordinator, CoordinatorConfig, InMemoryBus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = AgentIdentity::new(Platform::Gke);
//!     let bus = Arc::new(InMemoryBus::new());
//!     let coordinator = Coordinator::new(&identity, bus, CoordinatorConfig::default())?;
//!
//!     coordinator.start().await?;
//!     if let ClaimOutcome::Acquired(guard) = coordinator.try_claim(&ClaimId::from_wire("job-1")).await {
//!         // do the work, then give the claim back
//!         guard.release();
//!     }
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod claims;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod message;
pub mod peer_view;

#[cfg(feature = "redis")]
pub mod redis;

pub use bus::{CoordinationBus, MessageStream};
pub use claims::{ClaimTable, Observation, outranks};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{MeshError, MeshResult};
pub use memory::InMemoryBus;
pub use message::{
    BusMessage, ClaimRelease, PresenceAnnouncement, PresenceStatus, Topic, WorkClaim,
};
pub use peer_view::{PeerUpdate, PeerView};

#[cfg(feature = "redis")]
pub use redis::{RedisBus, RedisConfig};
