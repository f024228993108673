//! # webswarm-swarm
//!
//! The swarm coordinator: channel membership, candidate lists, connection
//! creation with tie-breaking, and per-channel topology maintenance.
//!
//! ## Architecture
//!
//! ```text
//!          ┌──────────────┐
//!          │ SignalClient │  ← discover / candidates / offer / answer
//!          └──────┬───────┘
//!                 │ SignalEvent
//!                 ▼
//!          ┌──────────────┐
//!          │    Swarm     │  ← peers + candidates per channel
//!          └──────┬───────┘
//!                 │ TopologyHooks
//!         ┌───────┴────────┐
//!         ▼                ▼
//!    ┌──────────┐    ┌───────────┐
//!    │ Topology │    │ Scheduler │  ← one repair task per channel
//!    └──────────┘    └───────────┘
//! ```

pub mod candidates;
pub mod peer;
pub mod scheduler;
pub mod swarm;
pub mod topology;

pub use candidates::CandidateList;
pub use peer::{Peer, PeerInfo, PeerState, SupersedeReason};
pub use scheduler::{Scheduler, Task};
pub use swarm::{Swarm, SwarmEvent, SwarmOptions};
pub use topology::{
    RunOutcome, Topology, TopologyContext, TopologyFactory, TopologyHooks, XorTopology,
    XorTopologyFactory, xor_distance,
};
