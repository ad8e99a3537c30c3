//! Cluster membership and document routing.
//!
//! Instances announce themselves through a [`Coordinator`] with an
//! ephemeral registration that disappears when the instance dies or
//! its coordination session lapses. The [`MembershipRegistry`] keeps a
//! local view of the live set and pushes changes to listeners; the
//! [`DocRouter`] is such a listener, maintaining a consistent-hash
//! ring that maps each document id to exactly one live instance.

mod coordinator;
mod memory;
mod registry;
mod ring;
mod router;

pub use coordinator::Coordinator;
pub use coordinator::InstanceInfo;
pub use coordinator::MembershipEvent;
pub use coordinator::RegistrationHandle;
pub use memory::MemoryCoordinator;
pub use registry::MembershipListener;
pub use registry::MembershipRegistry;
pub use ring::HashRing;
pub use router::DocRouter;
