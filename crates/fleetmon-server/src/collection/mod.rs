//! The collection pipeline: scheduler, eligibility, claim, dispatch and the
//! per-node task.

pub mod claim;
pub mod dispatch;
pub mod eligibility;
pub mod node_task;
pub mod scheduler;

pub use claim::ClaimManager;
pub use dispatch::{partition_batch, DispatchController, DispatchHandle, InFlight};
pub use eligibility::EligibilityFilter;
pub use node_task::{NodeOutcome, NodeTaskContext};
pub use scheduler::{CollectionScheduler, TickOutcome};
