pub mod action;
pub mod container;
pub mod lrp;
pub mod metadata;
pub mod presence;
pub mod task;

pub use action::{EnvVar, ExecutorAction};
pub use container::{ContainerCreated, ContainerRequest, ContainerRunResult};
pub use lrp::{LrpSpec, LrpState};
pub use presence::{generate_rep_id, RepPresence};
pub use task::{Task, TaskState};
