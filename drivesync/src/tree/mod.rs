mod resource;
mod resource_tree;
pub mod state;

pub use resource::{NodeId, Resource, ResourceDoc};
pub use resource_tree::{ResourceTree, TreeError};
pub use state::{Action, State, Stamp, SyncPoint, Transition};
