//! Call bounded context - legs, groups and bridges

pub mod bridge;
pub mod entity;
pub mod event;
pub mod group;
pub mod value_object;

pub use bridge::Bridge;
pub use entity::CallLeg;
pub use event::{CallStart, LegEvent};
pub use group::CallGroup;
pub use value_object::{LegEventKind, LegState};
