//! Record transform pipelines
//!
//! Stages are resolved from descriptors through a `TransformRegistry` and
//! composed into a `Pipeline` that short-circuits on the first veto.

pub mod compose;
pub mod registry;
pub mod stage;
pub mod transforms;

pub use compose::Pipeline;
pub use registry::{Params, StageFactory, StageSpec, TransformRegistry};
pub use stage::{from_fn, FnStage, Stage};
