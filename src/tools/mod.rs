//! 工具层：能力目录 / 路由、结果信封、派发器

pub mod catalog;
pub mod envelope;
pub mod executor;

pub use catalog::{
    CapabilityDescriptor, CatalogSnapshot, CollisionPolicy, NameCollision, RoutingError, ToolCatalog,
};
pub use envelope::ToolEnvelope;
pub use executor::{ArtifactTracker, DispatchError, DispatchResult, Dispatcher};
