//! 运行上下文：待注入的产物与注入策略

pub mod injection;
pub mod payload;

pub use injection::{default_rules, InjectedValue, InjectionPolicy, InjectionRule};
pub use payload::{Artifact, ArtifactId, ArtifactReceipt, PayloadContext};
