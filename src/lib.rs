// 模組定義
pub mod config;
pub mod monitor;
pub mod registry;
pub mod shadow;
pub mod storage;

pub use registry::{RegistryError, RouteDecision, VersionRegistry};
pub use shadow::{ShadowError, ShadowExecutor};
