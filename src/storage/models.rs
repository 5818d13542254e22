pub mod canary_config;
pub mod production_decision;
pub mod shadow_decision;
pub mod strategy_version;

// 重新匯出常用模型類型
pub use canary_config::*;
pub use production_decision::*;
pub use shadow_decision::*;
pub use strategy_version::*;
