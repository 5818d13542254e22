/// 策略版本註冊表
///
/// 負責版本生命週期狀態機、原子啟用、金絲雀比例與確定性路由。
pub mod error;
pub mod manager;
pub mod routing;

pub use error::RegistryError;
pub use manager::VersionRegistry;
pub use routing::{routing_fingerprint, stable_bucket, RouteDecision};
