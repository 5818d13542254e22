/// 影子執行引擎
///
/// 在完全隔離下執行候選版本的決策函數，只寫入影子紀錄，
/// 並提供影子與正式決策的比較與隔離驗證。
pub mod comparison;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod types;

pub use comparison::ComparisonReport;
pub use error::ShadowError;
pub use executor::{ShadowCycleSummary, ShadowExecutor, NO_SIGNAL_REASON};
pub use isolation::{IsolationCheck, IsolationCheckKind, IsolationReport};
pub use types::{Candidate, DecisionContext, DecisionFunction, FnDecision, Side};
