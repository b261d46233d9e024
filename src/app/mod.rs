// ==========================================
// 医疗数据导入系统 - 应用层
// ==========================================
// 职责: 组装应用状态，提供 HTTP 接入
// ==========================================

pub mod http;
pub mod state;

// 重导出
pub use http::router;
pub use state::AppState;
