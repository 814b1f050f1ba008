//! Web API 层。
//!
//! 提供 Axum 路由：实时连接握手、热度动态流、在线状态查询，
//! 以及供互动写入路径调用的热度重算入口。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{run_session, PumpError, SessionConfig};
