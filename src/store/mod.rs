//! 存储实现模块
//!
//! - [`InMemoryAuthStore`]: 进程内存储，用于测试和单节点部署
//! - `PgAuthStore`（`postgres` feature）: 基于 sqlx 的 PostgreSQL 存储
//!
//! 每个类型都实现了 [`AccountStore`](crate::account::AccountStore)、
//! [`ProfileStore`](crate::account::ProfileStore) 和
//! [`SessionStore`](crate::token::SessionStore)，同一个 `Arc` 可以
//! 三次传给 [`AuthUsecase`](crate::AuthUsecase)。

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::InMemoryAuthStore;
#[cfg(feature = "postgres")]
pub use postgres::PgAuthStore;
