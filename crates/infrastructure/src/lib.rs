//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储与本地文件媒体存储，实现应用层定义的接口。

pub mod builder;
pub mod media;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use media::FsMediaStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgMessageRepository, PgRoomRepository, PgStorage, PgUserRepository,
};
