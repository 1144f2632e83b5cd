use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{
    media::FsMediaStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub media_root: PathBuf,
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
}

impl Infrastructure {
    /// 连接数据库、执行迁移，并把文件媒体存储注入消息仓储
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database_url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;

        let media = Arc::new(FsMediaStore::new(config.media_root));
        let storage = Arc::new(PgStorage::new(pool, media));

        Ok(Self { storage })
    }
}
