use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use ruleflow_core::{traits::ArtifactStore, EngineError, EngineResult};

/// 本地文件系统制品存储
///
/// 报表等生成物按键写入根目录，签名URL由基础地址拼接
/// 过期时间戳与随机令牌组成，供下载服务校验。
pub struct LocalArtifactStore {
    root_dir: PathBuf,
    base_url: String,
}

impl LocalArtifactStore {
    pub fn new(root_dir: &str, base_url: &str) -> Self {
        Self {
            root_dir: PathBuf::from(root_dir),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, key: &str) -> EngineResult<PathBuf> {
        // 拒绝越出根目录的键
        let relative = Path::new(key);
        if relative.components().any(|c| {
            matches!(
                c,
                std::path::Component::ParentDir | std::path::Component::RootDir
            )
        }) {
            return Err(EngineError::Storage(format!("非法的制品键: {key}")));
        }
        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: &[u8]) -> EngineResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Storage(format!("创建制品目录失败: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| EngineError::Storage(format!("写入制品失败 ({key}): {e}")))?;
        debug!("制品已写入: {}", path.display());
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> EngineResult<String> {
        self.resolve(key)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let token: u128 = rand::rng().random();
        Ok(format!(
            "{}/{key}?expires={expires}&token={token:032x}",
            self.base_url
        ))
    }
}
