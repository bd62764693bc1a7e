use crate::config::OutputConfig;
use common::{GatewayError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 每个会话独占的输出目录
#[derive(Debug, Clone)]
pub struct OutputArea {
    root: PathBuf,
    playlist: String,
    url_prefix: String,
}

impl OutputArea {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            root: config.root.clone(),
            playlist: config.playlist.clone(),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn path_for(&self, stream_id: &str) -> PathBuf {
        self.root.join(stream_id)
    }

    /// `<output-root>/<stream_id>/output.<ext>`
    pub fn playlist_path(&self, stream_id: &str) -> PathBuf {
        self.path_for(stream_id).join(&self.playlist)
    }

    /// 客户端拉取播放列表的相对地址
    pub fn public_url(&self, stream_id: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, stream_id, self.playlist)
    }

    /// 分配输出目录
    ///
    /// 目录已存在说明是上次运行遗留的（注册表保证当前没有别的会话在写），先清空。
    pub async fn allocate(&self, stream_id: &str) -> Result<PathBuf> {
        let path = self.path_for(stream_id);
        if self.release(&path).await? {
            info!(stream_id = %stream_id, "Removed stale output at {}", path.display());
        }
        tokio::fs::create_dir_all(&path).await?;
        debug!(stream_id = %stream_id, "Allocated output area {}", path.display());
        Ok(path)
    }

    /// 递归删除输出目录
    ///
    /// 目录不存在时什么也不做，返回 `Ok(false)`；重复调用安全。
    pub async fn release(&self, path: &Path) -> Result<bool> {
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || remove_tree(&target))
            .await
            .map_err(|e| GatewayError::Cleanup {
                target: path.display().to_string(),
                message: e.to_string(),
            })?
    }
}

/// 先删文件，再自底向上删目录；已经不存在的条目忽略
fn remove_tree(path: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let mut failures = Vec::new();
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().map(|io| io.kind()) != Some(ErrorKind::NotFound) {
                    failures.push(e.to_string());
                }
                continue;
            }
        };

        let removed = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };

        if let Err(e) = removed {
            if e.kind() != ErrorKind::NotFound {
                failures.push(format!("{}: {}", entry.path().display(), e));
            }
        }
    }

    if failures.is_empty() {
        Ok(true)
    } else {
        Err(GatewayError::Cleanup {
            target: path.display().to_string(),
            message: failures.join("; "),
        })
    }
}
