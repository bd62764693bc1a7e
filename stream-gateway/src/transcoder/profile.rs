use crate::config::TranscoderConfig;
use std::path::Path;

/// 低延迟 HLS 转码参数
#[derive(Debug, Clone)]
pub struct HlsProfile {
    pub segment_seconds: f64,
    pub list_size: u32,
    pub keyint: u32,
    pub gop: u32,
}

impl Default for HlsProfile {
    fn default() -> Self {
        Self::from(&TranscoderConfig::default())
    }
}

impl From<&TranscoderConfig> for HlsProfile {
    fn from(config: &TranscoderConfig) -> Self {
        Self {
            segment_seconds: config.segment_seconds,
            list_size: config.list_size,
            keyint: config.keyint,
            gop: config.gop,
        }
    }
}

impl HlsProfile {
    /// 生成转码参数，顺序固定
    pub fn args(&self, source: &str, playlist: &Path) -> Vec<String> {
        let x264opts = format!("keyint={k}:min-keyint={k}:scenecut=-1", k = self.keyint);
        let gop = self.gop.to_string();
        let hls_time = self.segment_seconds.to_string();
        let list_size = self.list_size.to_string();
        let playlist = playlist.to_string_lossy();

        [
            // 输入：强制 TCP 传输，关闭输入缓冲
            "-rtsp_transport", "tcp",
            "-fflags", "nobuffer",
            "-flags", "low_delay",
            "-strict", "experimental",
            "-i", source,
            // 编码：速度优先 + 零延迟
            "-c:v", "libx264",
            "-preset", "ultrafast",
            "-tune", "zerolatency",
            "-x264opts", x264opts.as_str(),
            "-g", gop.as_str(),
            "-max_delay", "0",
            // 输出：短分片、滚动窗口、删除旧分片
            "-hls_time", hls_time.as_str(),
            "-hls_list_size", list_size.as_str(),
            "-hls_flags", "delete_segments+append_list",
            "-f", "hls",
            &*playlist,
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }
}
