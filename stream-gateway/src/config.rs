use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub output: OutputConfig,
    pub transcoder: TranscoderConfig,
    pub discovery: DiscoveryConfig,
    pub vendors: VendorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// 输出目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 所有会话输出目录的根目录
    pub root: PathBuf,
    /// 播放列表文件名
    pub playlist: String,
    /// 对外暴露的URL前缀
    pub url_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
            playlist: "output.m3u8".to_string(),
            url_prefix: "/output".to_string(),
        }
    }
}

/// 转码进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    /// 放在固定参数表之前的全局参数
    pub global_args: Vec<String>,
    /// 发送终止请求后等待退出的时间，超时强制结束
    pub stop_timeout_secs: u64,
    /// HLS 分片时长（秒）
    pub segment_seconds: f64,
    /// 播放列表保留的分片数
    pub list_size: u32,
    /// x264 关键帧间隔
    pub keyint: u32,
    /// GOP 大小
    pub gop: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            global_args: vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "warning".to_string(),
            ],
            stop_timeout_secs: 5,
            segment_seconds: 0.5,
            list_size: 2,
            keyint: 10,
            gop: 24,
        }
    }
}

impl TranscoderConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 厂商配置表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorsConfig {
    /// 找不到厂商配置时使用的默认厂商
    #[serde(default)]
    pub default: Option<String>,
    #[serde(flatten)]
    pub entries: BTreeMap<String, VendorConfig>,
}

/// 单个厂商的地址获取方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VendorConfig {
    /// 模板替换
    Template {
        template: String,
        #[serde(default)]
        subtype: Option<SubtypeMap>,
    },
    /// ONVIF 发现
    Onvif {
        #[serde(default = "default_onvif_port")]
        port: u16,
        #[serde(default = "default_onvif_profile")]
        profile: String,
    },
}

/// 主/子码流的取值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtypeMap {
    pub main: String,
    pub sub: String,
}

fn default_onvif_port() -> u16 {
    80
}

fn default_onvif_profile() -> String {
    "quality_h264".to_string()
}

impl Default for VendorsConfig {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "hikvision".to_string(),
            VendorConfig::Template {
                template: "rtsp://{account}:{password}@{ip}:554/Streaming/Channels/{ch}0{subtype}"
                    .to_string(),
                subtype: Some(SubtypeMap {
                    main: "1".to_string(),
                    sub: "2".to_string(),
                }),
            },
        );
        entries.insert(
            "dahua".to_string(),
            VendorConfig::Template {
                template:
                    "rtsp://{account}:{password}@{ip}:554/cam/realmonitor?channel={ch}&subtype={subtype}"
                        .to_string(),
                subtype: Some(SubtypeMap {
                    main: "0".to_string(),
                    sub: "1".to_string(),
                }),
            },
        );
        entries.insert(
            "rtsp".to_string(),
            VendorConfig::Template {
                template: "rtsp://{account}:{password}@{url}".to_string(),
                subtype: None,
            },
        );
        entries.insert(
            "onvif".to_string(),
            VendorConfig::Onvif {
                port: default_onvif_port(),
                profile: default_onvif_profile(),
            },
        );

        Self {
            default: Some("hikvision".to_string()),
            entries,
        }
    }
}

impl Config {
    /// 加载配置：指定文件时读取TOML，否则使用内置默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(default) = &self.vendors.default {
            if !self.vendors.entries.contains_key(default) {
                bail!("Default vendor '{}' is not configured", default);
            }
        }
        for (name, vendor) in &self.vendors.entries {
            if let VendorConfig::Template { template, .. } = vendor {
                if template.trim().is_empty() {
                    bail!("Vendor '{}' has an empty template", name);
                }
            }
        }
        if self.transcoder.program.trim().is_empty() {
            bail!("Transcoder program must not be empty");
        }
        if self.output.playlist.contains('/') || self.output.playlist.is_empty() {
            bail!("Invalid playlist name '{}'", self.output.playlist);
        }
        let prefix = self.output.url_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.len() < 2 {
            bail!("Output url_prefix '{}' must be a non-root path", self.output.url_prefix);
        }
        Ok(())
    }
}
