use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

/// 默认通道号
pub const DEFAULT_CHANNEL: &str = "1";
/// 默认码流类型（子码流）
pub const DEFAULT_SUBTYPE: &str = "1";

/// 摄像头连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// 设备地址（模板厂商可以是 host[:port][/path]）
    pub ip: String,
    pub account: String,
    pub password: String,
    /// 通道号
    pub channel: String,
    /// 码流选择（"0" 主码流，其他为子码流）
    pub subtype: String,
}

/// 经过校验的启动请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// 厂商标识（brand）
    pub vendor: String,
    pub stream_id: String,
    pub connection: ConnectionParams,
}

/// `/start` 的原始查询参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartQuery {
    pub brand: Option<String>,
    pub ip: Option<String>,
    pub account: Option<String>,
    pub password: Option<String>,
    pub stream_id: Option<String>,
    pub ch: Option<String>,
    pub subtype: Option<String>,
}

impl StartQuery {
    /// 校验参数，缺失的必填项按顺序报告第一个
    pub fn into_request(self) -> Result<StreamRequest> {
        let vendor = required(self.brand, "brand")?;
        let ip = required(self.ip, "ip")?;
        let account = required(self.account, "account")?;
        let password = required(self.password, "password")?;
        let stream_id = required(self.stream_id, "stream_id")?;
        validate_stream_id(&stream_id)?;

        Ok(StreamRequest {
            vendor,
            stream_id,
            connection: ConnectionParams {
                ip,
                account,
                password,
                channel: optional(self.ch, DEFAULT_CHANNEL),
                subtype: optional(self.subtype, DEFAULT_SUBTYPE),
            },
        })
    }
}

/// `/stop` 的查询参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopQuery {
    pub stream_id: Option<String>,
}

impl StopQuery {
    pub fn into_stream_id(self) -> Result<String> {
        required(self.stream_id, "stream_id")
    }
}

/// 校验流ID：它同时用作输出目录名
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    let valid_chars = stream_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !valid_chars
        || stream_id.is_empty()
        || stream_id.starts_with('.')
        || stream_id.len() > 128
    {
        return Err(GatewayError::Validation(format!(
            "Invalid stream_id: {}",
            stream_id
        )));
    }
    Ok(())
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GatewayError::missing(name)),
    }
}

fn optional(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}
