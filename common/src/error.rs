use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// 请求参数缺失或非法
    #[error("{0}")]
    Validation(String),

    /// 源地址解析失败
    #[error("Failed to resolve source address: {0}")]
    Resolution(String),

    #[error("Stream with ID {0} already running")]
    DuplicateSession(String),

    #[error("No stream found with ID {0}")]
    NotFound(String),

    /// 转码进程无法启动
    #[error("Failed to start transcoder: {0}")]
    Launch(String),

    /// 转码进程意外退出（只记录日志，不返回给调用方）
    #[error("Transcoder for {stream_id} exited unexpectedly: {status}")]
    Supervision { stream_id: String, status: String },

    /// 终止信号被拒绝或输出目录删除不完整
    #[error("Cleanup failed for {target}: {message}")]
    Cleanup { target: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// 稳定的机器可读错误原因
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Resolution(_) => "resolution_error",
            GatewayError::DuplicateSession(_) => "duplicate_session",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Launch(_) => "launch_error",
            GatewayError::Supervision { .. } => "supervision_failure",
            GatewayError::Cleanup { .. } => "cleanup_failure",
            GatewayError::Io(_) => "io_error",
        }
    }

    /// 是否属于调用方错误（4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation(_)
                | GatewayError::Resolution(_)
                | GatewayError::DuplicateSession(_)
                | GatewayError::NotFound(_)
        )
    }

    pub fn missing(param: &str) -> Self {
        GatewayError::Validation(format!("Missing {}", param))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
