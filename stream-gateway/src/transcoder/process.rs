// 转码进程监管
//
// 负责启动外部转码进程、持续读取它的 stdout/stderr（避免管道写满阻塞子进程）、
// 等待退出以及终止。进程不存在或无权发信号都视为已经终止。

use crate::config::TranscoderConfig;
use crate::resolver::redact;
use common::{GatewayError, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    program: String,
    global_args: Vec<String>,
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            global_args: config.global_args.clone(),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// 启动转码进程
    pub fn launch(&self, stream_id: &str, args: &[String]) -> Result<TranscoderProcess> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.global_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            stream_id = %stream_id,
            "Launching {} {}",
            self.program,
            args.iter().map(|a| redact(a)).collect::<Vec<_>>().join(" ")
        );

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::Launch(format!("{}: {}", self.program, e)))?;

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain_output(stdout, stream_id.to_string(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain_output(stderr, stream_id.to_string(), "stderr"));
        }

        info!(stream_id = %stream_id, pid = ?child.id(), "Transcoder process started");

        Ok(TranscoderProcess {
            stream_id: stream_id.to_string(),
            child,
            drains,
            stop_timeout: self.stop_timeout,
        })
    }
}

/// 正在运行的转码进程，独占子进程句柄
pub struct TranscoderProcess {
    stream_id: String,
    child: Child,
    drains: Vec<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl TranscoderProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// 等待进程退出（可取消）
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// 请求进程退出并等待；超时后强制结束
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            debug!(stream_id = %self.stream_id, "Transcoder already exited: {}", status);
            return Ok(status);
        }

        if let Err(e) = self.request_exit() {
            warn!(
                stream_id = %self.stream_id,
                "Graceful termination request failed: {}, killing",
                e
            );
            return self.kill().await;
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    stream_id = %self.stream_id,
                    "Transcoder did not exit within {:?}, killing",
                    self.stop_timeout
                );
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        self.child.start_kill().map_err(|e| GatewayError::Cleanup {
            target: format!("transcoder {}", self.stream_id),
            message: e.to_string(),
        })?;
        Ok(self.child.wait().await?)
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        // SAFETY: kill(2) 只读取参数；pid 来自尚未被回收的子进程
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) | Some(libc::EPERM) => {
                debug!(stream_id = %self.stream_id, "Transcoder already gone: {}", err);
                Ok(())
            }
            _ => Err(err),
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> std::io::Result<()> {
        use std::io::ErrorKind;

        match self.child.start_kill() {
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
                ) =>
            {
                debug!(stream_id = %self.stream_id, "Transcoder already gone: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}

impl Drop for TranscoderProcess {
    fn drop(&mut self) {
        for drain in &self.drains {
            drain.abort();
        }
    }
}

/// 持续读取子进程输出并记录日志
fn drain_output<R>(reader: R, stream_id: String, channel: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::with_capacity(4096);
        loop {
            buffer.clear();
            match reader.read_buf(&mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let output = String::from_utf8_lossy(&buffer);
                    for line in output.split(['\n', '\r']).map(str::trim).filter(|l| !l.is_empty()) {
                        debug!(stream_id = %stream_id, "transcoder {}: {}", channel, line);
                    }
                }
                Err(e) => {
                    debug!(stream_id = %stream_id, "transcoder {} closed: {}", channel, e);
                    break;
                }
            }
        }
    })
}
