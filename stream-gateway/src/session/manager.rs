// 会话生命周期控制
//
// start: 解析地址 -> 占用流ID -> 交给会话任务启动并监管转码进程
// stop / 进程退出: 终止进程 -> 删除输出目录 -> 释放流ID
//
// 每个会话一个独立任务，调用方只等待“进程已启动”这一刻。

use super::output::OutputArea;
use super::registry::SessionRegistry;
use super::state::{Lifecycle, SessionState};
use crate::config::Config;
use crate::resolver::{AddressResolver, DiscoveryClient};
use crate::transcoder::{HlsProfile, ProcessSupervisor, TranscoderProcess};
use common::{validate_stream_id, GatewayError, Result, StreamRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

struct Inner {
    resolver: AddressResolver,
    registry: SessionRegistry,
    supervisor: ProcessSupervisor,
    profile: HlsProfile,
    output: OutputArea,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        resolver: AddressResolver,
        supervisor: ProcessSupervisor,
        profile: HlsProfile,
        output: OutputArea,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                registry: SessionRegistry::new(),
                supervisor,
                profile,
                output,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn from_config(config: &Config, discovery: Arc<dyn DiscoveryClient>) -> Self {
        Self::new(
            AddressResolver::new(&config.vendors, discovery, config.discovery.timeout()),
            ProcessSupervisor::new(&config.transcoder),
            HlsProfile::from(&config.transcoder),
            OutputArea::new(&config.output),
        )
    }

    /// 启动会话，返回播放列表地址
    ///
    /// 转码进程启动后立即返回；之后进程的退出由会话任务处理。
    pub async fn start(&self, request: StreamRequest) -> Result<String> {
        let StreamRequest {
            vendor,
            stream_id,
            connection,
        } = request;
        validate_stream_id(&stream_id)?;

        if self.inner.tasks.is_closed() {
            return Err(GatewayError::Launch("service is shutting down".to_string()));
        }

        let mut lifecycle = Lifecycle::new(&stream_id);
        let source = match self.inner.resolver.resolve(&vendor, &connection).await {
            Ok(source) => source,
            Err(e) => {
                lifecycle.advance(SessionState::Failed);
                warn!(stream_id = %stream_id, "❌ {}", e);
                return Err(e);
            }
        };

        lifecycle.advance(SessionState::Starting);
        let reservation = match self.inner.registry.reserve(&stream_id) {
            Ok(reservation) => reservation,
            Err(e) => {
                lifecycle.advance(SessionState::Rejected);
                warn!(stream_id = %stream_id, "{}", e);
                return Err(e);
            }
        };
        lifecycle.attach(reservation.state);

        let (launched_tx, launched_rx) = oneshot::channel();
        let task = SessionTask {
            inner: self.inner.clone(),
            stream_id: stream_id.clone(),
            source,
            cancel: reservation.cancel,
            lifecycle,
        };
        self.inner.tasks.spawn(task.run(launched_tx));

        launched_rx.await.unwrap_or_else(|_| {
            Err(GatewayError::Launch(format!(
                "session task for {} ended before reporting",
                stream_id
            )))
        })
    }

    /// 停止会话，等到进程退出、输出目录删除、流ID释放后返回
    pub async fn stop(&self, stream_id: &str) -> Result<()> {
        let handle = self
            .inner
            .registry
            .handle(stream_id)
            .ok_or_else(|| GatewayError::NotFound(stream_id.to_string()))?;

        info!(stream_id = %stream_id, "🛑 Stop requested");
        handle.cancel.cancel();

        // 发送端随会话任务一起结束，也说明会话已经没了
        let mut state = handle.state;
        let _ = state.wait_for(|s| s.is_terminal()).await;
        Ok(())
    }

    /// 正在运行的会话：流ID -> 播放地址
    pub fn status(&self) -> BTreeMap<String, String> {
        self.inner.registry.snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// 停止所有会话并等待会话任务全部结束
    pub async fn shutdown(&self) {
        if !self.inner.registry.is_empty() {
            info!("Stopping {} active sessions", self.active_count());
        }

        self.inner.tasks.close();
        self.inner.registry.cancel_all();
        self.inner.tasks.wait().await;
        info!("✅ All sessions stopped");
    }
}

/// 单个会话的监管任务，持有转码进程直到会话结束
struct SessionTask {
    inner: Arc<Inner>,
    stream_id: String,
    source: String,
    cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl SessionTask {
    async fn run(mut self, launched: oneshot::Sender<Result<String>>) {
        let mut process = match self.launch().await {
            Ok(process) => process,
            Err(e) => {
                error!(stream_id = %self.stream_id, "❌ {}", e);
                self.lifecycle.advance(SessionState::Stopping);
                self.teardown().await;
                let _ = launched.send(Err(e));
                return;
            }
        };

        let public_url = self.inner.output.public_url(&self.stream_id);

        // 启动期间已经收到停止请求：不登记地址，直接收尾
        if self.cancel.is_cancelled() {
            info!(stream_id = %self.stream_id, "Stop arrived during launch");
            self.lifecycle.advance(SessionState::Stopping);
            self.terminate(&mut process).await;
            drop(process);
            self.teardown().await;
            let _ = launched.send(Ok(public_url));
            return;
        }

        self.inner.registry.publish(&self.stream_id, public_url.clone());
        self.lifecycle.advance(SessionState::Running);
        info!(
            stream_id = %self.stream_id,
            pid = ?process.pid(),
            "🎬 Stream started: {}",
            public_url
        );
        let _ = launched.send(Ok(public_url));

        let exited = tokio::select! {
            status = process.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };

        self.lifecycle.advance(SessionState::Stopping);
        match exited {
            Some(Ok(status)) => {
                let failure = GatewayError::Supervision {
                    stream_id: self.stream_id.clone(),
                    status: status.to_string(),
                };
                warn!(stream_id = %self.stream_id, "⚠️ {}", failure);
            }
            Some(Err(e)) => {
                warn!(stream_id = %self.stream_id, "Lost track of transcoder: {}", e);
                self.terminate(&mut process).await;
            }
            None => self.terminate(&mut process).await,
        }

        drop(process);
        self.teardown().await;
    }

    async fn launch(&self) -> Result<TranscoderProcess> {
        self.inner
            .output
            .allocate(&self.stream_id)
            .await
            .map_err(|e| GatewayError::Launch(format!("cannot prepare output area: {}", e)))?;

        let playlist = self.inner.output.playlist_path(&self.stream_id);
        let args = self.inner.profile.args(&self.source, &playlist);
        self.inner.supervisor.launch(&self.stream_id, &args)
    }

    async fn terminate(&self, process: &mut TranscoderProcess) {
        match process.terminate().await {
            Ok(status) => debug!(stream_id = %self.stream_id, "Transcoder exited: {}", status),
            Err(e) => warn!(stream_id = %self.stream_id, "⚠️ {}", e),
        }
    }

    /// 删除输出目录、释放流ID；删除失败只记录日志
    async fn teardown(&mut self) {
        let path = self.inner.output.path_for(&self.stream_id);
        if let Err(e) = self.inner.output.release(&path).await {
            warn!(stream_id = %self.stream_id, "⚠️ {}", e);
        }

        self.inner.registry.release(&self.stream_id);
        self.lifecycle.advance(SessionState::Terminated);
        info!(stream_id = %self.stream_id, "Stream stopped and files deleted");
    }
}
