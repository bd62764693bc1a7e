use super::state::SessionState;
use common::{GatewayError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 注册表中的一条会话记录
struct SessionEntry {
    /// 进程启动成功后才有播放地址
    public_url: Option<String>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

/// `reserve` 成功后交给会话任务的一端
pub struct Reservation {
    pub cancel: CancellationToken,
    pub state: watch::Sender<SessionState>,
}

/// 停止请求拿到的一端
#[derive(Clone)]
pub struct SessionHandle {
    pub cancel: CancellationToken,
    pub state: watch::Receiver<SessionState>,
}

/// 流ID -> 会话，流ID的唯一性由这里保证
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionEntry>>,
    /// 所有会话取消令牌的父令牌，关闭服务时一次性取消
    root: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子地占用流ID，已被占用返回 `DuplicateSession`
    pub fn reserve(&self, stream_id: &str) -> Result<Reservation> {
        match self.sessions.entry(stream_id.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::DuplicateSession(stream_id.to_string())),
            Entry::Vacant(slot) => {
                let (state_tx, state_rx) = watch::channel(SessionState::Starting);
                let cancel = self.root.child_token();
                slot.insert(SessionEntry {
                    public_url: None,
                    cancel: cancel.clone(),
                    state: state_rx,
                });
                debug!(stream_id = %stream_id, "Stream id reserved");
                Ok(Reservation {
                    cancel,
                    state: state_tx,
                })
            }
        }
    }

    /// 进程启动后登记播放地址，之后才会出现在状态列表中
    pub fn publish(&self, stream_id: &str, public_url: String) {
        if let Some(mut entry) = self.sessions.get_mut(stream_id) {
            entry.public_url = Some(public_url);
        }
    }

    pub fn handle(&self, stream_id: &str) -> Option<SessionHandle> {
        self.sessions.get(stream_id).map(|entry| SessionHandle {
            cancel: entry.cancel.clone(),
            state: entry.state.clone(),
        })
    }

    /// 释放流ID，重复调用无副作用
    pub fn release(&self, stream_id: &str) -> bool {
        let removed = self.sessions.remove(stream_id).is_some();
        if removed {
            debug!(stream_id = %stream_id, "Stream id released");
        }
        removed
    }

    /// 正在运行的会话：流ID -> 播放地址
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .public_url
                    .as_ref()
                    .map(|url| (entry.key().clone(), url.clone()))
            })
            .collect()
    }

    /// 取消所有会话，包括之后才占用的
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
