use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// 会话状态
///
/// ```text
/// Resolving ──► Starting ──► Running ──► Stopping ──► Terminated
///     │            │  └──────────────────▲
///     ▼            ▼
///   Failed      Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 正在解析源地址（尚未注册）
    Resolving,
    /// 已占用流ID，转码进程启动中
    Starting,
    Running,
    /// 正在终止进程并清理输出目录
    Stopping,
    Terminated,
    /// 地址解析失败，从未注册
    Failed,
    /// 流ID已被占用，没有启动进程
    Rejected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Terminated | SessionState::Failed | SessionState::Rejected
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Resolving, Starting)
                | (Resolving, Failed)
                | (Starting, Rejected)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Resolving => "resolving",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
            SessionState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// 单个会话的状态机
///
/// 注册成功后挂上 watch 发送端，停止请求通过它等待会话结束。
pub struct Lifecycle {
    stream_id: String,
    state: SessionState,
    observers: Option<watch::Sender<SessionState>>,
}

impl Lifecycle {
    pub fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            state: SessionState::Resolving,
            observers: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attach(&mut self, observers: watch::Sender<SessionState>) {
        observers.send_replace(self.state);
        self.observers = Some(observers);
    }

    pub fn advance(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                stream_id = %self.stream_id,
                "Invalid session transition {} -> {}",
                self.state, next
            );
            debug_assert!(false, "invalid session transition {} -> {}", self.state, next);
            return;
        }

        debug!(stream_id = %self.stream_id, "Session {} -> {}", self.state, next);
        self.state = next;
        if let Some(observers) = &self.observers {
            observers.send_replace(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SessionState::*;
        let path = [Resolving, Starting, Running, Stopping, Terminated];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use SessionState::*;
        assert!(!Resolving.can_transition_to(Running));
        assert!(!Running.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Starting));
        assert!(!Rejected.can_transition_to(Running));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Terminated.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Rejected.is_terminal());
        assert!(!SessionState::Stopping.is_terminal());
    }

    #[tokio::test]
    async fn test_observers_follow_lifecycle() {
        let (tx, mut rx) = watch::channel(SessionState::Resolving);
        let mut lifecycle = Lifecycle::new("cam1");
        lifecycle.advance(SessionState::Starting);
        lifecycle.attach(tx);
        assert_eq!(*rx.borrow(), SessionState::Starting);

        let waiter = tokio::spawn(async move {
            rx.wait_for(|s| s.is_terminal()).await.map(|s| *s).ok()
        });

        lifecycle.advance(SessionState::Running);
        lifecycle.advance(SessionState::Stopping);
        lifecycle.advance(SessionState::Terminated);
        assert_eq!(lifecycle.state(), SessionState::Terminated);
        assert_eq!(waiter.await.unwrap(), Some(SessionState::Terminated));
    }
}
