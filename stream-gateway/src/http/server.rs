use super::routes::create_router;
use crate::config::OutputConfig;
use crate::session::SessionManager;
use common::Result;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;

pub struct HttpServer {
    addr: SocketAddr,
    manager: SessionManager,
    output: OutputConfig,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, manager: SessionManager, output: OutputConfig) -> Self {
        Self {
            addr,
            manager,
            output,
        }
    }

    /// 运行直到 `shutdown` 完成，之后不再接受新请求
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.manager.clone(), &self.output);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let local = listener.local_addr()?;
        info!("HTTP server running on {}", local);
        info!("   Start:  GET http://{}/start?brand=&ip=&account=&password=&stream_id=", local);
        info!("   Stop:   GET http://{}/stop?stream_id=", local);
        info!("   Status: GET http://{}/status", local);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
