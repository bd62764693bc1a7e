// 会话管理：注册表、状态机、输出目录和生命周期控制

mod manager;
mod output;
mod registry;
mod state;

pub use manager::SessionManager;
