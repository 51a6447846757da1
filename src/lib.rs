//! 多章节小说下载器。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/任务 ID/文件名安全化等基础设施
//! - `provider`：内容提供方接口与 HTTP 目录实现
//! - `repository`：提供方门面（缓存、限流、去广告）
//! - `storage`：章节落盘与断点记录
//! - `download`：任务注册表、下载主循环、进度事件
//! - `app`：把以上服务组装在一起
//! - `ui`：命令行与 Web 控制面

pub mod app;
pub mod base_system;
pub mod download;
pub mod provider;
pub mod repository;
pub mod storage;
pub mod ui;
