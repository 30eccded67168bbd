//! 传输层：外部同步工具与远程 shell 的抽象

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod process;

use crate::core::remote::ConnectionDescriptor;
use async_trait::async_trait;

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeTransport;
pub use process::{ProcessTransport, TransportConfig};

/// 外部传输工具错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 无法启动外部进程
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 外部进程以非零状态退出
    #[error("{program} 退出码 {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// 远端返回了无法识别的内容
    #[error("远端响应无效: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 传输能力抽象
///
/// 分发器和编目器只通过这个接口接触网络与外部进程，测试中可以换成回环实现（`test-util` feature 下的 `fake::FakeTransport`）。
/// 位置字符串要么是本地路径，要么是 `username@address:path`。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 归档 + 压缩模式复制一个文件
    async fn copy(&self, source: &str, dest: &str) -> Result<(), TransportError>;

    /// 递归列出远程目录下的普通文件，返回 `find . -type f` 风格的换行分隔输出
    async fn list_remote(
        &self,
        conn: &ConnectionDescriptor,
        dir: &str,
    ) -> Result<String, TransportError>;

    /// 在一个远程会话中执行脚本，非零退出视为失败
    async fn run_remote(
        &self,
        conn: &ConnectionDescriptor,
        script: &str,
    ) -> Result<(), TransportError>;

    /// 远程文件内容的 SHA-256（小写十六进制）
    async fn digest_remote(
        &self,
        conn: &ConnectionDescriptor,
        path: &str,
    ) -> Result<String, TransportError>;

    /// 传输名称（用于日志）
    fn name(&self) -> &str;
}
