//! 远程命令执行

use crate::core::remote::{shell_quote, ConnectionDescriptor};
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 远程命令执行器
///
/// 在一个远程会话中先切换到远程工作目录，再执行命令，阻塞直到命令结束。
/// 只关心退出状态，不解析命令输出。
pub struct RemoteCommandRunner {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl RemoteCommandRunner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `cd <remote_root> && <command>`
    pub fn script(conn: &ConnectionDescriptor, command: &str) -> String {
        format!("cd {} && {}", shell_quote(&conn.remote_root), command)
    }

    pub async fn run(&self, conn: &ConnectionDescriptor, command: &str) -> Result<()> {
        let script = Self::script(conn, command);
        info!("执行远程命令 {}: {}", conn.destination(), command);
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.transport.run_remote(conn, &script) => result,
        };

        match result {
            Ok(()) => {
                info!("远程命令完成, 耗时 {:.1}s", started.elapsed().as_secs_f64());
                Ok(())
            }
            Err(source) => {
                error!("远程命令失败: {}", source);
                Err(Error::RemoteCommand { source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::TransportCall;
    use crate::transport::FakeTransport;

    #[test]
    fn test_script_changes_directory_first() {
        let conn = ConnectionDescriptor::new("host", "me", "/srv/my jobs");
        assert_eq!(
            RemoteCommandRunner::script(&conn, "./run.sh --fast"),
            "cd '/srv/my jobs' && ./run.sh --fast"
        );
    }

    #[test]
    fn test_script_expands_home_relative_root() {
        let conn = ConnectionDescriptor::new("h", "u", "~/jobs");
        assert_eq!(RemoteCommandRunner::script(&conn, "make"), "cd ~/jobs && make");
    }

    #[tokio::test]
    async fn test_run_uses_single_session() {
        let remote = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(remote.path()));
        let conn = ConnectionDescriptor::new("host", "me", "/work");

        RemoteCommandRunner::new(transport.clone())
            .run(&conn, "make all")
            .await
            .unwrap();

        assert_eq!(
            transport.calls(),
            vec![TransportCall::Run {
                script: "cd /work && make all".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_remote_command_error() {
        let remote = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(remote.path()).fail_command(2));
        let conn = ConnectionDescriptor::new("host", "me", "/work");

        let err = RemoteCommandRunner::new(transport)
            .run(&conn, "false")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteCommand { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let remote = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(remote.path()));
        let conn = ConnectionDescriptor::new("host", "me", "/work");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = RemoteCommandRunner::new(transport.clone())
            .with_cancel(cancel)
            .run(&conn, "make")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transport.calls().is_empty());
    }
}
