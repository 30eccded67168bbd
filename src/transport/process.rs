//! 基于外部 `rsync` / `ssh` 进程的传输实现

use super::{Transport, TransportError};
use crate::core::checksum::parse_digest_output;
use crate::core::remote::{remote_parent, shell_quote, split_location, ConnectionDescriptor};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// 外部工具配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub rsync_program: String,
    pub ssh_program: String,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    /// ssh 连接超时（秒）
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rsync_program: "rsync".to_string(),
            ssh_program: "ssh".to_string(),
            port: None,
            identity_file: None,
            connect_timeout_secs: 30,
        }
    }
}

/// 生产环境传输：每个操作都是一个子进程
///
/// 子进程设置了 `kill_on_drop`，取消时丢弃 future 即可终止外部工具。
pub struct ProcessTransport {
    config: TransportConfig,
    name: String,
}

impl ProcessTransport {
    pub fn new(config: TransportConfig) -> Self {
        let name = format!("{}+{}", config.rsync_program, config.ssh_program);
        Self { config, name }
    }

    /// 公共 ssh 参数
    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    /// 传给 `rsync -e` 的远程 shell 命令行
    fn remote_shell(&self) -> String {
        std::iter::once(self.config.ssh_program.clone())
            .chain(self.ssh_args())
            .map(|arg| shell_quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn rsync_command(&self, source: &str, dest: &str) -> Command {
        let mut cmd = Command::new(&self.config.rsync_program);
        cmd.arg("-az").arg("-e").arg(self.remote_shell());

        // 远端父目录不存在时 rsync 会失败，先在远端建好
        if let Some((_, remote_path)) = split_location(dest) {
            if let Some(parent) = remote_parent(remote_path) {
                cmd.arg(format!("--rsync-path=mkdir -p {} && rsync", shell_quote(parent)));
            }
        }

        cmd.arg(source).arg(dest);
        cmd
    }

    fn ssh_command(&self, conn: &ConnectionDescriptor, script: &str) -> Command {
        let mut cmd = Command::new(&self.config.ssh_program);
        cmd.args(self.ssh_args()).arg(conn.destination()).arg(script);
        cmd
    }

    async fn execute(mut cmd: Command, program: &str) -> Result<Output, TransportError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|source| TransportError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(TransportError::ExitStatus {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    fn listing_script(&self, dir: &str) -> String {
        format!("cd {} && find . -type f", shell_quote(dir))
    }

    fn digest_script(&self, path: &str) -> String {
        format!("sha256sum -- {}", shell_quote(path))
    }

    async fn ssh(&self, conn: &ConnectionDescriptor, script: &str) -> Result<String, TransportError> {
        debug!("ssh {}: {}", conn.destination(), script);
        let output = Self::execute(self.ssh_command(conn, script), &self.config.ssh_program).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn copy(&self, source: &str, dest: &str) -> Result<(), TransportError> {
        debug!("rsync {} -> {}", source, dest);
        Self::execute(self.rsync_command(source, dest), &self.config.rsync_program).await?;
        Ok(())
    }

    async fn list_remote(
        &self,
        conn: &ConnectionDescriptor,
        dir: &str,
    ) -> Result<String, TransportError> {
        self.ssh(conn, &self.listing_script(dir)).await
    }

    async fn run_remote(
        &self,
        conn: &ConnectionDescriptor,
        script: &str,
    ) -> Result<(), TransportError> {
        self.ssh(conn, script).await?;
        Ok(())
    }

    async fn digest_remote(
        &self,
        conn: &ConnectionDescriptor,
        path: &str,
    ) -> Result<String, TransportError> {
        let output = self
            .ssh(conn, &self.digest_script(path))
            .await?;
        parse_digest_output(&output)
            .ok_or_else(|| TransportError::Remote(format!("无法解析 sha256sum 输出: {}", output.trim())))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_remote_shell_includes_port_and_identity() {
        let transport = ProcessTransport::new(TransportConfig {
            port: Some(2222),
            identity_file: Some("/home/me/.ssh/id ed".to_string()),
            ..Default::default()
        });
        assert_eq!(
            transport.remote_shell(),
            "ssh -o BatchMode=yes -o ConnectTimeout=30 -p 2222 -i '/home/me/.ssh/id ed'"
        );
    }

    #[test]
    fn test_rsync_outbound_creates_remote_parent() {
        let transport = ProcessTransport::default();
        let cmd = transport.rsync_command("/in/a/b.txt", "me@host:/work/a/b.txt");
        let args = args_of(&cmd);
        assert_eq!(args[0], "-az");
        assert!(args.contains(&"--rsync-path=mkdir -p /work/a && rsync".to_string()));
        assert_eq!(args[args.len() - 2], "/in/a/b.txt");
        assert_eq!(args[args.len() - 1], "me@host:/work/a/b.txt");
    }

    #[test]
    fn test_home_relative_paths_agree_between_rsync_and_ssh() {
        let transport = ProcessTransport::default();
        let conn = ConnectionDescriptor::new("h", "u", "~/jobs");
        let dest = conn.remote_location("~/jobs/a/b.txt");
        let cmd = transport.rsync_command("/in/a/b.txt", &dest);
        assert!(args_of(&cmd).contains(&"--rsync-path=mkdir -p ~/jobs/a && rsync".to_string()));
        assert_eq!(
            transport.digest_script("~/jobs/a/b.txt"),
            "sha256sum -- ~/jobs/a/b.txt"
        );
        assert_eq!(transport.listing_script("~/my jobs"), "cd ~/'my jobs' && find . -type f");
    }

    #[test]
    fn test_rsync_inbound_has_no_rsync_path() {
        let transport = ProcessTransport::default();
        let cmd = transport.rsync_command("me@host:/work/out.txt", "/results/out.txt");
        assert!(!args_of(&cmd).iter().any(|a| a.starts_with("--rsync-path")));
    }

    #[test]
    fn test_ssh_command_targets_destination() {
        let transport = ProcessTransport::default();
        let conn = ConnectionDescriptor::new("host", "me", "/work");
        let cmd = transport.ssh_command(&conn, "cd /work && make");
        let args = args_of(&cmd);
        assert_eq!(args[args.len() - 2], "me@host");
        assert_eq!(args[args.len() - 1], "cd /work && make");
    }
}
