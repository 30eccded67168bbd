//! 回环传输：把远程主机映射到本地目录，记录所有调用并按脚本返回失败

use super::{Transport, TransportError};
use crate::core::checksum::{calculate_hash, hash_file};
use crate::core::remote::{split_location, ConnectionDescriptor};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use walkdir::WalkDir;

/// 一次传输调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Copy { source: String, dest: String },
    List { dir: String },
    Run { script: String },
    Digest { path: String },
}

/// 测试用传输
///
/// 远程路径 `p` 对应本地 `root/p`（绝对路径去掉开头的 `/`）。
pub struct FakeTransport {
    root: PathBuf,
    calls: Mutex<Vec<TransportCall>>,
    failing_copies: HashSet<String>,
    corrupt_digests: HashSet<String>,
    listing_failure: bool,
    command_exit: Option<i32>,
    produced_files: HashMap<String, Vec<u8>>,
    copy_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: Mutex::new(Vec::new()),
            failing_copies: HashSet::new(),
            corrupt_digests: HashSet::new(),
            listing_failure: false,
            command_exit: None,
            produced_files: HashMap::new(),
            copy_delay: None,
        }
    }

    /// 源或目标等于 `location` 的复制返回非零退出
    pub fn fail_copy(mut self, location: impl Into<String>) -> Self {
        self.failing_copies.insert(location.into());
        self
    }

    /// 远程 `path` 的 hash 返回错误的值
    pub fn corrupt_digest(mut self, path: impl Into<String>) -> Self {
        self.corrupt_digests.insert(path.into());
        self
    }

    /// 远程文件列表失败（模拟会话无法建立）
    pub fn fail_listing(mut self) -> Self {
        self.listing_failure = true;
        self
    }

    /// 远程命令以 `code` 退出
    pub fn fail_command(mut self, code: i32) -> Self {
        self.command_exit = Some(code);
        self
    }

    /// 远程命令成功时在远端写入文件
    pub fn produce_on_command(mut self, remote_path: impl Into<String>, contents: &[u8]) -> Self {
        self.produced_files.insert(remote_path.into(), contents.to_vec());
        self
    }

    /// 每次复制前等待
    pub fn with_copy_delay(mut self, delay: Duration) -> Self {
        self.copy_delay = Some(delay);
        self
    }

    /// 远程路径在本地的映射
    pub fn remote_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock_calls().clone()
    }

    /// 所有复制调用 `(source, dest)`
    pub fn copies(&self) -> Vec<(String, String)> {
        self.lock_calls()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Copy { source, dest } => Some((source.clone(), dest.clone())),
                _ => None,
            })
            .collect()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<TransportCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: TransportCall) {
        self.lock_calls().push(call);
    }

    fn resolve(&self, location: &str) -> PathBuf {
        match split_location(location) {
            Some((_, path)) => self.remote_path(path),
            None => PathBuf::from(location),
        }
    }

    fn exit(program: &str, code: i32, stderr: impl Into<String>) -> TransportError {
        TransportError::ExitStatus {
            program: program.to_string(),
            code: Some(code),
            stderr: stderr.into(),
        }
    }

    fn list_files(dir: &Path) -> String {
        let mut lines: Vec<String> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(dir).ok()?.to_str()?.replace('\\', "/");
                Some(format!("./{}", relative))
            })
            .collect();
        lines.sort();
        lines.into_iter().map(|l| l + "\n").collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn copy(&self, source: &str, dest: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Copy {
            source: source.to_string(),
            dest: dest.to_string(),
        });

        if let Some(delay) = self.copy_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_copies.contains(source) || self.failing_copies.contains(dest) {
            return Err(Self::exit("fake-rsync", 23, "scripted copy failure"));
        }

        let from = self.resolve(source);
        let to = self.resolve(dest);
        if !from.is_file() {
            return Err(Self::exit(
                "fake-rsync",
                23,
                format!("link_stat \"{}\" failed: No such file or directory", from.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&from, &to).await?;
        Ok(())
    }

    async fn list_remote(
        &self,
        _conn: &ConnectionDescriptor,
        dir: &str,
    ) -> Result<String, TransportError> {
        self.record(TransportCall::List {
            dir: dir.to_string(),
        });

        if self.listing_failure {
            return Err(Self::exit("fake-ssh", 255, "Connection refused"));
        }

        let local = self.remote_path(dir);
        if !local.is_dir() {
            return Err(Self::exit("fake-ssh", 1, format!("cd: {}: No such file or directory", dir)));
        }

        tokio::task::spawn_blocking(move || Self::list_files(&local))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }

    async fn run_remote(
        &self,
        _conn: &ConnectionDescriptor,
        script: &str,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Run {
            script: script.to_string(),
        });

        if let Some(code) = self.command_exit {
            return Err(Self::exit("fake-ssh", code, "scripted command failure"));
        }

        for (path, contents) in &self.produced_files {
            let local = self.remote_path(path);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, contents).await?;
        }
        Ok(())
    }

    async fn digest_remote(
        &self,
        _conn: &ConnectionDescriptor,
        path: &str,
    ) -> Result<String, TransportError> {
        self.record(TransportCall::Digest {
            path: path.to_string(),
        });

        if self.corrupt_digests.contains(path) {
            return Ok(calculate_hash(b"corrupted in flight"));
        }

        let local = self.remote_path(path);
        if !local.is_file() {
            return Err(Self::exit("fake-ssh", 1, format!("sha256sum: {}: No such file or directory", path)));
        }
        Ok(hash_file(&local)?)
    }

    fn name(&self) -> &str {
        "fake"
    }
}
