//! 编目：排除规则、本地目录扫描与远程文件列表解析

use crate::core::batch::{Direction, TransferBatch, TransferRecord};
use crate::core::remote::{join_remote, ConnectionDescriptor};
use crate::error::{Error, Result};
use crate::transport::Transport;
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 编目配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob），不含 `/` 的规则只匹配文件名
    pub exclude_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                // 目录浏览元数据
                ".DS_Store".to_string(),
                // 资源分叉 / 影子文件
                "._*".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Name(Regex),
    Path(Regex),
}

/// 编译后的排除规则
#[derive(Debug, Clone)]
pub struct FileFilter {
    rules: Vec<Rule>,
}

impl FileFilter {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let rules = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                let re = glob_to_regex(pattern)
                    .map_err(|e| Error::config(format!("无效的排除规则 {}: {}", pattern, e)))?;
                Ok(if pattern.contains('/') {
                    Rule::Path(re)
                } else {
                    Rule::Name(re)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// 相对路径（`/` 分隔）是否应被排除
    pub fn is_excluded(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.rules.iter().any(|rule| match rule {
            Rule::Name(re) => re.is_match(name),
            Rule::Path(re) => re.is_match(relative),
        })
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        // 默认规则都是合法的 glob
        Self::new(&ScanConfig::default()).unwrap_or(Self { rules: Vec::new() })
    }
}

/// 简单 glob：`**` 跨目录，`*` / `?` 不跨目录
fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", "\u{0}")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", "[^/]")
        .replace('\u{0}', ".*");
    RegexBuilder::new(&format!("^{}$", escaped))
        .case_insensitive(true)
        .build()
}

/// 统一使用 `/` 分隔
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// 本地编目器：遍历输入目录，生成出站批次
pub struct LocalCataloger {
    filter: FileFilter,
}

impl LocalCataloger {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            filter: FileFilter::new(config)?,
        })
    }

    /// 为 `root` 下的每个普通文件生成一条记录，目标为 `remote_root/<相对路径>`
    pub async fn catalog(&self, root: &Path, remote_root: &str) -> Result<TransferBatch> {
        if !root.is_dir() {
            return Err(Error::config(format!(
                "本地输入目录不存在: {}",
                root.display()
            )));
        }

        let root = std::path::absolute(root)?;
        info!("开始扫描本地目录: {}", root.display());

        let filter = self.filter.clone();
        let walk_root = root.clone();
        let (files, excluded) =
            tokio::task::spawn_blocking(move || Self::walk(&walk_root, &filter))
                .await
                .map_err(std::io::Error::other)?;

        let records: Vec<TransferRecord> = files
            .into_iter()
            .map(|(path, relative)| {
                TransferRecord::new(
                    path.to_string_lossy().into_owned(),
                    join_remote(remote_root, &relative),
                )
            })
            .collect();

        info!(
            "扫描完成: {} 个文件, {} 个被排除",
            records.len(),
            excluded
        );

        Ok(TransferBatch::new(Direction::Outbound, records))
    }

    fn walk(root: &Path, filter: &FileFilter) -> (Vec<(PathBuf, String)>, usize) {
        let mut files = Vec::new();
        let mut excluded = 0;

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("遍历目录出错: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = entry
                .path()
                .strip_prefix(root)
                .ok()
                .and_then(|p| p.to_str())
                .map(normalize_path)
            else {
                warn!("跳过无法表示的路径: {}", entry.path().display());
                continue;
            };

            if filter.is_excluded(&relative) {
                debug!("排除文件: {}", relative);
                excluded += 1;
                continue;
            }

            files.push((entry.into_path(), relative));
        }

        (files, excluded)
    }
}

/// 远程编目器：列出远程结果目录，生成入站批次
pub struct RemoteCataloger {
    filter: FileFilter,
}

impl RemoteCataloger {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            filter: FileFilter::new(config)?,
        })
    }

    /// 解析 `find . -type f` 输出，返回排好序的相对路径
    pub fn parse_listing(&self, output: &str) -> Vec<String> {
        let mut paths: Vec<String> = output
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(|line| normalize_path(line.trim_start_matches("./")))
            .filter(|path| {
                if path.split('/').any(|c| c == "..") || path.starts_with('/') {
                    warn!("跳过越界的远程路径: {}", path);
                    return false;
                }
                if self.filter.is_excluded(path) {
                    debug!("排除远程文件: {}", path);
                    return false;
                }
                true
            })
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// 为远程 `remote_dir` 下的每个文件生成一条记录，目标为 `local_dir/<相对路径>`
    pub async fn catalog(
        &self,
        transport: &dyn Transport,
        conn: &ConnectionDescriptor,
        remote_dir: &str,
        local_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferBatch> {
        info!("开始扫描远程目录: {}", conn.remote_location(remote_dir));

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = transport.list_remote(conn, remote_dir) => result.map_err(|source| {
                Error::RemoteListing {
                    dir: remote_dir.to_string(),
                    source,
                }
            })?,
        };

        let records: Vec<TransferRecord> = self
            .parse_listing(&output)
            .into_iter()
            .map(|relative| {
                let local = relative
                    .split('/')
                    .fold(local_dir.to_path_buf(), |acc, part| acc.join(part));
                TransferRecord::new(
                    conn.remote_location(&join_remote(remote_dir, &relative)),
                    local.to_string_lossy().into_owned(),
                )
            })
            .collect();

        info!("远程扫描完成: {} 个文件", records.len());

        Ok(TransferBatch::new(Direction::Inbound, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeTransport;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, relative.as_bytes()).unwrap();
    }

    #[test]
    fn test_filter_excludes_metadata() {
        let filter = FileFilter::default();
        assert!(filter.is_excluded(".DS_Store"));
        assert!(filter.is_excluded("a/.DS_Store"));
        assert!(filter.is_excluded("a/._c.txt"));
        assert!(!filter.is_excluded("a/b.txt"));
        assert!(!filter.is_excluded("a_.txt"));
    }

    #[test]
    fn test_filter_path_patterns() {
        let filter = FileFilter::new(&ScanConfig {
            exclude_patterns: vec!["build/**".to_string(), "*.tmp".to_string()],
        })
        .unwrap();
        assert!(filter.is_excluded("build/x/y.o"));
        assert!(filter.is_excluded("src/a.TMP"));
        assert!(!filter.is_excluded("src/build.rs"));
    }

    #[tokio::test]
    async fn test_local_catalog_skips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["a/b.txt", "a/.DS_Store", "a/._c.txt", "d.txt"] {
            touch(dir.path(), f);
        }

        let cataloger = LocalCataloger::new(&ScanConfig::default()).unwrap();
        let batch = cataloger.catalog(dir.path(), "/work").await.unwrap();

        assert_eq!(batch.direction(), Direction::Outbound);
        assert_eq!(batch.total(), 2);
        assert_eq!(batch.remaining(), 2);
        assert_eq!(batch.progress(), 0.0);

        let records = batch.records();
        assert_eq!(records[0].source_path, dir.path().join("a/b.txt").to_string_lossy());
        assert_eq!(records[0].dest_path, "/work/a/b.txt");
        assert_eq!(records[1].source_path, dir.path().join("d.txt").to_string_lossy());
        assert_eq!(records[1].dest_path, "/work/d.txt");
        assert!(records.iter().all(|r| r.origin_hash.is_none()));
    }

    #[tokio::test]
    async fn test_local_catalog_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let cataloger = LocalCataloger::new(&ScanConfig::default()).unwrap();
        let err = cataloger
            .catalog(&dir.path().join("nope"), "/work")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_parse_listing() {
        let cataloger = RemoteCataloger::new(&ScanConfig::default()).unwrap();
        let paths = cataloger.parse_listing("./x.txt\n./y/z.txt\n.DS_Store\n");
        assert_eq!(paths, vec!["x.txt".to_string(), "y/z.txt".to_string()]);

        let paths = cataloger.parse_listing("\n./../etc/passwd\r\n./a.txt\r\n\n");
        assert_eq!(paths, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_remote_catalog_builds_records() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        touch(remote.path(), "work/results/x.txt");
        touch(remote.path(), "work/results/y/z.txt");
        touch(remote.path(), "work/results/.DS_Store");

        let transport = FakeTransport::new(remote.path());
        let conn = ConnectionDescriptor::new("h.example.com", "u", "/work");
        let cataloger = RemoteCataloger::new(&ScanConfig::default()).unwrap();
        let batch = cataloger
            .catalog(
                &transport,
                &conn,
                "/work/results",
                local.path(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.direction(), Direction::Inbound);
        assert_eq!(batch.total(), 2);
        let records = batch.records();
        assert_eq!(records[0].source_path, "u@h.example.com:/work/results/x.txt");
        assert_eq!(records[0].dest_path, local.path().join("x.txt").to_string_lossy());
        assert_eq!(records[1].source_path, "u@h.example.com:/work/results/y/z.txt");
        assert_eq!(
            records[1].dest_path,
            local.path().join("y").join("z.txt").to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_remote_catalog_listing_failure() {
        let remote = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(remote.path()).fail_listing();
        let conn = ConnectionDescriptor::new("host", "me", "/work");
        let cataloger = RemoteCataloger::new(&ScanConfig::default()).unwrap();

        let err = cataloger
            .catalog(&transport, &conn, "/work", remote.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteListing { .. }));
    }

    #[tokio::test]
    async fn test_remote_catalog_cancelled() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(remote.path().join("work")).unwrap();
        let transport = FakeTransport::new(remote.path());
        let conn = ConnectionDescriptor::new("host", "me", "/work");
        let cataloger = RemoteCataloger::new(&ScanConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cataloger
            .catalog(&transport, &conn, "/work", remote.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
