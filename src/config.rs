//! 运行配置

use crate::core::dispatcher::default_workers;
use crate::core::remote::ConnectionDescriptor;
use crate::core::scanner::ScanConfig;
use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::transport::TransportConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 运行配置，由扁平键值文档一次性解析校验得到
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub address: String,
    pub username: String,
    pub remote_working_dir: String,
    /// 本地输入目录
    pub inputs_to_transfer: PathBuf,
    pub local_results_dir: PathBuf,
    pub command: String,

    /// 远程结果目录，相对路径基于 `remote_working_dir`，缺省即工作目录
    #[serde(default)]
    pub remote_results_dir: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<String>,
    /// worker 数，缺省为可用硬件并发数
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_rsync_program")]
    pub rsync_program: String,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    /// 额外的排除规则，追加在默认规则之后
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(flatten)]
    pub log: LogConfig,
}

fn default_rsync_program() -> String {
    "rsync".to_string()
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

impl RunConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        Self::from_document(&content)
    }

    /// 解析扁平 JSON 文档并校验
    pub fn from_document(content: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("配置文档无效: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("address", self.address.as_str()),
            ("username", self.username.as_str()),
            ("remote_working_dir", self.remote_working_dir.as_str()),
            ("command", self.command.as_str()),
            ("rsync_program", self.rsync_program.as_str()),
            ("ssh_program", self.ssh_program.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::config(format!("配置项 {} 不能为空", key)));
            }
        }
        if self.inputs_to_transfer.as_os_str().is_empty() {
            return Err(Error::config("配置项 inputs_to_transfer 不能为空"));
        }
        if self.local_results_dir.as_os_str().is_empty() {
            return Err(Error::config("配置项 local_results_dir 不能为空"));
        }
        if self.workers == Some(0) {
            return Err(Error::config("配置项 workers 必须大于 0"));
        }
        if self.address.contains(['@', ':', '/']) || self.username.contains(['@', ':', '/']) {
            return Err(Error::config("address / username 不能包含 '@'、':' 或 '/'"));
        }
        Ok(())
    }

    /// 命令行覆盖
    pub fn apply_overrides(
        &mut self,
        source_dir: Option<PathBuf>,
        destination: Option<PathBuf>,
        workers: Option<usize>,
    ) -> Result<()> {
        if let Some(dir) = source_dir {
            self.inputs_to_transfer = dir;
        }
        if let Some(dir) = destination {
            self.local_results_dir = dir;
        }
        if workers.is_some() {
            self.workers = workers;
        }
        self.validate()
    }

    pub fn connection(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(&self.address, &self.username, &self.remote_working_dir)
    }

    /// 解析后的远程结果目录
    pub fn remote_results_dir(&self) -> String {
        let conn = self.connection();
        match &self.remote_results_dir {
            Some(dir) if !dir.trim().is_empty() => conn.resolve(dir),
            _ => conn.remote_root,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    pub fn scan_config(&self) -> ScanConfig {
        let mut scan = ScanConfig::default();
        scan.exclude_patterns
            .extend(self.exclude_patterns.iter().cloned());
        scan
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            rsync_program: self.rsync_program.clone(),
            ssh_program: self.ssh_program.clone(),
            port: self.port,
            identity_file: self.identity_file.clone(),
            ..TransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "address": "h.example.com",
        "username": "u",
        "remote_working_dir": "/work",
        "inputs_to_transfer": "/data/in",
        "local_results_dir": "/data/out",
        "command": "make run"
    }"#;

    #[test]
    fn test_parse_minimal_document() {
        let config = RunConfig::from_document(DOC).unwrap();
        assert_eq!(config.address, "h.example.com");
        assert_eq!(config.inputs_to_transfer, PathBuf::from("/data/in"));
        assert_eq!(config.remote_results_dir(), "/work");
        assert_eq!(config.rsync_program, "rsync");
        assert_eq!(config.log.level, "info");
        assert!(config.workers() >= 1);

        let conn = config.connection();
        assert_eq!(conn, ConnectionDescriptor::new("h.example.com", "u", "/work"));
    }

    #[test]
    fn test_optional_keys() {
        let doc = r#"{
            "address": "h", "username": "u", "remote_working_dir": "/work",
            "inputs_to_transfer": "in", "local_results_dir": "out", "command": "true",
            "remote_results_dir": "results", "port": 2222, "workers": 3,
            "exclude_patterns": ["*.tmp"], "log_level": "debug", "log_dir": "/var/log/rj",
            "generated_by": "config converter"
        }"#;
        let config = RunConfig::from_document(doc).unwrap();
        assert_eq!(config.remote_results_dir(), "/work/results");
        assert_eq!(config.workers(), 3);
        assert_eq!(config.transport_config().port, Some(2222));
        assert!(config.scan_config().exclude_patterns.contains(&"*.tmp".to_string()));
        assert!(config.scan_config().exclude_patterns.contains(&".DS_Store".to_string()));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.dir, Some(PathBuf::from("/var/log/rj")));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let doc = r#"{"address": "h", "username": "u"}"#;
        match RunConfig::from_document(doc) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("remote_working_dir")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_type_and_empty_values() {
        let doc = DOC.replace("\"u\"", "42");
        assert!(matches!(
            RunConfig::from_document(&doc),
            Err(Error::Configuration(_))
        ));

        let doc = DOC.replace("make run", " ");
        match RunConfig::from_document(&doc) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("command")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = RunConfig::from_document(DOC).unwrap();
        config
            .apply_overrides(Some("/other/in".into()), None, Some(2))
            .unwrap();
        assert_eq!(config.inputs_to_transfer, PathBuf::from("/other/in"));
        assert_eq!(config.local_results_dir, PathBuf::from("/data/out"));
        assert_eq!(config.workers(), 2);

        assert!(config.apply_overrides(None, None, Some(0)).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
