//! 错误类型

use std::path::PathBuf;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

/// 领域错误
///
/// 单条记录级别的错误（`MissingSource`、`Sync`、`IntegrityMismatch`）在传输处理器
/// 边界被捕获并记入记录；阶段级别的错误向上传播并终止整次运行。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 配置文档缺失/无效，或本地输入根目录不存在
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 编目后源文件消失
    #[error("源文件不存在: {}", path.display())]
    MissingSource { path: PathBuf },

    /// 远程文件列表失败
    #[error("远程文件列表失败 ({dir}): {source}")]
    RemoteListing {
        dir: String,
        #[source]
        source: TransportError,
    },

    /// 远程命令失败
    #[error("远程命令执行失败: {source}")]
    RemoteCommand {
        #[source]
        source: TransportError,
    },

    /// 传输后 hash 与传输前不一致
    #[error("完整性校验失败 {path}: 源 {origin} != 目标 {destination}")]
    IntegrityMismatch {
        path: String,
        origin: String,
        destination: String,
    },

    /// 同步工具失败（单条记录）
    #[error("同步失败 {path}: {source}")]
    Sync {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
