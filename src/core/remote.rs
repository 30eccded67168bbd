//! 远程连接描述与路径插值

use serde::Serialize;

/// 远程连接描述（创建后不可变，所有并发传输只读共享）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub address: String,
    pub username: String,
    /// 远程工作目录
    pub remote_root: String,
}

impl ConnectionDescriptor {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            remote_root: remote_root.into(),
        }
    }

    /// ssh 目标 `username@address`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }

    /// 构造远程位置字符串 `username@address:path`
    pub fn remote_location(&self, path: &str) -> String {
        interpolate(&self.username, &self.address, path)
    }

    /// 从 `username@address:path` 中取出属于本连接的路径部分
    pub fn strip_location<'a>(&self, location: &'a str) -> Option<&'a str> {
        location
            .strip_prefix(self.username.as_str())?
            .strip_prefix('@')?
            .strip_prefix(self.address.as_str())?
            .strip_prefix(':')
    }

    /// 将相对路径解析到远程工作目录下，绝对路径与家目录路径原样返回
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') || path == "~" || path.starts_with("~/") {
            path.to_string()
        } else {
            join_remote(&self.remote_root, path)
        }
    }
}

/// `"<username>@<address>:<path>"`，同步工具与远程会话工具都原样接受此格式
pub fn interpolate(username: &str, address: &str, path: &str) -> String {
    format!("{}@{}:{}", username, address, path)
}

/// 拆分 `username@address:path`，本地路径返回 `None`
pub fn split_location(location: &str) -> Option<(&str, &str)> {
    let (host, path) = location.split_once(':')?;
    if host.is_empty() || host.contains('/') || host.contains('\\') || !host.contains('@') {
        return None;
    }
    Some((host, path))
}

/// 拼接远程路径（统一使用 `/`）
pub fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    if base.is_empty() || base == "." {
        return relative.to_string();
    }
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative)
}

/// 远程路径的父目录
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// POSIX shell 单引号转义
///
/// 开头的 `~` / `~/` 留在引号外，远端 shell 仍会展开为家目录，与同步工具的远程路径一致。
pub fn shell_quote(value: &str) -> String {
    if value == "~" {
        return value.to_string();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        if rest.is_empty() {
            return value.to_string();
        }
        return format!("~/{}", quote_word(rest));
    }
    quote_word(value)
}

fn quote_word(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '@' | ',' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
