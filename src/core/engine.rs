//! 运行引擎

use crate::config::RunConfig;
use crate::core::batch::{BatchSummary, ProgressUpdate};
use crate::core::command::RemoteCommandRunner;
use crate::core::dispatcher::TransferDispatcher;
use crate::core::scanner::{LocalCataloger, RemoteCataloger};
use crate::error::{Error, Result};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 运行报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub command: String,
    pub outbound: BatchSummary,
    pub inbound: BatchSummary,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.outbound.is_clean() || !self.inbound.is_clean()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// 运行引擎
///
/// 依次执行：本地编目 -> 出站分发 -> 远程命令 -> 远程编目 -> 入站分发。
/// 每个阶段完全结束后才开始下一个阶段。
pub struct RunEngine {
    config: RunConfig,
    transport: Arc<dyn Transport>,
    cancelled: CancellationToken,
}

impl RunEngine {
    pub fn new(config: RunConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            cancelled: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancelled = cancel;
        self
    }

    /// 取消运行
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancelled.clone()
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn run(
        &self,
        progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let conn = self.config.connection();
        let scan_config = self.config.scan_config();

        info!(
            "开始运行 {}: {} -> {} ({})",
            run_id,
            self.config.inputs_to_transfer.display(),
            conn.remote_location(&conn.remote_root),
            self.transport.name()
        );

        let dispatcher = TransferDispatcher::new(self.transport.clone())
            .with_workers(self.config.workers())
            .with_cancel(self.cancelled.clone());

        // 1. 本地编目
        let mut outbound = LocalCataloger::new(&scan_config)?
            .catalog(&self.config.inputs_to_transfer, &conn.remote_root)
            .await
            .inspect_err(|e| error!("本地编目失败: {}", e))?;
        self.check_cancelled()?;

        // 2. 出站传输
        let outbound_summary = dispatcher
            .dispatch(&mut outbound, &conn, progress_tx.clone())
            .await;
        self.check_cancelled()?;

        // 3. 远程命令
        RemoteCommandRunner::new(self.transport.clone())
            .with_cancel(self.cancelled.clone())
            .run(&conn, &self.config.command)
            .await?;

        // 4. 远程编目
        let remote_results = self.config.remote_results_dir();
        let mut inbound = RemoteCataloger::new(&scan_config)?
            .catalog(
                self.transport.as_ref(),
                &conn,
                &remote_results,
                &self.config.local_results_dir,
                &self.cancelled,
            )
            .await
            .inspect_err(|e| error!("远程编目失败: {}", e))?;

        // 5. 入站传输
        tokio::fs::create_dir_all(&self.config.local_results_dir).await?;
        let inbound_summary = dispatcher
            .dispatch(&mut inbound, &conn, progress_tx)
            .await;
        self.check_cancelled()?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            command: self.config.command.clone(),
            outbound: outbound_summary,
            inbound: inbound_summary,
        };

        info!(
            "运行完成: 上传 {}/{}, 下载 {}/{}, 耗时 {}s",
            report.outbound.completed,
            report.outbound.total,
            report.inbound.completed,
            report.inbound.total,
            report.duration_secs()
        );

        Ok(report)
    }
}
