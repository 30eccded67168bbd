//! 传输分发 - 有界 worker 池与单文件传输处理

use crate::core::batch::{
    fraction, BatchProgress, BatchSummary, Direction, ProgressUpdate, TransferBatch, TransferRecord,
    TransferStatus,
};
use crate::core::checksum::hash_file_async;
use crate::core::remote::ConnectionDescriptor;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认 worker 数：可用硬件并发数，至少为 1
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// 传输分发器
///
/// 批次中的记录分发到有界 worker 池并发执行，每条记录完成（无论成败）后
/// 原子递减剩余计数并发出一次进度。单条记录失败不会中止批次。
pub struct TransferDispatcher {
    transport: Arc<dyn Transport>,
    workers: usize,
    cancel: CancellationToken,
}

impl TransferDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            workers: default_workers(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行批次中的全部记录，所有记录都尝试过后返回
    pub async fn dispatch(
        &self,
        batch: &mut TransferBatch,
        conn: &ConnectionDescriptor,
        progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> BatchSummary {
        let direction = batch.direction();
        let counters = batch.counters();
        let records = batch.take_records();
        let conn = Arc::new(conn.clone());
        let semaphore = Arc::new(Semaphore::new(self.workers));

        info!(
            "开始{}传输: {} 个文件, {} 个 worker",
            direction_label(direction),
            records.len(),
            self.workers
        );

        // 任务 panic 时用于补齐记录
        let templates: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.source_path.clone(), r.dest_path.clone()))
            .collect();

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let transport = self.transport.clone();
            let conn = conn.clone();
            let counters = counters.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let progress_tx = progress_tx.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let record = match permit {
                    Some(permit) => {
                        let record = handle_record(
                            transport.as_ref(),
                            &conn,
                            direction,
                            record,
                            &cancel,
                        )
                        .await;
                        drop(permit);
                        record
                    }
                    None => mark_failed(record, Error::Cancelled),
                };

                report_completion(&counters, direction, &progress_tx).await;
                record
            }));
        }

        let mut finished = Vec::with_capacity(handles.len());
        for (handle, (source, dest)) in futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(templates)
        {
            match handle {
                Ok(record) => finished.push(record),
                Err(e) => {
                    error!("传输任务异常退出 {}: {}", source, e);
                    counters.complete_one();
                    let mut record = TransferRecord::new(source, dest);
                    record.status = TransferStatus::Failed;
                    record.error = Some(format!("传输任务异常退出: {}", e));
                    finished.push(record);
                }
            }
        }

        batch.restore_records(finished);
        let summary = batch.summary();

        info!(
            "{}传输结束: 成功 {}, 失败 {}",
            direction_label(direction),
            summary.completed,
            summary.failed.len()
        );
        for failed in &summary.failed {
            warn!(
                "  [{}] {} -> {}: {}",
                failed.status, failed.source_path, failed.dest_path, failed.reason
            );
        }

        summary
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => "出站",
        Direction::Inbound => "入站",
    }
}

/// 计数器递减并发出进度
async fn report_completion(
    counters: &BatchProgress,
    direction: Direction,
    progress_tx: &Option<mpsc::Sender<ProgressUpdate>>,
) {
    let remaining = counters.complete_one();
    let total = counters.total();
    let fraction = fraction(total, remaining);
    let update = ProgressUpdate {
        direction,
        remaining,
        total,
        fraction,
    };

    debug!(
        "{}进度: 剩余 {}/{} ({:.1}%)",
        direction_label(direction),
        remaining,
        total,
        fraction * 100.0
    );

    if let Some(tx) = progress_tx {
        let _ = tx.send(update).await;
    }
}

fn mark_failed(mut record: TransferRecord, err: Error) -> TransferRecord {
    record.status = match err {
        Error::IntegrityMismatch { .. } => TransferStatus::Mismatched,
        Error::Cancelled => TransferStatus::Cancelled,
        _ => TransferStatus::Failed,
    };
    record.error = Some(err.to_string());
    record
}

/// 单条记录处理器：错误在这里被捕获并记入记录，不向分发器传播
async fn handle_record(
    transport: &dyn Transport,
    conn: &ConnectionDescriptor,
    direction: Direction,
    mut record: TransferRecord,
    cancel: &CancellationToken,
) -> TransferRecord {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = transfer(transport, conn, direction, &mut record) => result,
    };

    match result {
        Ok(()) => {
            debug!("传输完成: {} -> {}", record.source_path, record.dest_path);
            record.status = TransferStatus::Completed;
            record
        }
        Err(e) => {
            match &e {
                Error::IntegrityMismatch { .. } => warn!("完整性警告: {}", e),
                Error::Cancelled => debug!("已取消: {}", record.source_path),
                _ => warn!("传输失败: {}", e),
            }
            mark_failed(record, e)
        }
    }
}

async fn transfer(
    transport: &dyn Transport,
    conn: &ConnectionDescriptor,
    direction: Direction,
    record: &mut TransferRecord,
) -> Result<()> {
    match direction {
        Direction::Outbound => transfer_outbound(transport, conn, record).await,
        Direction::Inbound => transfer_inbound(transport, conn, record).await,
    }
}

/// 本地 -> 远程
pub async fn transfer_outbound(
    transport: &dyn Transport,
    conn: &ConnectionDescriptor,
    record: &mut TransferRecord,
) -> Result<()> {
    let source = PathBuf::from(&record.source_path);
    match tokio::fs::metadata(&source).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(Error::MissingSource { path: source }),
    }

    record.origin_hash = Some(hash_file_async(source).await?);

    let dest = conn.remote_location(&record.dest_path);
    debug!("上传: {} -> {}", record.source_path, dest);
    transport
        .copy(&record.source_path, &dest)
        .await
        .map_err(|e| sync_error(&record.source_path, e))?;

    let digest = transport
        .digest_remote(conn, &record.dest_path)
        .await
        .map_err(|e| sync_error(&record.dest_path, e))?;
    record.destination_hash = Some(digest);

    verify(record)
}

/// 远程 -> 本地
pub async fn transfer_inbound(
    transport: &dyn Transport,
    conn: &ConnectionDescriptor,
    record: &mut TransferRecord,
) -> Result<()> {
    let remote_path = conn.strip_location(&record.source_path).ok_or_else(|| {
        sync_error(
            &record.source_path,
            TransportError::Remote(format!("不是 {} 上的位置", conn.destination())),
        )
    })?;

    let origin = transport
        .digest_remote(conn, remote_path)
        .await
        .map_err(|e| sync_error(&record.source_path, e))?;
    record.origin_hash = Some(origin);

    let dest = PathBuf::from(&record.dest_path);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!("下载: {} -> {}", record.source_path, record.dest_path);
    transport
        .copy(&record.source_path, &record.dest_path)
        .await
        .map_err(|e| sync_error(&record.source_path, e))?;

    record.destination_hash = Some(hash_file_async(dest).await?);

    verify(record)
}

fn sync_error(path: &str, source: TransportError) -> Error {
    Error::Sync {
        path: path.to_string(),
        source,
    }
}

/// 比较传输前后的 hash
fn verify(record: &TransferRecord) -> Result<()> {
    match (&record.origin_hash, &record.destination_hash) {
        (Some(origin), Some(destination)) if origin == destination => Ok(()),
        (origin, destination) => Err(Error::IntegrityMismatch {
            path: record.dest_path.clone(),
            origin: origin.clone().unwrap_or_default(),
            destination: destination.clone().unwrap_or_default(),
        }),
    }
}
