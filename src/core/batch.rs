//! 传输批次数据模型

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 本地 -> 远程
    Outbound,
    /// 远程 -> 本地
    Inbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// 单条记录的传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    /// 已传输但 hash 不一致
    Mismatched,
    Cancelled,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::Mismatched => write!(f, "mismatched"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 单个文件的传输记录
///
/// 出站记录：`source_path` 是本地路径，`dest_path` 是完整的远程路径。
/// 入站记录：`source_path` 是 `username@address:path`，`dest_path` 是完整的本地路径。
/// 一条记录在生命周期内只属于一个 worker。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub source_path: String,
    pub dest_path: String,
    pub origin_hash: Option<String>,
    pub destination_hash: Option<String>,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn new(source_path: impl Into<String>, dest_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            dest_path: dest_path.into(),
            origin_hash: None,
            destination_hash: None,
            status: TransferStatus::Pending,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Failed | TransferStatus::Mismatched | TransferStatus::Cancelled
        )
    }
}

/// 批次聚合计数器，可在 worker 间共享
///
/// `remaining` 只通过单次原子操作递减，`progress` 由同一次原子读取推导，
/// 因此任何观察点上 `progress == (total - remaining) / total` 都成立。
#[derive(Debug)]
pub struct BatchProgress {
    total: usize,
    remaining: AtomicUsize,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            remaining: AtomicUsize::new(total),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> f64 {
        fraction(self.total, self.remaining())
    }

    /// 标记一条记录完成，返回完成后的剩余数量（不会减到负数）
    pub fn complete_one(&self) -> usize {
        match self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => 0,
        }
    }
}

/// 完成比例，`total == 0` 时视为已完成
pub(crate) fn fraction(total: usize, remaining: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        (total - remaining.min(total)) as f64 / total as f64
    }
}

/// 进度观察
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub direction: Direction,
    pub remaining: usize,
    pub total: usize,
    pub fraction: f64,
}

/// 传输批次：由一次编目产生，被一次分发消费
#[derive(Debug)]
pub struct TransferBatch {
    direction: Direction,
    records: Vec<TransferRecord>,
    progress: Arc<BatchProgress>,
}

impl TransferBatch {
    pub fn new(direction: Direction, records: Vec<TransferRecord>) -> Self {
        let progress = Arc::new(BatchProgress::new(records.len()));
        Self {
            direction,
            records,
            progress,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    pub fn total(&self) -> usize {
        self.progress.total()
    }

    pub fn remaining(&self) -> usize {
        self.progress.remaining()
    }

    pub fn progress(&self) -> f64 {
        self.progress.progress()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn counters(&self) -> Arc<BatchProgress> {
        self.progress.clone()
    }

    /// 取出全部记录交给 worker，之后由 `restore_records` 放回
    pub(crate) fn take_records(&mut self) -> Vec<TransferRecord> {
        std::mem::take(&mut self.records)
    }

    pub(crate) fn restore_records(&mut self, records: Vec<TransferRecord>) {
        self.records = records;
    }

    /// 汇总批次结果
    pub fn summary(&self) -> BatchSummary {
        let failed: Vec<FailedRecord> = self
            .records
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| FailedRecord {
                source_path: r.source_path.clone(),
                dest_path: r.dest_path.clone(),
                status: r.status,
                reason: r.error.clone().unwrap_or_default(),
            })
            .collect();
        let completed = self
            .records
            .iter()
            .filter(|r| r.status == TransferStatus::Completed)
            .count();

        BatchSummary {
            direction: self.direction,
            total: self.total(),
            completed,
            failed,
        }
    }
}

/// 失败记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub source_path: String,
    pub dest_path: String,
    pub status: TransferStatus,
    pub reason: String,
}

/// 批次结果汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub direction: Direction,
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<FailedRecord>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_is_complete() {
        let batch = TransferBatch::new(Direction::Outbound, vec![]);
        assert_eq!(batch.total(), 0);
        assert_eq!(batch.remaining(), 0);
        assert_eq!(batch.progress(), 1.0);
    }

    #[test]
    fn test_progress_invariant() {
        let records = (0..4)
            .map(|i| TransferRecord::new(format!("/in/{i}"), format!("/out/{i}")))
            .collect();
        let batch = TransferBatch::new(Direction::Inbound, records);
        let counters = batch.counters();
        assert_eq!(batch.progress(), 0.0);

        for expected in (0..4).rev() {
            assert_eq!(counters.complete_one(), expected);
            let remaining = batch.remaining();
            assert!(remaining <= batch.total());
            let want = (batch.total() - remaining) as f64 / batch.total() as f64;
            assert_eq!(batch.progress(), want);
        }
        assert_eq!(batch.progress(), 1.0);
    }

    #[test]
    fn test_complete_one_never_underflows() {
        let progress = BatchProgress::new(1);
        assert_eq!(progress.complete_one(), 0);
        assert_eq!(progress.complete_one(), 0);
        assert_eq!(progress.remaining(), 0);
        assert_eq!(progress.progress(), 1.0);
    }

    #[test]
    fn test_summary_lists_failures() {
        let mut ok = TransferRecord::new("/a", "/b");
        ok.status = TransferStatus::Completed;
        let mut bad = TransferRecord::new("/c", "/d");
        bad.status = TransferStatus::Mismatched;
        bad.error = Some("hash".to_string());

        let batch = TransferBatch::new(Direction::Outbound, vec![ok, bad]);
        let summary = batch.summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].source_path, "/c");
        assert_eq!(summary.failed[0].status, TransferStatus::Mismatched);
        assert!(!summary.is_clean());
    }
}
