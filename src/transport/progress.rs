// ==========================================
// 医疗数据导入系统 - 上传进度
// ==========================================
// 约束:
// - 百分比单调不减
// - 完成前最多报告 95%，finish() 后为 100%
// ==========================================

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// 完成前的进度上限
pub const PROGRESS_CAP_BEFORE_FINISH: u8 = 95;

pub struct ProgressTracker {
    total: u64,
    uploaded: AtomicU64,
    percent: watch::Sender<u8>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        let (percent, _) = watch::channel(0);
        Self {
            total,
            uploaded: AtomicU64::new(0),
            percent,
        }
    }

    /// 订阅进度变化
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.percent.subscribe()
    }

    pub fn percent(&self) -> u8 {
        *self.percent.borrow()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded.load(Ordering::SeqCst)
    }

    /// 记录已上传字节，返回当前百分比
    pub fn add_bytes(&self, bytes: u64) -> u8 {
        let uploaded = self.uploaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let raw = if self.total == 0 {
            0
        } else {
            (uploaded.min(self.total) * 100 / self.total) as u8
        };
        self.raise_to(raw.min(PROGRESS_CAP_BEFORE_FINISH));
        self.percent()
    }

    pub fn finish(&self) {
        self.raise_to(100);
    }

    fn raise_to(&self, value: u8) {
        self.percent.send_if_modified(|current| {
            if value > *current {
                *current = value;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_capped_until_finish() {
        let tracker = ProgressTracker::new(100);
        assert_eq!(tracker.add_bytes(50), 50);
        assert_eq!(tracker.add_bytes(50), PROGRESS_CAP_BEFORE_FINISH);
        tracker.finish();
        assert_eq!(tracker.percent(), 100);
    }

    #[test]
    fn test_progress_never_decreases() {
        let tracker = ProgressTracker::new(10);
        tracker.add_bytes(8);
        tracker.add_bytes(0);
        assert_eq!(tracker.percent(), 80);
        tracker.finish();
        tracker.add_bytes(1);
        assert_eq!(tracker.percent(), 100);
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let tracker = ProgressTracker::new(4);
        let mut rx = tracker.subscribe();
        tracker.add_bytes(1);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 25);
    }
}
