// ==========================================
// 医疗数据导入系统 - 分片规划
// ==========================================
// 规则（文件大小 → 分片大小 × 并发度）:
//   < 500 MB  → 25 MB  × 3
//   < 2 GB    → 50 MB  × 5
//   < 5 GB    → 100 MB × 8
//   ≥ 5 GB    → 200 MB × 8
// 单位按二进制 MB（1 MB = 1024 × 1024 字节）
// ==========================================

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * MB;

/// ≥ 该大小时使用分片上传
pub const MULTIPART_THRESHOLD: u64 = 100 * MB;

pub fn use_multipart(size: u64) -> bool {
    size >= MULTIPART_THRESHOLD
}

pub fn chunk_size_for(size: u64) -> u64 {
    if size < 500 * MB {
        25 * MB
    } else if size < 2 * GB {
        50 * MB
    } else if size < 5 * GB {
        100 * MB
    } else {
        200 * MB
    }
}

pub fn concurrency_for(size: u64) -> usize {
    if size < 500 * MB {
        3
    } else if size < 2 * GB {
        5
    } else {
        8
    }
}

/// 单个分片的字节区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: i32,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub size: u64,
    pub chunk_size: u64,
    pub concurrency: usize,
}

impl ChunkPlan {
    pub fn for_size(size: u64) -> Self {
        Self {
            size,
            chunk_size: chunk_size_for(size),
            concurrency: concurrency_for(size),
        }
    }

    /// 显式指定分片参数（测试用小分片）
    pub fn with_chunk_size(size: u64, chunk_size: u64, concurrency: usize) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn part_count(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// 全部分片区间（part_number 从 1 开始）
    pub fn parts(&self) -> Vec<PartRange> {
        (0..self.part_count())
            .map(|idx| {
                let offset = idx * self.chunk_size;
                PartRange {
                    part_number: (idx + 1) as i32,
                    offset,
                    len: self.chunk_size.min(self.size - offset),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_threshold() {
        assert!(!use_multipart(MULTIPART_THRESHOLD - 1));
        assert!(use_multipart(MULTIPART_THRESHOLD));
        assert!(use_multipart(MULTIPART_THRESHOLD + 1));
    }

    #[test]
    fn test_staged_table_at_boundaries() {
        let cases = [
            (100 * MB, 25 * MB, 3),
            (500 * MB - 1, 25 * MB, 3),
            (500 * MB, 50 * MB, 5),
            (2 * GB - 1, 50 * MB, 5),
            (2 * GB, 100 * MB, 8),
            (5 * GB - 1, 100 * MB, 8),
            (5 * GB, 200 * MB, 8),
            (50 * GB, 200 * MB, 8),
        ];
        for (size, chunk, concurrency) in cases {
            assert_eq!(chunk_size_for(size), chunk, "chunk size for {}", size);
            assert_eq!(concurrency_for(size), concurrency, "concurrency for {}", size);
        }
    }

    #[test]
    fn test_parts_cover_whole_file() {
        let plan = ChunkPlan::with_chunk_size(10, 4, 2);
        let parts = plan.parts();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], PartRange { part_number: 3, offset: 8, len: 2 });
        assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), 10);
    }
}
