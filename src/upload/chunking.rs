use std::ops::Range;

/// Aim for about this many chunks per batch.
pub const TARGET_CHUNKS: usize = 4;
pub const MIN_CHUNK_SIZE: usize = 5;
pub const MAX_CHUNK_SIZE: usize = 15;

/// `clamp(ceil(total / 4), 5, 15)`.
pub fn chunk_size(total: usize) -> usize {
    total
        .div_ceil(TARGET_CHUNKS)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: usize,
    pub ranges: Vec<Range<usize>>,
}

impl ChunkPlan {
    pub fn new(total: usize) -> Self {
        let size = chunk_size(total);
        let ranges = (0..total)
            .step_by(size)
            .map(|start| start..(start + size).min(total))
            .collect();
        Self {
            chunk_size: size,
            ranges,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[allow(dead_code)]
    pub fn sizes(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_files_make_three_chunks() {
        let plan = ChunkPlan::new(12);
        assert_eq!(plan.chunk_size, 5);
        assert_eq!(plan.sizes(), vec![5, 5, 2]);
    }

    #[test]
    fn sizes_follow_the_quarter_rule() {
        assert_eq!(chunk_size(1), 5);
        assert_eq!(chunk_size(20), 5);
        assert_eq!(chunk_size(21), 6);
        assert_eq!(chunk_size(40), 10);
        assert_eq!(chunk_size(60), 15);
        assert_eq!(chunk_size(200), 15);
    }

    #[test]
    fn only_the_last_chunk_may_be_short() {
        for total in 1..=120 {
            let plan = ChunkPlan::new(total);
            let sizes = plan.sizes();
            assert_eq!(sizes.iter().sum::<usize>(), total);
            let (last, body) = sizes.split_last().unwrap();
            assert!(body.iter().all(|&s| s == plan.chunk_size), "{total}: {sizes:?}");
            assert!(*last >= 1 && *last <= MAX_CHUNK_SIZE);
            assert!((MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&plan.chunk_size));
        }
    }

    #[test]
    fn empty_plan() {
        let plan = ChunkPlan::new(0);
        assert!(plan.is_empty());
        assert_eq!(plan.chunk_size, MIN_CHUNK_SIZE);
    }
}
