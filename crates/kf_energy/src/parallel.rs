// crates/kf_energy/src/parallel.rs

//! 并行策略配置
//!
//! 核心的并行形态是批同步的数据并行：对互不相交的索引区间
//! （边、树节点、块列表）做 fork-join 分解。小规模问题并行
//! 反而慢，因此提供与问题规模挂钩的自动选择。

use serde::{Deserialize, Serialize};

/// 并行策略
///
/// # 策略说明
///
/// - `Sequential`: 完全串行执行，适用于小规模问题，单线程下结果确定
/// - `Parallel`: 强制并行（rayon fork-join），归约顺序随调度变化
/// - `Auto`: 根据元素数自动选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParallelStrategy {
    /// 串行执行
    Sequential,
    /// 并行执行
    Parallel,
    /// 自动选择（根据问题规模）
    #[default]
    Auto,
}

/// 并行计算配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// 并行策略
    #[serde(default)]
    pub strategy: ParallelStrategy,
    /// 最小并行元素数（低于此值使用串行）
    #[serde(default = "default_min_parallel_size")]
    pub min_parallel_size: usize,
}

fn default_min_parallel_size() -> usize {
    1000
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            strategy: ParallelStrategy::Auto,
            min_parallel_size: default_min_parallel_size(),
        }
    }
}

impl ParallelConfig {
    /// 始终串行的配置（确定性归约）
    pub fn sequential() -> Self {
        Self {
            strategy: ParallelStrategy::Sequential,
            min_parallel_size: usize::MAX,
        }
    }

    /// 对 n 个元素是否应并行执行
    #[inline]
    pub fn should_parallelize(&self, n: usize) -> bool {
        match self.strategy {
            ParallelStrategy::Sequential => false,
            ParallelStrategy::Parallel => true,
            ParallelStrategy::Auto => n >= self.min_parallel_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_threshold() {
        let config = ParallelConfig::default();
        assert!(!config.should_parallelize(10));
        assert!(config.should_parallelize(100_000));
    }

    #[test]
    fn test_sequential_never_parallel() {
        let config = ParallelConfig::sequential();
        assert!(!config.should_parallelize(usize::MAX));
    }
}
