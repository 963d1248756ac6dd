// crates/kf_energy/src/error.rs

//! 能量层错误类型

use thiserror::Error;

/// 能量模块结果类型
pub type EnergyResult<T> = Result<T, EnergyError>;

/// 能量层错误枚举
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnergyError {
    /// 核指数不可积: 要求 α > 0 且 β > α + 1
    #[error("核指数无效: α = {alpha}, β = {beta}, 要求 α > 0 且 β > α + 1")]
    InvalidExponents {
        /// 分子指数
        alpha: f64,
        /// 分母指数
        beta: f64,
    },

    /// 可采性比率无效: 要求 sep > 0
    #[error("可采性比率无效: sep = {sep}, 要求 sep > 0")]
    InvalidSeparation {
        /// 提供的比率
        sep: f64,
    },

    /// 块簇树块数超出声明预算
    #[error("块簇树超出内存预算: {blocks} 块 > 预算 {budget}")]
    BlockBudgetExceeded {
        /// 实际块数
        blocks: usize,
        /// 预算上限
        budget: usize,
    },
}
