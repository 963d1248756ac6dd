// crates/kf_solver/src/error.rs

//! 求解层错误类型
//!
//! 所有失败都向调用方显式暴露，不做静默回退。

use kf_curve::CurveError;
use kf_energy::EnergyError;
use thiserror::Error;

/// 求解模块结果类型
pub type SolverResult<T> = Result<T, SolverError>;

/// 求解层错误枚举
#[derive(Error, Debug)]
pub enum SolverError {
    /// 内层 CG 在迭代上限内未达到目标残差
    #[error("内层求解未收敛: {iterations} 次迭代后相对残差 {residual:.3e}")]
    NonConvergent {
        /// 已执行迭代数
        iterations: usize,
        /// 最终相对残差
        residual: f64,
    },

    /// 线搜索在最大折半次数内未满足 Armijo 条件
    #[error("线搜索失败: {halvings} 次折半后仍不满足下降条件")]
    LineSearchExhausted {
        /// 已执行折半次数
        halvings: usize,
    },

    /// 回投影在牛顿迭代上限内未消除约束漂移
    #[error("约束回投影失败: {iterations} 次迭代后漂移 {violation:.3e}")]
    ConstraintProjectionFailed {
        /// 已执行牛顿迭代数
        iterations: usize,
        /// 最终约束漂移
        violation: f64,
    },

    /// 稠密 Cholesky 分解遇到非正主元
    #[error("Cholesky 分解失败: 第 {pivot} 个主元 {value:.3e} 非正")]
    FactorizationFailed {
        /// 主元下标
        pivot: usize,
        /// 主元值
        value: f64,
    },

    /// 配置验证失败
    #[error("配置无效: {message}")]
    InvalidConfig {
        /// 无效原因
        message: String,
    },

    /// 聚合曲线层错误
    #[error("曲线错误: {0}")]
    Curve(#[from] CurveError),

    /// 聚合能量层错误
    #[error("能量层错误: {0}")]
    Energy(#[from] EnergyError),
}
