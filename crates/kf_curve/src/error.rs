// crates/kf_curve/src/error.rs

//! 曲线拓扑错误类型

use thiserror::Error;

/// 曲线模块结果类型
pub type CurveResult<T> = Result<T, CurveError>;

/// 曲线错误枚举
#[derive(Error, Debug)]
pub enum CurveError {
    /// 拓扑错误：重复边、越界索引、自环、空曲线等
    #[error("拓扑错误: {operation} 失败, {details}")]
    InvalidTopology {
        /// 失败的操作名称
        operation: &'static str,
        /// 具体原因
        details: String,
    },

    /// 几何退化：边长低于可用阈值
    #[error("几何退化: 边 {edge} 长度 {length:.3e} 低于阈值")]
    DegenerateEdge {
        /// 退化的边索引
        edge: usize,
        /// 实际边长
        length: f64,
    },
}

impl CurveError {
    /// 创建拓扑错误
    pub fn invalid_topology(operation: &'static str, details: impl Into<String>) -> Self {
        Self::InvalidTopology {
            operation,
            details: details.into(),
        }
    }
}
