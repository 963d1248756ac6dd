// crates/kf_foundation/src/error.rs

//! 基础错误类型
//!
//! 定义整个项目的基础错误类型，仅包含与基础设施相关的错误。
//! 高层错误（曲线拓扑、核函数、求解器）定义在各自 crate 中，
//! 最终可转换为 [`KfError::Internal`] 或具体的基础错误向下兼容。
//!
//! # 设计原则
//!
//! 1. **纯净性**: 仅包含尺寸、索引、输入等基础错误，无曲线、能量等高层概念
//! 2. **易用性**: 提供便捷构造函数和 `check_*` 验证辅助

use std::fmt;

/// 统一结果类型别名
pub type KfResult<T> = Result<T, KfError>;

/// Foundation 层基础错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KfError {
    /// 数组或集合大小不匹配
    SizeMismatch {
        /// 数据名称（用于调试）
        name: &'static str,
        /// 期望大小
        expected: usize,
        /// 实际大小
        actual: usize,
    },

    /// 索引访问越界
    IndexOutOfBounds {
        /// 索引类别（如 "Vertex", "Edge"）
        index_type: &'static str,
        /// 访问的索引值
        index: usize,
        /// 容器长度（上界）
        len: usize,
    },

    /// 输入数据验证失败
    InvalidInput {
        /// 说明无效原因
        message: String,
    },

    /// 内部实现错误
    ///
    /// 当程序进入不应到达的状态时使用，通常表示不变量被破坏。
    Internal {
        /// 内部错误描述
        message: String,
    },
}

impl KfError {
    /// 创建大小不匹配错误
    #[inline]
    pub fn size_mismatch(name: &'static str, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            name,
            expected,
            actual,
        }
    }

    /// 创建索引越界错误
    #[inline]
    pub fn index_out_of_bounds(index_type: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds {
            index_type,
            index,
            len,
        }
    }

    /// 创建无效输入错误
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// 创建内部错误
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// 验证数组大小是否匹配，不匹配则返回 [`KfError::SizeMismatch`]
    #[inline]
    pub fn check_size(name: &'static str, expected: usize, actual: usize) -> KfResult<()> {
        if expected != actual {
            Err(Self::size_mismatch(name, expected, actual))
        } else {
            Ok(())
        }
    }

    /// 验证索引是否在有效范围内，越界则返回 [`KfError::IndexOutOfBounds`]
    #[inline]
    pub fn check_index(index_type: &'static str, index: usize, len: usize) -> KfResult<()> {
        if index >= len {
            Err(Self::index_out_of_bounds(index_type, index, len))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for KfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch {
                name,
                expected,
                actual,
            } => {
                write!(f, "数组大小不匹配: {} 期望{}, 实际{}", name, expected, actual)
            }
            Self::IndexOutOfBounds {
                index_type,
                index,
                len,
            } => {
                write!(f, "索引越界: {} 索引{} 超出范围 0..{}", index_type, index, len)
            }
            Self::InvalidInput { message } => write!(f, "无效的输入数据: {}", message),
            Self::Internal { message } => write!(f, "内部错误: {}", message),
        }
    }
}

impl std::error::Error for KfError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KfError::size_mismatch("gradient", 100, 50);
        assert!(err.to_string().contains("gradient"));
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_check_size() {
        assert!(KfError::check_size("v", 10, 10).is_ok());
        let result = KfError::check_size("v", 10, 5);
        assert!(matches!(result.unwrap_err(), KfError::SizeMismatch { .. }));
    }

    #[test]
    fn test_check_index() {
        assert!(KfError::check_index("Vertex", 5, 10).is_ok());
        let result = KfError::check_index("Vertex", 10, 10);
        assert!(matches!(
            result.unwrap_err(),
            KfError::IndexOutOfBounds { .. }
        ));
    }

    #[test]
    fn test_invalid_input() {
        let err = KfError::invalid_input("边数为零");
        assert!(err.to_string().contains("边数为零"));
    }
}
