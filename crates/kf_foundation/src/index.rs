// crates/kf_foundation/src/index.rs

//! 强类型索引系统
//!
//! 使用泛型 `Idx<T>` 实现类型安全的轻量级索引。
//!
//! # 设计目标
//!
//! 1. **类型安全**: 编译期区分顶点/边/BVH 节点索引
//! 2. **零开销**: 与 u32 完全相同的内存布局和性能
//!
//! # 示例
//!
//! ```
//! use kf_foundation::index::{VertexIndex, EdgeIndex};
//!
//! let v = VertexIndex::new(0);
//! assert!(v.is_valid());
//! assert_eq!(v.get(), 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// 无效索引标记
pub const INVALID_INDEX: u32 = u32::MAX;

// ============================================================================
// 标记类型 (Phantom Types)
// ============================================================================

/// 顶点索引标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexTag;

/// 边索引标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeTag;

/// BVH 节点索引标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeTag;

// ============================================================================
// 泛型索引类型
// ============================================================================

/// 轻量级泛型索引（4 字节）
///
/// 使用 Phantom Type `T` 区分不同类型的索引，避免误用。
/// `#[repr(transparent)]` 保证与 u32 相同的内存布局。
#[derive(Serialize, Deserialize)]
#[repr(transparent)]
pub struct Idx<T> {
    /// 索引值
    index: u32,
    /// 类型标记
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

// 手动实现 Copy/Clone/Eq，避免对 T 施加约束
impl<T> Copy for Idx<T> {}

impl<T> Clone for Idx<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Idx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Idx<T> {}

impl<T> Hash for Idx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Idx<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Idx<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Idx<T> {
    /// 无效索引常量
    pub const INVALID: Self = Self {
        index: INVALID_INDEX,
        _marker: PhantomData,
    };

    /// 创建新索引
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// 从 usize 创建索引
    ///
    /// 调试模式下检查 u32 溢出。
    #[inline]
    pub fn from_usize(index: usize) -> Self {
        debug_assert!(index < INVALID_INDEX as usize);
        Self::new(index as u32)
    }

    /// 获取索引值（usize，用于数组访问）
    #[inline]
    pub const fn get(self) -> usize {
        self.index as usize
    }

    /// 获取原始 u32 值
    #[inline]
    pub const fn raw(self) -> u32 {
        self.index
    }

    /// 是否为有效索引
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != INVALID_INDEX
    }
}

impl<T> fmt::Debug for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Idx({})", self.index)
        } else {
            write!(f, "Idx(INVALID)")
        }
    }
}

impl<T> fmt::Display for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

impl<T> Default for Idx<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// ============================================================================
// 类型别名
// ============================================================================

/// 顶点索引
pub type VertexIndex = Idx<VertexTag>;

/// 边索引
pub type EdgeIndex = Idx<EdgeTag>;

/// BVH 节点索引
pub type NodeIndex = Idx<NodeTag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_basic() {
        let v = VertexIndex::new(7);
        assert!(v.is_valid());
        assert_eq!(v.get(), 7);
        assert_eq!(v.raw(), 7);
    }

    #[test]
    fn test_index_invalid() {
        let v = VertexIndex::INVALID;
        assert!(!v.is_valid());
        assert_eq!(VertexIndex::default(), VertexIndex::INVALID);
    }

    #[test]
    fn test_index_ordering() {
        let a = EdgeIndex::new(1);
        let b = EdgeIndex::new(2);
        assert!(a < b);
        assert_eq!(a, EdgeIndex::new(1));
    }

    #[test]
    fn test_index_size() {
        // 零开销：与 u32 等大
        assert_eq!(std::mem::size_of::<VertexIndex>(), 4);
    }

    #[test]
    fn test_from_usize() {
        let e = EdgeIndex::from_usize(42);
        assert_eq!(e.get(), 42);
    }
}
