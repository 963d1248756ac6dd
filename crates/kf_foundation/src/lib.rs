// crates/kf_foundation/src/lib.rs

//! KnotFlow Foundation Layer
//!
//! 零依赖基础层，提供整个项目的基础抽象。
//!
//! # 模块概览
//!
//! - [`index`]: 强类型索引系统（顶点/边/BVH 节点）
//! - [`error`]: 统一基础错误类型
//! - [`kahan`]: Kahan 补偿求和
//! - [`tolerance`]: 共享数值容差常量
//!
//! # 设计原则
//!
//! 1. **纯净性**: 仅依赖 serde，不引入任何曲线或求解器领域概念
//! 2. **类型安全**: 编译期防止索引误用
//! 3. **零开销抽象**: release 模式下与裸 u32/f64 等价

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod index;
pub mod kahan;
pub mod tolerance;

// 重导出常用类型
pub use error::{KfError, KfResult};
pub use index::{EdgeIndex, Idx, NodeIndex, VertexIndex, INVALID_INDEX};
pub use kahan::KahanSum;
