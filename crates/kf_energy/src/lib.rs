// crates/kf_energy/src/lib.rs

//! 切点能量求值模块
//!
//! 提供曲线自回避优化的核心数值机制，包括：
//! - 切点核函数及其解析导数 (kernel)
//! - 边中点上的 Barnes-Hut BVH (bvh)
//! - O(m log m) 能量与梯度求值 (energy)
//! - 分数阶 Sobolev 度量的块簇树算子 (bct)
//! - 并行策略配置 (parallel)
//!
//! # 复杂度
//!
//! 朴素的逐对求值是 O(m²)；本模块通过多极式远场近似将能量/梯度
//! 求值与度量算子应用都压到 O(m log m)，使数万条边的曲线可以
//! 逐步优化。
//!
//! # 数值策略
//!
//! 能量与力全程 f64。自对 (i = j) 被排除；共享顶点的相邻边对
//! 以中点规则直接求值（互异非退化边的中点不会重合，核值有限）。

#![warn(clippy::all)]

pub mod bct;
pub mod bvh;
pub mod energy;
pub mod error;
pub mod kernel;
pub mod parallel;

// 重导出常用类型
pub use bct::BlockClusterTree;
pub use bvh::Bvh3d;
pub use error::{EnergyError, EnergyResult};
pub use kernel::TpeExponents;
pub use parallel::{ParallelConfig, ParallelStrategy};
