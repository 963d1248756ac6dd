// crates/kf_curve/src/lib.rs

//! 多段线曲线网络模块
//!
//! 提供切点能量优化所需的曲线数据结构，包括：
//! - 顶点/边拓扑与 CSR 关联表 (topology)
//! - 曲线网络核心类型 (network) - 位置、切向、长度查询、钉固标志
//! - 均匀中点细分 (subdivide)
//! - 测试与验证用曲线生成器 (generation)
//!
//! # 拓扑约定
//!
//! 曲线网络是嵌入 ℝ³ 的一维网络：顶点可以是端点（价 1）、
//! 内部点（价 2）或交汇点（价 ≥ 3）。一步优化之内拓扑不可变；
//! 细分产生新的曲线对象，调用方负责丢弃依赖旧拓扑的缓存。

#![warn(clippy::all)]

pub mod error;
pub mod generation;
pub mod network;
pub mod subdivide;
pub mod topology;

// 重导出常用类型
pub use error::{CurveError, CurveResult};
pub use network::{CurveNetwork, VertexClass};
pub use topology::IncidenceTable;
