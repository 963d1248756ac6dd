// crates/kf_solver/src/lib.rs

//! 曲线流求解器模块
//!
//! 组合能量层的加速结构，完成一步带约束的 Sobolev 梯度下降：
//!
//! 1. BVH 装配 L² 梯度 g
//! 2. 块簇树 + 多重网格 PCG 在约束切空间内解 A ĝ = g
//! 3. 沿 −ĝ 回溯线搜索（Armijo 条件）
//! 4. 牛顿回投影消除约束漂移
//! 5. 平均边长翻倍时触发均匀细分
//!
//! # 模块
//!
//! - 顶点空间度量算子 (metric)
//! - 预条件共轭梯度 (cg)
//! - 稠密 Cholesky (dense)
//! - 几何多重网格 (multigrid)
//! - 约束集与鞍点投影 (constraints / projector)
//! - 隐式曲面 (surface)
//! - 附加势能 (potentials)
//! - 外层流求解器 (flow)
//! - 配置 (config)

#![warn(clippy::all)]

pub mod cg;
pub mod config;
pub mod constraints;
pub mod dense;
pub mod error;
pub mod flow;
pub mod metric;
pub mod multigrid;
pub mod potentials;
pub mod projector;
pub mod surface;

// 重导出常用类型
pub use cg::{CgConfig, CgOutcome, CgStatus};
pub use config::{FlowConfig, LineSearchConfig};
pub use constraints::{ConstraintKind, ConstraintSet};
pub use error::{SolverError, SolverResult};
pub use flow::{FlowSolver, StepOutcome};
pub use metric::VertexMetric;
pub use multigrid::MultigridHierarchy;
pub use potentials::{Potential, VectorFieldKind};
pub use surface::{ImplicitPlane, ImplicitSphere, ImplicitSurface};
