// crates/kf_solver/src/config.rs

//! 流求解器配置（全 f64）
//!
//! 所有参数用纯 f64/usize 存储，serde 可序列化，
//! 字段缺省通过自由函数提供。构建求解器前调用
//! [`FlowConfig::validate`] 做一致性检查。

use crate::cg::CgConfig;
use crate::constraints::ConstraintKind;
use crate::error::{SolverError, SolverResult};
use kf_energy::{ParallelConfig, TpeExponents};
use serde::{Deserialize, Serialize};

/// 线搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSearchConfig {
    /// Armijo 常数 c₁
    #[serde(default = "default_armijo")]
    pub armijo_c1: f64,
    /// 最大折半次数
    #[serde(default = "default_max_halvings")]
    pub max_halvings: usize,
    /// 首步步长
    #[serde(default = "default_initial_step")]
    pub initial_step: f64,
}

fn default_armijo() -> f64 {
    1e-4
}
fn default_max_halvings() -> usize {
    16
}
fn default_initial_step() -> f64 {
    1.0
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            armijo_c1: default_armijo(),
            max_halvings: default_max_halvings(),
            initial_step: default_initial_step(),
        }
    }
}

/// 流求解器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// 能量指数 α
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// 能量指数 β
    #[serde(default = "default_beta")]
    pub beta: f64,

    /// 可采性比率
    #[serde(default = "default_sep")]
    pub sep: f64,

    /// 是否用多重网格预条件（否则 Jacobi）
    #[serde(default = "default_true")]
    pub use_multigrid: bool,

    /// 是否用 Barnes-Hut 求能量/梯度（否则精确 O(m²)）
    #[serde(default = "default_true")]
    pub use_barnes_hut: bool,

    /// 全局约束；空表在构建求解器时退化为
    /// [重心, 边长]
    #[serde(default)]
    pub constraints: Vec<ConstraintKind>,

    /// 细分次数上限
    #[serde(default = "default_subdivision_limit")]
    pub subdivision_limit: usize,

    /// 步数上限（0 = 不限，供嵌入方使用）
    #[serde(default)]
    pub step_limit: usize,

    /// 目标边长尺度（1 = 不缩放）
    #[serde(default = "default_length_scale")]
    pub target_edge_length_scale: f64,

    /// 多重网格最粗层顶点数
    #[serde(default = "default_coarsest_size")]
    pub coarsest_size: usize,

    /// 线搜索配置
    #[serde(default)]
    pub line_search: LineSearchConfig,

    /// 内层 CG 配置
    #[serde(default)]
    pub inner: CgConfig,

    /// 并行配置
    #[serde(default)]
    pub parallel: ParallelConfig,
}

fn default_alpha() -> f64 {
    3.0
}
fn default_beta() -> f64 {
    6.0
}
fn default_sep() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_subdivision_limit() -> usize {
    2
}
fn default_length_scale() -> f64 {
    1.0
}
fn default_coarsest_size() -> usize {
    24
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            beta: default_beta(),
            sep: default_sep(),
            use_multigrid: true,
            use_barnes_hut: true,
            constraints: Vec::new(),
            subdivision_limit: default_subdivision_limit(),
            step_limit: 0,
            target_edge_length_scale: default_length_scale(),
            coarsest_size: default_coarsest_size(),
            line_search: LineSearchConfig::default(),
            inner: CgConfig::default(),
            parallel: ParallelConfig::default(),
        }
    }
}

impl FlowConfig {
    /// 验证配置一致性，返回已验证的能量指数
    pub fn validate(&self) -> SolverResult<TpeExponents> {
        let exps = TpeExponents::new(self.alpha, self.beta)?;
        if !(self.sep > 0.0) {
            return Err(SolverError::InvalidConfig {
                message: format!("sep = {} 必须为正", self.sep),
            });
        }
        if !(self.line_search.armijo_c1 > 0.0 && self.line_search.armijo_c1 < 1.0) {
            return Err(SolverError::InvalidConfig {
                message: format!("Armijo c₁ = {} 必须在 (0, 1)", self.line_search.armijo_c1),
            });
        }
        if !(self.target_edge_length_scale > 0.0) {
            return Err(SolverError::InvalidConfig {
                message: format!(
                    "目标边长尺度 {} 必须为正",
                    self.target_edge_length_scale
                ),
            });
        }
        if self.coarsest_size < 4 {
            return Err(SolverError::InvalidConfig {
                message: format!("最粗层顶点数 {} 过小", self.coarsest_size),
            });
        }
        Ok(exps)
    }
}
