// crates/kf_foundation/src/tolerance.rs

//! 共享数值容差常量
//!
//! 跨 crate 使用的几何与求解容差集中在此，避免魔数散落。

/// 几何退化判定阈值（边长、距离的下界）
pub const GEOM_EPS: f64 = 1e-12;

/// 可采性间隙下界：当点到簇心的距离低于此值时，
/// 可采性判据在有限精度下不可信，退回直接遍历
pub const ADMISSIBILITY_GAP: f64 = 1e-10;

/// 内层 CG 默认相对残差容差
pub const CG_DEFAULT_RTOL: f64 = 1e-2;

/// 约束回投影默认容差
pub const CONSTRAINT_TOL: f64 = 1e-6;

/// 近驻点判定阈值（Sobolev 与 L2 梯度的方向余弦下界）
pub const STATIONARY_COSINE: f64 = 1e-4;
