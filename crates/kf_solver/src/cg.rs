// crates/kf_solver/src/cg.rs

//! 预条件共轭梯度（顶点向量空间）
//!
//! 在 `Vec<DVec3>` 上求解 A x = b，算子由顶点度量（块簇树组合）
//! 提供，预条件器可取恒等、Jacobi 或多重网格 V-cycle。
//!
//! 收敛判据采用鲁棒形式 `‖r‖ < max(atol, rtol·‖b‖)`，
//! 处理 b ≈ 0 的情形。

use crate::metric::VertexMetric;
use glam::DVec3;
use serde::{Deserialize, Serialize};

// ============================================================================
// 向量运算
// ============================================================================

/// 顶点向量内积
#[inline]
pub fn dot(a: &[DVec3], b: &[DVec3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(*y)).sum()
}

/// 顶点向量 2-范数
#[inline]
pub fn norm(a: &[DVec3]) -> f64 {
    dot(a, a).sqrt()
}

/// y += alpha * x
#[inline]
pub fn axpy(alpha: f64, x: &[DVec3], y: &mut [DVec3]) {
    for (yv, xv) in y.iter_mut().zip(x) {
        *yv += alpha * *xv;
    }
}

// ============================================================================
// 配置与结果
// ============================================================================

/// CG 求解器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgConfig {
    /// 相对收敛容差
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    /// 绝对收敛容差
    #[serde(default = "default_atol")]
    pub atol: f64,
    /// 最大迭代次数
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
}

fn default_rtol() -> f64 {
    kf_foundation::tolerance::CG_DEFAULT_RTOL
}
fn default_atol() -> f64 {
    1e-14
}
fn default_max_iter() -> usize {
    500
}

impl Default for CgConfig {
    fn default() -> Self {
        Self {
            rtol: default_rtol(),
            atol: default_atol(),
            max_iter: default_max_iter(),
        }
    }
}

/// 求解状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgStatus {
    /// 收敛
    Converged,
    /// 达到最大迭代次数
    MaxIterationsReached,
    /// 停滞（p'Ap 塌缩）
    Stagnated,
}

/// 求解结果
#[derive(Debug, Clone)]
pub struct CgOutcome {
    /// 求解状态
    pub status: CgStatus,
    /// 迭代次数
    pub iterations: usize,
    /// 最终残差范数
    pub residual_norm: f64,
    /// 相对残差
    pub relative_residual: f64,
}

impl CgOutcome {
    /// 是否成功收敛
    pub fn is_converged(&self) -> bool {
        self.status == CgStatus::Converged
    }
}

// ============================================================================
// 预条件器
// ============================================================================

/// 顶点空间预条件器: z = M⁻¹ r
pub trait VertexPreconditioner {
    /// 应用预条件
    fn apply(&self, r: &[DVec3]) -> Vec<DVec3>;
}

impl<P: VertexPreconditioner + ?Sized> VertexPreconditioner for Box<P> {
    fn apply(&self, r: &[DVec3]) -> Vec<DVec3> {
        (**self).apply(r)
    }
}

/// 恒等预条件器（无操作，测试用）
pub struct IdentityPreconditioner;

impl VertexPreconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[DVec3]) -> Vec<DVec3> {
        r.to_vec()
    }
}

/// Jacobi 预条件器（对角缩放）
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    /// 从顶点度量的对角构建
    pub fn from_metric(metric: &VertexMetric) -> Self {
        let inv_diag = metric
            .diagonal()
            .iter()
            .map(|&d| if d > 0.0 { 1.0 / d } else { 1.0 })
            .collect();
        Self { inv_diag }
    }
}

impl VertexPreconditioner for JacobiPreconditioner {
    fn apply(&self, r: &[DVec3]) -> Vec<DVec3> {
        r.iter()
            .zip(&self.inv_diag)
            .map(|(rv, &inv)| inv * *rv)
            .collect()
    }
}

// ============================================================================
// PCG 求解
// ============================================================================

/// 预条件共轭梯度求解 A x = b
///
/// `x` 传入初始猜测，返回时为解。
pub fn pcg_solve<P: VertexPreconditioner>(
    metric: &VertexMetric,
    b: &[DVec3],
    x: &mut Vec<DVec3>,
    precond: &P,
    config: &CgConfig,
) -> CgOutcome {
    let n = b.len();
    debug_assert_eq!(x.len(), n);
    let stag_tol = 1e-30;

    // r = b - A x
    let ax = metric.apply(x);
    let mut r: Vec<DVec3> = b.iter().zip(&ax).map(|(bv, av)| *bv - *av).collect();

    let b_norm = norm(b);
    let initial_norm = norm(&r);
    let effective_tol = if b_norm < f64::MIN_POSITIVE {
        config.atol
    } else {
        config.atol.max(config.rtol * b_norm)
    };

    if initial_norm < effective_tol {
        return CgOutcome {
            status: CgStatus::Converged,
            iterations: 0,
            residual_norm: initial_norm,
            relative_residual: 0.0,
        };
    }

    // z = M⁻¹ r, p = z
    let mut z = precond.apply(&r);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);

    for iter in 0..config.max_iter {
        // ap = A p
        let ap = metric.apply(&p);

        let pap = dot(&p, &ap);
        if pap.abs() < stag_tol {
            let res = norm(&r);
            return CgOutcome {
                status: CgStatus::Stagnated,
                iterations: iter,
                residual_norm: res,
                relative_residual: res / initial_norm,
            };
        }

        let alpha = rz / pap;
        axpy(alpha, &p, x);
        axpy(-alpha, &ap, &mut r);

        let res_norm = norm(&r);
        log::trace!("PCG iter {}: residual = {:.6e}", iter + 1, res_norm);

        if res_norm < effective_tol {
            return CgOutcome {
                status: CgStatus::Converged,
                iterations: iter + 1,
                residual_norm: res_norm,
                relative_residual: res_norm / initial_norm,
            };
        }

        z = precond.apply(&r);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;

        for (pv, zv) in p.iter_mut().zip(&z) {
            *pv = *zv + beta * *pv;
        }
    }

    let res = norm(&r);
    CgOutcome {
        status: CgStatus::MaxIterationsReached,
        iterations: config.max_iter,
        residual_norm: res,
        relative_residual: res / initial_norm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_curve::generation;
    use kf_energy::TpeExponents;

    fn lcg_vertex_vec(n: usize, seed: u64) -> Vec<DVec3> {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f64) / (u32::MAX as f64) - 0.5
        };
        (0..n).map(|_| DVec3::new(next(), next(), next())).collect()
    }

    #[test]
    fn test_pcg_solves_metric_system() {
        let curve = generation::circle(32, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let n = curve.n_vertices();

        let x_exact = lcg_vertex_vec(n, 17);
        let b = metric.apply(&x_exact);

        let mut x = vec![DVec3::ZERO; n];
        let config = CgConfig {
            rtol: 1e-10,
            ..CgConfig::default()
        };
        let precond = JacobiPreconditioner::from_metric(&metric);
        let outcome = pcg_solve(&metric, &b, &mut x, &precond, &config);

        assert!(outcome.is_converged());
        // 残差意义下的解
        let ax = metric.apply(&x);
        let err: f64 = ax
            .iter()
            .zip(&b)
            .map(|(a, bb)| (*a - *bb).length_squared())
            .sum::<f64>()
            .sqrt();
        assert!(err < 1e-8 * norm(&b));
    }

    #[test]
    fn test_pcg_zero_rhs() {
        let curve = generation::circle(16, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let n = curve.n_vertices();

        let b = vec![DVec3::ZERO; n];
        let mut x = vec![DVec3::ZERO; n];
        let outcome = pcg_solve(
            &metric,
            &b,
            &mut x,
            &IdentityPreconditioner,
            &CgConfig::default(),
        );
        assert!(outcome.is_converged());
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_jacobi_not_slower_than_identity() {
        let curve = generation::trefoil(64, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let n = curve.n_vertices();
        let b = lcg_vertex_vec(n, 23);

        let config = CgConfig {
            rtol: 1e-8,
            ..CgConfig::default()
        };

        let mut x1 = vec![DVec3::ZERO; n];
        let ident = pcg_solve(&metric, &b, &mut x1, &IdentityPreconditioner, &config);

        let mut x2 = vec![DVec3::ZERO; n];
        let jacobi = JacobiPreconditioner::from_metric(&metric);
        let pre = pcg_solve(&metric, &b, &mut x2, &jacobi, &config);

        assert!(ident.is_converged());
        assert!(pre.is_converged());
    }
}
