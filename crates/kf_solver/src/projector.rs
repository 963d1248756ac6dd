// crates/kf_solver/src/projector.rs

//! 鞍点投影器
//!
//! 在约束切空间内求 Sobolev 梯度等价于解鞍点系统
//!
//! ```text
//! [ A  Jᵀ ] [ ĝ ]   [ g ]
//! [ J  0  ] [ λ ] = [ 0 ]
//! ```
//!
//! 采用标准 Schur 补消元：每个约束行解一次 A z_k = Jᵀ e_k
//! （多重网格 PCG），显式装配 c×c Schur 矩阵 S = J A⁻¹ Jᵀ 并做
//! Cholesky 分解。列向量 z_k 被缓存：梯度投影 ĝ = z − Σ λ_k z_k
//! 与回投影校正 Δx = Σ μ_k z_k 都直接复用，一步之内无需再解
//! 带 Jᵀ 的系统。

use crate::cg::{self, CgConfig, VertexPreconditioner};
use crate::dense::{CholeskyFactor, DenseMatrix};
use crate::error::{SolverError, SolverResult};
use crate::metric::VertexMetric;
use glam::DVec3;

/// 鞍点投影器
///
/// 绑定构建时刻的线性化；按步重建。
pub struct SaddleProjector {
    /// 线性化的 Jacobian 行
    rows: Vec<Vec<(u32, DVec3)>>,
    /// 缓存列 z_k = A⁻¹ Jᵀ e_k
    columns: Vec<Vec<DVec3>>,
    /// Schur 补的 Cholesky 因子
    schur_chol: Option<CholeskyFactor>,
    /// 构建期累计 CG 迭代数
    cg_iterations: usize,
}

impl SaddleProjector {
    /// 构建投影器：c 次度量求逆装配 Schur 补
    ///
    /// # 错误
    ///
    /// 任一内层 CG 未收敛返回 [`SolverError::NonConvergent`]；
    /// Schur 补非正定（冗余约束）返回
    /// [`SolverError::FactorizationFailed`]。
    pub fn build<P: VertexPreconditioner>(
        metric: &VertexMetric,
        precond: &P,
        cg_config: &CgConfig,
        rows: Vec<Vec<(u32, DVec3)>>,
    ) -> SolverResult<Self> {
        let n = metric.n_vertices();
        let c = rows.len();
        let mut cg_iterations = 0;

        let mut columns = Vec::with_capacity(c);
        for row in &rows {
            let rhs = scatter_row(row, n);
            let mut z = vec![DVec3::ZERO; n];
            let outcome = cg::pcg_solve(metric, &rhs, &mut z, precond, cg_config);
            cg_iterations += outcome.iterations;
            if !outcome.is_converged() {
                return Err(SolverError::NonConvergent {
                    iterations: outcome.iterations,
                    residual: outcome.relative_residual,
                });
            }
            columns.push(z);
        }

        let schur_chol = if c > 0 {
            let mut s = DenseMatrix::zeros(c);
            for (k, z) in columns.iter().enumerate() {
                for (j, row) in rows.iter().enumerate() {
                    s.set(j, k, apply_row(row, z));
                }
            }
            // CG 不精确性破坏微小的对称性，对称化后分解
            let mut sym = DenseMatrix::zeros(c);
            for i in 0..c {
                for j in 0..c {
                    sym.set(i, j, 0.5 * (s.at(i, j) + s.at(j, i)));
                }
            }
            Some(sym.cholesky()?)
        } else {
            None
        };

        Ok(Self {
            rows,
            columns,
            schur_chol,
            cg_iterations,
        })
    }

    /// 约束行数
    pub fn n_constraints(&self) -> usize {
        self.rows.len()
    }

    /// 构建期累计 CG 迭代数
    pub fn cg_iterations(&self) -> usize {
        self.cg_iterations
    }

    /// 把 A⁻¹g 投影到约束切空间: ĝ = z − Σ λ_k z_k, λ = S⁻¹(Jz)
    ///
    /// `z` 是已解出的无约束 Sobolev 梯度。
    pub fn project(&self, z: &[DVec3]) -> Vec<DVec3> {
        let Some(chol) = &self.schur_chol else {
            return z.to_vec();
        };

        let jz: Vec<f64> = self.rows.iter().map(|row| apply_row(row, z)).collect();
        let lambda = chol.solve(&jz);

        let mut out = z.to_vec();
        for (l, col) in lambda.iter().zip(&self.columns) {
            cg::axpy(-l, col, &mut out);
        }
        out
    }

    /// 回投影校正位移: Δx = Σ μ_k z_k, μ = S⁻¹ φ
    ///
    /// 调用方执行 x ← x − Δx。
    pub fn corrective_displacement(&self, phi: &[f64], n: usize) -> Vec<DVec3> {
        let mut out = vec![DVec3::ZERO; n];
        let Some(chol) = &self.schur_chol else {
            return out;
        };

        let mu = chol.solve(phi);
        for (m, col) in mu.iter().zip(&self.columns) {
            cg::axpy(*m, col, &mut out);
        }
        out
    }
}

/// (Jᵀ e_k) 的顶点向量形式
fn scatter_row(row: &[(u32, DVec3)], n: usize) -> Vec<DVec3> {
    let mut out = vec![DVec3::ZERO; n];
    for &(v, coeff) in row {
        out[v as usize] += coeff;
    }
    out
}

/// 标量行作用: (J x)_k
fn apply_row(row: &[(u32, DVec3)], x: &[DVec3]) -> f64 {
    row.iter().map(|&(v, coeff)| coeff.dot(x[v as usize])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg::JacobiPreconditioner;
    use crate::constraints::{ConstraintKind, ConstraintSet};
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

    fn tight_cg() -> CgConfig {
        CgConfig {
            rtol: 1e-10,
            ..CgConfig::default()
        }
    }

    #[test]
    fn test_projected_gradient_in_kernel_of_j() {
        let curve = generation::circle(24, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let set = ConstraintSet::build(&curve, &[ConstraintKind::Barycenter], None);
        let rows = set.jacobian_rows(&curve);
        let precond = JacobiPreconditioner::from_metric(&metric);

        let projector =
            SaddleProjector::build(&metric, &precond, &tight_cg(), rows.clone()).unwrap();

        let n = curve.n_vertices();
        let g = lcg_vertex_vec(n, 41);
        let mut z = vec![DVec3::ZERO; n];
        cg::pcg_solve(&metric, &g, &mut z, &precond, &tight_cg());
        let ghat = projector.project(&z);

        // J ĝ = 0
        for row in &rows {
            let jg = apply_row(row, &ghat);
            assert!(jg.abs() < 1e-7, "J ĝ = {}", jg);
        }
    }

    #[test]
    fn test_corrective_displacement_cancels_violation() {
        // 线性约束（重心）一步牛顿即可消除漂移
        let curve = generation::circle(24, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let set = ConstraintSet::build(&curve, &[ConstraintKind::Barycenter], None);
        let precond = JacobiPreconditioner::from_metric(&metric);
        let projector =
            SaddleProjector::build(&metric, &precond, &tight_cg(), set.jacobian_rows(&curve))
                .unwrap();

        // 人为平移破坏重心
        let mut moved = curve.clone();
        for p in moved.positions_mut() {
            *p += DVec3::new(0.1, -0.05, 0.02);
        }
        let phi = set.values(&moved);
        let delta = projector.corrective_displacement(&phi, moved.n_vertices());

        let positions: Vec<DVec3> = moved
            .positions()
            .iter()
            .zip(&delta)
            .map(|(p, d)| *p - *d)
            .collect();
        moved.set_positions(&positions);

        assert!(set.max_violation(&moved) < 1e-7);
    }

    #[test]
    fn test_empty_constraints_passthrough() {
        let curve = generation::circle(16, 1.0);
        let metric = VertexMetric::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let precond = JacobiPreconditioner::from_metric(&metric);
        let projector =
            SaddleProjector::build(&metric, &precond, &tight_cg(), Vec::new()).unwrap();

        let z = lcg_vertex_vec(curve.n_vertices(), 5);
        let out = projector.project(&z);
        assert_eq!(out.len(), z.len());
        for (a, b) in out.iter().zip(&z) {
            assert_eq!(a, b);
        }
    }
}
