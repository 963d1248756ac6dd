// crates/kf_solver/src/flow.rs

//! 外层流求解器
//!
//! 每步的编排：
//!
//! 1. 构建 BVH，装配能量 E₀ 与 L² 顶点梯度 g（切点能量 + 附加势能）
//! 2. 重建度量（块簇树）与多重网格层级，构建鞍点投影器
//! 3. 解 A z = g 并投影得约束切空间内的 Sobolev 梯度 ĝ
//! 4. 沿 −ĝ 回溯线搜索（Armijo 条件，步长自上次接受值的 2 倍起）
//! 5. 接受后做 ≤ 4 次牛顿回投影消除约束漂移，失败则整步回滚
//! 6. 边长目标向配置的目标尺度几何渐进
//! 7. 平均边长超过初始值 2 倍且未达细分上限时做中点细分
//!
//! 终止判据在外层：调用方依据步数、停滞或目标长度决定停止。
//! `sobo_norm_zero` 用 ⟨g, ĝ⟩ 的方向余弦作驻点代理上报。

use crate::cg::{self, JacobiPreconditioner, VertexPreconditioner};
use crate::config::FlowConfig;
use crate::constraints::{ConstraintKind, ConstraintSet};
use crate::error::{SolverError, SolverResult};
use crate::metric::VertexMetric;
use crate::multigrid::{MultigridHierarchy, MultigridPreconditioner};
use crate::potentials::Potential;
use crate::projector::SaddleProjector;
use crate::surface::ImplicitSurface;
use glam::DVec3;
use kf_curve::{subdivide, CurveNetwork};
use kf_energy::energy;
use kf_energy::{Bvh3d, TpeExponents};
use kf_foundation::tolerance::{CONSTRAINT_TOL, STATIONARY_COSINE};
use std::sync::Arc;

/// 回投影牛顿迭代上限
const MAX_BACKPROJECTIONS: usize = 4;

/// 每接受一步边长目标的渐进因子
const LENGTH_SCALE_GROWTH: f64 = 1.01;

/// 一步优化的结果
#[derive(Debug)]
pub struct StepOutcome {
    /// 步是否被接受（位置已更新）
    pub good_step: bool,
    /// 步前总能量
    pub energy_before: f64,
    /// 步后总能量（未接受时与步前相同）
    pub energy_after: f64,
    /// 接受的步长（未接受为 0）
    pub step_size: f64,
    /// 近驻点标志：⟨g, ĝ⟩/(‖g‖‖ĝ‖) ≤ 阈值
    pub sobo_norm_zero: bool,
    /// 本步是否触发细分
    pub subdivided: bool,
    /// 本步累计内层 CG 迭代数
    pub cg_iterations: usize,
    /// 失败记录（非进展步的原因）
    pub failure: Option<SolverError>,
}

/// 切点能量流求解器
///
/// 持有曲线与全部逐步重建的缓存（BVH、块簇树、多重网格、投影器）。
pub struct FlowSolver {
    curve: CurveNetwork,
    config: FlowConfig,
    exps: TpeExponents,
    kinds: Vec<ConstraintKind>,
    constraints: ConstraintSet,
    surface: Option<Arc<dyn ImplicitSurface>>,
    potentials: Vec<Potential>,
    initial_avg_length: f64,
    prev_step: f64,
    subdivide_count: usize,
    length_scale_factor: f64,
    step_count: usize,
}

impl FlowSolver {
    /// 创建流求解器
    ///
    /// 配置未指定约束时退化为 [重心, 边长]。
    pub fn new(curve: CurveNetwork, config: FlowConfig) -> SolverResult<Self> {
        Self::with_surface(curve, config, None)
    }

    /// 带隐式曲面（供曲面钉固约束）创建
    pub fn with_surface(
        curve: CurveNetwork,
        config: FlowConfig,
        surface: Option<Arc<dyn ImplicitSurface>>,
    ) -> SolverResult<Self> {
        let exps = config.validate()?;

        let kinds = if config.constraints.is_empty() {
            log::info!("未指定约束, 默认使用重心 + 边长");
            vec![ConstraintKind::Barycenter, ConstraintKind::EdgeLengths]
        } else {
            config.constraints.clone()
        };

        let constraints = ConstraintSet::build(&curve, &kinds, surface.clone());
        let initial_avg_length = curve.average_edge_length();
        let prev_step = 0.5 * config.line_search.initial_step;

        Ok(Self {
            curve,
            config,
            exps,
            kinds,
            constraints,
            surface,
            potentials: Vec::new(),
            initial_avg_length,
            prev_step,
            subdivide_count: 0,
            length_scale_factor: 1.0,
            step_count: 0,
        })
    }

    /// 当前曲线
    pub fn curve(&self) -> &CurveNetwork {
        &self.curve
    }

    /// 已执行步数
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// 已触发细分次数
    pub fn subdivide_count(&self) -> usize {
        self.subdivide_count
    }

    /// 边长目标是否已到达配置的目标尺度
    pub fn target_length_reached(&self) -> bool {
        (self.length_scale_factor - self.config.target_edge_length_scale).abs() < 1e-12
    }

    /// 叠加一个附加势能
    pub fn add_potential(&mut self, potential: Potential) {
        self.potentials.push(potential);
    }

    /// 外部更新顶点位置（嵌入方交互移动曲线时使用）
    ///
    /// 加速结构按步重建，无需显式失效；约束目标保持不变，
    /// 漂移由下一步的回投影处理。
    pub fn set_positions(&mut self, positions: &[DVec3]) {
        self.curve.set_positions(positions);
    }

    /// 当前几何上的总能量（切点能量 + 附加势能）
    pub fn total_energy(&self) -> f64 {
        let mut e = if self.config.use_barnes_hut {
            let bvh = Bvh3d::from_curve_with(&self.curve, &self.config.parallel);
            energy::evaluate_energy_with(
                &self.curve,
                &bvh,
                &self.exps,
                self.config.sep,
                &self.config.parallel,
            )
        } else {
            energy::evaluate_energy_exact(&self.curve, &self.exps)
        };
        for p in &self.potentials {
            e += p.energy(&self.curve);
        }
        e
    }

    /// 执行一步优化
    ///
    /// 构建级失败（块预算、配置、分解）通过 `Err` 返回；
    /// 非进展（线搜索/回投影/内层不收敛）记录在
    /// [`StepOutcome::failure`]，位置保持不变。
    pub fn step(&mut self) -> SolverResult<StepOutcome> {
        let n = self.curve.n_vertices();

        // 1. BVH 装配能量与 L² 梯度
        let bvh = Bvh3d::from_curve_with(&self.curve, &self.config.parallel);
        let energy_before = self.energy_with_bvh(&bvh);
        let mut g = vec![DVec3::ZERO; n];
        if self.config.use_barnes_hut {
            energy::evaluate_vertex_gradient_with(
                &self.curve,
                &bvh,
                &self.exps,
                self.config.sep,
                &self.config.parallel,
                &mut g,
            );
        } else {
            energy::evaluate_vertex_gradient_exact(&self.curve, &self.exps, &mut g);
        }
        for p in &self.potentials {
            p.accumulate_gradient(&self.curve, &mut g);
        }

        // 2. 度量与预条件器（按步重建：位置已变）
        let hierarchy: Option<MultigridHierarchy>;
        let standalone: Option<VertexMetric>;
        let (metric, precond): (&VertexMetric, Box<dyn VertexPreconditioner + '_>) =
            if self.config.use_multigrid {
                hierarchy = Some(MultigridHierarchy::build(
                    &self.curve,
                    self.config.sep,
                    self.exps,
                    self.config.coarsest_size,
                )?);
                standalone = None;
                let h = hierarchy.as_ref().expect("刚构建");
                (h.finest_metric(), Box::new(MultigridPreconditioner::new(h)))
            } else {
                hierarchy = None;
                standalone = Some(VertexMetric::new(
                    &self.curve,
                    self.config.sep,
                    self.exps,
                )?);
                let s = standalone.as_ref().expect("刚构建");
                (s, Box::new(JacobiPreconditioner::from_metric(s)))
            };

        // 3. 鞍点投影器（c 次度量求逆装配 Schur 补）
        let rows = self.constraints.jacobian_rows(&self.curve);
        let projector = match SaddleProjector::build(metric, &precond, &self.config.inner, rows) {
            Ok(p) => p,
            Err(err @ SolverError::NonConvergent { .. }) => {
                return Ok(self.no_progress(energy_before, false, err));
            }
            Err(err) => return Err(err),
        };
        let mut cg_iterations = projector.cg_iterations();

        // 4. Sobolev 梯度: ĝ = 投影(A⁻¹ g)
        let mut z = vec![DVec3::ZERO; n];
        let outcome = cg::pcg_solve(metric, &g, &mut z, &precond, &self.config.inner);
        cg_iterations += outcome.iterations;
        if !outcome.is_converged() {
            let err = SolverError::NonConvergent {
                iterations: outcome.iterations,
                residual: outcome.relative_residual,
            };
            return Ok(self.no_progress(energy_before, false, err));
        }
        let mut ghat = projector.project(&z);

        // 钉固顶点严格不动：钉固行是简单线性行，投影只到内层容差，
        // 这里把方向分量直接清零做精确施加
        let pinned: Vec<bool> = (0..n).map(|v| self.curve.is_pinned(v)).collect();
        for (gv, &is_pinned) in ghat.iter_mut().zip(&pinned) {
            if is_pinned {
                *gv = DVec3::ZERO;
            }
        }

        // 5. 驻点代理
        let sobo_dot = cg::dot(&g, &ghat);
        let g_norm = cg::norm(&g);
        let ghat_norm = cg::norm(&ghat);
        let denom = (g_norm * ghat_norm).max(f64::MIN_POSITIVE);
        let sobo_norm_zero = sobo_dot / denom <= STATIONARY_COSINE;

        if sobo_dot <= 0.0 {
            let err = SolverError::LineSearchExhausted { halvings: 0 };
            let mut out = self.no_progress(energy_before, sobo_norm_zero, err);
            out.cg_iterations = cg_iterations;
            return Ok(out);
        }

        // 6. 回溯线搜索
        let x0 = self.curve.positions().to_vec();
        let mut t = 2.0 * self.prev_step;
        let c1 = self.config.line_search.armijo_c1;
        let mut accepted = false;
        let mut halvings = 0;

        while halvings <= self.config.line_search.max_halvings {
            let trial: Vec<DVec3> = x0
                .iter()
                .zip(&ghat)
                .map(|(p, d)| *p - t * *d)
                .collect();
            self.curve.set_positions(&trial);
            let e_trial = self.total_energy();

            if e_trial <= energy_before - c1 * t * sobo_dot {
                accepted = true;
                break;
            }
            t *= 0.5;
            halvings += 1;
        }

        if !accepted {
            self.curve.set_positions(&x0);
            let err = SolverError::LineSearchExhausted { halvings };
            let mut out = self.no_progress(energy_before, sobo_norm_zero, err);
            out.cg_iterations = cg_iterations;
            return Ok(out);
        }
        self.prev_step = t;

        // 7. 回投影消除约束漂移
        for _ in 0..MAX_BACKPROJECTIONS {
            if self.constraints.max_violation(&self.curve) < CONSTRAINT_TOL {
                break;
            }
            let phi = self.constraints.values(&self.curve);
            let delta = projector.corrective_displacement(&phi, n);
            let corrected: Vec<DVec3> = self
                .curve
                .positions()
                .iter()
                .zip(delta.iter().zip(&pinned))
                .map(|(p, (d, &is_pinned))| if is_pinned { *p } else { *p - *d })
                .collect();
            self.curve.set_positions(&corrected);
        }

        let violation = self.constraints.max_violation(&self.curve);
        if violation >= CONSTRAINT_TOL {
            self.curve.set_positions(&x0);
            let err = SolverError::ConstraintProjectionFailed {
                iterations: MAX_BACKPROJECTIONS,
                violation,
            };
            let mut out = self.no_progress(energy_before, sobo_norm_zero, err);
            out.cg_iterations = cg_iterations;
            return Ok(out);
        }

        // 回投影后的真实能量
        let energy_after = self.total_energy();

        // 8. 边长目标渐进
        if (self.config.target_edge_length_scale - 1.0).abs() > 1e-12 {
            let target = self.config.target_edge_length_scale;
            let old = self.length_scale_factor;
            let new = if target > 1.0 {
                (old * LENGTH_SCALE_GROWTH).min(target)
            } else {
                (old / LENGTH_SCALE_GROWTH).max(target)
            };
            self.constraints.scale_edge_length_targets(new / old);
            self.length_scale_factor = new;
        }

        // 9. 细分触发
        let mut subdivided = false;
        if self.curve.average_edge_length() > 2.0 * self.initial_avg_length
            && self.subdivide_count < self.config.subdivision_limit
        {
            self.curve = subdivide::subdivide(&self.curve);
            self.subdivide_count += 1;
            subdivided = true;
            // 依赖旧拓扑的约束目标重建（尺度进度保留）
            self.constraints =
                ConstraintSet::build(&self.curve, &self.kinds, self.surface.clone());
            log::info!(
                "细分: 边数 {} → {}",
                self.curve.n_edges() / 2,
                self.curve.n_edges()
            );
        }

        self.step_count += 1;
        log::info!(
            "step {}: E {:.6e} → {:.6e}, t = {:.3e}, CG {} 次",
            self.step_count,
            energy_before,
            energy_after,
            t,
            cg_iterations
        );

        Ok(StepOutcome {
            good_step: true,
            energy_before,
            energy_after,
            step_size: t,
            sobo_norm_zero,
            subdivided,
            cg_iterations,
            failure: None,
        })
    }

    fn energy_with_bvh(&self, bvh: &Bvh3d) -> f64 {
        let mut e = if self.config.use_barnes_hut {
            energy::evaluate_energy_with(
                &self.curve,
                bvh,
                &self.exps,
                self.config.sep,
                &self.config.parallel,
            )
        } else {
            energy::evaluate_energy_exact(&self.curve, &self.exps)
        };
        for p in &self.potentials {
            e += p.energy(&self.curve);
        }
        e
    }

    fn no_progress(&self, energy: f64, sobo_norm_zero: bool, failure: SolverError) -> StepOutcome {
        log::warn!("非进展步: {}", failure);
        StepOutcome {
            good_step: false,
            energy_before: energy,
            energy_after: energy,
            step_size: 0.0,
            sobo_norm_zero,
            subdivided: false,
            cg_iterations: 0,
            failure: Some(failure),
        }
    }
}
