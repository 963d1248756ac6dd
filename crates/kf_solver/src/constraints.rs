// crates/kf_solver/src/constraints.rs

//! 约束集
//!
//! 把作用在曲线上的线性（化）等式约束枚举为标量行 φ_k(x) = 0，
//! 提供残差求值与在当前位置线性化的稀疏 Jacobian 行。
//!
//! # 约束种类
//!
//! - **重心**: 顶点算术重心固定（3 行，线性）
//! - **边长**: 每条边长度固定到目标值（每边一行，非线性，逐步线性化）
//! - **钉固顶点**: 位置固定（每顶点 3 行，线性）
//! - **钉固切向**: 关联两边方向差固定（每顶点 3 行，逐步线性化）
//! - **曲面钉固**: 隐式 SDF = 0（每顶点一行，逐步线性化）
//!
//! 重心/边长由配置开启；钉固行直接从曲线的钉固标志派生。
//! 边长目标可整体缩放，用于向目标边长尺度渐进。

use crate::surface::ImplicitSurface;
use std::sync::Arc;
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_foundation::{EdgeIndex, VertexIndex};
use serde::{Deserialize, Serialize};

/// 配置层可选的全局约束种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// 固定顶点重心
    Barycenter,
    /// 固定每条边长度
    EdgeLengths,
}

/// 单条标量约束行
#[derive(Debug, Clone)]
enum Constraint {
    /// 重心某坐标分量
    BarycenterCoord { axis: usize, target: f64 },
    /// 边长
    EdgeLength { edge: EdgeIndex, target: f64 },
    /// 钉固顶点某坐标分量
    PinnedVertexCoord {
        vertex: VertexIndex,
        axis: usize,
        target: f64,
    },
    /// 钉固切向：关联两边单位方向差的某分量
    TangentDiffCoord {
        edge_in: EdgeIndex,
        edge_out: EdgeIndex,
        axis: usize,
        target: f64,
    },
    /// 曲面钉固
    SurfacePin { vertex: VertexIndex },
}

/// 约束集
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
    surface: Option<Arc<dyn ImplicitSurface>>,
}

impl ConstraintSet {
    /// 从配置与曲线钉固标志枚举约束行
    ///
    /// 目标值在调用时刻的几何上捕获。曲面钉固行只在提供了
    /// 隐式曲面时生成。
    pub fn build(
        curve: &CurveNetwork,
        kinds: &[ConstraintKind],
        surface: Option<Arc<dyn ImplicitSurface>>,
    ) -> Self {
        let mut constraints = Vec::new();

        if kinds.contains(&ConstraintKind::Barycenter) {
            let b = curve.barycenter();
            for axis in 0..3 {
                constraints.push(Constraint::BarycenterCoord {
                    axis,
                    target: b[axis],
                });
            }
        }

        if kinds.contains(&ConstraintKind::EdgeLengths) {
            for e in 0..curve.n_edges() {
                constraints.push(Constraint::EdgeLength {
                    edge: EdgeIndex::from_usize(e),
                    target: curve.edge_length(e),
                });
            }
        }

        for v in 0..curve.n_vertices() {
            if curve.is_pinned(v) {
                let p = curve.positions()[v];
                for axis in 0..3 {
                    constraints.push(Constraint::PinnedVertexCoord {
                        vertex: VertexIndex::from_usize(v),
                        axis,
                        target: p[axis],
                    });
                }
            }

            if curve.is_tangent_pinned(v) {
                let edges = curve.vertex_edges(v);
                if edges.len() == 2 {
                    let (e0, e1) = (edges[0], edges[1]);
                    let diff = curve.edge_tangent(e1 as usize) - curve.edge_tangent(e0 as usize);
                    for axis in 0..3 {
                        constraints.push(Constraint::TangentDiffCoord {
                            edge_in: EdgeIndex::new(e0),
                            edge_out: EdgeIndex::new(e1),
                            axis,
                            target: diff[axis],
                        });
                    }
                } else {
                    log::warn!("顶点 {} 价 {} ≠ 2, 忽略切向钉固", v, edges.len());
                }
            }

            if curve.is_surface_pinned(v) {
                if surface.is_some() {
                    constraints.push(Constraint::SurfacePin {
                        vertex: VertexIndex::from_usize(v),
                    });
                } else {
                    log::warn!("顶点 {} 要求曲面钉固但未提供隐式曲面", v);
                }
            }
        }

        Self {
            constraints,
            surface,
        }
    }

    /// 约束行数
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// 在当前几何上求约束残差 φ(x)
    pub fn values(&self, curve: &CurveNetwork) -> Vec<f64> {
        self.constraints
            .iter()
            .map(|c| self.value_of(c, curve))
            .collect()
    }

    /// 残差 ∞-范数
    pub fn max_violation(&self, curve: &CurveNetwork) -> f64 {
        self.values(curve)
            .into_iter()
            .fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// 在当前位置线性化全部 Jacobian 行
    ///
    /// 每行表示为 (顶点, 系数向量) 的稀疏列表：
    /// J_k dx = Σ coeff · dx_v。
    pub fn jacobian_rows(&self, curve: &CurveNetwork) -> Vec<Vec<(u32, DVec3)>> {
        self.constraints
            .iter()
            .map(|c| self.row_of(c, curve))
            .collect()
    }

    /// 整体缩放边长目标（向目标边长尺度渐进）
    pub fn scale_edge_length_targets(&mut self, factor: f64) {
        for c in &mut self.constraints {
            if let Constraint::EdgeLength { target, .. } = c {
                *target *= factor;
            }
        }
    }

    fn value_of(&self, c: &Constraint, curve: &CurveNetwork) -> f64 {
        match *c {
            Constraint::BarycenterCoord { axis, target } => curve.barycenter()[axis] - target,
            Constraint::EdgeLength { edge, target } => curve.edge_length(edge.get()) - target,
            Constraint::PinnedVertexCoord {
                vertex,
                axis,
                target,
            } => curve.positions()[vertex.get()][axis] - target,
            Constraint::TangentDiffCoord {
                edge_in,
                edge_out,
                axis,
                target,
                ..
            } => {
                let diff =
                    curve.edge_tangent(edge_out.get()) - curve.edge_tangent(edge_in.get());
                diff[axis] - target
            }
            Constraint::SurfacePin { vertex } => {
                let surface = self.surface.as_ref().expect("曲面钉固行必有曲面");
                surface.value(curve.positions()[vertex.get()])
            }
        }
    }

    fn row_of(&self, c: &Constraint, curve: &CurveNetwork) -> Vec<(u32, DVec3)> {
        match *c {
            Constraint::BarycenterCoord { axis, .. } => {
                let n = curve.n_vertices();
                let mut coeff = DVec3::ZERO;
                coeff[axis] = 1.0 / n as f64;
                (0..n as u32).map(|v| (v, coeff)).collect()
            }
            Constraint::EdgeLength { edge, .. } => {
                let [u, v] = curve.edge(edge.get());
                let t = curve.edge_tangent(edge.get());
                // φ = ‖x_v − x_u‖ − L: ∂φ/∂x_v = t, ∂φ/∂x_u = −t
                vec![(u, -t), (v, t)]
            }
            Constraint::PinnedVertexCoord { vertex, axis, .. } => {
                let mut coeff = DVec3::ZERO;
                coeff[axis] = 1.0;
                vec![(vertex.raw(), coeff)]
            }
            Constraint::TangentDiffCoord {
                edge_in,
                edge_out,
                axis,
                ..
            } => {
                // ∂T_e[c]/∂x_next = (e_c − T[c] T)/ℓ, ∂/∂x_prev 取负
                let mut coeffs: Vec<(u32, DVec3)> = Vec::with_capacity(4);
                for (e, sign) in [(edge_out, 1.0), (edge_in, -1.0)] {
                    let [u, v] = curve.edge(e.get());
                    let t = curve.edge_tangent(e.get());
                    let len = curve.edge_length(e.get());
                    let mut row = -t[axis] * t;
                    row[axis] += 1.0;
                    row *= sign / len;
                    coeffs.push((v, row));
                    coeffs.push((u, -row));
                }
                coeffs
            }
            Constraint::SurfacePin { vertex } => {
                let surface = self.surface.as_ref().expect("曲面钉固行必有曲面");
                let grad = surface.gradient(curve.positions()[vertex.get()]);
                vec![(vertex.raw(), grad)]
            }
        }
    }
}
