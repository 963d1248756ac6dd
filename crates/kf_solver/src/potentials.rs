// crates/kf_solver/src/potentials.rs

//! 附加势能
//!
//! 切点能量之外可叠加的势能项，以带权标记变体建模，
//! 能量与梯度走同一分发：
//!
//! - [`Potential::TotalLength`]: 总长度惩罚
//! - [`Potential::LengthDifference`]: 相邻边长差惩罚
//! - [`Potential::PinBending`]: 钉固切向顶点处的弯折惩罚
//! - [`Potential::VectorField`]: 切向-场对齐能量
//! - [`Potential::Plane`] / [`Potential::Sphere`]: 平面/球面障碍排斥
//!
//! 网格障碍消费外部网格数据，留在核心之外。

use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_foundation::tolerance::GEOM_EPS;
use serde::{Deserialize, Serialize};

/// 矢量场种类
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum VectorFieldKind {
    /// 常矢量场
    Constant(DVec3),
    /// 绕 z 轴的环向场 X(p) = (−p_y, p_x, 0)
    Circular,
}

impl VectorFieldKind {
    /// 场值
    fn sample(&self, p: DVec3) -> DVec3 {
        match *self {
            Self::Constant(x) => x,
            Self::Circular => DVec3::new(-p.y, p.x, 0.0),
        }
    }

    /// Jacobian 转置作用: J_Xᵀ d
    fn jacobian_transpose(&self, d: DVec3) -> DVec3 {
        match *self {
            Self::Constant(_) => DVec3::ZERO,
            Self::Circular => DVec3::new(d.y, -d.x, 0.0),
        }
    }
}

/// 附加势能（带权标记变体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Potential {
    /// 总长度: E = w Σ ℓ_e
    TotalLength {
        /// 权重
        weight: f64,
    },
    /// 相邻边长差: E = ½ w Σ_{价2顶点} (ℓ₁ − ℓ₀)²
    LengthDifference {
        /// 权重
        weight: f64,
    },
    /// 钉固切向顶点的弯折: E = w Σ (1 + t̂₀·t̂₁)，t̂ 为背离顶点的单位方向
    PinBending {
        /// 权重
        weight: f64,
    },
    /// 切向-场对齐: E = −w Σ (x_v − x_u)·X(m_e)
    VectorField {
        /// 场种类
        kind: VectorFieldKind,
        /// 权重
        weight: f64,
    },
    /// 平面障碍: E = w Σ ℓ_e |n·(m_e − c)|^{−p}
    Plane {
        /// 平面上一点
        center: DVec3,
        /// 单位法向
        normal: DVec3,
        /// 排斥指数（惯例取 β − α）
        exponent: f64,
        /// 权重
        weight: f64,
    },
    /// 球面障碍: E = w Σ ℓ_e |‖m_e − c‖ − r|^{−p}
    Sphere {
        /// 球心
        center: DVec3,
        /// 半径
        radius: f64,
        /// 排斥指数（惯例取 β − α）
        exponent: f64,
        /// 权重
        weight: f64,
    },
}

impl Potential {
    /// 势能值
    pub fn energy(&self, curve: &CurveNetwork) -> f64 {
        match *self {
            Self::TotalLength { weight } => weight * curve.total_length(),

            Self::LengthDifference { weight } => {
                let mut acc = 0.0;
                for v in 0..curve.n_vertices() {
                    let edges = curve.vertex_edges(v);
                    if edges.len() == 2 {
                        let d = curve.edge_length(edges[1] as usize)
                            - curve.edge_length(edges[0] as usize);
                        acc += d * d;
                    }
                }
                0.5 * weight * acc
            }

            Self::PinBending { weight } => {
                let mut acc = 0.0;
                for v in 0..curve.n_vertices() {
                    if let Some((u1, u2, _, _, _, _)) = bending_frame(curve, v) {
                        acc += 1.0 + u1.dot(u2);
                    }
                }
                weight * acc
            }

            Self::VectorField { kind, weight } => {
                let mut acc = 0.0;
                for e in 0..curve.n_edges() {
                    let [u, v] = curve.edge(e);
                    let d = curve.positions()[v as usize] - curve.positions()[u as usize];
                    acc += d.dot(kind.sample(curve.edge_midpoint(e)));
                }
                -weight * acc
            }

            Self::Plane {
                center,
                normal,
                exponent,
                weight,
            } => {
                let mut acc = 0.0;
                for e in 0..curve.n_edges() {
                    let d = normal.dot(curve.edge_midpoint(e) - center).abs().max(GEOM_EPS);
                    acc += curve.edge_length(e) * d.powf(-exponent);
                }
                weight * acc
            }

            Self::Sphere {
                center,
                radius,
                exponent,
                weight,
            } => {
                let mut acc = 0.0;
                for e in 0..curve.n_edges() {
                    let rho = (curve.edge_midpoint(e) - center).length();
                    let d = (rho - radius).abs().max(GEOM_EPS);
                    acc += curve.edge_length(e) * d.powf(-exponent);
                }
                weight * acc
            }
        }
    }

    /// 把势能梯度累加到顶点梯度缓冲
    pub fn accumulate_gradient(&self, curve: &CurveNetwork, out: &mut [DVec3]) {
        debug_assert_eq!(out.len(), curve.n_vertices());
        match *self {
            Self::TotalLength { weight } => {
                for e in 0..curve.n_edges() {
                    let [u, v] = curve.edge(e);
                    let t = curve.edge_tangent(e);
                    out[u as usize] -= weight * t;
                    out[v as usize] += weight * t;
                }
            }

            Self::LengthDifference { weight } => {
                for vert in 0..curve.n_vertices() {
                    let edges = curve.vertex_edges(vert);
                    if edges.len() != 2 {
                        continue;
                    }
                    let (e0, e1) = (edges[0] as usize, edges[1] as usize);
                    let d = curve.edge_length(e1) - curve.edge_length(e0);
                    for (e, sign) in [(e1, 1.0), (e0, -1.0)] {
                        let [u, v] = curve.edge(e);
                        let t = curve.edge_tangent(e);
                        out[u as usize] -= weight * d * sign * t;
                        out[v as usize] += weight * d * sign * t;
                    }
                }
            }

            Self::PinBending { weight } => {
                for v in 0..curve.n_vertices() {
                    if let Some((u1, u2, w1, w2, l1, l2)) = bending_frame(curve, v) {
                        let g1 = weight * (u2 - u1.dot(u2) * u1) / l1;
                        let g2 = weight * (u1 - u2.dot(u1) * u2) / l2;
                        out[w1] += g1;
                        out[w2] += g2;
                        out[v] -= g1 + g2;
                    }
                }
            }

            Self::VectorField { kind, weight } => {
                for e in 0..curve.n_edges() {
                    let [u, v] = curve.edge(e);
                    let m = curve.edge_midpoint(e);
                    let d = curve.positions()[v as usize] - curve.positions()[u as usize];
                    let x = kind.sample(m);
                    let jt = 0.5 * kind.jacobian_transpose(d);
                    out[u as usize] -= weight * (-x + jt);
                    out[v as usize] -= weight * (x + jt);
                }
            }

            Self::Plane {
                center,
                normal,
                exponent,
                weight,
            } => {
                for e in 0..curve.n_edges() {
                    let [u, v] = curve.edge(e);
                    let t = curve.edge_tangent(e);
                    let len = curve.edge_length(e);
                    let signed = normal.dot(curve.edge_midpoint(e) - center);
                    let d = signed.abs().max(GEOM_EPS);
                    let value = d.powf(-exponent);
                    let radial =
                        -0.5 * weight * exponent * len * d.powf(-exponent - 1.0) * signed.signum()
                            * normal;
                    out[u as usize] += radial - weight * value * t;
                    out[v as usize] += radial + weight * value * t;
                }
            }

            Self::Sphere {
                center,
                radius,
                exponent,
                weight,
            } => {
                for e in 0..curve.n_edges() {
                    let [u, v] = curve.edge(e);
                    let t = curve.edge_tangent(e);
                    let len = curve.edge_length(e);
                    let m = curve.edge_midpoint(e);
                    let offset = m - center;
                    let rho = offset.length().max(GEOM_EPS);
                    let signed = rho - radius;
                    let d = signed.abs().max(GEOM_EPS);
                    let value = d.powf(-exponent);
                    let radial = -0.5 * weight * exponent * len * d.powf(-exponent - 1.0)
                        * signed.signum()
                        * (offset / rho);
                    out[u as usize] += radial - weight * value * t;
                    out[v as usize] += radial + weight * value * t;
                }
            }
        }
    }
}

/// 钉固切向顶点的弯折局部几何:
/// (背离方向 u1, u2, 对端顶点 w1, w2, 边长 l1, l2)
#[allow(clippy::type_complexity)]
fn bending_frame(
    curve: &CurveNetwork,
    v: usize,
) -> Option<(DVec3, DVec3, usize, usize, f64, f64)> {
    if !curve.is_tangent_pinned(v) {
        return None;
    }
    let edges = curve.vertex_edges(v);
    if edges.len() != 2 {
        return None;
    }

    let mut frames = Vec::with_capacity(2);
    for &e in edges {
        let [a, b] = curve.edge(e as usize);
        let w = if a as usize == v { b } else { a } as usize;
        let d = curve.positions()[w] - curve.positions()[v];
        let len = d.length();
        if len < GEOM_EPS {
            return None;
        }
        frames.push((d / len, w, len));
    }

    let (u1, w1, l1) = frames[0];
    let (u2, w2, l2) = frames[1];
    Some((u1, u2, w1, w2, l1, l2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_curve::generation;

    /// 有限差分梯度检查
    fn fd_check(potential: &Potential, curve: &CurveNetwork) {
        let n = curve.n_vertices();
        let mut grad = vec![DVec3::ZERO; n];
        potential.accumulate_gradient(curve, &mut grad);

        let mut state = 55u64;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f64) / (u32::MAX as f64) - 0.5
        };
        let dir: Vec<DVec3> = (0..n).map(|_| DVec3::new(next(), next(), next())).collect();

        let h = 1e-6;
        let shift = |sign: f64| {
            let mut c = curve.clone();
            for (p, d) in c.positions_mut().iter_mut().zip(&dir) {
                *p += sign * h * *d;
            }
            potential.energy(&c)
        };
        let fd = (shift(1.0) - shift(-1.0)) / (2.0 * h);
        let analytic: f64 = grad.iter().zip(&dir).map(|(g, d)| g.dot(*d)).sum();
        assert!(
            (fd - analytic).abs() < 1e-5 * (1.0 + analytic.abs()),
            "fd={} analytic={}",
            fd,
            analytic
        );
    }

    #[test]
    fn test_total_length_energy() {
        let curve = generation::circle(16, 1.0);
        let p = Potential::TotalLength { weight: 2.0 };
        assert!((p.energy(&curve) - 2.0 * curve.total_length()).abs() < 1e-12);
        fd_check(&p, &curve);
    }

    #[test]
    fn test_length_difference_zero_on_uniform() {
        // 正多边形所有边等长，长度差势能为零
        let curve = generation::circle(16, 1.0);
        let p = Potential::LengthDifference { weight: 1.0 };
        assert!(p.energy(&curve) < 1e-20);

        let curve2 = generation::random_polyline(16, 3);
        fd_check(&p, &curve2);
    }

    #[test]
    fn test_pin_bending_gradient() {
        let mut curve = generation::trefoil(24, 1.0);
        curve.pin_tangent(7);
        let p = Potential::PinBending { weight: 1.5 };
        assert!(p.energy(&curve) > 0.0);
        fd_check(&p, &curve);
    }

    #[test]
    fn test_vector_field_gradients() {
        let curve = generation::trefoil(16, 1.0);
        fd_check(
            &Potential::VectorField {
                kind: VectorFieldKind::Constant(DVec3::new(1.0, 0.0, 1.0)),
                weight: 0.7,
            },
            &curve,
        );
        fd_check(
            &Potential::VectorField {
                kind: VectorFieldKind::Circular,
                weight: 0.7,
            },
            &curve,
        );
    }

    #[test]
    fn test_obstacle_gradients() {
        let curve = generation::circle(16, 1.0);
        fd_check(
            &Potential::Plane {
                center: DVec3::new(0.0, 0.0, -2.0),
                normal: DVec3::Z,
                exponent: 3.0,
                weight: 1.0,
            },
            &curve,
        );
        fd_check(
            &Potential::Sphere {
                center: DVec3::new(0.0, 0.0, 4.0),
                radius: 1.0,
                exponent: 3.0,
                weight: 1.0,
            },
            &curve,
        );
    }
}
