// crates/kf_energy/src/energy.rs

//! 切点能量与梯度求值
//!
//! 离散能量按边对定义：
//!
//! $$ E = \tfrac12 \sum_{i \ne j} k_{\alpha,\beta}(m_i, m_j, T_i)\,\ell_i \ell_j $$
//!
//! （有序对求和，乘 ½ 消去重复计数）。Barnes-Hut 路径对每条边
//! 自根遍历 BVH：可采节点以 (质心, 平均切向, 总质量) 整体代入，
//! 不可采则下探，叶节点精确求值；期望复杂度 O(m log m)。
//!
//! # 梯度
//!
//! 对边 i 的查询同时累加「正向」核 k(m_i, c_N, T_i) 与「反向」
//! 簇核 k(c_N, m_i, τ_N) 对 i 两端点的导数（簇侧冻结），各乘 ½。
//! 关闭 Barnes-Hut 时同一方案在叶对上展开，恰为 E 的精确梯度。
//!
//! # 并行
//!
//! 能量是边上的标量归约；梯度并行写入每线程 (n, 3) 影子缓冲，
//! 最后串行归并。单线程下结果确定，跨线程数不保证逐位一致。

use crate::bvh::Bvh3d;
use crate::kernel::{tangent_point_kernel, tangent_point_kernel_derivs, TpeExponents};
use crate::parallel::ParallelConfig;
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_foundation::KahanSum;
use rayon::prelude::*;

/// 默认可采性比率
pub const DEFAULT_SEP: f64 = 1.0;

// ============================================================================
// 每边局部几何
// ============================================================================

/// 边 i 的局部几何快照
#[derive(Debug, Clone, Copy)]
struct EdgeFrame {
    i0: usize,
    i1: usize,
    mid: DVec3,
    tangent: DVec3,
    length: f64,
}

impl EdgeFrame {
    fn new(curve: &CurveNetwork, e: usize) -> Self {
        let [u, v] = curve.edge(e);
        Self {
            i0: u as usize,
            i1: v as usize,
            mid: curve.edge_midpoint(e),
            tangent: curve.edge_tangent(e),
            length: curve.edge_length(e),
        }
    }

    /// 对点 (y, τ, w) 的一次交互，正反两向核各乘 ½，
    /// 导数只落在本边两端点上
    #[inline]
    fn accumulate_pair(
        &self,
        y: DVec3,
        tau: DVec3,
        w: f64,
        exps: &TpeExponents,
        g0: &mut DVec3,
        g1: &mut DVec3,
    ) {
        let half_w = 0.5 * w;

        // 正向: ∂[k(m, y, T) ℓ]/∂端点
        let f = tangent_point_kernel_derivs(self.mid, y, self.tangent, exps);
        let common = 0.5 * self.length * f.dx;
        let edge_term = f.dt + f.value * self.tangent;
        *g0 += half_w * (common - edge_term);
        *g1 += half_w * (common + edge_term);

        // 反向: 簇核 k(y, m, τ)，τ 冻结，m 是核的第二个参数
        let r = tangent_point_kernel_derivs(y, self.mid, tau, exps);
        let common_r = 0.5 * self.length * r.dy;
        let len_term = r.value * self.tangent;
        *g0 += half_w * (common_r - len_term);
        *g1 += half_w * (common_r + len_term);
    }
}

// ============================================================================
// 能量
// ============================================================================

/// 边 i 对总能量的贡献（Barnes-Hut 遍历）
fn edge_energy_bh(curve: &CurveNetwork, bvh: &Bvh3d, exps: &TpeExponents, sep: f64, i: usize) -> f64 {
    let frame = EdgeFrame::new(curve, i);
    let mut acc = 0.0;
    let mut stack: Vec<u32> = vec![bvh.root()];

    while let Some(idx) = stack.pop() {
        let node = bvh.node(idx);
        if node.is_leaf() {
            let j = node.edge as usize;
            if j == i {
                continue;
            }
            acc += tangent_point_kernel(frame.mid, node.centroid, frame.tangent, exps)
                * frame.length
                * node.mass;
        } else if contains_point(node, frame.mid) || !node.admissible_from(frame.mid, sep) {
            stack.push(node.children[0]);
            stack.push(node.children[1]);
        } else {
            acc += tangent_point_kernel(frame.mid, node.centroid, frame.tangent, exps)
                * frame.length
                * node.mass;
        }
    }
    acc
}

/// 查询中点落在节点位置包围盒内时必须下探：
/// 此时节点可能含有边 i 自身，且可采性判据失真
#[inline]
fn contains_point(node: &crate::bvh::BvhNode, p: DVec3) -> bool {
    let b = &node.pos_bounds;
    p.x >= b.min.x
        && p.x <= b.max.x
        && p.y >= b.min.y
        && p.y <= b.max.y
        && p.z >= b.min.z
        && p.z <= b.max.z
}

/// Barnes-Hut 总能量（默认可采性比率）
pub fn evaluate_energy(curve: &CurveNetwork, bvh: &Bvh3d, exps: &TpeExponents) -> f64 {
    evaluate_energy_with(curve, bvh, exps, DEFAULT_SEP, &ParallelConfig::default())
}

/// Barnes-Hut 总能量
///
/// `sep → 0` 时退化为精确 O(m²) 求值。
pub fn evaluate_energy_with(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    sep: f64,
    parallel: &ParallelConfig,
) -> f64 {
    let m = curve.n_edges();
    let total = if parallel.should_parallelize(m) {
        (0..m)
            .into_par_iter()
            .map(|i| edge_energy_bh(curve, bvh, exps, sep, i))
            .sum::<f64>()
    } else {
        let acc: KahanSum = (0..m).map(|i| edge_energy_bh(curve, bvh, exps, sep, i)).collect();
        acc.value()
    };
    0.5 * total
}

/// 精确 O(m²) 总能量（参考实现，测试与小规模回退用）
pub fn evaluate_energy_exact(curve: &CurveNetwork, exps: &TpeExponents) -> f64 {
    let m = curve.n_edges();
    let mut acc = KahanSum::new();
    for i in 0..m {
        let frame = EdgeFrame::new(curve, i);
        for j in 0..m {
            if j == i {
                continue;
            }
            acc.add(
                tangent_point_kernel(frame.mid, curve.edge_midpoint(j), frame.tangent, exps)
                    * frame.length
                    * curve.edge_length(j),
            );
        }
    }
    0.5 * acc.value()
}

// ============================================================================
// 梯度
// ============================================================================

/// 边 i 的查询：把梯度贡献累加到其两端点
fn edge_gradient_bh(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    sep: f64,
    i: usize,
) -> (usize, DVec3, usize, DVec3) {
    let frame = EdgeFrame::new(curve, i);
    let mut g0 = DVec3::ZERO;
    let mut g1 = DVec3::ZERO;
    let mut stack: Vec<u32> = vec![bvh.root()];

    while let Some(idx) = stack.pop() {
        let node = bvh.node(idx);
        if node.is_leaf() {
            let j = node.edge as usize;
            if j == i {
                continue;
            }
            frame.accumulate_pair(
                node.centroid,
                node.avg_tangent,
                node.mass,
                exps,
                &mut g0,
                &mut g1,
            );
        } else if contains_point(node, frame.mid) || !node.admissible_from(frame.mid, sep) {
            stack.push(node.children[0]);
            stack.push(node.children[1]);
        } else {
            frame.accumulate_pair(
                node.centroid,
                node.avg_tangent,
                node.mass,
                exps,
                &mut g0,
                &mut g1,
            );
        }
    }
    (frame.i0, g0, frame.i1, g1)
}

/// Barnes-Hut 顶点梯度（默认参数），`out` 长度 = 顶点数
pub fn evaluate_vertex_gradient(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    out: &mut [DVec3],
) {
    evaluate_vertex_gradient_with(curve, bvh, exps, DEFAULT_SEP, &ParallelConfig::default(), out)
}

/// Barnes-Hut 顶点梯度
///
/// 并行路径：逐边 fold 到每线程影子缓冲，再树状归并；
/// 串行路径：直接写入输出。
pub fn evaluate_vertex_gradient_with(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    sep: f64,
    parallel: &ParallelConfig,
    out: &mut [DVec3],
) {
    let n = curve.n_vertices();
    let m = curve.n_edges();
    debug_assert_eq!(out.len(), n);
    out.fill(DVec3::ZERO);

    if parallel.should_parallelize(m) {
        let reduced = (0..m)
            .into_par_iter()
            .fold(
                || vec![DVec3::ZERO; n],
                |mut buf, i| {
                    let (i0, g0, i1, g1) = edge_gradient_bh(curve, bvh, exps, sep, i);
                    buf[i0] += g0;
                    buf[i1] += g1;
                    buf
                },
            )
            .reduce(
                || vec![DVec3::ZERO; n],
                |mut a, b| {
                    for (av, bv) in a.iter_mut().zip(b) {
                        *av += bv;
                    }
                    a
                },
            );
        out.copy_from_slice(&reduced);
    } else {
        for i in 0..m {
            let (i0, g0, i1, g1) = edge_gradient_bh(curve, bvh, exps, sep, i);
            out[i0] += g0;
            out[i1] += g1;
        }
    }
}

/// Barnes-Hut 边梯度（默认参数），`out` 长度 = 边数
///
/// 第 e 项是能量对边 e 整体平移的导数（两端点贡献之和）；
/// 需要顶点梯度时由调用方按关联关系映射。
pub fn evaluate_edge_gradient(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    out: &mut [DVec3],
) {
    evaluate_edge_gradient_with(curve, bvh, exps, DEFAULT_SEP, &ParallelConfig::default(), out)
}

/// Barnes-Hut 边梯度
pub fn evaluate_edge_gradient_with(
    curve: &CurveNetwork,
    bvh: &Bvh3d,
    exps: &TpeExponents,
    sep: f64,
    parallel: &ParallelConfig,
    out: &mut [DVec3],
) {
    let m = curve.n_edges();
    debug_assert_eq!(out.len(), m);

    let compute = |i: usize| {
        let (_, g0, _, g1) = edge_gradient_bh(curve, bvh, exps, sep, i);
        g0 + g1
    };

    if parallel.should_parallelize(m) {
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, o)| *o = compute(i));
    } else {
        for (i, o) in out.iter_mut().enumerate() {
            *o = compute(i);
        }
    }
}

/// 精确 O(m²) 顶点梯度（参考实现）
pub fn evaluate_vertex_gradient_exact(curve: &CurveNetwork, exps: &TpeExponents, out: &mut [DVec3]) {
    let m = curve.n_edges();
    debug_assert_eq!(out.len(), curve.n_vertices());
    out.fill(DVec3::ZERO);

    for i in 0..m {
        let frame = EdgeFrame::new(curve, i);
        let mut g0 = DVec3::ZERO;
        let mut g1 = DVec3::ZERO;
        for j in 0..m {
            if j == i {
                continue;
            }
            frame.accumulate_pair(
                curve.edge_midpoint(j),
                curve.edge_tangent(j),
                curve.edge_length(j),
                exps,
                &mut g0,
                &mut g1,
            );
        }
        out[frame.i0] += g0;
        out[frame.i1] += g1;
    }
}
