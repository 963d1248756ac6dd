// crates/kf_solver/src/metric.rs

//! 顶点空间度量算子
//!
//! 块簇树给出的是边空间算子 A_e ∈ ℝ^{m×m}；流在顶点上移动曲线，
//! 因此通过中点平均 D（(Dv)_e = ½(v_u + v_v)）把它组合到顶点空间：
//!
//! ```text
//! A_v = Dᵀ A_e D + M_lump
//! ```
//!
//! 其中 M_lump 是集中顶点质量（关联边长之和的一半），即 Sobolev
//! 内积的低阶项；它同时消除了 D 的零空间（链上交替符号向量），
//! 保证 A_v 在顶点空间严格正定。算子对 x/y/z 三个坐标分量
//! 逐分量作用，对 `Vec<DVec3>` 的一次应用等于三次标量边空间应用。

use crate::dense::DenseMatrix;
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_energy::bct::{assemble_dense_metric, BlockClusterTree};
use kf_energy::{EnergyResult, TpeExponents};

/// 顶点空间度量算子
///
/// 绑定构建时刻的曲线位置，按步重建。
#[derive(Debug, Clone)]
pub struct VertexMetric {
    /// 边空间块簇树算子
    bct: BlockClusterTree,
    /// 边表快照
    edge_verts: Vec<[u32; 2]>,
    /// 集中顶点质量
    vertex_mass: Vec<f64>,
    /// A_v 的精确对角（Jacobi 光滑与预条件用）
    diag: Vec<f64>,
    /// 顶点数
    n: usize,
}

impl VertexMetric {
    /// 从曲线构建顶点度量
    pub fn new(curve: &CurveNetwork, sep: f64, exps: TpeExponents) -> EnergyResult<Self> {
        let bct = BlockClusterTree::new(curve, sep, exps)?;
        Ok(Self::from_bct(curve, bct))
    }

    /// 复用既有块簇树构建
    pub fn from_bct(curve: &CurveNetwork, bct: BlockClusterTree) -> Self {
        let n = curve.n_vertices();
        let mut vertex_mass = vec![0.0; n];
        for e in 0..curve.n_edges() {
            let [u, v] = curve.edge(e);
            let half = 0.5 * curve.edge_length(e);
            vertex_mass[u as usize] += half;
            vertex_mass[v as usize] += half;
        }

        // 精确对角: diag(Dᵀ A_e D)_u = ¼ Σ_{e,f∋u} A_e[e,f]，
        // 即 ¼ 倍的（关联边对角和 + 关联边对非对角项）
        let s = bct.metric_order();
        let edge_diag = bct.diagonal();
        let mut diag = vertex_mass.clone();
        for u in 0..n {
            let edges = curve.vertex_edges(u);
            for (i, &e) in edges.iter().enumerate() {
                diag[u] += 0.25 * edge_diag[e as usize];
                for &f in &edges[i + 1..] {
                    let w = kf_energy::kernel::metric_kernel(
                        (curve.edge_midpoint(e as usize) - curve.edge_midpoint(f as usize))
                            .length(),
                        s,
                    ) * curve.edge_length(e as usize)
                        * curve.edge_length(f as usize);
                    diag[u] += 0.5 * w;
                }
            }
        }

        Self {
            bct,
            edge_verts: curve.edge_verts().to_vec(),
            vertex_mass,
            diag,
            n,
        }
    }

    /// 顶点数
    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.n
    }

    /// 边数
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.edge_verts.len()
    }

    /// 底层块簇树
    pub fn bct(&self) -> &BlockClusterTree {
        &self.bct
    }

    /// 应用算子: y = A_v x
    pub fn apply(&self, x: &[DVec3]) -> Vec<DVec3> {
        debug_assert_eq!(x.len(), self.n);
        let m = self.edge_verts.len();
        let mut y = vec![DVec3::ZERO; self.n];

        // 逐坐标分量: Dᵀ A_e D
        let mut edge_vec = vec![0.0; m];
        for c in 0..3 {
            for (e, &[u, v]) in self.edge_verts.iter().enumerate() {
                edge_vec[e] = 0.5 * (x[u as usize][c] + x[v as usize][c]);
            }
            let edge_out = self.bct.apply(&edge_vec);
            for (e, &[u, v]) in self.edge_verts.iter().enumerate() {
                let half = 0.5 * edge_out[e];
                y[u as usize][c] += half;
                y[v as usize][c] += half;
            }
        }

        // 低阶项: 集中质量
        for (yv, (xv, &mass)) in y.iter_mut().zip(x.iter().zip(&self.vertex_mass)) {
            *yv += mass * *xv;
        }

        y
    }

    /// A_v 的精确对角（Jacobi 光滑与预条件用）
    pub fn diagonal(&self) -> &[f64] {
        &self.diag
    }
}

/// 精确装配顶点度量的稠密形式（最粗层与测试用）
///
/// A_v = Dᵀ A_e D + M_lump，其中 A_e 为精确稠密边度量。
pub fn assemble_dense_vertex_metric(curve: &CurveNetwork, exps: TpeExponents) -> DenseMatrix {
    let n = curve.n_vertices();
    let m = curve.n_edges();
    let edge_dense = assemble_dense_metric(curve, exps);

    let mut a = DenseMatrix::zeros(n);
    for e in 0..m {
        let [eu, ev] = curve.edge(e);
        for f in 0..m {
            let [fu, fv] = curve.edge(f);
            let w = 0.25 * edge_dense[e * m + f];
            for &u in &[eu, ev] {
                for &v in &[fu, fv] {
                    a.add(u as usize, v as usize, w);
                }
            }
        }
    }

    for u in 0..n {
        let mass: f64 = curve
            .vertex_edges(u)
            .iter()
            .map(|&e| 0.5 * curve.edge_length(e as usize))
            .sum();
        a.add(u, u, mass);
    }

    a
}
