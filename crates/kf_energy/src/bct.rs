// crates/kf_energy/src/bct.rs

//! 块簇树度量算子
//!
//! 分数阶 Sobolev 预条件度量由核 G_s(x,y) = ‖x−y‖^{−(2s+1)} 诱导，
//! 离散为边空间上的稠密 SPD 矩阵
//!
//! ```text
//! A = diag(self + rowsum) + W,   W_ij = G_s(m_i, m_j) ℓ_i ℓ_j  (i ≠ j)
//! ```
//!
//! 其中 `self_i = ℓ_i^{1−2s}`（自项：核在距离 ℓ_i 处的值乘 ℓ_i²），
//! `rowsum_i = Σ_j W_ij` 在构建时预计算。对角占优加严格正自项
//! 保证 A 对称正定。
//!
//! # 块分解
//!
//! 对同一棵边 BVH 做对偶遍历，把全部无序边对划分为：
//! - **可采块** (A, B): `max(diam A, diam B) < sep · dist(A, B)`，
//!   以簇质心的单点核低秩作用
//! - **不可采叶对** (i, j): 两侧均为叶且判据不成立，直接核求值
//!
//! 遍历与存储均为 O(m log m)；块数超出声明预算时构建失败。
//!
//! # 算子应用 y = A v
//!
//! 1. 上行：自底向上聚合 V_N = Σ_{j∈N} ℓ_j v_j
//! 2. 可采块：Φ_A += G_s(c_A, c_B) V_B，对称地 Φ_B += G_s V_A
//! 3. 下行：Φ 自顶向下推至叶，y_i += ℓ_i Φ
//! 4. 不可采叶对双向精确求值
//! 5. 对角：y_i += diag_i v_i
//!
//! 每个无序块记录一次、双向应用同一核值，算子精确对称，
//! 可安全用于 CG 内环。

use crate::bvh::Bvh3d;
use crate::error::{EnergyError, EnergyResult};
use crate::kernel::{metric_kernel, TpeExponents};
use crate::parallel::ParallelConfig;
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_foundation::{KfError, KfResult};
use rayon::prelude::*;

/// 依 m log m 规模给出的默认块数预算
fn default_block_budget(m: usize) -> usize {
    let log_m = (usize::BITS - m.max(2).leading_zeros()) as usize;
    128 * m * (log_m + 1)
}

/// 块簇树
///
/// 绑定构建时刻的曲线位置；位置或拓扑变动后必须重建。
#[derive(Debug, Clone)]
pub struct BlockClusterTree {
    /// 边 BVH（两份拷贝在本设置下为同一棵树）
    bvh: Bvh3d,
    /// 可采块 (节点, 节点)
    admissible: Vec<(u32, u32)>,
    /// 不可采叶对 (边, 边)
    inadmissible: Vec<(u32, u32)>,
    /// 对角项：自项 + 行和修正
    diag: Vec<f64>,
    /// 每边长度快照
    lengths: Vec<f64>,
    /// 每边中点快照
    midpoints: Vec<DVec3>,
    /// 度量阶 s
    s: f64,
    /// 并行配置
    parallel: ParallelConfig,
}

impl BlockClusterTree {
    /// 从曲线构建块簇树（默认块预算）
    ///
    /// # 错误
    ///
    /// `sep ≤ 0` 返回 [`EnergyError::InvalidSeparation`]；
    /// 块数超出预算返回 [`EnergyError::BlockBudgetExceeded`]。
    pub fn new(curve: &CurveNetwork, sep: f64, exps: TpeExponents) -> EnergyResult<Self> {
        Self::with_budget(curve, sep, exps, default_block_budget(curve.n_edges()))
    }

    /// 带显式块预算的构建
    pub fn with_budget(
        curve: &CurveNetwork,
        sep: f64,
        exps: TpeExponents,
        max_blocks: usize,
    ) -> EnergyResult<Self> {
        if !(sep > 0.0) {
            return Err(EnergyError::InvalidSeparation { sep });
        }

        let m = curve.n_edges();
        let bvh = Bvh3d::from_curve(curve);
        let s = exps.metric_order();

        let mut admissible = Vec::new();
        let mut inadmissible = Vec::new();
        let mut stack: Vec<(u32, u32)> = vec![(bvh.root(), bvh.root())];

        while let Some((a, b)) = stack.pop() {
            if admissible.len() + inadmissible.len() > max_blocks {
                return Err(EnergyError::BlockBudgetExceeded {
                    blocks: admissible.len() + inadmissible.len(),
                    budget: max_blocks,
                });
            }

            let na = bvh.node(a);
            let nb = bvh.node(b);

            if a == b {
                // 对角块：叶的自交互由对角项处理
                if !na.is_leaf() {
                    let [c0, c1] = na.children;
                    stack.push((c0, c0));
                    stack.push((c1, c1));
                    stack.push((c0, c1));
                }
                continue;
            }

            let da = na.pos_bounds.diameter();
            let db = nb.pos_bounds.diameter();
            let dist = (na.centroid - nb.centroid).length();

            if da.max(db) < sep * dist {
                admissible.push((a, b));
            } else if na.is_leaf() && nb.is_leaf() {
                inadmissible.push((na.edge, nb.edge));
            } else if !na.is_leaf() && (nb.is_leaf() || da >= db) {
                stack.push((na.children[0], b));
                stack.push((na.children[1], b));
            } else {
                stack.push((a, nb.children[0]));
                stack.push((a, nb.children[1]));
            }
        }

        log::debug!(
            "块簇树: m = {}, 可采块 {}, 不可采叶对 {}",
            m,
            admissible.len(),
            inadmissible.len()
        );

        let lengths: Vec<f64> = (0..m).map(|e| curve.edge_length(e)).collect();
        let midpoints: Vec<DVec3> = (0..m).map(|e| curve.edge_midpoint(e)).collect();

        let mut tree = Self {
            bvh,
            admissible,
            inadmissible,
            diag: vec![0.0; m],
            lengths,
            midpoints,
            s,
            parallel: ParallelConfig::default(),
        };

        // 行和修正：离对角算子作用到全 1 向量
        let ones = vec![1.0; m];
        let rowsum = tree.apply_offdiag(&ones);
        for i in 0..m {
            // 自项: G_s(ℓ_i) · ℓ_i² = ℓ_i^{1−2s}
            tree.diag[i] = tree.lengths[i].powf(1.0 - 2.0 * s) + rowsum[i];
        }

        Ok(tree)
    }

    /// 边数
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.lengths.len()
    }

    /// 可采块数
    pub fn n_admissible(&self) -> usize {
        self.admissible.len()
    }

    /// 不可采叶对数
    pub fn n_inadmissible(&self) -> usize {
        self.inadmissible.len()
    }

    /// 对角项
    pub fn diagonal(&self) -> &[f64] {
        &self.diag
    }

    /// 度量阶 s
    pub fn metric_order(&self) -> f64 {
        self.s
    }

    /// 设置并行配置
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// 应用度量算子: y = A v
    pub fn apply(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.n_edges());
        let mut y = self.apply_offdiag(v);
        for i in 0..v.len() {
            y[i] += self.diag[i] * v[i];
        }
        y
    }

    /// 带输入长度检查的算子应用（嵌入方边界用）
    pub fn apply_checked(&self, v: &[f64]) -> KfResult<Vec<f64>> {
        KfError::check_size("metric input", self.n_edges(), v.len())?;
        Ok(self.apply(v))
    }

    /// 离对角部分: y = W v（可采块低秩 + 不可采叶对直接求值）
    fn apply_offdiag(&self, v: &[f64]) -> Vec<f64> {
        let nodes = self.bvh.nodes();
        let n_nodes = nodes.len();
        let m = v.len();

        // 1. 上行聚合（子先父后序的正向扫描）
        let mut source = vec![0.0; n_nodes];
        for (idx, node) in nodes.iter().enumerate() {
            if node.is_leaf() {
                let e = node.edge as usize;
                source[idx] = self.lengths[e] * v[e];
            } else {
                source[idx] =
                    source[node.children[0] as usize] + source[node.children[1] as usize];
            }
        }

        // 2. 可采块：节点势累加
        let mut potential = if self.parallel.should_parallelize(self.admissible.len()) {
            self.admissible
                .par_iter()
                .fold(
                    || vec![0.0; n_nodes],
                    |mut phi, &(a, b)| {
                        let g = metric_kernel(
                            (nodes[a as usize].centroid - nodes[b as usize].centroid).length(),
                            self.s,
                        );
                        phi[a as usize] += g * source[b as usize];
                        phi[b as usize] += g * source[a as usize];
                        phi
                    },
                )
                .reduce(
                    || vec![0.0; n_nodes],
                    |mut acc, phi| {
                        for (a, p) in acc.iter_mut().zip(phi) {
                            *a += p;
                        }
                        acc
                    },
                )
        } else {
            let mut phi = vec![0.0; n_nodes];
            for &(a, b) in &self.admissible {
                let g = metric_kernel(
                    (nodes[a as usize].centroid - nodes[b as usize].centroid).length(),
                    self.s,
                );
                phi[a as usize] += g * source[b as usize];
                phi[b as usize] += g * source[a as usize];
            }
            phi
        };

        // 3. 下行分发（反向扫描），叶节点落到输出
        let mut y = vec![0.0; m];
        for idx in (0..n_nodes).rev() {
            let node = &nodes[idx];
            if node.is_leaf() {
                y[node.edge as usize] += self.lengths[node.edge as usize] * potential[idx];
            } else {
                let p = potential[idx];
                potential[node.children[0] as usize] += p;
                potential[node.children[1] as usize] += p;
            }
        }

        // 4. 不可采叶对：双向精确求值
        if self.parallel.should_parallelize(self.inadmissible.len()) {
            let direct = self
                .inadmissible
                .par_iter()
                .fold(
                    || vec![0.0; m],
                    |mut acc, &(i, j)| {
                        let (i, j) = (i as usize, j as usize);
                        let g = metric_kernel((self.midpoints[i] - self.midpoints[j]).length(), self.s);
                        acc[i] += self.lengths[i] * g * self.lengths[j] * v[j];
                        acc[j] += self.lengths[j] * g * self.lengths[i] * v[i];
                        acc
                    },
                )
                .reduce(
                    || vec![0.0; m],
                    |mut a, b| {
                        for (av, bv) in a.iter_mut().zip(b) {
                            *av += bv;
                        }
                        a
                    },
                );
            for (yv, dv) in y.iter_mut().zip(direct) {
                *yv += dv;
            }
        } else {
            for &(i, j) in &self.inadmissible {
                let (i, j) = (i as usize, j as usize);
                let g = metric_kernel((self.midpoints[i] - self.midpoints[j]).length(), self.s);
                y[i] += self.lengths[i] * g * self.lengths[j] * v[j];
                y[j] += self.lengths[j] * g * self.lengths[i] * v[i];
            }
        }

        y
    }
}

/// 精确装配 m×m 稠密度量矩阵（行主序）
///
/// 与块簇树同一公式但不做远场近似；
/// 供回归测试与多重网格最粗层直接求解使用。
pub fn assemble_dense_metric(curve: &CurveNetwork, exps: TpeExponents) -> Vec<f64> {
    let m = curve.n_edges();
    let s = exps.metric_order();
    let lengths: Vec<f64> = (0..m).map(|e| curve.edge_length(e)).collect();
    let midpoints: Vec<DVec3> = (0..m).map(|e| curve.edge_midpoint(e)).collect();

    let mut a = vec![0.0; m * m];
    for i in 0..m {
        let mut rowsum = 0.0;
        for j in 0..m {
            if j == i {
                continue;
            }
            let w = lengths[i]
                * metric_kernel((midpoints[i] - midpoints[j]).length(), s)
                * lengths[j];
            a[i * m + j] = w;
            rowsum += w;
        }
        a[i * m + i] = lengths[i].powf(1.0 - 2.0 * s) + rowsum;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_curve::generation;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn lcg_vec(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as f64) / (u32::MAX as f64) - 0.5
            })
            .collect()
    }

    #[test]
    fn test_bct_rejects_bad_sep() {
        let curve = generation::circle(16, 1.0);
        let err = BlockClusterTree::new(&curve, 0.0, TpeExponents::standard()).unwrap_err();
        assert!(matches!(err, EnergyError::InvalidSeparation { .. }));
    }

    #[test]
    fn test_bct_budget_exceeded() {
        let curve = generation::circle(64, 1.0);
        let err =
            BlockClusterTree::with_budget(&curve, 1.0, TpeExponents::standard(), 4).unwrap_err();
        assert!(matches!(err, EnergyError::BlockBudgetExceeded { .. }));
    }

    #[test]
    fn test_bct_symmetry() {
        // 对称性: v·(Aw) == w·(Av)
        let curve = generation::trefoil(64, 1.0);
        let bct = BlockClusterTree::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let m = curve.n_edges();

        let v = lcg_vec(m, 11);
        let w = lcg_vec(m, 22);
        let av = bct.apply(&v);
        let aw = bct.apply(&w);

        let vaw = dot(&v, &aw);
        let wav = dot(&w, &av);
        assert!(
            (vaw - wav).abs() <= 1e-12 * vaw.abs().max(wav.abs()),
            "vaw={} wav={}",
            vaw,
            wav
        );
    }

    #[test]
    fn test_bct_positivity() {
        // 正定性: v·Av > 0 (v ≠ 0)
        let curve = generation::circle(48, 1.0);
        let bct = BlockClusterTree::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let m = curve.n_edges();

        for seed in [1u64, 2, 3] {
            let v = lcg_vec(m, seed);
            let av = bct.apply(&v);
            assert!(dot(&v, &av) > 0.0);
        }
    }

    #[test]
    fn test_bct_matches_dense_small_sep() {
        // sep 很小时全部块退化为叶对，与稠密装配一致
        let curve = generation::random_polyline(32, 5);
        let exps = TpeExponents::standard();
        let bct = BlockClusterTree::new(&curve, 1e-9, exps).unwrap();
        let dense = assemble_dense_metric(&curve, exps);
        let m = curve.n_edges();

        let v = lcg_vec(m, 9);
        let y_bct = bct.apply(&v);
        let mut y_dense = vec![0.0; m];
        for i in 0..m {
            y_dense[i] = (0..m).map(|j| dense[i * m + j] * v[j]).sum();
        }

        for i in 0..m {
            assert!(
                (y_bct[i] - y_dense[i]).abs() < 1e-9 * (1.0 + y_dense[i].abs()),
                "i={} bct={} dense={}",
                i,
                y_bct[i],
                y_dense[i]
            );
        }
    }

    #[test]
    fn test_bct_accuracy_default_sep() {
        // 默认可采性比率下的逼近界: ‖A_bct v − A_dense v‖ / ‖A_dense v‖ ≤ 2e-3
        let curve = generation::random_polyline(128, 7);
        let exps = TpeExponents::standard();
        let bct = BlockClusterTree::new(&curve, 1.0, exps).unwrap();
        let dense = assemble_dense_metric(&curve, exps);
        let m = curve.n_edges();

        let v = lcg_vec(m, 13);
        let y_bct = bct.apply(&v);
        let mut y_dense = vec![0.0; m];
        for i in 0..m {
            y_dense[i] = (0..m).map(|j| dense[i * m + j] * v[j]).sum();
        }

        let err: f64 = y_bct
            .iter()
            .zip(&y_dense)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let norm: f64 = y_dense.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!(err / norm <= 2e-3, "相对误差 {}", err / norm);
    }

    #[test]
    fn test_apply_checked_rejects_wrong_size() {
        let curve = generation::circle(16, 1.0);
        let bct = BlockClusterTree::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        let err = bct.apply_checked(&[0.0; 5]).unwrap_err();
        assert!(matches!(err, KfError::SizeMismatch { .. }));
        assert!(bct.apply_checked(&vec![1.0; 16]).is_ok());
    }

    #[test]
    fn test_block_counts_scale() {
        let curve = generation::circle(128, 1.0);
        let bct = BlockClusterTree::new(&curve, 1.0, TpeExponents::standard()).unwrap();
        // 块总数应远小于 m² 对
        assert!(bct.n_admissible() + bct.n_inadmissible() < 128 * 128 / 2);
    }
}
