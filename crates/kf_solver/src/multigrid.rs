// crates/kf_solver/src/multigrid.rs

//! 几何多重网格层级
//!
//! 对曲线做逐层粗化：度-2 链上每隔一个顶点收缩一个，
//! 交汇点与钉固顶点始终保留。每层持有自己的粗曲线与
//! 顶点度量（含该层的块簇树）。
//!
//! # 传输算子
//!
//! 延拓 P 是线性插值：细顶点要么是保留粗顶点的拷贝，要么是
//! 链上相邻两个粗顶点的中点；限制取 R = Pᵀ。
//!
//! # V-cycle
//!
//! 下行每层一遍 Jacobi 预光滑（ω = 2/3），最粗层用精确装配的
//! 稠密顶点度量做 Cholesky 直接求解，上行一遍后光滑。
//! 前后光滑对称，整个 cycle 是对称正定算子，可作 CG 预条件器。

use crate::cg::VertexPreconditioner;
use crate::dense::CholeskyFactor;
use crate::error::SolverResult;
use crate::metric::{assemble_dense_vertex_metric, VertexMetric};
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_energy::TpeExponents;
use rayon::prelude::*;
use std::collections::HashSet;

/// Jacobi 光滑松弛因子
const SMOOTH_OMEGA: f64 = 2.0 / 3.0;

/// 光滑扫掠的并行阈值（顶点数）
const PARALLEL_SMOOTH_THRESHOLD: usize = 4096;

/// 细顶点到下一层粗顶点的插值来源
#[derive(Debug, Clone, Copy)]
pub enum CoarseMap {
    /// 保留顶点的拷贝
    Kept(u32),
    /// 两个粗邻居的中点
    Mid(u32, u32),
}

/// 单层数据
struct Level {
    curve: CurveNetwork,
    metric: VertexMetric,
    /// Jacobi 光滑用的逆对角
    inv_diag: Vec<f64>,
    /// 到下一层的插值映射（最粗层为 None）
    map: Option<Vec<CoarseMap>>,
}

/// 多重网格层级
///
/// 第 0 层最细。按步重建（粗化结构便宜，每层块簇树绑定当前位置）。
pub struct MultigridHierarchy {
    levels: Vec<Level>,
    coarsest_chol: CholeskyFactor,
}

impl MultigridHierarchy {
    /// 从细曲线构建层级
    ///
    /// 粗化到顶点数 ≤ `coarsest_size` 或无法继续收缩为止。
    pub fn build(
        curve: &CurveNetwork,
        sep: f64,
        exps: TpeExponents,
        coarsest_size: usize,
    ) -> SolverResult<Self> {
        let mut levels: Vec<Level> = Vec::new();
        let mut current = curve.clone();

        loop {
            let metric = VertexMetric::new(&current, sep, exps)?;
            let inv_diag = metric
                .diagonal()
                .iter()
                .map(|&d| if d > 0.0 { 1.0 / d } else { 1.0 })
                .collect();

            let coarse = if current.n_vertices() > coarsest_size {
                coarsen(&current)
            } else {
                None
            };

            match coarse {
                Some((coarse_curve, map)) => {
                    levels.push(Level {
                        curve: current,
                        metric,
                        inv_diag,
                        map: Some(map),
                    });
                    current = coarse_curve;
                }
                None => {
                    levels.push(Level {
                        curve: current,
                        metric,
                        inv_diag,
                        map: None,
                    });
                    break;
                }
            }
        }

        let coarsest = &levels.last().expect("至少一层").curve;
        let dense = assemble_dense_vertex_metric(coarsest, exps);
        let coarsest_chol = dense.cholesky()?;

        log::debug!(
            "多重网格: {} 层, 最细 {} 顶点, 最粗 {} 顶点",
            levels.len(),
            levels[0].curve.n_vertices(),
            coarsest.n_vertices()
        );

        Ok(Self {
            levels,
            coarsest_chol,
        })
    }

    /// 层数
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// 最细层度量（外层 CG 的算子）
    pub fn finest_metric(&self) -> &VertexMetric {
        &self.levels[0].metric
    }

    /// 第 k 层曲线
    pub fn level_curve(&self, k: usize) -> &CurveNetwork {
        &self.levels[k].curve
    }

    /// 一次 V-cycle: 返回 M⁻¹ b 的近似
    pub fn v_cycle(&self, b: &[DVec3]) -> Vec<DVec3> {
        self.v_cycle_at(0, b)
    }

    fn v_cycle_at(&self, k: usize, b: &[DVec3]) -> Vec<DVec3> {
        let level = &self.levels[k];

        // 最粗层：稠密直接解（逐坐标分量）
        if level.map.is_none() {
            let n = b.len();
            let mut x = vec![DVec3::ZERO; n];
            for c in 0..3 {
                let rhs: Vec<f64> = b.iter().map(|v| v[c]).collect();
                let sol = self.coarsest_chol.solve(&rhs);
                for (xv, s) in x.iter_mut().zip(sol) {
                    xv[c] = s;
                }
            }
            return x;
        }

        let map = level.map.as_ref().expect("非最粗层");
        let n_coarse = self.levels[k + 1].curve.n_vertices();

        // 预光滑（零初值）: x = ω D⁻¹ b，顶点间独立
        let mut x: Vec<DVec3> = if b.len() >= PARALLEL_SMOOTH_THRESHOLD {
            b.par_iter()
                .zip(&level.inv_diag)
                .map(|(bv, &inv)| SMOOTH_OMEGA * inv * *bv)
                .collect()
        } else {
            b.iter()
                .zip(&level.inv_diag)
                .map(|(bv, &inv)| SMOOTH_OMEGA * inv * *bv)
                .collect()
        };

        // 残差限制到粗层
        let ax = level.metric.apply(&x);
        let mut b_coarse = vec![DVec3::ZERO; n_coarse];
        for (v, m) in map.iter().enumerate() {
            let r = b[v] - ax[v];
            match *m {
                CoarseMap::Kept(c) => b_coarse[c as usize] += r,
                CoarseMap::Mid(c0, c1) => {
                    b_coarse[c0 as usize] += 0.5 * r;
                    b_coarse[c1 as usize] += 0.5 * r;
                }
            }
        }

        // 粗层求解并延拓回加
        let x_coarse = self.v_cycle_at(k + 1, &b_coarse);
        for (v, m) in map.iter().enumerate() {
            x[v] += match *m {
                CoarseMap::Kept(c) => x_coarse[c as usize],
                CoarseMap::Mid(c0, c1) => {
                    0.5 * (x_coarse[c0 as usize] + x_coarse[c1 as usize])
                }
            };
        }

        // 后光滑: x += ω D⁻¹ (b − A x)，顶点间独立
        let ax = level.metric.apply(&x);
        if x.len() >= PARALLEL_SMOOTH_THRESHOLD {
            x.par_iter_mut().enumerate().for_each(|(i, xv)| {
                *xv += SMOOTH_OMEGA * level.inv_diag[i] * (b[i] - ax[i]);
            });
        } else {
            for ((xv, &inv), (bv, av)) in x
                .iter_mut()
                .zip(&level.inv_diag)
                .zip(b.iter().zip(&ax))
            {
                *xv += SMOOTH_OMEGA * inv * (*bv - *av);
            }
        }

        x
    }
}

/// 多重网格预条件器：每次 apply 做一个 V-cycle
pub struct MultigridPreconditioner<'a> {
    hierarchy: &'a MultigridHierarchy,
}

impl<'a> MultigridPreconditioner<'a> {
    /// 包装层级
    pub fn new(hierarchy: &'a MultigridHierarchy) -> Self {
        Self { hierarchy }
    }
}

impl VertexPreconditioner for MultigridPreconditioner<'_> {
    fn apply(&self, r: &[DVec3]) -> Vec<DVec3> {
        self.hierarchy.v_cycle(r)
    }
}

// ============================================================================
// 粗化
// ============================================================================

/// 对曲线做一层粗化
///
/// 返回粗曲线与细顶点插值映射；无法收缩任何顶点时返回 None。
fn coarsen(curve: &CurveNetwork) -> Option<(CurveNetwork, Vec<CoarseMap>)> {
    let n = curve.n_vertices();

    // 必须保留的顶点：交汇点、端点、任何钉固
    let special: Vec<bool> = (0..n)
        .map(|v| {
            curve.vertex_edges(v).len() != 2
                || curve.is_pinned(v)
                || curve.is_tangent_pinned(v)
                || curve.is_surface_pinned(v)
        })
        .collect();

    // 枚举链与回路（细顶点路径）
    let chains = enumerate_chains(curve, &special);

    // 决定保留集：链内部隔一保一；产生自环/重边的链退回全保留
    let mut keep = special.clone();
    let mut emitted: HashSet<(u32, u32)> = HashSet::new();
    let mut chain_kept: Vec<Vec<u32>> = Vec::with_capacity(chains.len());

    for chain in &chains {
        let kept = alternate_kept(chain);
        let pairs = kept_pairs(&kept, chain.closed);
        let conflict = pairs.iter().any(|&(a, b)| a == b || emitted.contains(&key(a, b)));

        let kept = if conflict {
            // 全保留该链
            let all: Vec<u32> = chain.path.clone();
            all
        } else {
            kept
        };

        for v in &kept {
            keep[*v as usize] = true;
        }
        for &(a, b) in &kept_pairs(&kept, chain.closed) {
            emitted.insert(key(a, b));
        }
        chain_kept.push(kept);
    }

    let n_coarse = keep.iter().filter(|&&k| k).count();
    if n_coarse >= n {
        return None;
    }

    // 粗顶点编号（按细索引序）
    let mut coarse_index = vec![u32::MAX; n];
    let mut positions = Vec::with_capacity(n_coarse);
    let mut next = 0u32;
    for v in 0..n {
        if keep[v] {
            coarse_index[v] = next;
            positions.push(curve.positions()[v]);
            next += 1;
        }
    }

    // 粗边与插值映射
    let mut edges: Vec<[u32; 2]> = Vec::new();
    let mut map: Vec<CoarseMap> = vec![CoarseMap::Kept(0); n];

    for (chain, kept) in chains.iter().zip(&chain_kept) {
        let kept_set: HashSet<u32> = kept.iter().copied().collect();

        // 粗边：保留序列中相邻者相连
        for &(a, b) in &kept_pairs(kept, chain.closed) {
            edges.push([coarse_index[a as usize], coarse_index[b as usize]]);
        }

        // 被收缩顶点：链上最近的两个保留邻居的中点
        let path = &chain.path;
        for (pos, &v) in path.iter().enumerate() {
            if kept_set.contains(&v) || special[v as usize] {
                continue;
            }
            let prev = find_kept(path, pos, chain.closed, &kept_set, false);
            let nextk = find_kept(path, pos, chain.closed, &kept_set, true);
            map[v as usize] = CoarseMap::Mid(
                coarse_index[prev as usize],
                coarse_index[nextk as usize],
            );
        }
    }

    for v in 0..n {
        if keep[v] {
            map[v] = CoarseMap::Kept(coarse_index[v]);
        }
    }

    let mut coarse = CurveNetwork::new(positions, edges).ok()?;

    // 钉固随保留顶点下沉
    for v in 0..n {
        if keep[v] {
            let c = coarse_index[v] as usize;
            if curve.is_pinned(v) {
                coarse.pin_vertex(c);
            }
            if curve.is_tangent_pinned(v) {
                coarse.pin_tangent(c);
            }
            if curve.is_surface_pinned(v) {
                coarse.pin_to_surface(c);
            }
        }
    }

    Some((coarse, map))
}

/// 链：两端为保留顶点的细顶点路径，或无保留顶点的回路
struct Chain {
    /// 路径顶点序列；回路不重复首顶点
    path: Vec<u32>,
    /// 是否回路
    closed: bool,
}

/// 枚举所有链与回路
fn enumerate_chains(curve: &CurveNetwork, special: &[bool]) -> Vec<Chain> {
    let m = curve.n_edges();
    let mut visited = vec![false; m];
    let mut chains = Vec::new();

    // 自特殊顶点出发的链
    for s in 0..curve.n_vertices() {
        if !special[s] {
            continue;
        }
        for &e0 in curve.vertex_edges(s) {
            if visited[e0 as usize] {
                continue;
            }
            let mut path = vec![s as u32];
            let mut cur_edge = e0;
            let mut cur = other_end(curve, cur_edge, s as u32);
            visited[cur_edge as usize] = true;

            while !special[cur as usize] {
                path.push(cur);
                let next_edge = curve
                    .vertex_edges(cur as usize)
                    .iter()
                    .copied()
                    .find(|&e| e != cur_edge)
                    .expect("度-2 顶点有另一条边");
                visited[next_edge as usize] = true;
                cur = other_end(curve, next_edge, cur);
                cur_edge = next_edge;
            }
            path.push(cur);
            chains.push(Chain {
                path,
                closed: false,
            });
        }
    }

    // 纯回路（全部度-2）
    for e0 in 0..m {
        if visited[e0] {
            continue;
        }
        let start = curve.edge(e0)[0];
        let mut path = vec![start];
        let mut cur_edge = e0 as u32;
        let mut cur = other_end(curve, cur_edge, start);
        visited[e0] = true;

        while cur != start {
            path.push(cur);
            let next_edge = curve
                .vertex_edges(cur as usize)
                .iter()
                .copied()
                .find(|&e| e != cur_edge)
                .expect("回路顶点度 2");
            visited[next_edge as usize] = true;
            cur = other_end(curve, next_edge, cur);
            cur_edge = next_edge;
        }
        chains.push(Chain { path, closed: true });
    }

    chains
}

#[inline]
fn other_end(curve: &CurveNetwork, edge: u32, from: u32) -> u32 {
    let [a, b] = curve.edge(edge as usize);
    if a == from {
        b
    } else {
        a
    }
}

#[inline]
fn key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

/// 链上隔一保一：端点（或回路锚点）保留，内部偶数位保留
fn alternate_kept(chain: &Chain) -> Vec<u32> {
    let path = &chain.path;

    if chain.closed {
        // 回路: 锚点 + 偶数位；产生 < 3 个粗顶点时全保留
        let tentative: Vec<u32> = path
            .iter()
            .enumerate()
            .filter(|&(i, _)| i % 2 == 0)
            .map(|(_, &v)| v)
            .collect();
        if tentative.len() < 3 {
            return path.clone();
        }
        return tentative;
    }

    // 开链: 两端保留，内部第 2、4、… 个保留
    let last = path.len() - 1;
    let mut kept = Vec::new();
    for (i, &v) in path.iter().enumerate() {
        if i == 0 || i == last || i % 2 == 0 {
            kept.push(v);
        }
    }
    kept.dedup();
    kept
}

/// 保留序列的相邻对（回路闭合首尾）
fn kept_pairs(kept: &[u32], closed: bool) -> Vec<(u32, u32)> {
    let mut pairs = Vec::with_capacity(kept.len());
    for w in kept.windows(2) {
        pairs.push((w[0], w[1]));
    }
    if closed && kept.len() > 2 {
        pairs.push((*kept.last().expect("非空"), kept[0]));
    }
    pairs
}

/// 沿链向前/向后找最近的保留顶点
fn find_kept(path: &[u32], pos: usize, closed: bool, kept: &HashSet<u32>, forward: bool) -> u32 {
    let len = path.len();
    let mut i = pos;
    loop {
        i = if forward {
            if i + 1 < len {
                i + 1
            } else if closed {
                0
            } else {
                len - 1
            }
        } else if i > 0 {
            i - 1
        } else if closed {
            len - 1
        } else {
            0
        };
        if kept.contains(&path[i]) {
            return path[i];
        }
    }
}
