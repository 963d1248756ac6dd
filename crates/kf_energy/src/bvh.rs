// crates/kf_energy/src/bvh.rs

//! 边中点 BVH
//!
//! 在边中点上构建二叉包围盒层级，供 Barnes-Hut 能量/梯度查询
//! 与块簇树构建使用。
//!
//! # 节点数据
//!
//! 每个节点同时维护位置包围盒与切向包围盒（切向感知的可采性
//! 判据需要双重包围），以及单极矩：总质量 M = Σℓ、质量加权
//! 质心 c 与质量加权平均切向 τ。
//!
//! # 构建
//!
//! 沿最长轴在质量中位点二分；叶节点持有单条边。节点按
//! 「子先父后」的拓扑序存放在扁平数组中，自底向上扫描即为
//! 后序聚合，自顶向下扫描即为前序分发。初始二分之后的子树
//! 构建并行进行，输出与调度顺序无关。

use crate::parallel::ParallelConfig;
use glam::DVec3;
use kf_curve::CurveNetwork;
use kf_foundation::tolerance::ADMISSIBILITY_GAP;
use kf_foundation::INVALID_INDEX;

/// 并行子树构建阈值
const PARALLEL_BUILD_THRESHOLD: usize = 4096;

// ============================================================================
// 包围盒
// ============================================================================

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    /// 下界
    pub min: DVec3,
    /// 上界
    pub max: DVec3,
}

impl Aabb {
    /// 空包围盒（任何 include 都会覆盖）
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// 纳入一个点
    #[inline]
    pub fn include(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// 与另一包围盒求并
    #[inline]
    pub fn union(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// 对角线长度（直径）
    #[inline]
    pub fn diameter(&self) -> f64 {
        let d = self.max - self.min;
        if d.x < 0.0 {
            0.0
        } else {
            d.length()
        }
    }

    /// 最长轴 (0/1/2)
    pub fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }
}

// ============================================================================
// 节点与树
// ============================================================================

/// BVH 节点
#[derive(Debug, Clone)]
pub struct BvhNode {
    /// 位置包围盒
    pub pos_bounds: Aabb,
    /// 切向包围盒
    pub tan_bounds: Aabb,
    /// 总质量 M = Σℓ
    pub mass: f64,
    /// 质量加权质心
    pub centroid: DVec3,
    /// 质量加权平均切向（归一化）
    pub avg_tangent: DVec3,
    /// 子节点索引（叶节点为 INVALID）
    pub children: [u32; 2],
    /// 叶节点持有的边索引（内部节点为 INVALID）
    pub edge: u32,
}

impl BvhNode {
    /// 是否为叶节点
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.edge != INVALID_INDEX
    }

    /// 对给定查询点的可采性判据
    ///
    /// 位置直径相对距离足够小，且切向包围盒直径足够小时可采。
    /// 距离低于可采性间隙时判据在有限精度下不可信，返回不可采
    /// 以退回直接遍历。
    #[inline]
    pub fn admissible_from(&self, point: DVec3, sep: f64) -> bool {
        let dist = (point - self.centroid).length();
        if dist < ADMISSIBILITY_GAP {
            return false;
        }
        self.pos_bounds.diameter() < sep * dist && self.tan_bounds.diameter() < sep
    }
}

/// 构建期的每边聚合数据
#[derive(Debug, Clone, Copy)]
struct EdgeItem {
    edge: u32,
    midpoint: DVec3,
    tangent: DVec3,
    length: f64,
}

/// 边中点 BVH
///
/// 绑定构建时刻的顶点位置；位置变动后必须重建。
#[derive(Debug, Clone)]
pub struct Bvh3d {
    /// 扁平节点数组，子先父后
    nodes: Vec<BvhNode>,
    /// 边总数
    n_edges: usize,
}

impl Bvh3d {
    /// 从曲线当前位置构建 BVH
    pub fn from_curve(curve: &CurveNetwork) -> Self {
        Self::from_curve_with(curve, &ParallelConfig::default())
    }

    /// 带并行配置的构建
    pub fn from_curve_with(curve: &CurveNetwork, parallel: &ParallelConfig) -> Self {
        let m = curve.n_edges();
        let mut items: Vec<EdgeItem> = (0..m)
            .map(|e| EdgeItem {
                edge: e as u32,
                midpoint: curve.edge_midpoint(e),
                tangent: curve.edge_tangent(e),
                length: curve.edge_length(e),
            })
            .collect();

        let allow_parallel = parallel.should_parallelize(m);
        let (nodes, _root) = build_subtree(&mut items, allow_parallel);
        Self { nodes, n_edges: m }
    }

    /// 根节点索引（拓扑序的最后一个）
    #[inline]
    pub fn root(&self) -> u32 {
        (self.nodes.len() - 1) as u32
    }

    /// 节点访问
    #[inline]
    pub fn node(&self, idx: u32) -> &BvhNode {
        &self.nodes[idx as usize]
    }

    /// 节点总数
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// 绑定的边数
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    /// 节点数组（子先父后序），供上行/下行扫描
    #[inline]
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }
}

/// 递归构建子树，返回（局部节点数组，局部根索引）
///
/// 并行分支在两个子区间上 join，右子树节点整体偏移后合并；
/// 父节点恒在两个子树之后，保证全局拓扑序。
fn build_subtree(items: &mut [EdgeItem], allow_parallel: bool) -> (Vec<BvhNode>, u32) {
    debug_assert!(!items.is_empty());

    if items.len() == 1 {
        let it = items[0];
        let mut pos_bounds = Aabb::empty();
        let mut tan_bounds = Aabb::empty();
        pos_bounds.include(it.midpoint);
        tan_bounds.include(it.tangent);
        let node = BvhNode {
            pos_bounds,
            tan_bounds,
            mass: it.length,
            centroid: it.midpoint,
            avg_tangent: it.tangent,
            children: [INVALID_INDEX, INVALID_INDEX],
            edge: it.edge,
        };
        return (vec![node], 0);
    }

    let item_count = items.len();
    let split = mass_median_split(items);
    let (left_items, right_items) = items.split_at_mut(split);

    let use_join = allow_parallel && item_count >= PARALLEL_BUILD_THRESHOLD;
    let ((mut nodes, left_root), (right_nodes, right_root)) = if use_join {
        rayon::join(
            || build_subtree(left_items, true),
            || build_subtree(right_items, true),
        )
    } else {
        (
            build_subtree(left_items, false),
            build_subtree(right_items, false),
        )
    };

    // 合并右子树：子索引整体偏移
    let offset = nodes.len() as u32;
    nodes.reserve(right_nodes.len() + 1);
    for mut n in right_nodes {
        if !n.is_leaf() {
            n.children[0] += offset;
            n.children[1] += offset;
        }
        nodes.push(n);
    }

    let lc = left_root;
    let rc = right_root + offset;
    let parent = merge_nodes(&nodes[lc as usize], &nodes[rc as usize], [lc, rc]);
    nodes.push(parent);
    let root = (nodes.len() - 1) as u32;
    (nodes, root)
}

/// 由两个子节点聚合出父节点
fn merge_nodes(a: &BvhNode, b: &BvhNode, children: [u32; 2]) -> BvhNode {
    let mut pos_bounds = a.pos_bounds;
    pos_bounds.union(&b.pos_bounds);
    let mut tan_bounds = a.tan_bounds;
    tan_bounds.union(&b.tan_bounds);

    let mass = a.mass + b.mass;
    let centroid = (a.mass * a.centroid + b.mass * b.centroid) / mass;
    let tangent_sum = a.mass * a.avg_tangent + b.mass * b.avg_tangent;
    let avg_tangent = tangent_sum.normalize_or_zero();

    BvhNode {
        pos_bounds,
        tan_bounds,
        mass,
        centroid,
        avg_tangent,
        children,
        edge: INVALID_INDEX,
    }
}

/// 沿最长轴按质量中位点二分，返回分割下标 (1..len)
fn mass_median_split(items: &mut [EdgeItem]) -> usize {
    let mut bounds = Aabb::empty();
    for it in items.iter() {
        bounds.include(it.midpoint);
    }
    let axis = bounds.longest_axis();

    items.sort_unstable_by(|a, b| {
        a.midpoint[axis]
            .partial_cmp(&b.midpoint[axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total: f64 = items.iter().map(|it| it.length).sum();
    let mut acc = 0.0;
    for (i, it) in items.iter().enumerate() {
        acc += it.length;
        if acc >= 0.5 * total {
            // 保证两侧非空
            return (i + 1).clamp(1, items.len() - 1);
        }
    }
    items.len() / 2
}
