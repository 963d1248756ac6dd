// crates/kf_curve/src/topology.rs

//! 顶点-边关联表
//!
//! 提供 CSR (Compressed Sparse Row) 格式的顶点→边关联存储。
//!
//! # 设计说明
//!
//! 顶点↔边的双向关联构成环状引用；这里用两张小整数索引表表示
//! （`edge_verts[e]` 存于曲线网络，本表存 `vertex_edges[v]`），
//! 避免两者之间的所有权指针：
//! - `offsets[v]` 和 `offsets[v+1]` 之间的元素是顶点 v 的关联边
//! - 内存紧凑，缓存友好，适合只读迭代
//!
//! # 示例
//!
//! ```
//! use kf_curve::topology::IncidenceTable;
//!
//! // 三角形回路: 0-1, 1-2, 2-0
//! let edges = [[0u32, 1], [1, 2], [2, 0]];
//! let table = IncidenceTable::from_edges(3, &edges);
//!
//! assert_eq!(table.valence(0), 2);
//! assert_eq!(table.edges_of(1), &[0, 1]);
//! ```

use serde::{Deserialize, Serialize};

/// CSR 格式顶点→边关联表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidenceTable {
    /// 行偏移数组，长度 = n_vertices + 1
    offsets: Vec<u32>,
    /// 关联边索引数组，长度 = 2 * n_edges
    incident: Vec<u32>,
}

impl IncidenceTable {
    /// 从边表构建关联表
    ///
    /// # 参数
    ///
    /// - `n_vertices`: 顶点总数
    /// - `edges`: 每条边的两个端点索引（假定已通过拓扑验证）
    pub fn from_edges(n_vertices: usize, edges: &[[u32; 2]]) -> Self {
        // 两趟计数构建：先统计每个顶点的价，再散布边索引
        let mut counts = vec![0u32; n_vertices];
        for e in edges {
            counts[e[0] as usize] += 1;
            counts[e[1] as usize] += 1;
        }

        let mut offsets = vec![0u32; n_vertices + 1];
        for v in 0..n_vertices {
            offsets[v + 1] = offsets[v] + counts[v];
        }

        let mut cursor = offsets[..n_vertices].to_vec();
        let mut incident = vec![0u32; 2 * edges.len()];
        for (e_idx, e) in edges.iter().enumerate() {
            for &v in e {
                incident[cursor[v as usize] as usize] = e_idx as u32;
                cursor[v as usize] += 1;
            }
        }

        Self { offsets, incident }
    }

    /// 获取顶点 v 的关联边切片
    #[inline]
    pub fn edges_of(&self, v: usize) -> &[u32] {
        let start = self.offsets[v] as usize;
        let end = self.offsets[v + 1] as usize;
        &self.incident[start..end]
    }

    /// 顶点 v 的价（关联边数）
    #[inline]
    pub fn valence(&self, v: usize) -> usize {
        (self.offsets[v + 1] - self.offsets[v]) as usize
    }

    /// 顶点总数
    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// 迭代所有顶点的关联边
    pub fn iter_vertices(&self) -> impl Iterator<Item = &[u32]> {
        (0..self.n_vertices()).map(move |v| self.edges_of(v))
    }
}
