// crates/kf_curve/src/network.rs

//! 曲线网络核心类型
//!
//! [`CurveNetwork`] 持有顶点位置与边表，提供每条边的长度、中点、
//! 单位切向与对偶质量（= 边长，用作积分权重）查询，以及顶点邻域迭代。
//!
//! # 不变量
//!
//! - 每条边引用两个互异且在界内的顶点索引
//! - 无重复边（无序对意义下）
//! - 一步优化之内拓扑不可变；位置可变
//!
//! # 钉固标志
//!
//! 顶点可钉固位置、切向或约束到隐式曲面，由求解器转换为约束行。

use crate::error::{CurveError, CurveResult};
use crate::topology::IncidenceTable;
use glam::DVec3;
use kf_foundation::tolerance::GEOM_EPS;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// 顶点分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexClass {
    /// 端点（价 1）
    Endpoint,
    /// 内部点（价 2）
    Interior,
    /// 交汇点（价 ≥ 3）
    Junction,
}

/// 顶点钉固标志
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinFlags {
    /// 钉固位置的顶点
    pub position: Vec<bool>,
    /// 钉固切向的顶点
    pub tangent: Vec<bool>,
    /// 约束到隐式曲面的顶点
    pub surface: Vec<bool>,
}

impl PinFlags {
    fn with_size(n: usize) -> Self {
        Self {
            position: vec![false; n],
            tangent: vec![false; n],
            surface: vec![false; n],
        }
    }
}

/// 多段线曲线网络
///
/// 顶点与边的所有权归本类型；BVH、块簇树、多重网格等
/// 加速结构均为短生命周期缓存，由求解器按步重建。
#[derive(Debug, Clone)]
pub struct CurveNetwork {
    /// 顶点位置
    positions: Vec<DVec3>,
    /// 每条边的两个端点索引 (prev, next)
    edge_verts: Vec<[u32; 2]>,
    /// 顶点→边 CSR 关联表
    incidence: IncidenceTable,
    /// 钉固标志
    pins: PinFlags,
}

impl CurveNetwork {
    /// 从几何表构建曲线网络
    ///
    /// # 参数
    ///
    /// - `positions`: 顶点位置表
    /// - `edges`: 边表，每项为指向 `positions` 的一对索引
    ///
    /// # 错误
    ///
    /// 空曲线、越界索引、自环边或重复边返回
    /// [`CurveError::InvalidTopology`]。
    pub fn new(positions: Vec<DVec3>, edges: Vec<[u32; 2]>) -> CurveResult<Self> {
        if positions.is_empty() {
            return Err(CurveError::invalid_topology("构建曲线", "顶点表为空"));
        }
        if edges.is_empty() {
            return Err(CurveError::invalid_topology("构建曲线", "边表为空"));
        }

        let n = positions.len();
        for (i, e) in edges.iter().enumerate() {
            if e[0] as usize >= n || e[1] as usize >= n {
                return Err(CurveError::invalid_topology(
                    "构建曲线",
                    format!("边 {} 引用越界顶点 ({}, {})", i, e[0], e[1]),
                ));
            }
            if e[0] == e[1] {
                return Err(CurveError::invalid_topology(
                    "构建曲线",
                    format!("边 {} 是自环 (顶点 {})", i, e[0]),
                ));
            }
        }

        // 重复边检测：对每个顶点维护已见邻居的短列表
        let mut neighbors: Vec<SmallVec<[u32; 4]>> = vec![SmallVec::new(); n];
        for (i, e) in edges.iter().enumerate() {
            let (u, v) = (e[0].min(e[1]), e[0].max(e[1]));
            if neighbors[u as usize].contains(&v) {
                return Err(CurveError::invalid_topology(
                    "构建曲线",
                    format!("边 {} 与已有边重复 ({}, {})", i, u, v),
                ));
            }
            neighbors[u as usize].push(v);
        }

        let incidence = IncidenceTable::from_edges(n, &edges);
        let pins = PinFlags::with_size(n);

        Ok(Self {
            positions,
            edge_verts: edges,
            incidence,
            pins,
        })
    }

    // ========================================================================
    // 基本查询
    // ========================================================================

    /// 顶点总数
    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.positions.len()
    }

    /// 边总数
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.edge_verts.len()
    }

    /// 顶点位置表
    #[inline]
    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    /// 顶点位置可变表
    ///
    /// 调用方负责在位置变动后丢弃依赖旧位置的缓存。
    #[inline]
    pub fn positions_mut(&mut self) -> &mut [DVec3] {
        &mut self.positions
    }

    /// 覆盖全部顶点位置
    pub fn set_positions(&mut self, positions: &[DVec3]) {
        debug_assert_eq!(positions.len(), self.positions.len());
        self.positions.copy_from_slice(positions);
    }

    /// 边表
    #[inline]
    pub fn edge_verts(&self) -> &[[u32; 2]] {
        &self.edge_verts
    }

    /// 边 e 的两个端点索引
    #[inline]
    pub fn edge(&self, e: usize) -> [u32; 2] {
        self.edge_verts[e]
    }

    /// 顶点 v 的关联边
    #[inline]
    pub fn vertex_edges(&self, v: usize) -> &[u32] {
        self.incidence.edges_of(v)
    }

    /// 顶点分类
    pub fn vertex_class(&self, v: usize) -> VertexClass {
        match self.incidence.valence(v) {
            1 => VertexClass::Endpoint,
            2 => VertexClass::Interior,
            _ => VertexClass::Junction,
        }
    }

    // ========================================================================
    // 边几何
    // ========================================================================

    /// 边 e 的长度
    #[inline]
    pub fn edge_length(&self, e: usize) -> f64 {
        let [u, v] = self.edge_verts[e];
        (self.positions[v as usize] - self.positions[u as usize]).length()
    }

    /// 边 e 的中点
    #[inline]
    pub fn edge_midpoint(&self, e: usize) -> DVec3 {
        let [u, v] = self.edge_verts[e];
        0.5 * (self.positions[u as usize] + self.positions[v as usize])
    }

    /// 边 e 的单位切向
    ///
    /// 退化边（长度低于几何阈值）返回零向量。
    #[inline]
    pub fn edge_tangent(&self, e: usize) -> DVec3 {
        let [u, v] = self.edge_verts[e];
        let d = self.positions[v as usize] - self.positions[u as usize];
        let len = d.length();
        if len < GEOM_EPS {
            DVec3::ZERO
        } else {
            d / len
        }
    }

    /// 边 e 的对偶质量（= 边长，积分权重）
    #[inline]
    pub fn dual_mass(&self, e: usize) -> f64 {
        self.edge_length(e)
    }

    /// 两条边是否共享顶点（含同一条边）
    pub fn edges_share_vertex(&self, e1: usize, e2: usize) -> bool {
        let [a, b] = self.edge_verts[e1];
        let [c, d] = self.edge_verts[e2];
        a == c || a == d || b == c || b == d
    }

    // ========================================================================
    // 全局量
    // ========================================================================

    /// 总长度
    pub fn total_length(&self) -> f64 {
        (0..self.n_edges()).map(|e| self.edge_length(e)).sum()
    }

    /// 平均边长
    pub fn average_edge_length(&self) -> f64 {
        self.total_length() / self.n_edges() as f64
    }

    /// 顶点重心（算术平均）
    pub fn barycenter(&self) -> DVec3 {
        let sum: DVec3 = self.positions.iter().copied().fold(DVec3::ZERO, |a, b| a + b);
        sum / self.positions.len() as f64
    }

    // ========================================================================
    // 钉固
    // ========================================================================

    /// 钉固顶点位置
    pub fn pin_vertex(&mut self, v: usize) {
        self.pins.position[v] = true;
    }

    /// 钉固顶点切向
    pub fn pin_tangent(&mut self, v: usize) {
        self.pins.tangent[v] = true;
    }

    /// 将顶点约束到隐式曲面
    pub fn pin_to_surface(&mut self, v: usize) {
        self.pins.surface[v] = true;
    }

    /// 钉固所有端点（价 1 顶点），可选同时钉固其切向
    pub fn pin_all_endpoints(&mut self, with_tangents: bool) {
        for v in 0..self.n_vertices() {
            if self.vertex_class(v) == VertexClass::Endpoint {
                self.pins.position[v] = true;
                if with_tangents {
                    self.pins.tangent[v] = true;
                }
            }
        }
    }

    /// 顶点是否钉固位置
    #[inline]
    pub fn is_pinned(&self, v: usize) -> bool {
        self.pins.position[v]
    }

    /// 顶点是否钉固切向
    #[inline]
    pub fn is_tangent_pinned(&self, v: usize) -> bool {
        self.pins.tangent[v]
    }

    /// 顶点是否约束到曲面
    #[inline]
    pub fn is_surface_pinned(&self, v: usize) -> bool {
        self.pins.surface[v]
    }

    /// 钉固标志整体视图
    pub fn pins(&self) -> &PinFlags {
        &self.pins
    }

    /// 替换钉固标志（细分重映射用）
    pub(crate) fn set_pins(&mut self, pins: PinFlags) {
        debug_assert_eq!(pins.position.len(), self.n_vertices());
        self.pins = pins;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> CurveNetwork {
        let positions = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ];
        let edges = vec![[0, 1], [1, 2], [2, 3], [3, 0]];
        CurveNetwork::new(positions, edges).unwrap()
    }

    #[test]
    fn test_construction_rejects_empty() {
        let err = CurveNetwork::new(vec![], vec![]).unwrap_err();
        assert!(matches!(err, CurveError::InvalidTopology { .. }));
    }

    #[test]
    fn test_construction_rejects_self_loop() {
        let positions = vec![DVec3::ZERO, DVec3::X];
        let err = CurveNetwork::new(positions, vec![[0, 0]]).unwrap_err();
        assert!(matches!(err, CurveError::InvalidTopology { .. }));
    }

    #[test]
    fn test_construction_rejects_out_of_range() {
        let positions = vec![DVec3::ZERO, DVec3::X];
        let err = CurveNetwork::new(positions, vec![[0, 5]]).unwrap_err();
        assert!(matches!(err, CurveError::InvalidTopology { .. }));
    }

    #[test]
    fn test_construction_rejects_duplicate_edge() {
        let positions = vec![DVec3::ZERO, DVec3::X, DVec3::Y];
        // (1, 0) 与 (0, 1) 在无序对意义下重复
        let err = CurveNetwork::new(positions, vec![[0, 1], [1, 2], [1, 0]]).unwrap_err();
        assert!(matches!(err, CurveError::InvalidTopology { .. }));
    }

    #[test]
    fn test_edge_geometry() {
        let curve = unit_square();
        assert_eq!(curve.n_vertices(), 4);
        assert_eq!(curve.n_edges(), 4);

        assert!((curve.edge_length(0) - 1.0).abs() < 1e-15);
        assert_eq!(curve.edge_midpoint(0), DVec3::new(0.5, 0.0, 0.0));
        assert_eq!(curve.edge_tangent(0), DVec3::X);
        assert!((curve.total_length() - 4.0).abs() < 1e-15);
    }

    #[test]
    fn test_barycenter() {
        let curve = unit_square();
        let b = curve.barycenter();
        assert!((b - DVec3::new(0.5, 0.5, 0.0)).length() < 1e-15);
    }

    #[test]
    fn test_vertex_class() {
        let curve = unit_square();
        for v in 0..4 {
            assert_eq!(curve.vertex_class(v), VertexClass::Interior);
        }

        let open = CurveNetwork::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::new(2.0, 0.0, 0.0)],
            vec![[0, 1], [1, 2]],
        )
        .unwrap();
        assert_eq!(open.vertex_class(0), VertexClass::Endpoint);
        assert_eq!(open.vertex_class(1), VertexClass::Interior);
    }

    #[test]
    fn test_edges_share_vertex() {
        let curve = unit_square();
        assert!(curve.edges_share_vertex(0, 1));
        assert!(!curve.edges_share_vertex(0, 2));
        assert!(curve.edges_share_vertex(0, 0));
    }

    #[test]
    fn test_pin_all_endpoints() {
        let mut open = CurveNetwork::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::new(2.0, 0.0, 0.0)],
            vec![[0, 1], [1, 2]],
        )
        .unwrap();
        open.pin_all_endpoints(true);
        assert!(open.is_pinned(0));
        assert!(open.is_tangent_pinned(0));
        assert!(!open.is_pinned(1));
        assert!(open.is_pinned(2));
    }
}
