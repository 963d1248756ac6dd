// crates/kf_curve/src/generation.rs

//! 曲线生成模块
//!
//! 提供简单的参数化曲线生成工具，用于测试和验证：
//!
//! - [`circle`]: xy 平面正多边形闭曲线
//! - [`open_arc`]: xy 平面开弧
//! - [`trefoil`]: 三叶结参数化折线
//! - [`random_polyline`]: 确定性伪随机游走折线
//!
//! # 使用示例
//!
//! ```
//! use kf_curve::generation;
//!
//! let curve = generation::circle(64, 1.0);
//! assert_eq!(curve.n_edges(), 64);
//! ```

use crate::network::CurveNetwork;
use glam::DVec3;
use std::f64::consts::{PI, TAU};

/// 生成 xy 平面上内接半径 `radius` 的正 n 边形闭曲线
pub fn circle(n: usize, radius: f64) -> CurveNetwork {
    assert!(n >= 3, "闭曲线至少需要 3 条边");
    let positions: Vec<DVec3> = (0..n)
        .map(|i| {
            let theta = TAU * i as f64 / n as f64;
            DVec3::new(radius * theta.cos(), radius * theta.sin(), 0.0)
        })
        .collect();
    let edges: Vec<[u32; 2]> = (0..n)
        .map(|i| [i as u32, ((i + 1) % n) as u32])
        .collect();
    CurveNetwork::new(positions, edges).expect("正多边形拓扑有效")
}

/// 生成 xy 平面上张角 `angle` 的开弧（n 条边，n+1 个顶点）
pub fn open_arc(n: usize, radius: f64, angle: f64) -> CurveNetwork {
    assert!(n >= 1);
    let positions: Vec<DVec3> = (0..=n)
        .map(|i| {
            let theta = angle * i as f64 / n as f64;
            DVec3::new(radius * theta.cos(), radius * theta.sin(), 0.0)
        })
        .collect();
    let edges: Vec<[u32; 2]> = (0..n).map(|i| [i as u32, (i + 1) as u32]).collect();
    CurveNetwork::new(positions, edges).expect("开弧拓扑有效")
}

/// 生成三叶结参数化折线（n 条边的闭曲线）
///
/// 标准参数化: (sin t + 2 sin 2t, cos t − 2 cos 2t, −sin 3t)，
/// 整体缩放 `scale`。
pub fn trefoil(n: usize, scale: f64) -> CurveNetwork {
    assert!(n >= 3);
    let positions: Vec<DVec3> = (0..n)
        .map(|i| {
            let t = TAU * i as f64 / n as f64;
            DVec3::new(
                t.sin() + 2.0 * (2.0 * t).sin(),
                t.cos() - 2.0 * (2.0 * t).cos(),
                -(3.0 * t).sin(),
            ) * scale
        })
        .collect();
    let edges: Vec<[u32; 2]> = (0..n)
        .map(|i| [i as u32, ((i + 1) % n) as u32])
        .collect();
    CurveNetwork::new(positions, edges).expect("三叶结拓扑有效")
}

/// 生成确定性伪随机游走折线（开链，n 条边）
///
/// 使用线性同余发生器，给定 `seed` 完全可复现；
/// 步长固定为 1，方向在球面上伪均匀。
pub fn random_polyline(n: usize, seed: u64) -> CurveNetwork {
    assert!(n >= 1);
    let mut state = seed;
    let mut next_unit = || -> f64 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f64) / (u32::MAX as f64)
    };

    let mut positions = Vec::with_capacity(n + 1);
    let mut p = DVec3::ZERO;
    positions.push(p);
    for _ in 0..n {
        // 球面伪均匀方向: cos θ 均匀取样
        let z = 2.0 * next_unit() - 1.0;
        let phi = TAU * next_unit();
        let r = (1.0 - z * z).max(0.0).sqrt();
        p += DVec3::new(r * phi.cos(), r * phi.sin(), z);
        positions.push(p);
    }

    let edges: Vec<[u32; 2]> = (0..n).map(|i| [i as u32, (i + 1) as u32]).collect();
    CurveNetwork::new(positions, edges).expect("随机折线拓扑有效")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_geometry() {
        let curve = circle(64, 1.0);
        assert_eq!(curve.n_vertices(), 64);
        assert_eq!(curve.n_edges(), 64);

        // 正 64 边形周长接近 2π
        let perimeter = curve.total_length();
        assert!((perimeter - TAU).abs() < 0.01);

        // 所有边等长
        let l0 = curve.edge_length(0);
        for e in 1..64 {
            assert!((curve.edge_length(e) - l0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_open_arc_endpoints() {
        let curve = open_arc(8, 1.0, PI);
        assert_eq!(curve.n_vertices(), 9);
        let first = curve.positions()[0];
        let last = curve.positions()[8];
        assert!((first - DVec3::new(1.0, 0.0, 0.0)).length() < 1e-12);
        assert!((last - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_trefoil_closed() {
        let curve = trefoil(256, 1.0);
        assert_eq!(curve.n_edges(), 256);
        // 所有顶点价 2
        for v in 0..curve.n_vertices() {
            assert_eq!(curve.vertex_edges(v).len(), 2);
        }
    }

    #[test]
    fn test_random_polyline_deterministic() {
        let a = random_polyline(32, 42);
        let b = random_polyline(32, 42);
        for v in 0..a.n_vertices() {
            assert_eq!(a.positions()[v], b.positions()[v]);
        }

        let c = random_polyline(32, 43);
        assert_ne!(a.positions()[10], c.positions()[10]);
    }

    #[test]
    fn test_random_polyline_unit_steps() {
        let curve = random_polyline(16, 7);
        for e in 0..curve.n_edges() {
            assert!((curve.edge_length(e) - 1.0).abs() < 1e-12);
        }
    }
}
