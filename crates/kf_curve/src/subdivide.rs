// crates/kf_curve/src/subdivide.rs

//! 均匀中点细分
//!
//! 每条边在中点一分为二。原顶点保持原索引，新中点顶点顺次追加在后，
//! 因此细分前后原顶点位置按索引逐一对应。钉固标志随原顶点保留，
//! 新中点顶点不带任何钉固。
//!
//! 细分后所有依赖旧拓扑的结构（BVH、块簇树、多重网格、投影器）
//! 必须由持有者丢弃重建。

use crate::network::{CurveNetwork, PinFlags};

/// 对曲线做一次均匀中点细分
///
/// # 返回
///
/// 新曲线：顶点数 n + m，边数 2m。
/// 边 e 被拆为 (2e, 2e+1) = (u, mid_e), (mid_e, v)。
pub fn subdivide(curve: &CurveNetwork) -> CurveNetwork {
    let n = curve.n_vertices();
    let m = curve.n_edges();

    let mut positions = Vec::with_capacity(n + m);
    positions.extend_from_slice(curve.positions());
    for e in 0..m {
        positions.push(curve.edge_midpoint(e));
    }

    let mut edges = Vec::with_capacity(2 * m);
    for e in 0..m {
        let [u, v] = curve.edge(e);
        let mid = (n + e) as u32;
        edges.push([u, mid]);
        edges.push([mid, v]);
    }

    // 原曲线拓扑已验证，细分保持不变量
    let mut out = CurveNetwork::new(positions, edges).expect("细分保持拓扑不变量");

    let old = curve.pins();
    let mut pins = PinFlags {
        position: vec![false; n + m],
        tangent: vec![false; n + m],
        surface: vec![false; n + m],
    };
    pins.position[..n].copy_from_slice(&old.position);
    pins.tangent[..n].copy_from_slice(&old.tangent);
    pins.surface[..n].copy_from_slice(&old.surface);
    out.set_pins(pins);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation;
    use glam::DVec3;

    #[test]
    fn test_subdivide_counts() {
        let curve = generation::circle(8, 1.0);
        let fine = subdivide(&curve);
        assert_eq!(fine.n_vertices(), 8 + 8);
        assert_eq!(fine.n_edges(), 16);
    }

    #[test]
    fn test_subdivide_preserves_original_positions() {
        let curve = generation::circle(16, 2.0);
        let fine = subdivide(&curve);
        for v in 0..curve.n_vertices() {
            let d = (fine.positions()[v] - curve.positions()[v]).length();
            assert!(d < 1e-12);
        }
    }

    #[test]
    fn test_subdivide_midpoints() {
        let curve = CurveNetwork::new(
            vec![DVec3::ZERO, DVec3::new(2.0, 0.0, 0.0)],
            vec![[0, 1]],
        )
        .unwrap();
        let fine = subdivide(&curve);
        assert_eq!(fine.positions()[2], DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(fine.edge(0), [0, 2]);
        assert_eq!(fine.edge(1), [2, 1]);
    }

    #[test]
    fn test_subdivide_remaps_pins() {
        let mut curve = generation::open_arc(8, 1.0, std::f64::consts::PI);
        curve.pin_all_endpoints(true);
        let fine = subdivide(&curve);

        assert!(fine.is_pinned(0));
        assert!(fine.is_tangent_pinned(0));
        assert!(fine.is_pinned(8));
        // 新中点顶点不继承钉固
        for v in 9..fine.n_vertices() {
            assert!(!fine.is_pinned(v));
        }
    }

    #[test]
    fn test_subdivide_halves_average_length() {
        let curve = generation::circle(32, 1.0);
        let fine = subdivide(&curve);
        let ratio = fine.average_edge_length() / curve.average_edge_length();
        // 圆上中点细分的新边长略短于旧边长一半（弦折线），比值 ≤ 0.5
        assert!(ratio < 0.51);
    }
}
