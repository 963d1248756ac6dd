// crates/kf_solver/src/surface.rs

//! 隐式曲面
//!
//! 曲面钉固约束把顶点限制在符号距离场的零水平集上，
//! 每步在当前位置重新线性化（一行: ∇φ · dx = −φ）。

use glam::DVec3;
use kf_foundation::tolerance::GEOM_EPS;

/// 隐式曲面（符号距离场）
pub trait ImplicitSurface: Send + Sync {
    /// 符号距离值
    fn value(&self, p: DVec3) -> f64;

    /// 符号距离梯度（零水平集处为单位法向）
    fn gradient(&self, p: DVec3) -> DVec3;
}

/// 球面: φ(p) = ‖p − c‖ − r
#[derive(Debug, Clone, Copy)]
pub struct ImplicitSphere {
    /// 球心
    pub center: DVec3,
    /// 半径
    pub radius: f64,
}

impl ImplicitSurface for ImplicitSphere {
    fn value(&self, p: DVec3) -> f64 {
        (p - self.center).length() - self.radius
    }

    fn gradient(&self, p: DVec3) -> DVec3 {
        let d = p - self.center;
        let len = d.length();
        if len < GEOM_EPS {
            DVec3::Z
        } else {
            d / len
        }
    }
}

/// 平面: φ(p) = n · (p − c)
#[derive(Debug, Clone, Copy)]
pub struct ImplicitPlane {
    /// 平面上一点
    pub center: DVec3,
    /// 单位法向
    pub normal: DVec3,
}

impl ImplicitSurface for ImplicitPlane {
    fn value(&self, p: DVec3) -> f64 {
        self.normal.dot(p - self.center)
    }

    fn gradient(&self, _p: DVec3) -> DVec3 {
        self.normal
    }
}
