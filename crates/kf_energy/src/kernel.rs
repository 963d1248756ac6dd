// crates/kf_energy/src/kernel.rs

//! 切点核函数与度量核函数
//!
//! 切点能量在曲线点 x、y（x 处单位切向 T）之间的核为
//!
//! $$ k_{\alpha,\beta}(x, y, T) = \frac{\|(I - TT^\top)(y - x)\|^\alpha}{\|y - x\|^\beta} $$
//!
//! 分子是 y − x 在 T 的法平面上的投影长度。可积性要求
//! α > 0 且 β > α + 1；该条件同时保证相邻边对的极限有限。
//!
//! Sobolev 预条件度量由核 $G_s(x,y) = \|x-y\|^{-(2s+1)}$ 诱导，
//! 其中 s = (β − 1)/α − 1。
//!
//! 本模块同时给出核对 x、y、T 的解析导数，供梯度装配链式使用。

use crate::error::{EnergyError, EnergyResult};
use glam::DVec3;
use kf_foundation::tolerance::GEOM_EPS;
use serde::{Deserialize, Serialize};

/// 切点能量指数对 (α, β)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpeExponents {
    /// 分子指数 α
    pub alpha: f64,
    /// 分母指数 β
    pub beta: f64,
}

impl TpeExponents {
    /// 创建并验证指数对
    ///
    /// # 错误
    ///
    /// α ≤ 0 或 β ≤ α + 1（核不可积）返回
    /// [`EnergyError::InvalidExponents`]。
    pub fn new(alpha: f64, beta: f64) -> EnergyResult<Self> {
        if !(alpha > 0.0) || !(beta > alpha + 1.0) {
            return Err(EnergyError::InvalidExponents { alpha, beta });
        }
        Ok(Self { alpha, beta })
    }

    /// 论文默认指数 (α, β) = (3, 6)
    pub fn standard() -> Self {
        Self {
            alpha: 3.0,
            beta: 6.0,
        }
    }

    /// 诱导度量的分数阶 s = (β − 1)/α − 1
    #[inline]
    pub fn metric_order(&self) -> f64 {
        (self.beta - 1.0) / self.alpha - 1.0
    }
}

/// 切点核值 k(x, y, T)
///
/// `x` 处的单位切向为 `t`。距离低于几何阈值时返回 0
/// （调用方负责排除自对）。
#[inline]
pub fn tangent_point_kernel(x: DVec3, y: DVec3, t: DVec3, exps: &TpeExponents) -> f64 {
    let d = y - x;
    let r2 = d.length_squared();
    if r2 < GEOM_EPS * GEOM_EPS {
        return 0.0;
    }
    let proj = d - d.dot(t) * t;
    let p2 = proj.length_squared();
    if p2 <= 0.0 {
        return 0.0;
    }
    p2.powf(0.5 * exps.alpha) * r2.powf(-0.5 * exps.beta)
}

/// 切点核值及其对 x、y、T 的解析导数
#[derive(Debug, Clone, Copy)]
pub struct TpKernelDerivs {
    /// 核值 k
    pub value: f64,
    /// ∂k/∂x
    pub dx: DVec3,
    /// ∂k/∂y
    pub dy: DVec3,
    /// ∂k/∂T
    pub dt: DVec3,
}

impl TpKernelDerivs {
    const ZERO: Self = Self {
        value: 0.0,
        dx: DVec3::ZERO,
        dy: DVec3::ZERO,
        dt: DVec3::ZERO,
    };
}

/// 求核值与解析导数
///
/// 记 d = y − x, r = ‖d‖, P = (I − TTᵀ)d, p = ‖P‖，则
///
/// - ∂k/∂d = α p^{α−2} P / r^β − β p^α d / r^{β+2}
/// - ∂k/∂x = −∂k/∂d, ∂k/∂y = +∂k/∂d
/// - ∂k/∂T = −α p^{α−2} (T·d) P / r^β
///
/// p → 0 时投影项按 p^{α−1} 消失（α > 1），此处直接置零。
pub fn tangent_point_kernel_derivs(
    x: DVec3,
    y: DVec3,
    t: DVec3,
    exps: &TpeExponents,
) -> TpKernelDerivs {
    let d = y - x;
    let r2 = d.length_squared();
    if r2 < GEOM_EPS * GEOM_EPS {
        return TpKernelDerivs::ZERO;
    }

    let td = d.dot(t);
    let proj = d - td * t;
    let p2 = proj.length_squared();

    let r_pow = r2.powf(-0.5 * exps.beta); // r^{-β}
    if p2 < GEOM_EPS * GEOM_EPS {
        // 投影退化: k 与全部导数项按 p 的正幂消失
        return TpKernelDerivs::ZERO;
    }

    let p_pow = p2.powf(0.5 * exps.alpha); // p^{α}
    let p_pow_m2 = p2.powf(0.5 * exps.alpha - 1.0); // p^{α-2}
    let value = p_pow * r_pow;

    // ∂k/∂d
    let dk_dd = exps.alpha * p_pow_m2 * r_pow * proj - exps.beta * value / r2 * d;
    // ∂k/∂T
    let dt = -exps.alpha * p_pow_m2 * td * r_pow * proj;

    TpKernelDerivs {
        value,
        dx: -dk_dd,
        dy: dk_dd,
        dt,
    }
}

/// 度量核 G_s(r) = r^{−(2s+1)}
///
/// 距离低于几何阈值时返回 0（对角项另行处理）。
#[inline]
pub fn metric_kernel(r: f64, s: f64) -> f64 {
    if r < GEOM_EPS {
        0.0
    } else {
        r.powf(-(2.0 * s + 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd_check(x: DVec3, y: DVec3, t: DVec3, exps: &TpeExponents) {
        let h = 1e-6;
        let derivs = tangent_point_kernel_derivs(x, y, t, exps);

        for axis in 0..3 {
            let mut dv = DVec3::ZERO;
            dv[axis] = h;

            // ∂k/∂x
            let fd_x = (tangent_point_kernel(x + dv, y, t, exps)
                - tangent_point_kernel(x - dv, y, t, exps))
                / (2.0 * h);
            assert!(
                (fd_x - derivs.dx[axis]).abs() < 1e-5 * (1.0 + derivs.dx[axis].abs()),
                "dx 轴 {}: fd={} 解析={}",
                axis,
                fd_x,
                derivs.dx[axis]
            );

            // ∂k/∂y
            let fd_y = (tangent_point_kernel(x, y + dv, t, exps)
                - tangent_point_kernel(x, y - dv, t, exps))
                / (2.0 * h);
            assert!((fd_y - derivs.dy[axis]).abs() < 1e-5 * (1.0 + derivs.dy[axis].abs()));

            // ∂k/∂T（沿非归一化方向扰动）
            let fd_t = (tangent_point_kernel(x, y, t + dv, exps)
                - tangent_point_kernel(x, y, t - dv, exps))
                / (2.0 * h);
            assert!((fd_t - derivs.dt[axis]).abs() < 1e-5 * (1.0 + derivs.dt[axis].abs()));
        }
    }

    #[test]
    fn test_exponent_validation() {
        assert!(TpeExponents::new(3.0, 6.0).is_ok());
        assert!(TpeExponents::new(2.0, 4.0).is_ok());
        assert!(TpeExponents::new(0.0, 6.0).is_err());
        assert!(TpeExponents::new(-1.0, 6.0).is_err());
        // β ≤ α + 1 不可积
        assert!(TpeExponents::new(3.0, 4.0).is_err());
        assert!(TpeExponents::new(3.0, f64::NAN).is_err());
    }

    #[test]
    fn test_metric_order() {
        let exps = TpeExponents::standard();
        // s = (6-1)/3 - 1 = 2/3
        assert!((exps.metric_order() - 2.0 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn test_kernel_perpendicular_case() {
        // y − x 垂直于 T: 投影 = 全长, k = r^{α−β}
        let exps = TpeExponents::new(2.0, 4.0).unwrap();
        let x = DVec3::ZERO;
        let y = DVec3::new(0.0, 2.0, 0.0);
        let t = DVec3::X;
        let k = tangent_point_kernel(x, y, t, &exps);
        assert!((k - 2.0f64.powi(-2)).abs() < 1e-14);
    }

    #[test]
    fn test_kernel_parallel_case() {
        // y − x 平行于 T: 投影为零, k = 0
        let exps = TpeExponents::standard();
        let k = tangent_point_kernel(DVec3::ZERO, DVec3::new(3.0, 0.0, 0.0), DVec3::X, &exps);
        assert_eq!(k, 0.0);
    }

    #[test]
    fn test_kernel_derivs_finite_difference() {
        let exps = TpeExponents::standard();
        fd_check(
            DVec3::new(0.1, -0.2, 0.3),
            DVec3::new(1.0, 0.8, -0.5),
            DVec3::new(0.0, 0.6, 0.8),
            &exps,
        );

        let exps24 = TpeExponents::new(2.0, 4.0).unwrap();
        fd_check(
            DVec3::new(-0.4, 0.0, 0.2),
            DVec3::new(0.3, 1.2, 0.9),
            DVec3::new(1.0, 0.0, 0.0),
            &exps24,
        );
    }

    #[test]
    fn test_metric_kernel_value() {
        // s = 1/2 ⇒ G = r^{-2}
        assert!((metric_kernel(2.0, 0.5) - 0.25).abs() < 1e-15);
        assert_eq!(metric_kernel(0.0, 0.5), 0.0);
    }
}
