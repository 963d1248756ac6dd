// crates/kf_foundation/src/kahan.rs

//! Kahan 补偿求和
//!
//! 长序列浮点求和的舍入误差随项数线性增长；
//! Kahan 算法通过补偿项将误差控制在 O(1) 个 ulp。
//! 用于能量累加等对精度敏感的串行归约。

/// Kahan 补偿求和器
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    /// 累计和
    sum: f64,
    /// 补偿项（低位丢失部分）
    compensation: f64,
}

impl KahanSum {
    /// 创建零初值求和器
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加一项
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// 获取当前和
    #[inline]
    pub fn value(&self) -> f64 {
        self.sum
    }
}

impl std::iter::FromIterator<f64> for KahanSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::new();
        for v in iter {
            acc.add(v);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kahan_basic() {
        let mut s = KahanSum::new();
        s.add(1.0);
        s.add(2.0);
        s.add(3.0);
        assert_eq!(s.value(), 6.0);
    }

    #[test]
    fn test_kahan_beats_naive() {
        // 大数 + 许多小数：朴素求和丢失低位
        let big = 1e16;
        let small = 1.0;
        let n = 1000;

        let mut naive = big;
        let mut kahan = KahanSum::new();
        kahan.add(big);
        for _ in 0..n {
            naive += small;
            kahan.add(small);
        }

        let exact = big + n as f64 * small;
        let kahan_err = (kahan.value() - exact).abs();
        let naive_err = (naive - exact).abs();
        assert!(kahan_err <= naive_err);
        assert!(kahan_err < 1.0);
    }

    #[test]
    fn test_from_iterator() {
        let s: KahanSum = (0..100).map(|i| i as f64 * 0.1).collect();
        let expected = 0.1 * (99.0 * 100.0 / 2.0);
        assert!((s.value() - expected).abs() < 1e-10);
    }
}
