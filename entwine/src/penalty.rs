//! Penalty force laws.
//!
//! The contact force magnitude `f(g)` is non-negative, vanishes for large
//! positive gaps and grows as the gap turns negative (penetration). Besides
//! the plain linear and quadratic laws, five regularised variants smooth the
//! force onset inside a positive-gap window so the outer Newton sees a C1
//! force. Values and first derivatives of every law are continuous at the
//! piecewise glue points.
//!
//! The current penalty parameter `pp` is passed per call since the Uzawa
//! loop grows it between outer iterations.

use crate::config::PenaltyLaw;

/// A penalty law together with its regularisation window parameters.
#[derive(Copy, Clone, Debug)]
pub struct PenaltyModel {
    pub law: PenaltyLaw,
    /// Width of the positive-gap regularisation window.
    pub g0: f64,
    /// Force at zero gap for the cubic, double-quadratic and exponential laws.
    pub f0: f64,
    /// Transition gap of the double-quadratic law, `0 < c0 < g0`.
    pub c0: f64,
}

impl PenaltyModel {
    pub fn new(law: PenaltyLaw, g0: f64, f0: f64, c0: f64) -> Self {
        PenaltyModel { law, g0, f0, c0 }
    }

    /// Cubic coefficients `a (g-g0)^3 + b (g-g0)^2` fitted to `f(0) = f0`,
    /// `f'(0) = -pp`, `f(g0) = f'(g0) = 0`.
    fn cubic_coeffs(&self, pp: f64) -> (f64, f64) {
        let g0 = self.g0;
        let a = (2.0 * self.f0 - pp * g0) / (g0 * g0 * g0);
        let b = (3.0 * self.f0 - pp * g0) / (g0 * g0);
        (a, b)
    }

    /// Quadratic coefficients of the double-quadratic law: the outer branch
    /// is `a2 (g-g0)^2` on `[c0, g0]`, the inner branch
    /// `a1 g^2 - pp g + f0` on `[0, c0]`, glued C1 at `c0`.
    fn double_quad_coeffs(&self, pp: f64) -> (f64, f64) {
        let (g0, f0, c0) = (self.g0, self.f0, self.c0);
        let a2 = (f0 - pp * c0 / 2.0) / (g0 * (g0 - c0));
        let a1 = (pp + 2.0 * a2 * (c0 - g0)) / (2.0 * c0);
        (a1, a2)
    }

    /// Contact force magnitude at gap `g` with penalty parameter `pp`.
    pub fn force(&self, g: f64, pp: f64) -> f64 {
        let (g0, f0, c0) = (self.g0, self.f0, self.c0);
        match self.law {
            PenaltyLaw::Linear => {
                if g < 0.0 {
                    -pp * g
                } else {
                    0.0
                }
            }
            PenaltyLaw::Quadratic => {
                if g < 0.0 {
                    pp * g * g
                } else {
                    0.0
                }
            }
            PenaltyLaw::LinNegQuadratic => {
                if g >= 0.0 {
                    0.0
                } else if g >= -g0 {
                    pp * g * g / (2.0 * g0)
                } else {
                    -pp * g - pp * g0 / 2.0
                }
            }
            PenaltyLaw::LinPosQuadratic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    pp / (2.0 * g0) * (g - g0) * (g - g0)
                } else {
                    pp * g0 / 2.0 - pp * g
                }
            }
            PenaltyLaw::LinPosCubic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    let (a, b) = self.cubic_coeffs(pp);
                    let u = g - g0;
                    a * u * u * u + b * u * u
                } else {
                    f0 - pp * g
                }
            }
            PenaltyLaw::LinDoubleQuadratic => {
                let (a1, a2) = self.double_quad_coeffs(pp);
                if g >= g0 {
                    0.0
                } else if g >= c0 {
                    a2 * (g - g0) * (g - g0)
                } else if g >= 0.0 {
                    a1 * g * g - pp * g + f0
                } else {
                    f0 - pp * g
                }
            }
            PenaltyLaw::LinPosExponential => {
                if g >= 0.0 {
                    f0 * (-pp * g / f0).exp()
                } else {
                    f0 - pp * g
                }
            }
        }
    }

    /// Derivative of the force with respect to the gap.
    pub fn stiffness(&self, g: f64, pp: f64) -> f64 {
        let (g0, f0, c0) = (self.g0, self.f0, self.c0);
        match self.law {
            PenaltyLaw::Linear => {
                if g < 0.0 {
                    -pp
                } else {
                    0.0
                }
            }
            PenaltyLaw::Quadratic => {
                if g < 0.0 {
                    2.0 * pp * g
                } else {
                    0.0
                }
            }
            PenaltyLaw::LinNegQuadratic => {
                if g >= 0.0 {
                    0.0
                } else if g >= -g0 {
                    pp * g / g0
                } else {
                    -pp
                }
            }
            PenaltyLaw::LinPosQuadratic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    pp * (g - g0) / g0
                } else {
                    -pp
                }
            }
            PenaltyLaw::LinPosCubic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    let (a, b) = self.cubic_coeffs(pp);
                    let u = g - g0;
                    3.0 * a * u * u + 2.0 * b * u
                } else {
                    -pp
                }
            }
            PenaltyLaw::LinDoubleQuadratic => {
                let (a1, a2) = self.double_quad_coeffs(pp);
                if g >= g0 {
                    0.0
                } else if g >= c0 {
                    2.0 * a2 * (g - g0)
                } else if g >= 0.0 {
                    2.0 * a1 * g - pp
                } else {
                    -pp
                }
            }
            PenaltyLaw::LinPosExponential => {
                if g >= 0.0 {
                    -pp * (-pp * g / f0).exp()
                } else {
                    -pp
                }
            }
        }
    }

    /// Stored penalty energy `int_g^inf f(g') dg'`.
    pub fn energy(&self, g: f64, pp: f64) -> f64 {
        let (g0, f0, c0) = (self.g0, self.f0, self.c0);
        match self.law {
            PenaltyLaw::Linear => {
                if g < 0.0 {
                    0.5 * pp * g * g
                } else {
                    0.0
                }
            }
            PenaltyLaw::Quadratic => {
                if g < 0.0 {
                    -pp * g * g * g / 3.0
                } else {
                    0.0
                }
            }
            PenaltyLaw::LinNegQuadratic => {
                if g >= 0.0 {
                    0.0
                } else if g >= -g0 {
                    -pp * g * g * g / (6.0 * g0)
                } else {
                    pp * g0 * g0 / 6.0 + pp * g * g / 2.0 + pp * g0 * g / 2.0
                }
            }
            PenaltyLaw::LinPosQuadratic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    pp / (6.0 * g0) * (g0 - g) * (g0 - g) * (g0 - g)
                } else {
                    pp * g0 * g0 / 6.0 - pp * g0 * g / 2.0 + pp * g * g / 2.0
                }
            }
            PenaltyLaw::LinPosCubic => {
                if g >= g0 {
                    0.0
                } else if g >= 0.0 {
                    let (a, b) = self.cubic_coeffs(pp);
                    let u = g - g0;
                    -a * u * u * u * u / 4.0 - b * u * u * u / 3.0
                } else {
                    let (a, b) = self.cubic_coeffs(pp);
                    let u0 = -g0;
                    let e0 = -a * u0 * u0 * u0 * u0 / 4.0 - b * u0 * u0 * u0 / 3.0;
                    e0 - f0 * g + pp * g * g / 2.0
                }
            }
            PenaltyLaw::LinDoubleQuadratic => {
                let (a1, a2) = self.double_quad_coeffs(pp);
                let outer = |g: f64| a2 * (g0 - g) * (g0 - g) * (g0 - g) / 3.0;
                let inner = |g: f64| {
                    outer(c0) + a1 * (c0 * c0 * c0 - g * g * g) / 3.0
                        - pp * (c0 * c0 - g * g) / 2.0
                        + f0 * (c0 - g)
                };
                if g >= g0 {
                    0.0
                } else if g >= c0 {
                    outer(g)
                } else if g >= 0.0 {
                    inner(g)
                } else {
                    inner(0.0) - f0 * g + pp * g * g / 2.0
                }
            }
            PenaltyLaw::LinPosExponential => {
                if g >= 0.0 {
                    f0 * f0 / pp * (-pp * g / f0).exp()
                } else {
                    f0 * f0 / pp - f0 * g + pp * g * g / 2.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model(law: PenaltyLaw) -> PenaltyModel {
        PenaltyModel::new(law, 0.01, 5.0, 0.004)
    }

    const PP: f64 = 1.0e4;

    /// Every law must be C1 at its piecewise glue points.
    #[test]
    fn glue_point_continuity() {
        let eps = 1e-9;
        for law in [
            PenaltyLaw::Linear,
            PenaltyLaw::Quadratic,
            PenaltyLaw::LinNegQuadratic,
            PenaltyLaw::LinPosQuadratic,
            PenaltyLaw::LinPosCubic,
            PenaltyLaw::LinDoubleQuadratic,
            PenaltyLaw::LinPosExponential,
        ] {
            let m = model(law);
            for glue in [-m.g0, 0.0, m.c0, m.g0] {
                let scale = m.force(glue - 1e-6, PP).abs().max(PP * m.g0);
                let below = m.force(glue - eps, PP);
                let above = m.force(glue + eps, PP);
                assert!(
                    (below - above).abs() / scale < 1e-6,
                    "{:?} force jumps at g = {}",
                    law,
                    glue
                );
                // First derivatives continuous except for the plain laws,
                // whose kink at zero is intentional.
                if law != PenaltyLaw::Linear && law != PenaltyLaw::Quadratic {
                    let k_below = m.stiffness(glue - eps, PP);
                    let k_above = m.stiffness(glue + eps, PP);
                    assert!(
                        (k_below - k_above).abs() / PP < 1e-5,
                        "{:?} stiffness jumps at g = {}",
                        law,
                        glue
                    );
                }
            }
        }
    }

    /// Exact value/slope agreement at the glue points (not just across them).
    #[test]
    fn glue_point_values_exact() {
        let m = model(PenaltyLaw::LinPosCubic);
        assert_relative_eq!(m.force(0.0, PP), m.f0, epsilon = 1e-12 * m.f0);
        assert_relative_eq!(m.stiffness(0.0, PP), -PP, epsilon = 1e-12 * PP);
        assert_relative_eq!(m.force(m.g0, PP), 0.0, epsilon = 1e-12);
        assert_relative_eq!(m.stiffness(m.g0, PP), 0.0, epsilon = 1e-12 * PP);

        let d = model(PenaltyLaw::LinDoubleQuadratic);
        let (a1, a2) = d.double_quad_coeffs(PP);
        let inner = a1 * d.c0 * d.c0 - PP * d.c0 + d.f0;
        let outer = a2 * (d.c0 - d.g0) * (d.c0 - d.g0);
        assert_relative_eq!(inner, outer, epsilon = 1e-12 * d.f0);
        assert_relative_eq!(
            2.0 * a1 * d.c0 - PP,
            2.0 * a2 * (d.c0 - d.g0),
            epsilon = 1e-12 * PP
        );
    }

    #[test]
    fn linear_sign_law() {
        let m = model(PenaltyLaw::Linear);
        assert_eq!(m.force(-0.01, PP), PP * 0.01);
        assert_eq!(m.force(0.0, PP), 0.0);
        assert_eq!(m.force(0.5, PP), 0.0);
    }

    #[test]
    fn stiffness_matches_finite_difference() {
        let h = 1e-7;
        for law in [
            PenaltyLaw::LinNegQuadratic,
            PenaltyLaw::LinPosQuadratic,
            PenaltyLaw::LinPosCubic,
            PenaltyLaw::LinDoubleQuadratic,
            PenaltyLaw::LinPosExponential,
        ] {
            let m = model(law);
            for g in [-0.02, -0.005, 0.002, 0.0065, 0.008] {
                let fd = (m.force(g + h, PP) - m.force(g - h, PP)) / (2.0 * h);
                let an = m.stiffness(g, PP);
                assert_relative_eq!(fd, an, epsilon = 1e-3 * PP.max(an.abs()));
            }
        }
    }

    #[test]
    fn energy_derivative_is_minus_force() {
        let h = 1e-7;
        for law in [
            PenaltyLaw::Linear,
            PenaltyLaw::LinPosQuadratic,
            PenaltyLaw::LinDoubleQuadratic,
            PenaltyLaw::LinPosExponential,
        ] {
            let m = model(law);
            for g in [-0.015, -0.002, 0.003, 0.007] {
                let fd = (m.energy(g + h, PP) - m.energy(g - h, PP)) / (2.0 * h);
                assert_relative_eq!(fd, -m.force(g, PP), epsilon = 1e-2);
            }
        }
    }
}
