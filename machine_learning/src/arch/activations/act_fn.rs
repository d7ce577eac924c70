use std::f32::consts::FRAC_2_PI;

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActFn {
    Relu,
    /// The tanh approximation of the gaussian error linear unit.
    Gelu,
}
use ActFn::*;

const GELU_COEF: f32 = 0.044_715;

impl ActFn {
    pub fn relu() -> Self {
        Relu
    }

    pub fn gelu() -> Self {
        Gelu
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Relu => z.max(0.),
            Gelu => {
                let c = FRAC_2_PI.sqrt();
                0.5 * z * (1. + (c * (z + GELU_COEF * z.powi(3))).tanh())
            }
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            Relu => {
                if z > 0. {
                    1.
                } else {
                    0.
                }
            }
            Gelu => {
                let c = FRAC_2_PI.sqrt();
                let t = (c * (z + GELU_COEF * z.powi(3))).tanh();
                0.5 * (1. + t) + 0.5 * z * (1. - t * t) * c * (1. + 3. * GELU_COEF * z * z)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu() {
        assert_eq!(ActFn::relu().f(-2.), 0.);
        assert_eq!(ActFn::relu().f(3.), 3.);
        assert_eq!(ActFn::relu().df(-2.), 0.);
        assert_eq!(ActFn::relu().df(3.), 1.);
    }

    #[test]
    fn gelu_derivative_matches_finite_differences() {
        let gelu = ActFn::gelu();
        let h = 1e-3;

        for z in [-2.5, -0.7, 0., 0.4, 1.9] {
            let numeric = (gelu.f(z + h) - gelu.f(z - h)) / (2. * h);
            assert!((gelu.df(z) - numeric).abs() < 1e-3, "z = {z}");
        }
    }
}
