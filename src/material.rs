use nalgebra::{matrix, Matrix3};

use crate::error::{FeldsparError, Result};

/// Smallest admissible |(1 + nu)(1 - 2 nu)| before the Lamé parameters blow up
const SINGULAR_MATERIAL_TOLERANCE: f64 = 1e-12;

/// Lamé parameters (lambda, mu) of an isotropic material
///
/// # Arguments
/// * `youngs_modulus` - The modulus of elasticity E
/// * `poisson_ratio` - The poisson ratio nu
///
/// # Returns
/// The tuple (lambda, mu), or an error if the material is singular
pub fn lame_parameters(youngs_modulus: f64, poisson_ratio: f64) -> Result<(f64, f64)> {
    let denominator = (1.0 + poisson_ratio) * (1.0 - 2.0 * poisson_ratio);

    if !youngs_modulus.is_finite()
        || !poisson_ratio.is_finite()
        || denominator.abs() < SINGULAR_MATERIAL_TOLERANCE
    {
        return Err(FeldsparError::DegenerateMaterial {
            youngs_modulus,
            poisson_ratio,
        });
    }

    let lambda = youngs_modulus * poisson_ratio / denominator;
    let mu = youngs_modulus / (2.0 * (1.0 + poisson_ratio));

    Ok((lambda, mu))
}

/// Calculates the isotropic elastic tensor
///
/// The tensor maps (exx, eyy, 2exy) to (sxx, syy, sxy):
/// ```text
/// [ 2mu+lam  lam      0   ]
/// [ lam      2mu+lam  0   ]
/// [ 0        0        2mu ]
/// ```
///
/// # Arguments
/// * `youngs_modulus` - The modulus of elasticity of the model
/// * `poisson_ratio` - The poisson ratio for the model
///
/// # Returns
/// A symmetric 3x3 elastic tensor
pub fn elastic_tensor(youngs_modulus: f64, poisson_ratio: f64) -> Result<Matrix3<f64>> {
    let (lambda, mu) = lame_parameters(youngs_modulus, poisson_ratio)?;

    Ok(matrix![
        2.0 * mu + lambda, lambda, 0.0;
        lambda, 2.0 * mu + lambda, 0.0;
        0.0, 0.0, 2.0 * mu;
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tensor_entries_follow_lame_parameters() {
        let e = 3.5e6;
        let nu = 0.3;
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let mu = e / (2.0 * (1.0 + nu));

        let c = elastic_tensor(e, nu).unwrap();

        assert_relative_eq!(c[(0, 0)], 2.0 * mu + lambda);
        assert_relative_eq!(c[(1, 1)], 2.0 * mu + lambda);
        assert_relative_eq!(c[(0, 1)], lambda);
        assert_relative_eq!(c[(1, 0)], lambda);
        assert_relative_eq!(c[(2, 2)], 2.0 * mu);
        assert_eq!(c[(0, 2)], 0.0);
        assert_eq!(c[(2, 1)], 0.0);
        assert_eq!(c, c.transpose());
    }

    #[test]
    fn incompressible_material_is_rejected() {
        let err = elastic_tensor(3.5e6, 0.5).unwrap_err();
        assert!(matches!(err, FeldsparError::DegenerateMaterial { .. }));
    }

    #[test]
    fn auxetic_limit_is_rejected() {
        assert!(elastic_tensor(3.5e6, -1.0).is_err());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        assert!(elastic_tensor(f64::NAN, 0.3).is_err());
        assert!(elastic_tensor(1.0, f64::INFINITY).is_err());
    }
}
