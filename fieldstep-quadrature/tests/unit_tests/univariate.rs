use fieldstep_quadrature::univariate::{gauss, gauss_lobatto, try_gauss_lobatto};

use matrixcompare::assert_scalar_eq;

fn monomial_integral(alpha: i32) -> f64 {
    (1.0 - (-1.0f64).powi(alpha + 1)) / (alpha as f64 + 1.0)
}

#[test]
fn gauss_rules_integrate_monomials_exactly() {
    for n in 1..=40 {
        let rule = gauss(n);
        assert_eq!(rule.len(), n);
        assert!(rule.weights.iter().all(|&w| w > 0.0));
        assert!(rule.points.windows(2).all(|pair| pair[0] < pair[1]));

        for alpha in 0..=(2 * n - 1) as i32 {
            let integral = rule.integrate(|x| x.powi(alpha));
            assert_scalar_eq!(integral, monomial_integral(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_lobatto_rules_integrate_monomials_exactly() {
    assert!(try_gauss_lobatto(0).is_none());
    assert!(try_gauss_lobatto(1).is_none());

    for n in 2..=16 {
        let rule = gauss_lobatto(n);
        assert_eq!(rule.len(), n);
        assert_eq!(rule.points.first(), Some(&-1.0));
        assert_eq!(rule.points.last(), Some(&1.0));
        assert!(rule.weights.iter().all(|&w| w > 0.0));
        assert!(rule.points.windows(2).all(|pair| pair[0] < pair[1]));

        for alpha in 0..=(2 * n - 3) as i32 {
            let integral = rule.integrate(|x| x.powi(alpha));
            assert_scalar_eq!(integral, monomial_integral(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn three_point_gauss_lobatto_is_simpson() {
    let rule = gauss_lobatto(3);
    assert_scalar_eq!(rule.points[1], 0.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(rule.weights[0], 1.0 / 3.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(rule.weights[1], 4.0 / 3.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(rule.weights[2], 1.0 / 3.0, comp = abs, tol = 1e-15);
}

#[test]
#[should_panic]
fn single_point_gauss_lobatto_panics() {
    gauss_lobatto(1);
}
