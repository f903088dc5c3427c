//! Rules on the reference interval `[-1, 1]`, built from Legendre polynomials.
use std::f64::consts::PI;

use crate::Rule1d;

const MAX_NEWTON_ITERATIONS: usize = 100;
const ROOT_TOLERANCE: f64 = 1e-15;

/// `P_n(x)` together with its first two derivatives.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Legendre {
    pub value: f64,
    pub derivative: f64,
    pub second_derivative: f64,
}

/// Evaluates the Legendre polynomial of degree `n` at `x`.
///
/// Uses Bonnet's recursion for the values and the recursions
/// `P'_m = m P_{m-1} + x P'_{m-1}` and `P''_m = (m + 1) P'_{m-1} + x P''_{m-1}` for the
/// derivatives, which are valid on the whole closed interval.
pub(crate) fn legendre(n: usize, x: f64) -> Legendre {
    let (mut p, mut p_prev) = (1.0, 0.0);
    let (mut dp, mut ddp) = (0.0, 0.0);
    for m in 1..=n {
        let m = m as f64;
        // The derivative recursions need P_{m-1}, which is the current p
        ddp = (m + 1.0) * dp + x * ddp;
        dp = m * p + x * dp;
        let p_next = ((2.0 * m - 1.0) * x * p - (m - 1.0) * p_prev) / m;
        p_prev = p;
        p = p_next;
    }
    Legendre {
        value: p,
        derivative: dp,
        second_derivative: ddp,
    }
}

/// Newton iteration for a root of `f`, given `(f, f')` at a point.
fn newton(mut x: f64, f_and_derivative: impl Fn(f64) -> (f64, f64)) -> f64 {
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let (f, df) = f_and_derivative(x);
        let dx = -f / df;
        x += dx;
        if dx.abs() <= ROOT_TOLERANCE {
            break;
        }
    }
    x
}

/// The `n`-point Gauss-Legendre rule, exact for polynomials of degree `2n - 1`.
///
/// # Panics
///
/// Panics if `n == 0`.
pub fn gauss(n: usize) -> Rule1d {
    assert!(n > 0, "a Gauss rule needs at least one point");

    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];
    // Roots come in pairs ±x, so only the upper half is searched for
    for i in 0..(n + 1) / 2 {
        let guess = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let x = newton(guess, |x| {
            let p = legendre(n, x);
            (p.value, p.derivative)
        });
        let dp = legendre(n, x).derivative;
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points[n - 1 - i] = x;
        weights[n - 1 - i] = w;
        points[i] = -x;
        weights[i] = w;
    }

    Rule1d { points, weights }
}

/// The `n`-point Gauss-Lobatto-Legendre rule, exact for polynomials of degree `2n - 3`.
///
/// Both end points belong to the rule. Lagrange elements with these points as nodes, integrated
/// with the same rule, have diagonal mass matrices.
///
/// Returns `None` if `n < 2`.
pub fn try_gauss_lobatto(n: usize) -> Option<Rule1d> {
    if n < 2 {
        return None;
    }
    let degree = n - 1;

    let mut points = Vec::with_capacity(n);
    points.push(-1.0);
    // Interior points are the roots of P'_degree, started from Chebyshev-Lobatto points
    points.extend((1..degree).map(|i| {
        let guess = -(PI * i as f64 / degree as f64).cos();
        newton(guess, |x| {
            let p = legendre(degree, x);
            (p.derivative, p.second_derivative)
        })
    }));
    points.push(1.0);

    let scale = (degree * (degree + 1)) as f64;
    let weights = points
        .iter()
        .map(|&x| {
            let p = legendre(degree, x).value;
            2.0 / (scale * p * p)
        })
        .collect();

    Some(Rule1d { points, weights })
}

/// Same as [`try_gauss_lobatto`], but panics if `n < 2`.
pub fn gauss_lobatto(n: usize) -> Rule1d {
    match try_gauss_lobatto(n) {
        Some(rule) => rule,
        None => panic!("a Gauss-Lobatto rule needs at least two points, got {}", n),
    }
}
