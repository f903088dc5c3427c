//! Preconditioned Conjugate Gradient for operators that can only be applied.
use std::error::Error;
use std::fmt;

use fieldstep_traits::Real;
use nalgebra::{ClosedAdd, ClosedMul, DMatrix, DVector, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use num::{One, Zero};

/// A linear map `y = A x` that can only be applied, never inspected.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        A::apply(self, y, x)
    }
}

impl<T> LinearOperator<T> for DMatrix<T>
where
    T: Scalar + One + Zero + ClosedMul + ClosedAdd,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T> LinearOperator<T> for CsrMatrix<T>
where
    T: Scalar + One + Zero + ClosedMul + ClosedAdd,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// Scales every entry by the corresponding diagonal entry, e.g. a Jacobi preconditioner.
#[derive(Debug, Clone)]
pub struct DiagonalOperator<T: Scalar> {
    diagonal: DVector<T>,
}

impl<T: Scalar> DiagonalOperator<T> {
    pub fn new(diagonal: DVector<T>) -> Self {
        Self { diagonal }
    }

    pub fn diagonal(&self) -> &DVector<T> {
        &self.diagonal
    }
}

impl<T> LinearOperator<T> for DiagonalOperator<T>
where
    T: Scalar + ClosedMul,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(self.diagonal.len(), x.len());
        y.zip_zip_apply(&x, &self.diagonal, |y_i, x_i, d_i| *y_i = x_i * d_i);
        Ok(())
    }
}

/// When to stop iterating, in terms of the norm of the (approximate) residual.
///
/// CG updates its residual recursively. For ill-conditioned problems the recursive residual may
/// drift away from `b - Ax`, so a converged solve does not guarantee a small true residual.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum StoppingCriterion<T> {
    /// `||r|| <= tol`
    AbsoluteResidual(T),
    /// `||r|| <= tol * ||b||`
    RelativeResidual(T),
}

impl<T: Real> StoppingCriterion<T> {
    /// The residual norm at or below which iteration stops.
    pub fn threshold(&self, b_norm: T) -> T {
        match *self {
            Self::AbsoluteResidual(tol) => tol,
            Self::RelativeResidual(tol) => tol * b_norm,
        }
    }
}

/// Scratch vectors for [`ConjugateGradient`], resized on demand.
///
/// Keeping a workspace around avoids allocating four vectors per solve.
#[derive(Debug, Clone)]
pub struct CgWorkspace<T: Scalar> {
    residual: DVector<T>,
    preconditioned: DVector<T>,
    direction: DVector<T>,
    applied_direction: DVector<T>,
}

impl<T: Scalar + Zero> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            residual: DVector::zeros(0),
            preconditioned: DVector::zeros(0),
            direction: DVector::zeros(0),
            applied_direction: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> CgWorkspace<T> {
    fn resize(&mut self, dim: usize) {
        for v in [
            &mut self.residual,
            &mut self.preconditioned,
            &mut self.direction,
            &mut self.applied_direction,
        ] {
            v.resize_vertically_mut(dim, T::zero());
        }
    }
}

/// Statistics of a finished (or aborted) solve.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct CgOutput<T> {
    /// The number of updates made to the solution vector.
    pub num_iterations: usize,
    /// Norm of the approximate residual at the last iterate.
    pub residual_norm: T,
    /// Residual norm required by the stopping criterion.
    pub threshold: T,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum CgFailure {
    Operator(Box<dyn Error>),
    Preconditioner(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iterations: usize },
}

impl fmt::Display for CgFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator(err) => write!(f, "error applying operator: {}", err),
            Self::Preconditioner(err) => write!(f, "error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "preconditioner appears to be indefinite"),
            Self::MaxIterationsReached { max_iterations } => {
                write!(f, "maximum number of iterations ({}) reached", max_iterations)
            }
        }
    }
}

/// A failed solve.
///
/// The solution vector holds the last iterate when this is returned, so callers that can live
/// with an inaccurate result may still use it.
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: CgFailure,
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG failed after {} iterations: {}", self.output.num_iterations, self.kind)
    }
}

impl<T: fmt::Debug> Error for SolveError<T> {}

/// Settings of a Conjugate Gradient solve.
///
/// ```ignore
/// let cg = ConjugateGradient::new(StoppingCriterion::AbsoluteResidual(1e-10), 1000);
/// let output = cg.solve(&mut workspace, &operator, &b, &mut x)?;
/// ```
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConjugateGradient<T> {
    pub criterion: StoppingCriterion<T>,
    pub max_iterations: usize,
}

impl<T: Real> ConjugateGradient<T> {
    pub fn new(criterion: StoppingCriterion<T>, max_iterations: usize) -> Self {
        Self {
            criterion,
            max_iterations,
        }
    }

    /// Unpreconditioned solve of `A x = b`, starting from the current `x`.
    pub fn solve<'b>(
        &self,
        workspace: &mut CgWorkspace<T>,
        operator: impl LinearOperator<T>,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_preconditioned(workspace, operator, IdentityOperator, b, x)
    }

    /// Solves `A x = b` with the symmetric positive definite preconditioner `P ≈ A^-1`.
    ///
    /// A zero right-hand side gives `x = 0` without touching the operator. Non-finite values
    /// never satisfy the stopping criterion, so they end the solve when the iteration limit is hit.
    pub fn solve_preconditioned<'b>(
        &self,
        workspace: &mut CgWorkspace<T>,
        operator: impl LinearOperator<T>,
        preconditioner: impl LinearOperator<T>,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        let b = b.into();
        let mut x = x.into();
        assert_eq!(b.len(), x.len(), "right-hand side and solution must have the same length");

        let b_norm = b.norm();
        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: b_norm,
            threshold: self.criterion.threshold(b_norm),
        };
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        workspace.resize(x.len());
        let CgWorkspace {
            residual: r,
            preconditioned: z,
            direction: p,
            applied_direction: ap,
        } = workspace;
        let fail = |output: &CgOutput<T>, kind| SolveError {
            output: output.clone(),
            kind,
        };

        operator
            .apply((&mut *r).into(), (&x).into())
            .map_err(|err| fail(&output, CgFailure::Operator(err)))?;
        r.zip_apply(&b, |r_i, b_i| *r_i = b_i - *r_i);
        output.residual_norm = r.norm();

        preconditioner
            .apply((&mut *z).into(), (&*r).into())
            .map_err(|err| fail(&output, CgFailure::Preconditioner(err)))?;
        p.copy_from(&*z);
        let mut rz = r.dot(&*z);

        while !(output.residual_norm <= output.threshold) {
            if output.num_iterations >= self.max_iterations {
                let kind = CgFailure::MaxIterationsReached {
                    max_iterations: self.max_iterations,
                };
                return Err(fail(&output, kind));
            }

            operator
                .apply((&mut *ap).into(), (&*p).into())
                .map_err(|err| fail(&output, CgFailure::Operator(err)))?;
            let p_ap = p.dot(&*ap);
            if p_ap <= T::zero() {
                return Err(fail(&output, CgFailure::IndefiniteOperator));
            }
            if rz <= T::zero() {
                return Err(fail(&output, CgFailure::IndefinitePreconditioner));
            }

            let alpha = rz / p_ap;
            x.axpy(alpha, &*p, T::one());
            r.axpy(-alpha, &*ap, T::one());
            output.num_iterations += 1;
            output.residual_norm = r.norm();

            preconditioner
                .apply((&mut *z).into(), (&*r).into())
                .map_err(|err| fail(&output, CgFailure::Preconditioner(err)))?;
            let rz_next = r.dot(&*z);
            let beta = rz_next / rz;
            p.zip_apply(&*z, |p_i, z_i| *p_i = z_i + beta * *p_i);
            rz = rz_next;
        }

        Ok(output)
    }
}
