//! Pointwise description of the governing equations.
//!
//! The residual of every field is written in weak form as
//!
//! ```text
//! R_i = ∫ (value_term · φ_i + gradient_term : ∇φ_i) dx,
//! ```
//!
//! and a [`PdeModel`] provides the two terms at each quadrature point from the values and
//! gradients of all fields at that point. The same mechanism is used for the action of the
//! linearized operator on a trial increment.
//!
//! Residuals are oriented so that the update `dU` of an implicit field solves `J dU = R`, with `J`
//! the linearized operator. For `-Δu = f` this means a value term `f` and a gradient term `-∇u` for
//! the residual, and a gradient term `∇δu` for the operator.
use nalgebra::{DefaultAllocator, DimName, OMatrix, OPoint, OVector, Scalar};

use crate::allocators::DimAllocator;
use crate::field::FieldArity;
use crate::{Real, SmallDim};

/// Value and gradient of a field at a single point.
///
/// The gradient of a vector field has one row per component.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPointValue<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    Scalar { value: T, gradient: OVector<T, D> },
    Vector { value: OVector<T, D>, gradient: OMatrix<T, D, D> },
}

impl<T, D> FieldPointValue<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn zero(arity: FieldArity) -> Self {
        match arity {
            FieldArity::Scalar => Self::Scalar {
                value: T::zero(),
                gradient: OVector::<T, D>::zeros(),
            },
            FieldArity::Vector => Self::Vector {
                value: OVector::<T, D>::zeros(),
                gradient: OMatrix::<T, D, D>::zeros(),
            },
        }
    }

    pub fn arity(&self) -> FieldArity {
        match self {
            Self::Scalar { .. } => FieldArity::Scalar,
            Self::Vector { .. } => FieldArity::Vector,
        }
    }

    pub fn set_zero(&mut self) {
        match self {
            Self::Scalar { value, gradient } => {
                *value = T::zero();
                gradient.fill(T::zero());
            }
            Self::Vector { value, gradient } => {
                value.fill(T::zero());
                gradient.fill(T::zero());
            }
        }
    }

    /// Weak-form contraction with the test function of the given component.
    pub fn contract(&self, component: usize, phi: T, grad_phi: &OVector<T, D>) -> T {
        match self {
            Self::Scalar { value, gradient } => *value * phi + gradient.dot(grad_phi),
            Self::Vector { value, gradient } => value[component] * phi + gradient.row(component).transpose().dot(grad_phi),
        }
    }
}

/// A residual term has the same shape as the field it belongs to.
pub type ResidualTerm<T, D> = FieldPointValue<T, D>;

/// Field values available to a [`PdeModel`] at one quadrature point, and the terms it writes back.
///
/// Accessors panic if the requested shape does not match the arity of the field, or if a trial
/// increment is requested outside an operator evaluation.
#[derive(Debug, Clone)]
pub struct PointVariables<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    location: OPoint<T, D>,
    values: Vec<FieldPointValue<T, D>>,
    terms: Vec<ResidualTerm<T, D>>,
    change_field: Option<usize>,
    change: FieldPointValue<T, D>,
    change_term: ResidualTerm<T, D>,
}

impl<T, D> PointVariables<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(arities: &[FieldArity]) -> Self {
        Self {
            location: OPoint::origin(),
            values: arities.iter().map(|&a| FieldPointValue::zero(a)).collect(),
            terms: arities.iter().map(|&a| FieldPointValue::zero(a)).collect(),
            change_field: None,
            change: FieldPointValue::zero(FieldArity::Scalar),
            change_term: FieldPointValue::zero(FieldArity::Scalar),
        }
    }

    /// Marks `field` as the field whose linearized operator is evaluated.
    pub(crate) fn set_change_field(&mut self, field: usize) {
        let arity = self.values[field].arity();
        self.change_field = Some(field);
        self.change = FieldPointValue::zero(arity);
        self.change_term = FieldPointValue::zero(arity);
    }

    /// Clears all terms and moves to a new point.
    pub(crate) fn reset(&mut self, location: &OPoint<T, D>) {
        self.location.clone_from(location);
        for term in &mut self.terms {
            term.set_zero();
        }
        self.change_term.set_zero();
    }

    pub(crate) fn value_mut(&mut self, field: usize) -> &mut FieldPointValue<T, D> {
        &mut self.values[field]
    }

    pub(crate) fn change_mut(&mut self) -> &mut FieldPointValue<T, D> {
        &mut self.change
    }

    pub fn location(&self) -> &OPoint<T, D> {
        &self.location
    }

    pub fn num_fields(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, field: usize) -> &FieldPointValue<T, D> {
        &self.values[field]
    }

    pub fn term(&self, field: usize) -> &ResidualTerm<T, D> {
        &self.terms[field]
    }

    /// The field whose operator is being applied, if any.
    pub fn change_field(&self) -> Option<usize> {
        self.change_field
    }

    pub fn change(&self) -> &FieldPointValue<T, D> {
        assert!(self.change_field.is_some(), "no trial increment outside operator evaluation");
        &self.change
    }

    pub fn change_term(&self) -> &ResidualTerm<T, D> {
        &self.change_term
    }

    pub fn scalar_value(&self, field: usize) -> T {
        scalar_parts(&self.values[field], field).0
    }

    pub fn scalar_gradient(&self, field: usize) -> &OVector<T, D> {
        scalar_parts(&self.values[field], field).1
    }

    pub fn vector_value(&self, field: usize) -> &OVector<T, D> {
        vector_parts(&self.values[field], field).0
    }

    pub fn vector_gradient(&self, field: usize) -> &OMatrix<T, D, D> {
        vector_parts(&self.values[field], field).1
    }

    pub fn change_scalar_value(&self) -> T {
        scalar_parts(self.change(), self.change_index()).0
    }

    pub fn change_scalar_gradient(&self) -> &OVector<T, D> {
        scalar_parts(self.change(), self.change_index()).1
    }

    pub fn change_vector_value(&self) -> &OVector<T, D> {
        vector_parts(self.change(), self.change_index()).0
    }

    pub fn change_vector_gradient(&self) -> &OMatrix<T, D, D> {
        vector_parts(self.change(), self.change_index()).1
    }

    pub fn set_scalar_value_term(&mut self, field: usize, term: T) {
        *scalar_parts_mut(&mut self.terms[field], field).0 = term;
    }

    pub fn set_scalar_gradient_term(&mut self, field: usize, term: OVector<T, D>) {
        *scalar_parts_mut(&mut self.terms[field], field).1 = term;
    }

    pub fn set_vector_value_term(&mut self, field: usize, term: OVector<T, D>) {
        *vector_parts_mut(&mut self.terms[field], field).0 = term;
    }

    pub fn set_vector_gradient_term(&mut self, field: usize, term: OMatrix<T, D, D>) {
        *vector_parts_mut(&mut self.terms[field], field).1 = term;
    }

    pub fn set_change_scalar_value_term(&mut self, term: T) {
        let field = self.change_index();
        *scalar_parts_mut(&mut self.change_term, field).0 = term;
    }

    pub fn set_change_scalar_gradient_term(&mut self, term: OVector<T, D>) {
        let field = self.change_index();
        *scalar_parts_mut(&mut self.change_term, field).1 = term;
    }

    pub fn set_change_vector_value_term(&mut self, term: OVector<T, D>) {
        let field = self.change_index();
        *vector_parts_mut(&mut self.change_term, field).0 = term;
    }

    pub fn set_change_vector_gradient_term(&mut self, term: OMatrix<T, D, D>) {
        let field = self.change_index();
        *vector_parts_mut(&mut self.change_term, field).1 = term;
    }

    fn change_index(&self) -> usize {
        match self.change_field {
            Some(field) => field,
            None => panic!("no trial increment outside operator evaluation"),
        }
    }
}

fn scalar_parts<T, D>(value: &FieldPointValue<T, D>, field: usize) -> (T, &OVector<T, D>)
where
    T: Real,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    match value {
        FieldPointValue::Scalar { value, gradient } => (*value, gradient),
        FieldPointValue::Vector { .. } => panic!("field {} is vector valued", field),
    }
}

fn vector_parts<T, D>(value: &FieldPointValue<T, D>, field: usize) -> (&OVector<T, D>, &OMatrix<T, D, D>)
where
    T: Real,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    match value {
        FieldPointValue::Vector { value, gradient } => (value, gradient),
        FieldPointValue::Scalar { .. } => panic!("field {} is scalar valued", field),
    }
}

fn scalar_parts_mut<T, D>(value: &mut FieldPointValue<T, D>, field: usize) -> (&mut T, &mut OVector<T, D>)
where
    T: Real,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    match value {
        FieldPointValue::Scalar { value, gradient } => (value, gradient),
        FieldPointValue::Vector { .. } => panic!("field {} is vector valued", field),
    }
}

fn vector_parts_mut<T, D>(
    value: &mut FieldPointValue<T, D>,
    field: usize,
) -> (&mut OVector<T, D>, &mut OMatrix<T, D, D>)
where
    T: Real,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    match value {
        FieldPointValue::Vector { value, gradient } => (value, gradient),
        FieldPointValue::Scalar { .. } => panic!("field {} is scalar valued", field),
    }
}

/// The governing equations of a problem, evaluated at quadrature points.
///
/// Each callback reads field values from `variables` and sets residual terms with the `set_*_term`
/// methods. Terms that are not set are zero.
pub trait PdeModel<T, D>: Sync
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Terms of explicit time dependent fields, i.e. the right-hand side of the lumped-mass update.
    fn explicit_rhs(&self, _variables: &mut PointVariables<T, D>) {}

    /// Terms of all other fields.
    ///
    /// For implicit and time-independent fields this is the residual whose root is sought. For
    /// auxiliary fields it is the right-hand side of their lumped-mass projection.
    fn nonexplicit_rhs(&self, _variables: &mut PointVariables<T, D>) {}

    /// Action of the linearized operator of field [`PointVariables::change_field`] on the trial
    /// increment [`PointVariables::change`], written with the `set_change_*_term` methods.
    fn linearized_lhs(&self, _variables: &mut PointVariables<T, D>) {}
}

impl<'a, T, D, M> PdeModel<T, D> for &'a M
where
    T: Real,
    D: SmallDim,
    M: ?Sized + PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn explicit_rhs(&self, variables: &mut PointVariables<T, D>) {
        M::explicit_rhs(self, variables)
    }

    fn nonexplicit_rhs(&self, variables: &mut PointVariables<T, D>) {
        M::nonexplicit_rhs(self, variables)
    }

    fn linearized_lhs(&self, variables: &mut PointVariables<T, D>) {
        M::linearized_lhs(self, variables)
    }
}
