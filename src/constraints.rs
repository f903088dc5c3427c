//! Affine constraints on the degrees of freedom of a single field.
use std::collections::BTreeMap;

use nalgebra::{DVector, Scalar};

use crate::space::dof_index;
use crate::Real;

/// A constraint of the form `u[dof] = sum_j weight_j * u[j] + inhomogeneity`.
///
/// Typically used for hanging nodes or periodicity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintLine<T> {
    pub dof: usize,
    pub entries: Vec<(usize, T)>,
    pub inhomogeneity: T,
}

/// Dirichlet values and general affine constraint lines of a field.
///
/// Constraint lines are distributed in insertion order, so a line may only refer to degrees of
/// freedom that are unconstrained or constrained by an earlier line. Dirichlet values are applied
/// last and take precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet<T: Scalar> {
    dirichlet: BTreeMap<usize, T>,
    lines: Vec<ConstraintLine<T>>,
}

impl<T: Scalar> Default for ConstraintSet<T> {
    fn default() -> Self {
        Self {
            dirichlet: BTreeMap::new(),
            lines: Vec::new(),
        }
    }
}

impl<T: Real> ConstraintSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirichlet(mut self, dof: usize, value: T) -> Self {
        self.add_dirichlet(dof, value);
        self
    }

    pub fn with_line(mut self, line: ConstraintLine<T>) -> Self {
        self.add_line(line);
        self
    }

    pub fn add_dirichlet(&mut self, dof: usize, value: T) {
        self.dirichlet.insert(dof, value);
    }

    /// Prescribes `value` for the given components at each of the given nodes.
    pub fn add_dirichlet_nodes(&mut self, nodes: &[usize], num_nodes: usize, components: &[usize], value: T) {
        for &node in nodes {
            for &component in components {
                self.add_dirichlet(dof_index(num_nodes, node, component), value);
            }
        }
    }

    pub fn add_line(&mut self, line: ConstraintLine<T>) {
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.dirichlet.is_empty() && self.lines.is_empty()
    }

    pub fn has_dirichlet(&self) -> bool {
        !self.dirichlet.is_empty()
    }

    pub fn is_dirichlet(&self, dof: usize) -> bool {
        self.dirichlet.contains_key(&dof)
    }

    pub fn dirichlet_values(&self) -> &BTreeMap<usize, T> {
        &self.dirichlet
    }

    pub fn lines(&self) -> &[ConstraintLine<T>] {
        &self.lines
    }

    /// Enforces all constraints on `u`.
    pub fn distribute(&self, u: &mut DVector<T>) {
        for line in &self.lines {
            let value = line
                .entries
                .iter()
                .fold(line.inhomogeneity, |acc, &(j, w_j)| acc + w_j * u[j]);
            u[line.dof] = value;
        }
        self.distribute_dirichlet(u);
    }

    /// Overwrites Dirichlet-constrained entries of `u` with their prescribed values.
    pub fn distribute_dirichlet(&self, u: &mut DVector<T>) {
        for (&dof, &value) in &self.dirichlet {
            u[dof] = value;
        }
    }

    /// Sets the Dirichlet-constrained rows of a residual to zero.
    pub fn zero_constrained_rows(&self, residual: &mut DVector<T>) {
        for &dof in self.dirichlet.keys() {
            residual[dof] = T::zero();
        }
    }

    /// Makes the Dirichlet-constrained rows of an operator application act as the identity.
    pub fn copy_constrained_rows(&self, dst: &mut [T], src: &[T]) {
        for &dof in self.dirichlet.keys() {
            dst[dof] = src[dof];
        }
    }
}
