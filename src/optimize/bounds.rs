use serde::{Deserialize, Serialize};

use crate::KinfitError;

/// Box constraints and the free/fixed mask of a parameter vector.
///
/// The mask is sized to the model's parameter count; there is no limit on
/// how many parameters a model may have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    lower: Vec<f64>,
    upper: Vec<f64>,
    free: Vec<bool>,
}

impl ParameterSpace {
    /// Create a parameter space from bounds and a free mask.
    ///
    /// Bounds may be infinite but not NaN, and every lower bound must not
    /// exceed its upper bound.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>, free: Vec<bool>) -> Result<Self, KinfitError> {
        KinfitError::check_len("upper bounds", lower.len(), upper.len())?;
        KinfitError::check_len("parameter mask", lower.len(), free.len())?;
        if let Some(index) = lower.iter().position(|v| v.is_nan()) {
            return Err(KinfitError::NonFinite {
                what: "lower bounds",
                index,
            });
        }
        if let Some(index) = upper.iter().position(|v| v.is_nan()) {
            return Err(KinfitError::NonFinite {
                what: "upper bounds",
                index,
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo > hi {
                return Err(KinfitError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper, free })
    }

    /// Create a parameter space from a numeric mask, where any non-zero entry
    /// marks the parameter as free.
    pub fn from_mask(lower: Vec<f64>, upper: Vec<f64>, mask: &[f64]) -> Result<Self, KinfitError> {
        Self::new(lower, upper, mask.iter().map(|&m| m != 0.0).collect())
    }

    /// Every parameter free
    pub fn all_free(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, KinfitError> {
        let n = lower.len();
        Self::new(lower, upper, vec![true; n])
    }

    pub fn num_params(&self) -> usize {
        self.lower.len()
    }

    pub fn num_free(&self) -> usize {
        self.free.iter().filter(|&&f| f).count()
    }

    pub fn is_free(&self, index: usize) -> bool {
        self.free[index]
    }

    /// Indices of the free parameters, ascending
    pub fn free_indices(&self) -> Vec<usize> {
        self.free
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Project a value for parameter `index` onto its bounds
    pub fn clamp(&self, index: usize, value: f64) -> f64 {
        value.max(self.lower[index]).min(self.upper[index])
    }

    /// Whether `value` lies within the bounds of parameter `index`
    pub fn contains(&self, index: usize, value: f64) -> bool {
        value >= self.lower[index] && value <= self.upper[index]
    }

    pub(crate) fn check_num_params(&self, expected: usize) -> Result<(), KinfitError> {
        KinfitError::check_len("parameter bounds", expected, self.num_params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_values_select_free_parameters() {
        let space =
            ParameterSpace::from_mask(vec![0.0; 4], vec![1.0; 4], &[1.0, 0.0, 2.0, 0.0]).unwrap();
        assert_eq!(space.num_free(), 2);
        assert_eq!(space.free_indices(), vec![0, 2]);
        assert!(!space.is_free(1));
    }

    #[test]
    fn clamp_projects_onto_bounds() {
        let space = ParameterSpace::all_free(vec![0.0, -1.0], vec![1.0, f64::INFINITY]).unwrap();
        assert_eq!(space.clamp(0, 1.5), 1.0);
        assert_eq!(space.clamp(0, -0.5), 0.0);
        assert_eq!(space.clamp(1, 1e9), 1e9);
        assert!(space.contains(1, -1.0));
        assert!(!space.contains(1, -1.5));
    }

    #[test]
    fn crossed_bounds_are_rejected() {
        let err = ParameterSpace::all_free(vec![0.0, 2.0], vec![1.0, 1.0]).unwrap_err();
        assert!(matches!(err, KinfitError::InvalidBounds { index: 1, .. }));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(ParameterSpace::new(vec![0.0; 3], vec![1.0; 2], vec![true; 3]).is_err());
        assert!(ParameterSpace::new(vec![0.0; 3], vec![1.0; 3], vec![true; 2]).is_err());
    }

    #[test]
    fn nan_bounds_are_rejected() {
        assert!(ParameterSpace::all_free(vec![f64::NAN], vec![1.0]).is_err());
    }
}
