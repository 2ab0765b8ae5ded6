//! Layout configuration tables
use super::LayoutError;
use std::collections::HashSet;

/// A named dimension ordering
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutSpec {
    /// Name of the layout
    pub name: String,
    /// For each local axis, the global axis that it stores
    pub dims_order: Vec<usize>,
}

/// An ordered table of layouts sharing one process grid
///
/// The order of the table is used to break ties when routing transposes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutConfig {
    layouts: Vec<LayoutSpec>,
}

impl LayoutConfig {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layout to the table
    pub fn with(mut self, name: &str, dims_order: &[usize]) -> Self {
        self.push(name, dims_order);
        self
    }

    /// Add a layout to the table
    pub fn push(&mut self, name: &str, dims_order: &[usize]) {
        self.layouts.push(LayoutSpec {
            name: String::from(name),
            dims_order: dims_order.to_vec(),
        });
    }

    /// The layouts in this table
    pub fn layouts(&self) -> &[LayoutSpec] {
        &self.layouts
    }

    /// Number of layouts
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Layouts used for the 4D distribution function `(r, theta, z, v)`
    pub fn gyrokinetic() -> Self {
        Self::new()
            .with("flux_surface", &[0, 3, 1, 2])
            .with("v_parallel", &[0, 2, 1, 3])
            .with("poloidal", &[3, 2, 1, 0])
    }

    /// Layouts used for the 3D fields `(r, theta, z)` when solving the quasi-neutrality equation
    pub fn poisson() -> Self {
        Self::new()
            .with("v_parallel_2d", &[0, 2, 1])
            .with("mode_solve", &[1, 2, 0])
    }

    /// Check that names are unique and that every entry is a permutation of the same axes
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.layouts.is_empty() {
            return Err(LayoutError::EmptyConfiguration);
        }
        let ndims = self.layouts[0].dims_order.len();
        let mut names = HashSet::new();
        for spec in &self.layouts {
            if !names.insert(spec.name.as_str()) {
                return Err(LayoutError::DuplicateLayoutName {
                    name: spec.name.clone(),
                });
            }
            if !is_permutation(&spec.dims_order) || spec.dims_order.len() != ndims {
                return Err(LayoutError::InvalidPermutation {
                    name: spec.name.clone(),
                    dims_order: spec.dims_order.clone(),
                    ndims,
                });
            }
        }
        Ok(())
    }

    /// Parse a table from a RON string
    ///
    /// The expected format is `(layouts: [(name: "poloidal", dims_order: [3, 2, 1, 0]), ...])`.
    #[cfg(feature = "serde")]
    pub fn from_ron_str(s: &str) -> Result<Self, LayoutError> {
        let config: Self = ron::from_str(s).map_err(|e| LayoutError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the table as a RON string
    #[cfg(feature = "serde")]
    pub fn to_ron_string(&self) -> Result<String, LayoutError> {
        ron::to_string(self).map_err(|e| LayoutError::Parse {
            message: e.to_string(),
        })
    }
}

/// Check if `order` contains each of `0..order.len()` exactly once
pub fn is_permutation(order: &[usize]) -> bool {
    let mut seen = vec![false; order.len()];
    for &i in order {
        if i >= order.len() || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

#[cfg(test)]
mod test {
    use super::{is_permutation, LayoutConfig};
    use crate::types::{ErrorKind, LayoutError};

    #[test]
    fn test_permutations() {
        assert!(is_permutation(&[0, 3, 1, 2]));
        assert!(is_permutation(&[2, 1, 0]));
        assert!(!is_permutation(&[0, 0, 1, 2]));
        assert!(!is_permutation(&[0, 1, 2, 4]));
    }

    #[test]
    fn test_duplicate_name() {
        let config = LayoutConfig::gyrokinetic().with("poloidal", &[0, 1, 2, 3]);
        assert_eq!(
            config.validate(),
            Err(LayoutError::DuplicateLayoutName {
                name: String::from("poloidal")
            })
        );
    }

    #[test]
    fn test_mixed_dimensions() {
        let config = LayoutConfig::gyrokinetic().with("field", &[0, 1, 2]);
        let e = config.validate().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_empty() {
        assert_eq!(
            LayoutConfig::new().validate(),
            Err(LayoutError::EmptyConfiguration)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_ron_round_trip() {
        let config = LayoutConfig::poisson();
        let s = config.to_ron_string().unwrap();
        assert_eq!(LayoutConfig::from_ron_str(&s).unwrap(), config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_ron_parse() {
        let config = LayoutConfig::from_ron_str(
            "(layouts: [(name: \"a\", dims_order: [0, 1, 2]), (name: \"b\", dims_order: [0, 2, 1])])",
        )
        .unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config.layouts()[1].dims_order, vec![0, 2, 1]);

        assert!(LayoutConfig::from_ron_str(
            "(layouts: [(name: \"a\", dims_order: [0, 1, 1])])"
        )
        .is_err());
    }
}
