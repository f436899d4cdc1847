//! Structural features of a property. All fields optional; validity ranges
//! are enforced by [`crate::validation`], not here - this type only carries
//! data, per the teacher's "pure data, no behavior" convention.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFeatures {
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f32>,
    pub half_bathrooms: Option<i32>,
    pub square_feet: Option<i32>,
    pub lot_size_sqft: Option<i32>,
    pub year_built: Option<i32>,
    pub floors: Option<i32>,
    pub garage_spaces: Option<i32>,
    pub pool: Option<bool>,
    pub fireplace: Option<bool>,
    pub ac_type: Option<String>,
    pub heating_type: Option<String>,
}

pub const BEDROOMS_RANGE: (i32, i32) = (0, 20);
pub const BATHROOMS_RANGE: (f32, f32) = (0.0, 20.0);
pub const HALF_BATHROOMS_RANGE: (i32, i32) = (0, 10);
pub const LOT_SIZE_SQFT_RANGE: (i32, i32) = (100, 10_000_000);
pub const YEAR_BUILT_MIN: i32 = 1800;

/// `year_built` upper bound is current_year + 5 (§3). `current_year` is
/// supplied by the caller so this stays a pure function (no `Utc::now`
/// buried in validation logic, which would make the boundary untestable).
pub fn year_built_max(current_year: i32) -> i32 {
    current_year + 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_built_boundary_is_plus_five() {
        assert_eq!(year_built_max(2026), 2031);
    }
}
