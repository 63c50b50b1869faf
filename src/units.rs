//! Unit conversion between weight, volume and count units
//!
//! Every unit belongs to one category with a canonical base unit: grams for
//! weight, milliliters for volume and "each" for count. Conversions go
//! through the base unit using exact decimal factors.

use std::fmt;

use rust_decimal::Decimal;

use crate::error::UnitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCategory {
    Weight,
    Volume,
    Count,
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitCategory::Weight => "weight",
            UnitCategory::Volume => "volume",
            UnitCategory::Count => "count",
        };
        f.write_str(name)
    }
}

/// Lowercase and trim a unit name
pub fn normalize_unit(unit: &str) -> String {
    unit.trim().to_lowercase()
}

/// Category and factor to the category's base unit for a normalized name
fn lookup(unit: &str) -> Option<(UnitCategory, Decimal)> {
    use UnitCategory::*;

    let entry = match unit {
        // grams
        "mg" => (Weight, Decimal::new(1, 3)),
        "g" => (Weight, Decimal::ONE),
        "kg" => (Weight, Decimal::new(1000, 0)),
        "oz" => (Weight, Decimal::new(283_495, 4)),
        "lb" => (Weight, Decimal::new(453_592, 3)),

        // milliliters
        "ml" => (Volume, Decimal::ONE),
        "l" => (Volume, Decimal::new(1000, 0)),
        "tsp" => (Volume, Decimal::new(492_892, 5)),
        "tbsp" => (Volume, Decimal::new(147_868, 4)),
        "fl_oz" => (Volume, Decimal::new(295_735, 4)),
        "cup" => (Volume, Decimal::new(236_588, 3)),
        "pt" => (Volume, Decimal::new(473_176, 3)),
        "qt" => (Volume, Decimal::new(946_353, 3)),
        "gal" => (Volume, Decimal::new(378_541, 2)),

        // each
        "each" => (Count, Decimal::ONE),
        "piece" => (Count, Decimal::ONE),
        "dozen" => (Count, Decimal::new(12, 0)),

        _ => return None,
    };
    Some(entry)
}

fn resolve(unit: &str) -> Result<(String, UnitCategory, Decimal), UnitError> {
    let name = normalize_unit(unit);
    match lookup(&name) {
        Some((category, factor)) => Ok((name, category, factor)),
        None => Err(UnitError::UnknownUnit(name)),
    }
}

/// Get the category of a unit
pub fn unit_category(unit: &str) -> Result<UnitCategory, UnitError> {
    resolve(unit).map(|(_, category, _)| category)
}

/// Convert a value from one unit to another.
///
/// `density` is in grams per milliliter and is only consulted for
/// weight/volume conversions, which fail without it.
pub fn convert(
    value: Decimal,
    from_unit: &str,
    to_unit: &str,
    density: Option<Decimal>,
) -> Result<Decimal, UnitError> {
    let from_name = normalize_unit(from_unit);
    let to_name = normalize_unit(to_unit);

    if from_name == to_name {
        return Ok(value);
    }

    let (from, from_category, from_factor) = resolve(&from_name)?;
    let (to, to_category, to_factor) = resolve(&to_name)?;

    if from_category == to_category {
        return value
            .checked_mul(from_factor)
            .and_then(|base| base.checked_div(to_factor))
            .ok_or_else(|| overflow(value, &from, &to));
    }

    match (from_category, to_category) {
        (UnitCategory::Weight, UnitCategory::Volume) | (UnitCategory::Volume, UnitCategory::Weight) => {}
        _ => {
            return Err(UnitError::Incompatible {
                from,
                to,
                from_category,
                to_category,
            });
        }
    }

    let Some(density) = density else {
        return Err(UnitError::MissingDensity {
            from,
            to,
            from_category,
            to_category,
        });
    };
    if density <= Decimal::ZERO {
        return Err(UnitError::InvalidDensity(density));
    }

    value
        .checked_mul(from_factor)
        .and_then(|base| {
            if from_category == UnitCategory::Weight {
                // g / (g/ml) = ml
                base.checked_div(density)
            } else {
                base.checked_mul(density)
            }
        })
        .and_then(|converted| converted.checked_div(to_factor))
        .ok_or_else(|| overflow(value, &from, &to))
}

fn overflow(value: Decimal, from: &str, to: &str) -> UnitError {
    UnitError::Overflow {
        value,
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Check whether a conversion between two units is possible.
///
/// With `allow_density`, weight and volume count as compatible.
/// Unknown units are never compatible.
pub fn are_compatible(unit1: &str, unit2: &str, allow_density: bool) -> bool {
    let (Ok(cat1), Ok(cat2)) = (unit_category(unit1), unit_category(unit2)) else {
        return false;
    };

    if cat1 == cat2 {
        return true;
    }

    allow_density
        && matches!(
            (cat1, cat2),
            (UnitCategory::Weight, UnitCategory::Volume) | (UnitCategory::Volume, UnitCategory::Weight)
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn close(a: Decimal, b: Decimal, tolerance: &str) -> bool {
        (a - b).abs() < d(tolerance)
    }

    #[test]
    fn test_categories() {
        for unit in ["g", "kg", "oz", "lb", "mg"] {
            assert_eq!(unit_category(unit).unwrap(), UnitCategory::Weight);
        }
        for unit in ["ml", "l", "tsp", "tbsp", "cup", "fl_oz", "gal", "qt", "pt"] {
            assert_eq!(unit_category(unit).unwrap(), UnitCategory::Volume);
        }
        for unit in ["each", "piece", "dozen"] {
            assert_eq!(unit_category(unit).unwrap(), UnitCategory::Count);
        }
    }

    #[test]
    fn test_unit_lookup_is_normalized() {
        assert_eq!(unit_category("KG").unwrap(), UnitCategory::Weight);
        assert_eq!(unit_category("  Cup ").unwrap(), UnitCategory::Volume);
        assert_eq!(
            unit_category("handful"),
            Err(UnitError::UnknownUnit("handful".to_string()))
        );
    }

    #[test]
    fn test_weight_conversions() {
        assert_eq!(convert(d("1"), "kg", "g", None).unwrap(), d("1000"));
        assert!(close(convert(d("1"), "lb", "oz", None).unwrap(), d("16"), "0.01"));
        assert!(close(convert(d("1"), "oz", "g", None).unwrap(), d("28.35"), "0.01"));
        assert_eq!(convert(d("5"), "kg", "kg", None).unwrap(), d("5"));
    }

    #[test]
    fn test_volume_and_count_conversions() {
        assert_eq!(convert(d("1"), "l", "ml", None).unwrap(), d("1000"));
        assert!(close(convert(d("1"), "tbsp", "tsp", None).unwrap(), d("3"), "0.01"));
        assert_eq!(convert(d("1"), "dozen", "each", None).unwrap(), d("12"));
        assert_eq!(convert(d("24"), "each", "dozen", None).unwrap(), d("2"));
    }

    #[test]
    fn test_same_unit_skips_lookup() {
        // Identical names pass through even when the unit is not in the table
        assert_eq!(convert(d("3"), "Pinch", "pinch", None).unwrap(), d("3"));
    }

    #[test]
    fn test_weight_volume_requires_density() {
        let err = convert(d("100"), "g", "ml", None).unwrap_err();
        assert!(matches!(err, UnitError::MissingDensity { .. }));
        assert!(err.to_string().contains("without density"));
        assert!(err.to_string().contains("g (weight)"));
        assert!(err.to_string().contains("ml (volume)"));

        assert_eq!(convert(d("100"), "g", "ml", Some(d("1"))).unwrap(), d("100"));

        // 1 cup of flour at 0.593 g/ml is about 140.3 g
        let flour = convert(d("1"), "cup", "g", Some(d("0.593"))).unwrap();
        assert!(close(flour, d("140.3"), "1"));
    }

    #[test]
    fn test_invalid_density() {
        assert_eq!(
            convert(d("1"), "kg", "l", Some(Decimal::ZERO)),
            Err(UnitError::InvalidDensity(Decimal::ZERO))
        );
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = convert(d("100000000000000000000000000"), "gal", "ml", None).unwrap_err();
        assert_eq!(
            err,
            UnitError::Overflow {
                value: d("100000000000000000000000000"),
                from: "gal".to_string(),
                to: "ml".to_string(),
            }
        );

        let err = convert(Decimal::MAX, "ml", "g", Some(d("2"))).unwrap_err();
        assert!(matches!(err, UnitError::Overflow { .. }));

        // Large but representable values still convert
        assert_eq!(
            convert(d("100000000000000000000"), "kg", "g", None).unwrap(),
            d("100000000000000000000000")
        );
    }

    #[test]
    fn test_count_never_crosses_categories() {
        let err = convert(d("1"), "each", "g", Some(d("1"))).unwrap_err();
        assert!(matches!(err, UnitError::Incompatible { .. }));
        assert!(convert(d("1"), "ml", "dozen", None).is_err());
    }

    #[test]
    fn test_unknown_unit() {
        assert_eq!(
            convert(d("1"), "g", "bushel", None),
            Err(UnitError::UnknownUnit("bushel".to_string()))
        );
    }

    #[test]
    fn test_are_compatible() {
        assert!(are_compatible("kg", "lb", false));
        assert!(are_compatible("cup", "ml", false));
        assert!(!are_compatible("kg", "ml", false));
        assert!(are_compatible("kg", "ml", true));
        assert!(!are_compatible("each", "kg", true));
        assert!(!are_compatible("kg", "bushel", true));
    }
}
