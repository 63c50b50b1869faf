//! Error types for unit conversion and costing

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{IngredientId, RecipeId};
use crate::units::UnitCategory;

/// Errors raised by the unit converter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Cannot convert {from} ({from_category}) to {to} ({to_category}) without density")]
    MissingDensity {
        from: String,
        to: String,
        from_category: UnitCategory,
        to_category: UnitCategory,
    },

    #[error("Cannot convert {from} ({from_category}) to {to} ({to_category})")]
    Incompatible {
        from: String,
        to: String,
        from_category: UnitCategory,
        to_category: UnitCategory,
    },

    #[error("Density must be positive, got {0}")]
    InvalidDensity(Decimal),

    #[error("Converting {value} {from} to {to} overflows")]
    Overflow { value: Decimal, from: String, to: String },
}

/// Ingredient fields that must be non-zero for costing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngredientField {
    PurchaseQty,
    ConversionFactor,
    YieldPercent,
}

impl fmt::Display for IngredientField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngredientField::PurchaseQty => "purchase quantity",
            IngredientField::ConversionFactor => "conversion factor",
            IngredientField::YieldPercent => "yield percent",
        };
        f.write_str(name)
    }
}

/// Errors raised while costing recipes or aggregating a BOM
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("Ingredient {ingredient} has zero {field}")]
    ZeroField {
        ingredient: String,
        field: IngredientField,
    },

    #[error("Recipe {recipe} has zero yield")]
    ZeroYield { recipe: String },

    #[error("Requested portions for recipe {recipe_id} must be positive")]
    NonPositivePortions { recipe_id: RecipeId },

    #[error("Cannot convert {from} to {to} for {ingredient}: {source}")]
    Conversion {
        ingredient: String,
        from: String,
        to: String,
        #[source]
        source: UnitError,
    },

    #[error("Cycle detected: recipe {id} ({name}) is referenced recursively")]
    Cycle { id: RecipeId, name: String },

    #[error("Ingredient with id {0} not found")]
    IngredientNotFound(IngredientId),

    #[error("Recipe with id {0} not found")]
    RecipeNotFound(RecipeId),

    #[error("Recipe item {item_id} of recipe {recipe_id} has no ingredient or sub-recipe")]
    MissingReference { recipe_id: RecipeId, item_id: i64 },

    #[error("Arithmetic overflow while costing {subject}")]
    Overflow { subject: String },
}

impl CostError {
    /// Hard failures describe a broken recipe graph and are never reported
    /// as a missing value.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            CostError::Cycle { .. }
                | CostError::IngredientNotFound(_)
                | CostError::RecipeNotFound(_)
                | CostError::MissingReference { .. }
        )
    }
}
