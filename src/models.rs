//! Data models for ingredients, recipes and bills of materials

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::CostError;

pub type TenantId = i64;
pub type IngredientId = i64;
pub type RecipeId = i64;

#[derive(Debug, Clone)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
    /// e.g. "case", "bag", "lb"
    pub purchase_unit: String,
    /// Quantity per purchase unit
    pub purchase_qty: Decimal,
    /// Cost per purchase unit batch
    pub purchase_price: Decimal,
    /// e.g. "oz", "cup"
    pub recipe_unit: String,
    /// Recipe units per purchase unit
    pub conversion_factor: Decimal,
    /// Usable share after prep loss, 0-100
    pub yield_percent: Decimal,
}

/// What a recipe line consumes: a raw ingredient or another recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSource {
    Ingredient(IngredientId),
    SubRecipe(RecipeId),
}

impl ItemSource {
    /// Build from the two nullable storage columns. Anything other than
    /// exactly one reference yields `None`.
    pub fn from_columns(ingredient_id: Option<IngredientId>, sub_recipe_id: Option<RecipeId>) -> Option<Self> {
        match (ingredient_id, sub_recipe_id) {
            (Some(id), None) => Some(ItemSource::Ingredient(id)),
            (None, Some(id)) => Some(ItemSource::SubRecipe(id)),
            _ => None,
        }
    }

    pub fn ingredient_id(&self) -> Option<IngredientId> {
        match self {
            ItemSource::Ingredient(id) => Some(*id),
            ItemSource::SubRecipe(_) => None,
        }
    }

    pub fn sub_recipe_id(&self) -> Option<RecipeId> {
        match self {
            ItemSource::SubRecipe(id) => Some(*id),
            ItemSource::Ingredient(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecipeItem {
    pub id: i64,
    pub recipe_id: RecipeId,
    pub source: Option<ItemSource>,
    pub quantity: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub yield_qty: Decimal,
    pub yield_unit: String,
    pub selling_price: Option<Decimal>,
    pub target_cost_pct: Decimal,
    pub items: Vec<RecipeItem>,
}

/// A tenant's recipe graph, fully materialized in memory.
///
/// Every costing and BOM operation reads from a book and never mutates it.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    ingredients: HashMap<IngredientId, Ingredient>,
    recipes: HashMap<RecipeId, Recipe>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ingredient(&mut self, ingredient: Ingredient) {
        self.ingredients.insert(ingredient.id, ingredient);
    }

    pub fn insert_recipe(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.id, recipe);
    }

    pub fn ingredient(&self, id: IngredientId) -> Result<&Ingredient, CostError> {
        self.ingredients.get(&id).ok_or(CostError::IngredientNotFound(id))
    }

    pub fn recipe(&self, id: RecipeId) -> Result<&Recipe, CostError> {
        self.recipes.get(&id).ok_or(CostError::RecipeNotFound(id))
    }

    pub fn find_ingredient(&self, name: &str) -> Option<&Ingredient> {
        self.ingredients.values().find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn find_recipe(&self, name: &str) -> Option<&Recipe> {
        self.recipes.values().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Recipes ordered by name
    pub fn recipes(&self) -> Vec<&Recipe> {
        let mut list: Vec<_> = self.recipes.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn ingredient_count(&self) -> usize {
        self.ingredients.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }
}

/// One recipe requested for a BOM
#[derive(Debug, Clone, PartialEq)]
pub struct BomRequest {
    pub recipe_id: RecipeId,
    pub portions: Decimal,
}

/// A request as recorded in a BOM snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct BomRecipe {
    pub recipe_id: RecipeId,
    /// Recipe name at generation time
    pub recipe_name: String,
    pub portions: Decimal,
}

/// A merged ingredient line of a BOM
#[derive(Debug, Clone, PartialEq)]
pub struct BomLine {
    pub ingredient_id: IngredientId,
    pub ingredient_name: String,
    pub total_qty: Decimal,
    pub unit: String,
    pub unit_cost: Option<Decimal>,
    pub line_cost: Option<Decimal>,
    /// Set when a contribution could not be converted into `unit`
    pub unit_mismatch: bool,
}

/// Immutable snapshot of a generated bill of materials
#[derive(Debug, Clone)]
pub struct Bom {
    pub id: Option<i64>,
    pub name: String,
    pub date: NaiveDate,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub recipes: Vec<BomRecipe>,
    pub lines: Vec<BomLine>,
}
