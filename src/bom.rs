//! Bill of materials aggregation
//!
//! Requested recipes are flattened into their raw ingredients (expanding
//! sub-recipes) and merged into one line per ingredient.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::calculator::{self, Visited};
use crate::error::CostError;
use crate::models::{Bom, BomLine, BomRecipe, BomRequest, IngredientId, ItemSource, RecipeBook, RecipeId, RecipeItem};
use crate::units;

/// Running total for one ingredient, created on first encounter
#[derive(Debug)]
struct LineAccumulator {
    ingredient_id: IngredientId,
    ingredient_name: String,
    total_qty: Decimal,
    unit: String,
    unit_cost: Option<Decimal>,
    unit_mismatch: bool,
}

/// Ingredient totals keyed by ingredient identity, in first-encounter order
#[derive(Debug, Default)]
struct Aggregation {
    index: HashMap<IngredientId, usize>,
    lines: Vec<LineAccumulator>,
}

impl Aggregation {
    fn add(&mut self, book: &RecipeBook, ingredient_id: IngredientId, qty: Decimal, unit: &str) -> Result<(), CostError> {
        if let Some(&pos) = self.index.get(&ingredient_id) {
            let line = &mut self.lines[pos];
            let contribution = match units::convert(qty, unit, &line.unit, None) {
                Ok(converted) => converted,
                Err(e) => {
                    warn!(
                        "Summing {} {} into {} line for {} without conversion: {}",
                        qty, unit, line.unit, line.ingredient_name, e
                    );
                    line.unit_mismatch = true;
                    qty
                }
            };
            line.total_qty = calculator::add(line.total_qty, contribution, &line.ingredient_name)?;
            return Ok(());
        }

        let ingredient = book.ingredient(ingredient_id)?;
        let unit_cost = match calculator::unit_cost(ingredient, Some(unit)) {
            Ok(cost) => Some(cost),
            Err(e) => {
                debug!("No unit cost for {}: {}", ingredient.name, e);
                None
            }
        };

        self.index.insert(ingredient_id, self.lines.len());
        self.lines.push(LineAccumulator {
            ingredient_id,
            ingredient_name: ingredient.name.clone(),
            total_qty: qty,
            unit: unit.to_string(),
            unit_cost,
            unit_mismatch: false,
        });
        Ok(())
    }

    fn into_lines(self) -> Vec<BomLine> {
        self.lines
            .into_iter()
            .map(|acc| {
                let line_cost = acc.unit_cost.and_then(|cost| {
                    let line_cost = acc.total_qty.checked_mul(cost);
                    if line_cost.is_none() {
                        warn!("Line cost for {} overflows; leaving it uncosted", acc.ingredient_name);
                    }
                    line_cost
                });
                BomLine {
                    line_cost,
                    ingredient_id: acc.ingredient_id,
                    ingredient_name: acc.ingredient_name,
                    total_qty: acc.total_qty,
                    unit: acc.unit,
                    unit_cost: acc.unit_cost,
                    unit_mismatch: acc.unit_mismatch,
                }
            })
            .collect()
    }
}

/// Pending flattening work
enum Step<'a> {
    /// Expand a recipe's items at a scale
    Expand {
        recipe_id: RecipeId,
        scale: Decimal,
        visited: Visited,
    },
    /// Process one item of an already expanded recipe
    Item {
        item: &'a RecipeItem,
        scale: Decimal,
        visited: Rc<Visited>,
    },
}

/// Flatten one recipe into `aggregation`.
///
/// Uses an explicit stack instead of native recursion; items are visited in
/// the same depth-first order a recursive walk would use. A branch that
/// returns to a recipe already on its own path is dropped, not failed.
fn flatten(
    book: &RecipeBook,
    recipe_id: RecipeId,
    scale: Decimal,
    aggregation: &mut Aggregation,
) -> Result<(), CostError> {
    let mut stack = vec![Step::Expand {
        recipe_id,
        scale,
        visited: Visited::new(),
    }];

    while let Some(step) = stack.pop() {
        match step {
            Step::Expand { recipe_id, scale, visited } => {
                let recipe = book.recipe(recipe_id)?;
                if visited.contains(&recipe_id) {
                    warn!(
                        "Recipe {} ({}) already expanded on this branch; skipping",
                        recipe.id, recipe.name
                    );
                    continue;
                }

                let visited = Rc::new(calculator::with_recipe(&visited, recipe_id));
                for item in recipe.items.iter().rev() {
                    stack.push(Step::Item {
                        item,
                        scale,
                        visited: Rc::clone(&visited),
                    });
                }
            }
            Step::Item { item, scale, visited } => match item.source {
                Some(ItemSource::Ingredient(ingredient_id)) => {
                    let ingredient = book.ingredient(ingredient_id)?;
                    let qty = calculator::mul(item.quantity, scale, &ingredient.name)?;
                    aggregation.add(book, ingredient_id, qty, &item.unit)?;
                }
                Some(ItemSource::SubRecipe(sub_id)) => {
                    let sub_recipe = book.recipe(sub_id)?;
                    if sub_recipe.yield_qty.is_zero() {
                        return Err(CostError::ZeroYield {
                            recipe: sub_recipe.name.clone(),
                        });
                    }
                    let batches = calculator::div(item.quantity, sub_recipe.yield_qty, &sub_recipe.name)?;
                    stack.push(Step::Expand {
                        recipe_id: sub_id,
                        scale: calculator::mul(batches, scale, &sub_recipe.name)?,
                        visited: Visited::clone(&visited),
                    });
                }
                None => {
                    return Err(CostError::MissingReference {
                        recipe_id: item.recipe_id,
                        item_id: item.id,
                    });
                }
            },
        }
    }

    Ok(())
}

/// Merged ingredient requirements for a set of recipe requests
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub lines: Vec<BomLine>,
    pub total_cost: Decimal,
}

/// Flatten and merge the ingredients of every requested recipe.
///
/// Every requested recipe must exist before any work is done.
pub fn aggregate(book: &RecipeBook, requests: &[BomRequest]) -> Result<Aggregate, CostError> {
    let mut scaled = Vec::with_capacity(requests.len());
    for request in requests {
        let recipe = book.recipe(request.recipe_id)?;
        if recipe.yield_qty.is_zero() {
            return Err(CostError::ZeroYield {
                recipe: recipe.name.clone(),
            });
        }
        if request.portions <= Decimal::ZERO {
            return Err(CostError::NonPositivePortions {
                recipe_id: request.recipe_id,
            });
        }
        scaled.push((recipe, calculator::div(request.portions, recipe.yield_qty, &recipe.name)?));
    }

    let mut aggregation = Aggregation::default();
    for (recipe, scale) in scaled {
        debug!("Flattening {} at scale {}", recipe.name, scale);
        flatten(book, recipe.id, scale, &mut aggregation)?;
    }

    let lines = aggregation.into_lines();
    let total_cost = lines
        .iter()
        .filter_map(|line| line.line_cost)
        .try_fold(Decimal::ZERO, |sum, cost| calculator::add(sum, cost, "BOM total"))?;

    Ok(Aggregate { lines, total_cost })
}

/// Generate a named, dated BOM snapshot
pub fn generate(
    book: &RecipeBook,
    name: &str,
    date: NaiveDate,
    requests: Vec<BomRequest>,
) -> Result<Bom, CostError> {
    let Aggregate { lines, total_cost } = aggregate(book, &requests)?;

    let mut recipes = Vec::with_capacity(requests.len());
    for request in requests {
        recipes.push(BomRecipe {
            recipe_id: request.recipe_id,
            recipe_name: book.recipe(request.recipe_id)?.name.clone(),
            portions: request.portions,
        });
    }

    Ok(Bom {
        id: None,
        name: name.to_string(),
        date,
        total_cost,
        created_at: Utc::now(),
        recipes,
        lines,
    })
}

impl fmt::Display for Bom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = f.precision().unwrap_or(4) as u32;
        let money = |value: Option<Decimal>| match value {
            Some(v) => v.round_dp(dp).to_string(),
            None => "n/a".to_string(),
        };

        match self.id {
            Some(id) => writeln!(f, "=== BOM #{}: {} ===", id, self.name)?,
            None => writeln!(f, "=== BOM: {} ===", self.name)?,
        }
        writeln!(f, "Date: {}", self.date)?;
        writeln!(f)?;

        writeln!(f, "Recipes:")?;
        for recipe in &self.recipes {
            writeln!(f, "  {} x {} portions", recipe.recipe_name, recipe.portions.normalize())?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:<28} {:>12} {:<6} {:>12} {:>12}",
            "Ingredient", "Quantity", "Unit", "Unit cost", "Line cost"
        )?;
        writeln!(f, "{}", "-".repeat(74))?;
        for line in &self.lines {
            let flag = if line.unit_mismatch { " *" } else { "" };
            writeln!(
                f,
                "{:<28} {:>12} {:<6} {:>12} {:>12}{}",
                line.ingredient_name,
                line.total_qty.round_dp(4).normalize(),
                line.unit,
                money(line.unit_cost),
                money(line.line_cost),
                flag
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Total cost: {}", self.total_cost.round_dp(dp))?;

        if self.lines.iter().any(|line| line.unit_mismatch) {
            writeln!(f, "* quantities summed across incompatible units")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, Recipe};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ingredient(id: i64, name: &str, recipe_unit: &str) -> Ingredient {
        Ingredient {
            id,
            name: name.to_string(),
            purchase_unit: "case".to_string(),
            purchase_qty: d("1"),
            purchase_price: d("8"),
            recipe_unit: recipe_unit.to_string(),
            conversion_factor: d("16"),
            yield_percent: d("100"),
        }
    }

    fn item(id: i64, recipe_id: RecipeId, source: ItemSource, qty: &str, unit: &str) -> RecipeItem {
        RecipeItem {
            id,
            recipe_id,
            source: Some(source),
            quantity: d(qty),
            unit: unit.to_string(),
        }
    }

    fn recipe(id: RecipeId, yield_qty: &str, items: Vec<RecipeItem>) -> Recipe {
        Recipe {
            id,
            name: format!("Recipe {id}"),
            yield_qty: d(yield_qty),
            yield_unit: "portion".to_string(),
            selling_price: None,
            target_cost_pct: d("30"),
            items,
        }
    }

    fn request(recipe_id: RecipeId, portions: &str) -> BomRequest {
        BomRequest {
            recipe_id,
            portions: d(portions),
        }
    }

    /// Milk at $0.50/cup, butter at $0.50/tbsp
    fn book_with(recipes: Vec<Recipe>) -> RecipeBook {
        let mut book = RecipeBook::new();
        book.insert_ingredient(ingredient(1, "Milk", "cup"));
        book.insert_ingredient(ingredient(2, "Butter", "tbsp"));
        for r in recipes {
            book.insert_recipe(r);
        }
        book
    }

    #[test]
    fn test_shared_ingredient_merges_into_one_line() {
        let a = recipe(1, "4", vec![item(1, 1, ItemSource::Ingredient(1), "2", "cup")]);
        let b = recipe(2, "4", vec![item(2, 2, ItemSource::Ingredient(1), "1", "cup")]);
        let book = book_with(vec![a, b]);

        let result = aggregate(&book, &[request(1, "4"), request(2, "4")]).unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].total_qty, d("3"));
        assert_eq!(result.lines[0].unit, "cup");
        assert_eq!(result.lines[0].line_cost, Some(d("1.5")));
        assert_eq!(result.total_cost, d("1.5"));
    }

    #[test]
    fn test_portions_scale_quantities() {
        let a = recipe(1, "4", vec![item(1, 1, ItemSource::Ingredient(1), "2", "cup")]);
        let book = book_with(vec![a]);

        let result = aggregate(&book, &[request(1, "8")]).unwrap();
        assert_eq!(result.lines[0].total_qty, d("4"));
    }

    #[test]
    fn test_sub_recipes_are_expanded() {
        // Sauce yields 4 cups from 2 cups milk and 4 tbsp butter
        let sauce = recipe(10, "4", vec![
            item(10, 10, ItemSource::Ingredient(1), "2", "cup"),
            item(11, 10, ItemSource::Ingredient(2), "4", "tbsp"),
        ]);
        let dish = recipe(1, "2", vec![
            item(1, 1, ItemSource::Ingredient(2), "1", "tbsp"),
            item(2, 1, ItemSource::SubRecipe(10), "2", "cup"),
        ]);
        let book = book_with(vec![sauce, dish]);

        // 4 portions = scale 2; 4 cups of sauce = 1 batch
        let result = aggregate(&book, &[request(1, "4")]).unwrap();
        let names: Vec<_> = result.lines.iter().map(|l| l.ingredient_name.as_str()).collect();
        assert_eq!(names, ["Butter", "Milk"]);
        assert_eq!(result.lines[0].total_qty, d("6"));
        assert_eq!(result.lines[1].total_qty, d("2"));
        assert_eq!(result.total_cost, d("4"));
    }

    #[test]
    fn test_cycle_truncates_branch_silently() {
        let a = recipe(1, "1", vec![
            item(1, 1, ItemSource::Ingredient(1), "1", "cup"),
            item(2, 1, ItemSource::SubRecipe(2), "1", "portion"),
        ]);
        let b = recipe(2, "1", vec![
            item(3, 2, ItemSource::Ingredient(2), "1", "tbsp"),
            item(4, 2, ItemSource::SubRecipe(1), "1", "portion"),
        ]);
        let book = book_with(vec![a, b]);

        let result = aggregate(&book, &[request(1, "1")]).unwrap();
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[0].total_qty, d("1"));
        assert_eq!(result.lines[1].total_qty, d("1"));
    }

    #[test]
    fn test_mismatched_units_are_converted() {
        let a = recipe(1, "1", vec![item(1, 1, ItemSource::Ingredient(2), "1", "tbsp")]);
        let b = recipe(2, "1", vec![item(2, 2, ItemSource::Ingredient(2), "3", "tsp")]);
        let book = book_with(vec![a, b]);

        let result = aggregate(&book, &[request(1, "1"), request(2, "1")]).unwrap();
        let line = &result.lines[0];
        assert_eq!(line.unit, "tbsp");
        assert!((line.total_qty - d("2")).abs() < d("0.001"));
        assert!(!line.unit_mismatch);
    }

    #[test]
    fn test_unconvertible_units_are_flagged() {
        let a = recipe(1, "1", vec![item(1, 1, ItemSource::Ingredient(1), "1", "cup")]);
        let b = recipe(2, "1", vec![item(2, 2, ItemSource::Ingredient(1), "2", "each")]);
        let book = book_with(vec![a, b]);

        let result = aggregate(&book, &[request(1, "1"), request(2, "1")]).unwrap();
        assert_eq!(result.lines[0].total_qty, d("3"));
        assert!(result.lines[0].unit_mismatch);
    }

    #[test]
    fn test_uncostable_line_is_excluded_from_total() {
        // Milk is costed per cup; grams cannot be priced without density
        let a = recipe(1, "1", vec![
            item(1, 1, ItemSource::Ingredient(1), "100", "g"),
            item(2, 1, ItemSource::Ingredient(2), "2", "tbsp"),
        ]);
        let book = book_with(vec![a]);

        let result = aggregate(&book, &[request(1, "1")]).unwrap();
        assert_eq!(result.lines[0].unit_cost, None);
        assert_eq!(result.lines[0].line_cost, None);
        assert_eq!(result.total_cost, d("1"));
    }

    #[test]
    fn test_unknown_recipe_fails_whole_generation() {
        let a = recipe(1, "1", vec![item(1, 1, ItemSource::Ingredient(1), "1", "cup")]);
        let book = book_with(vec![a]);

        let err = aggregate(&book, &[request(1, "1"), request(42, "1")]).unwrap_err();
        assert_eq!(err, CostError::RecipeNotFound(42));
    }

    #[test]
    fn test_non_positive_portions_rejected() {
        let a = recipe(1, "4", vec![item(1, 1, ItemSource::Ingredient(1), "2", "cup")]);
        let book = book_with(vec![a]);

        for portions in ["0", "-2"] {
            let err = aggregate(&book, &[request(1, portions)]).unwrap_err();
            assert_eq!(err, CostError::NonPositivePortions { recipe_id: 1 });
        }
    }

    #[test]
    fn test_zero_yield_sub_recipe_fails() {
        let stock = recipe(10, "0", vec![item(10, 10, ItemSource::Ingredient(1), "2", "cup")]);
        let soup = recipe(1, "4", vec![item(1, 1, ItemSource::SubRecipe(10), "1", "cup")]);
        let book = book_with(vec![stock, soup]);

        let err = aggregate(&book, &[request(1, "4")]).unwrap_err();
        assert_eq!(
            err,
            CostError::ZeroYield {
                recipe: "Recipe 10".to_string()
            }
        );
    }

    #[test]
    fn test_generate_snapshot() {
        let a = recipe(1, "4", vec![item(1, 1, ItemSource::Ingredient(1), "2", "cup")]);
        let book = book_with(vec![a]);
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

        let bom = generate(&book, "Friday prep", date, vec![request(1, "8")]).unwrap();
        assert_eq!(bom.id, None);
        assert_eq!(bom.name, "Friday prep");
        assert_eq!(bom.total_cost, d("2"));
        assert_eq!(bom.recipes[0].recipe_name, "Recipe 1");
        let printed = bom.to_string();
        assert!(printed.contains("Recipe 1 x 8 portions"));
        assert!(printed.contains("Milk"));
    }
}
