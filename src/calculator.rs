//! Recipe cost calculator logic
//!
//! Costs roll up recursively through sub-recipes. The set of recipes on the
//! current path is threaded down as an immutable value, so sibling items
//! never see each other's markers and a recipe that reaches itself again is
//! reported as a cycle.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{CostError, IngredientField};
use crate::models::{Ingredient, ItemSource, Recipe, RecipeBook, RecipeId, RecipeItem};
use crate::units;

/// Recipes on the current expansion path
pub type Visited = BTreeSet<RecipeId>;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn overflow(subject: &str) -> CostError {
    CostError::Overflow {
        subject: subject.to_string(),
    }
}

pub(crate) fn mul(a: Decimal, b: Decimal, subject: &str) -> Result<Decimal, CostError> {
    a.checked_mul(b).ok_or_else(|| overflow(subject))
}

/// Divide, reporting overflow or a zero divisor as `CostError::Overflow`
pub(crate) fn div(a: Decimal, b: Decimal, subject: &str) -> Result<Decimal, CostError> {
    a.checked_div(b).ok_or_else(|| overflow(subject))
}

pub(crate) fn add(a: Decimal, b: Decimal, subject: &str) -> Result<Decimal, CostError> {
    a.checked_add(b).ok_or_else(|| overflow(subject))
}

/// Copy `visited` with one more recipe on the path
pub(crate) fn with_recipe(visited: &Visited, id: RecipeId) -> Visited {
    let mut next = visited.clone();
    next.insert(id);
    next
}

/// Cost of one `target_unit` of an ingredient, after yield loss.
///
/// `target_unit` defaults to the ingredient's recipe unit.
pub fn unit_cost(ingredient: &Ingredient, target_unit: Option<&str>) -> Result<Decimal, CostError> {
    let name = ingredient.name.as_str();
    let zero_field = |field| CostError::ZeroField {
        ingredient: name.to_string(),
        field,
    };

    if ingredient.purchase_qty.is_zero() {
        return Err(zero_field(IngredientField::PurchaseQty));
    }
    // e.g. $10 for a 5 lb bag = $2/lb
    let base_cost = div(ingredient.purchase_price, ingredient.purchase_qty, name)?;

    if ingredient.conversion_factor.is_zero() {
        return Err(zero_field(IngredientField::ConversionFactor));
    }
    let cost_per_recipe_unit = div(base_cost, ingredient.conversion_factor, name)?;

    if ingredient.yield_percent.is_zero() {
        return Err(zero_field(IngredientField::YieldPercent));
    }
    let cost_with_yield = div(cost_per_recipe_unit, ingredient.yield_percent / HUNDRED, name)?;

    let recipe_unit = units::normalize_unit(&ingredient.recipe_unit);
    let target = match target_unit {
        Some(unit) => units::normalize_unit(unit),
        None => recipe_unit.clone(),
    };

    if target == recipe_unit {
        return Ok(cost_with_yield);
    }

    let recipe_units_per_target = units::convert(Decimal::ONE, &target, &recipe_unit, None).map_err(|source| {
        CostError::Conversion {
            ingredient: name.to_string(),
            from: target.clone(),
            to: recipe_unit.clone(),
            source,
        }
    })?;

    mul(cost_with_yield, recipe_units_per_target, name)
}

/// Cost of a single recipe item at the given scale.
///
/// A sub-recipe item's quantity is measured in the sub-recipe's yield unit,
/// so "2 cups of sauce" from a sauce yielding 4 cups costs half a batch.
pub fn item_cost(
    book: &RecipeBook,
    item: &RecipeItem,
    scale: Decimal,
    visited: &Visited,
) -> Result<Decimal, CostError> {
    match item.source {
        Some(ItemSource::Ingredient(ingredient_id)) => {
            let ingredient = book.ingredient(ingredient_id)?;
            let quantity = mul(item.quantity, scale, &ingredient.name)?;
            mul(quantity, unit_cost(ingredient, Some(&item.unit))?, &ingredient.name)
        }
        Some(ItemSource::SubRecipe(sub_id)) => {
            let sub_recipe = book.recipe(sub_id)?;
            if visited.contains(&sub_id) {
                return Err(CostError::Cycle {
                    id: sub_id,
                    name: sub_recipe.name.clone(),
                });
            }
            if sub_recipe.yield_qty.is_zero() {
                return Err(CostError::ZeroYield {
                    recipe: sub_recipe.name.clone(),
                });
            }

            let batch_cost = recipe_cost(book, sub_recipe, Decimal::ONE, &with_recipe(visited, item.recipe_id))?;
            let quantity = mul(item.quantity, scale, &sub_recipe.name)?;
            let batches_needed = div(quantity, sub_recipe.yield_qty, &sub_recipe.name)?;
            debug!(
                "Sub-recipe {} costs {} per batch, {} batches needed",
                sub_recipe.name, batch_cost, batches_needed
            );
            mul(batch_cost, batches_needed, &sub_recipe.name)
        }
        None => Err(CostError::MissingReference {
            recipe_id: item.recipe_id,
            item_id: item.id,
        }),
    }
}

/// Total cost of a recipe at the given scale (1 = one batch)
pub fn recipe_cost(
    book: &RecipeBook,
    recipe: &Recipe,
    scale: Decimal,
    visited: &Visited,
) -> Result<Decimal, CostError> {
    if visited.contains(&recipe.id) {
        return Err(CostError::Cycle {
            id: recipe.id,
            name: recipe.name.clone(),
        });
    }

    let visited = with_recipe(visited, recipe.id);
    let mut total = Decimal::ZERO;
    for item in &recipe.items {
        total = add(total, item_cost(book, item, scale, &visited)?, &recipe.name)?;
    }

    debug!("Recipe {} ({}) costs {} at scale {}", recipe.id, recipe.name, total, scale);
    Ok(total)
}

/// Cost of one portion (one yield unit) at the given scale
pub fn cost_per_portion(book: &RecipeBook, recipe: &Recipe, scale: Decimal) -> Result<Decimal, CostError> {
    let total = recipe_cost(book, recipe, scale, &Visited::new())?;
    let portions = mul(recipe.yield_qty, scale, &recipe.name)?;

    if portions.is_zero() {
        return Err(CostError::ZeroYield {
            recipe: recipe.name.clone(),
        });
    }

    div(total, portions, &recipe.name)
}

/// Food cost as a percentage of the selling price.
///
/// `selling_price` overrides the recipe's own price. Returns `None` when no
/// non-zero price is available.
pub fn food_cost_percentage(
    book: &RecipeBook,
    recipe: &Recipe,
    selling_price: Option<Decimal>,
) -> Result<Option<Decimal>, CostError> {
    let price = selling_price
        .filter(|p| !p.is_zero())
        .or(recipe.selling_price)
        .filter(|p| !p.is_zero());

    let Some(price) = price else {
        return Ok(None);
    };

    let per_portion = cost_per_portion(book, recipe, Decimal::ONE)?;
    let share = div(per_portion, price, &recipe.name)?;
    Ok(Some(mul(share, HUNDRED, &recipe.name)?))
}

/// Map soft failures to `None`, keep hard ones as errors
fn soft<T>(result: Result<T, CostError>) -> Result<Option<T>, CostError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_hard() => Err(e),
        Err(e) => {
            debug!("Cost unavailable: {}", e);
            Ok(None)
        }
    }
}

/// Full cost breakdown of a recipe
#[derive(Debug, Clone)]
pub struct CostBreakdown {
    pub recipe_id: RecipeId,
    pub recipe_name: String,
    pub yield_qty: Decimal,
    pub yield_unit: String,
    pub total_cost: Option<Decimal>,
    pub cost_per_portion: Option<Decimal>,
    pub food_cost_pct: Option<Decimal>,
    pub target_cost_pct: Decimal,
    pub item_costs: Vec<ItemCost>,
}

#[derive(Debug, Clone)]
pub struct ItemCost {
    pub item_id: i64,
    pub name: String,
    pub quantity: Decimal,
    pub unit: String,
    pub cost: Option<Decimal>,
}

fn item_name(book: &RecipeBook, item: &RecipeItem) -> String {
    let name = match item.source {
        Some(ItemSource::Ingredient(id)) => book.ingredient(id).ok().map(|i| i.name.clone()),
        Some(ItemSource::SubRecipe(id)) => book.recipe(id).ok().map(|r| r.name.clone()),
        None => None,
    };
    name.unwrap_or_else(|| format!("item {}", item.id))
}

/// Compute every cost figure for a recipe.
///
/// Each figure is `None` when its own calculation hits a data or unit
/// problem. Cycles and dangling references abort the whole breakdown.
pub fn cost_breakdown(
    book: &RecipeBook,
    recipe: &Recipe,
    selling_price: Option<Decimal>,
) -> Result<CostBreakdown, CostError> {
    let top = with_recipe(&Visited::new(), recipe.id);

    let mut item_costs = Vec::with_capacity(recipe.items.len());
    for item in &recipe.items {
        item_costs.push(ItemCost {
            item_id: item.id,
            name: item_name(book, item),
            quantity: item.quantity,
            unit: item.unit.clone(),
            cost: soft(item_cost(book, item, Decimal::ONE, &top))?,
        });
    }

    Ok(CostBreakdown {
        recipe_id: recipe.id,
        recipe_name: recipe.name.clone(),
        yield_qty: recipe.yield_qty,
        yield_unit: recipe.yield_unit.clone(),
        total_cost: soft(recipe_cost(book, recipe, Decimal::ONE, &Visited::new()))?,
        cost_per_portion: soft(cost_per_portion(book, recipe, Decimal::ONE))?,
        food_cost_pct: soft(food_cost_percentage(book, recipe, selling_price))?.flatten(),
        target_cost_pct: recipe.target_cost_pct,
        item_costs,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Ingredient,
    SubRecipe,
    Unlinked,
}

#[derive(Debug, Clone)]
pub struct ScaledItem {
    pub item_id: i64,
    pub name: String,
    pub kind: ItemKind,
    pub original_quantity: Decimal,
    pub quantity: Decimal,
    pub unit: String,
}

/// A recipe resized to a target number of portions
#[derive(Debug, Clone)]
pub struct ScaledRecipe {
    pub recipe_id: RecipeId,
    pub recipe_name: String,
    pub original_yield: Decimal,
    pub target_yield: Decimal,
    pub scale_factor: Decimal,
    pub items: Vec<ScaledItem>,
    pub total_cost: Option<Decimal>,
    pub cost_per_portion: Option<Decimal>,
}

/// Scale a recipe to `target_portions` and cost it at that size
pub fn scale_recipe(
    book: &RecipeBook,
    recipe: &Recipe,
    target_portions: Decimal,
) -> Result<ScaledRecipe, CostError> {
    if recipe.yield_qty.is_zero() {
        return Err(CostError::ZeroYield {
            recipe: recipe.name.clone(),
        });
    }
    if target_portions <= Decimal::ZERO {
        return Err(CostError::NonPositivePortions { recipe_id: recipe.id });
    }

    let scale_factor = div(target_portions, recipe.yield_qty, &recipe.name)?;

    let items = recipe
        .items
        .iter()
        .map(|item| {
            Ok(ScaledItem {
                item_id: item.id,
                name: item_name(book, item),
                kind: match item.source {
                    Some(ItemSource::Ingredient(_)) => ItemKind::Ingredient,
                    Some(ItemSource::SubRecipe(_)) => ItemKind::SubRecipe,
                    None => ItemKind::Unlinked,
                },
                original_quantity: item.quantity,
                quantity: mul(item.quantity, scale_factor, &recipe.name)?,
                unit: item.unit.clone(),
            })
        })
        .collect::<Result<Vec<_>, CostError>>()?;

    let total_cost = soft(recipe_cost(book, recipe, scale_factor, &Visited::new()))?;

    Ok(ScaledRecipe {
        recipe_id: recipe.id,
        recipe_name: recipe.name.clone(),
        original_yield: recipe.yield_qty,
        target_yield: target_portions,
        scale_factor,
        items,
        total_cost,
        cost_per_portion: total_cost.and_then(|total| total.checked_div(target_portions)),
    })
}

/// Check whether adding `sub_recipe_id` as an item of `recipe_id` would
/// close a cycle in the recipe graph
pub fn would_create_cycle(book: &RecipeBook, recipe_id: RecipeId, sub_recipe_id: RecipeId) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![sub_recipe_id];

    while let Some(current) = stack.pop() {
        if current == recipe_id {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        // Unknown recipes have no outgoing links
        if let Ok(recipe) = book.recipe(current) {
            stack.extend(recipe.items.iter().filter_map(|item| item.source.and_then(|s| s.sub_recipe_id())));
        }
    }

    false
}

fn money(value: Option<Decimal>, scale: u32) -> String {
    match value {
        Some(v) => v.round_dp(scale).to_string(),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for CostBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = f.precision().unwrap_or(4) as u32;

        writeln!(f, "=== Cost Breakdown ===")?;
        writeln!(f, "Recipe: {} (id {})", self.recipe_name, self.recipe_id)?;
        writeln!(f, "Yield:  {} {}", self.yield_qty, self.yield_unit)?;
        writeln!(f)?;

        writeln!(f, "Items:")?;
        for item in &self.item_costs {
            writeln!(
                f,
                "  {:<28} {:>10} {:<6} {:>12}",
                item.name,
                item.quantity.normalize(),
                item.unit,
                money(item.cost, dp)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Total cost:       {}", money(self.total_cost, dp))?;
        writeln!(f, "Cost per portion: {}", money(self.cost_per_portion, dp))?;
        writeln!(f, "Food cost:        {}%", money(self.food_cost_pct, 2))?;
        writeln!(f, "Target:           {}%", self.target_cost_pct.round_dp(2))?;

        Ok(())
    }
}

impl fmt::Display for ScaledRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = f.precision().unwrap_or(4) as u32;

        writeln!(
            f,
            "{}: {} -> {} (x{})",
            self.recipe_name,
            self.original_yield.normalize(),
            self.target_yield.normalize(),
            self.scale_factor.round_dp(4).normalize()
        )?;
        for item in &self.items {
            let marker = if item.kind == ItemKind::SubRecipe { " (sub-recipe)" } else { "" };
            writeln!(
                f,
                "  {:>10} {:<6} {}{}",
                item.quantity.round_dp(4).normalize(),
                item.unit,
                item.name,
                marker
            )?;
        }
        writeln!(f, "Total cost:       {}", money(self.total_cost, dp))?;
        writeln!(f, "Cost per portion: {}", money(self.cost_per_portion, dp))?;
        Ok(())
    }
}
