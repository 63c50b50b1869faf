//! TOML import of ingredient and recipe data
//!
//! Recipes in a file may use each other as sub-recipes in any order; they
//! are inserted so every sub-recipe exists before the recipes that use it.
//! Links that would close a cycle are rejected before anything is written.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::calculator;
use crate::db;
use crate::models::{Ingredient, ItemSource, Recipe, RecipeBook, RecipeId, RecipeItem, TenantId};
use crate::units;

#[derive(Debug, Deserialize)]
struct ImportFile {
    #[serde(default)]
    ingredients: Vec<ImportIngredient>,
    #[serde(default)]
    recipes: Vec<ImportRecipe>,
}

#[derive(Debug, Deserialize)]
struct ImportIngredient {
    name: String,
    purchase_unit: String,
    purchase_qty: Decimal,
    purchase_price: Decimal,
    recipe_unit: String,
    conversion_factor: Decimal,
    #[serde(default = "default_yield_percent")]
    yield_percent: Decimal,
}

#[derive(Debug, Deserialize)]
struct ImportRecipe {
    name: String,
    yield_qty: Decimal,
    #[serde(default = "default_yield_unit")]
    yield_unit: String,
    selling_price: Option<Decimal>,
    #[serde(default = "default_target_cost_pct")]
    target_cost_pct: Decimal,
    #[serde(default)]
    items: Vec<ImportItem>,
}

#[derive(Debug, Deserialize)]
struct ImportItem {
    ingredient: Option<String>,
    sub_recipe: Option<String>,
    quantity: Decimal,
    unit: String,
}

fn default_yield_percent() -> Decimal {
    Decimal::ONE_HUNDRED
}

fn default_yield_unit() -> String {
    "portion".to_string()
}

fn default_target_cost_pct() -> Decimal {
    Decimal::new(30, 0)
}

/// Small sample kitchen: a few staples, two shared sub-recipes, two dishes
pub const SAMPLE_KITCHEN: &str = include_str!("data/sample_kitchen.toml");

/// Replace a tenant's data with the sample kitchen
pub fn load_sample(conn: &Connection, tenant: TenantId) -> Result<ImportStats> {
    db::clear_tenant_data(conn, tenant)?;
    import_str(conn, tenant, SAMPLE_KITCHEN)
}

/// Import a TOML file into a tenant's data
pub fn import_file(conn: &Connection, tenant: TenantId, path: &Path) -> Result<ImportStats> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    import_str(conn, tenant, &content).with_context(|| format!("Failed to import {}", path.display()))
}

/// Import TOML text into a tenant's data
pub fn import_str(conn: &Connection, tenant: TenantId, content: &str) -> Result<ImportStats> {
    let file: ImportFile = toml::from_str(content)?;
    let existing = db::load_book(conn, tenant)?;

    validate(&file, &existing)?;
    let order = insertion_order(&file, &existing)?;

    let tx = conn.unchecked_transaction()?;
    let mut stats = ImportStats::default();

    let mut ingredient_ids = HashMap::new();
    for ing in &file.ingredients {
        let ingredient = Ingredient {
            id: 0,
            name: ing.name.clone(),
            purchase_unit: ing.purchase_unit.clone(),
            purchase_qty: ing.purchase_qty,
            purchase_price: ing.purchase_price,
            recipe_unit: ing.recipe_unit.clone(),
            conversion_factor: ing.conversion_factor,
            yield_percent: ing.yield_percent,
        };
        let id = db::insert_ingredient(&tx, tenant, &ingredient)?;
        ingredient_ids.insert(ing.name.to_lowercase(), id);
        stats.ingredients += 1;
    }

    let mut recipe_ids: HashMap<String, RecipeId> = HashMap::new();
    for idx in order {
        let rec = &file.recipes[idx];
        let mut items = Vec::with_capacity(rec.items.len());
        for item in &rec.items {
            let source = match (&item.ingredient, &item.sub_recipe) {
                (Some(name), None) => {
                    let key = name.to_lowercase();
                    let id = match ingredient_ids.get(&key) {
                        Some(id) => *id,
                        None => existing
                            .find_ingredient(name)
                            .map(|i| i.id)
                            .ok_or_else(|| anyhow!("Unknown ingredient '{}' in recipe '{}'", name, rec.name))?,
                    };
                    ItemSource::Ingredient(id)
                }
                (None, Some(name)) => {
                    let key = name.to_lowercase();
                    let id = match recipe_ids.get(&key) {
                        Some(id) => *id,
                        None => existing
                            .find_recipe(name)
                            .map(|r| r.id)
                            .ok_or_else(|| anyhow!("Unknown sub-recipe '{}' in recipe '{}'", name, rec.name))?,
                    };
                    ItemSource::SubRecipe(id)
                }
                _ => bail!("Item in recipe '{}' must name exactly one ingredient or sub-recipe", rec.name),
            };
            items.push(RecipeItem {
                id: 0,
                recipe_id: 0,
                source: Some(source),
                quantity: item.quantity,
                unit: item.unit.clone(),
            });
        }

        let recipe = Recipe {
            id: 0,
            name: rec.name.clone(),
            yield_qty: rec.yield_qty,
            yield_unit: rec.yield_unit.clone(),
            selling_price: rec.selling_price,
            target_cost_pct: rec.target_cost_pct,
            items,
        };
        let id = db::write_recipe(&tx, tenant, &recipe)?;
        debug!("Imported recipe {} as id {}", rec.name, id);
        recipe_ids.insert(rec.name.to_lowercase(), id);
        stats.recipes += 1;
        stats.items += recipe.items.len();
    }

    tx.commit()?;
    info!("{}", stats);
    Ok(stats)
}

/// Check quantities and item references before touching the database
fn validate(file: &ImportFile, existing: &RecipeBook) -> Result<()> {
    let mut ingredient_names = HashSet::new();
    for ing in &file.ingredients {
        if !ingredient_names.insert(ing.name.to_lowercase()) {
            bail!("Ingredient '{}' is listed more than once", ing.name);
        }
        if existing.find_ingredient(&ing.name).is_some() {
            bail!("Ingredient '{}' already exists", ing.name);
        }
        if ing.purchase_qty <= Decimal::ZERO || ing.conversion_factor <= Decimal::ZERO {
            bail!("Ingredient '{}' needs a positive purchase quantity and conversion factor", ing.name);
        }
        if ing.yield_percent <= Decimal::ZERO || ing.yield_percent > Decimal::ONE_HUNDRED {
            bail!("Ingredient '{}' has yield percent {} outside (0, 100]", ing.name, ing.yield_percent);
        }
    }

    let mut recipe_names = HashSet::new();
    for rec in &file.recipes {
        if !recipe_names.insert(rec.name.to_lowercase()) {
            bail!("Recipe '{}' is listed more than once", rec.name);
        }
        if existing.find_recipe(&rec.name).is_some() {
            bail!("Recipe '{}' already exists", rec.name);
        }
        if rec.yield_qty <= Decimal::ZERO {
            bail!("Recipe '{}' needs a positive yield quantity", rec.name);
        }
        for item in &rec.items {
            if item.quantity <= Decimal::ZERO {
                bail!("Item in recipe '{}' has non-positive quantity {}", rec.name, item.quantity);
            }
            match (&item.ingredient, &item.sub_recipe) {
                (Some(name), None) => {
                    let recipe_unit = match file.ingredients.iter().find(|i| i.name.eq_ignore_ascii_case(name)) {
                        Some(ing) => &ing.recipe_unit,
                        None => match existing.find_ingredient(name) {
                            Some(ing) => &ing.recipe_unit,
                            None => bail!("Unknown ingredient '{}' in recipe '{}'", name, rec.name),
                        },
                    };
                    if !units::are_compatible(&item.unit, recipe_unit, false) {
                        warn!(
                            "'{}' in recipe '{}' uses {}, which cannot be priced from {}",
                            name, rec.name, item.unit, recipe_unit
                        );
                    }
                }
                (None, Some(name)) => {
                    let known = file.recipes.iter().any(|r| r.name.eq_ignore_ascii_case(name))
                        || existing.find_recipe(name).is_some();
                    if !known {
                        bail!("Unknown sub-recipe '{}' in recipe '{}'", name, rec.name);
                    }
                }
                _ => bail!("Item in recipe '{}' must name exactly one ingredient or sub-recipe", rec.name),
            }
        }
    }

    Ok(())
}

/// Order file recipes so sub-recipes come first, rejecting cyclic links.
///
/// File recipes get provisional negative ids in a staging book; each
/// sub-recipe link is checked with the cycle predicate before it is added.
fn insertion_order(file: &ImportFile, existing: &RecipeBook) -> Result<Vec<usize>> {
    let provisional = |idx: usize| -(idx as RecipeId) - 1;
    let lookup: HashMap<String, usize> = file
        .recipes
        .iter()
        .enumerate()
        .map(|(idx, r)| (r.name.to_lowercase(), idx))
        .collect();

    let mut staging = existing.clone();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); file.recipes.len()];

    for (idx, rec) in file.recipes.iter().enumerate() {
        staging.insert_recipe(Recipe {
            id: provisional(idx),
            name: rec.name.clone(),
            yield_qty: rec.yield_qty,
            yield_unit: rec.yield_unit.clone(),
            selling_price: rec.selling_price,
            target_cost_pct: rec.target_cost_pct,
            items: Vec::new(),
        });
    }

    for (idx, rec) in file.recipes.iter().enumerate() {
        let id = provisional(idx);
        for (position, name) in rec.items.iter().filter_map(|i| i.sub_recipe.as_ref()).enumerate() {
            let Some(&sub_idx) = lookup.get(&name.to_lowercase()) else {
                // Existing recipes cannot refer back to new ones
                continue;
            };
            let sub_id = provisional(sub_idx);
            if calculator::would_create_cycle(&staging, id, sub_id) {
                bail!("Using '{}' in '{}' would create a recipe cycle", name, rec.name);
            }

            let mut recipe = staging.recipe(id)?.clone();
            recipe.items.push(RecipeItem {
                id: position as i64,
                recipe_id: id,
                source: Some(ItemSource::SubRecipe(sub_id)),
                quantity: Decimal::ONE,
                unit: String::new(),
            });
            staging.insert_recipe(recipe);
            edges[idx].push(sub_idx);
        }
    }

    // Post-order walk; the graph is acyclic at this point
    let mut order = Vec::with_capacity(file.recipes.len());
    let mut placed = vec![false; file.recipes.len()];
    for root in 0..file.recipes.len() {
        let mut stack = vec![(root, 0usize)];
        while let Some((node, next)) = stack.pop() {
            if placed[node] {
                continue;
            }
            if let Some(&child) = edges[node].get(next) {
                stack.push((node, next + 1));
                if !placed[child] {
                    stack.push((child, 0));
                }
            } else {
                placed[node] = true;
                order.push(node);
            }
        }
    }

    Ok(order)
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub ingredients: usize,
    pub recipes: usize,
    pub items: usize,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported {} ingredients and {} recipes ({} items)",
            self.ingredients, self.recipes, self.items
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    const PANTRY: &str = r#"
        [[ingredients]]
        name = "Milk"
        purchase_unit = "gal"
        purchase_qty = "1"
        purchase_price = "4.00"
        recipe_unit = "cup"
        conversion_factor = "16"

        [[ingredients]]
        name = "Butter"
        purchase_unit = "lb"
        purchase_qty = "1"
        purchase_price = "4.80"
        recipe_unit = "tbsp"
        conversion_factor = "32"
        yield_percent = "100"
    "#;

    #[test]
    fn test_sub_recipes_inserted_first() {
        let conn = setup();
        let content = format!(
            "{PANTRY}{}",
            r#"
            [[recipes]]
            name = "Mac and Cheese"
            yield_qty = "4"
            selling_price = "9.00"

            [[recipes.items]]
            sub_recipe = "Bechamel"
            quantity = "2"
            unit = "cup"

            [[recipes]]
            name = "Bechamel"
            yield_qty = "4"
            yield_unit = "cup"

            [[recipes.items]]
            ingredient = "Milk"
            quantity = "4"
            unit = "cup"

            [[recipes.items]]
            ingredient = "butter"
            quantity = "4"
            unit = "tbsp"
            "#
        );

        let stats = import_str(&conn, 1, &content).unwrap();
        assert_eq!(stats.ingredients, 2);
        assert_eq!(stats.recipes, 2);
        assert_eq!(stats.items, 3);

        let book = db::load_book(&conn, 1).unwrap();
        let mac = book.find_recipe("mac and cheese").unwrap();
        let bechamel = book.find_recipe("Bechamel").unwrap();
        assert!(bechamel.id < mac.id);
        assert_eq!(mac.items[0].source, Some(ItemSource::SubRecipe(bechamel.id)));
        assert_eq!(bechamel.yield_unit, "cup");
        assert_eq!(mac.target_cost_pct, Decimal::new(30, 0));
    }

    #[test]
    fn test_cycle_rejected_before_writing() {
        let conn = setup();
        let content = r#"
            [[recipes]]
            name = "A"
            yield_qty = "1"
            [[recipes.items]]
            sub_recipe = "B"
            quantity = "1"
            unit = "portion"

            [[recipes]]
            name = "B"
            yield_qty = "1"
            [[recipes.items]]
            sub_recipe = "A"
            quantity = "1"
            unit = "portion"
        "#;

        let err = import_str(&conn, 1, content).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert_eq!(db::load_book(&conn, 1).unwrap().recipe_count(), 0);
    }

    #[test]
    fn test_item_needs_exactly_one_reference() {
        let conn = setup();
        let content = format!(
            "{PANTRY}{}",
            r#"
            [[recipes]]
            name = "Confused"
            yield_qty = "1"
            [[recipes.items]]
            ingredient = "Milk"
            sub_recipe = "Confused"
            quantity = "1"
            unit = "cup"
            "#
        );
        assert!(import_str(&conn, 1, &content).is_err());
    }

    #[test]
    fn test_unknown_names_and_bad_quantities() {
        let conn = setup();
        let unknown = r#"
            [[recipes]]
            name = "Toast"
            yield_qty = "1"
            [[recipes.items]]
            ingredient = "Bread"
            quantity = "1"
            unit = "each"
        "#;
        assert!(import_str(&conn, 1, unknown).unwrap_err().to_string().contains("Bread"));

        let negative = format!(
            "{PANTRY}{}",
            r#"
            [[recipes]]
            name = "Latte"
            yield_qty = "1"
            [[recipes.items]]
            ingredient = "Milk"
            quantity = "-1"
            unit = "cup"
            "#
        );
        assert!(import_str(&conn, 1, &negative).is_err());
    }

    #[test]
    fn test_sample_kitchen_loads() {
        let conn = setup();
        let stats = load_sample(&conn, 1).unwrap();
        assert_eq!(stats.recipes, 4);

        let book = db::load_book(&conn, 1).unwrap();
        let mac = book.find_recipe("Mac and Cheese").unwrap();
        assert_eq!(mac.items.len(), 3);

        // Loading twice replaces rather than duplicates
        load_sample(&conn, 1).unwrap();
        assert_eq!(db::load_book(&conn, 1).unwrap().recipe_count(), 4);
    }

    #[test]
    fn test_repeated_import_is_rejected() {
        let conn = setup();
        import_str(&conn, 1, PANTRY).unwrap();

        let err = import_str(&conn, 1, PANTRY).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(db::load_book(&conn, 1).unwrap().ingredient_count(), 2);

        // Names match case-insensitively, within a file as well
        let shouted = PANTRY.replace("\"Milk\"", "\"MILK\"");
        assert!(import_str(&conn, 1, &shouted).unwrap_err().to_string().contains("MILK"));
        let twice = format!("{PANTRY}{PANTRY}");
        assert!(import_str(&conn, 2, &twice).unwrap_err().to_string().contains("more than once"));

        // Another tenant may reuse the names
        import_str(&conn, 2, PANTRY).unwrap();
    }

    #[test]
    fn test_existing_data_can_be_referenced() {
        let conn = setup();
        import_str(&conn, 1, PANTRY).unwrap();

        let later = r#"
            [[recipes]]
            name = "Warm Milk"
            yield_qty = "1"
            [[recipes.items]]
            ingredient = "Milk"
            quantity = "1"
            unit = "cup"
        "#;
        let stats = import_str(&conn, 1, later).unwrap();
        assert_eq!(stats.recipes, 1);
        assert_eq!(stats.ingredients, 0);
    }
}
