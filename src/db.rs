//! Database schema and operations
//!
//! Every table is scoped by `tenant_id`; no query reads across tenants.
//! Decimal values are stored as TEXT so they round-trip exactly.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{
    Bom, BomLine, BomRecipe, Ingredient, IngredientId, ItemSource, Recipe, RecipeBook, RecipeId, RecipeItem,
    TenantId,
};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ingredients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            purchase_unit TEXT NOT NULL,
            purchase_qty TEXT NOT NULL,
            purchase_price TEXT NOT NULL,
            recipe_unit TEXT NOT NULL,
            conversion_factor TEXT NOT NULL,
            yield_percent TEXT NOT NULL DEFAULT '100'
        );

        CREATE TABLE IF NOT EXISTS recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            yield_qty TEXT NOT NULL,
            yield_unit TEXT NOT NULL DEFAULT 'portion',
            selling_price TEXT,
            target_cost_pct TEXT NOT NULL DEFAULT '30'
        );

        -- Each line uses exactly one ingredient or one sub-recipe
        CREATE TABLE IF NOT EXISTS recipe_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            ingredient_id INTEGER REFERENCES ingredients(id),
            sub_recipe_id INTEGER REFERENCES recipes(id),
            quantity TEXT NOT NULL,
            unit TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            CHECK ((ingredient_id IS NOT NULL AND sub_recipe_id IS NULL)
                OR (ingredient_id IS NULL AND sub_recipe_id IS NOT NULL))
        );

        -- Generated BOM snapshots; never recomputed after insertion
        CREATE TABLE IF NOT EXISTS boms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            total_cost TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bom_requests (
            bom_id INTEGER NOT NULL REFERENCES boms(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            recipe_id INTEGER NOT NULL,
            recipe_name TEXT NOT NULL,
            portions TEXT NOT NULL,
            PRIMARY KEY (bom_id, position)
        );

        CREATE TABLE IF NOT EXISTS bom_lines (
            bom_id INTEGER NOT NULL REFERENCES boms(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            ingredient_id INTEGER NOT NULL,
            ingredient_name TEXT NOT NULL,
            total_qty TEXT NOT NULL,
            unit TEXT NOT NULL,
            unit_cost TEXT,
            line_cost TEXT,
            unit_mismatch INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (bom_id, position)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(tenant_id, name COLLATE NOCASE);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recipes_name ON recipes(tenant_id, name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_recipe_items_recipe ON recipe_items(recipe_id);
        CREATE INDEX IF NOT EXISTS idx_boms_tenant ON boms(tenant_id);
        "#,
    )?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Read a TEXT column holding a decimal
fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Insert an ingredient; the database assigns the id
pub fn insert_ingredient(conn: &Connection, tenant: TenantId, ingredient: &Ingredient) -> Result<IngredientId> {
    conn.execute(
        "INSERT INTO ingredients (tenant_id, name, purchase_unit, purchase_qty, purchase_price,
                                  recipe_unit, conversion_factor, yield_percent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            tenant,
            ingredient.name,
            ingredient.purchase_unit,
            ingredient.purchase_qty.to_string(),
            ingredient.purchase_price.to_string(),
            ingredient.recipe_unit,
            ingredient.conversion_factor.to_string(),
            ingredient.yield_percent.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a recipe and its items in order; the database assigns all ids
pub fn insert_recipe(conn: &Connection, tenant: TenantId, recipe: &Recipe) -> Result<RecipeId> {
    let tx = conn.unchecked_transaction()?;
    let recipe_id = write_recipe(&tx, tenant, recipe)?;
    tx.commit()?;
    Ok(recipe_id)
}

/// Insert recipe rows inside a transaction the caller already holds
pub(crate) fn write_recipe(conn: &Connection, tenant: TenantId, recipe: &Recipe) -> Result<RecipeId> {
    conn.execute(
        "INSERT INTO recipes (tenant_id, name, yield_qty, yield_unit, selling_price, target_cost_pct)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            tenant,
            recipe.name,
            recipe.yield_qty.to_string(),
            recipe.yield_unit,
            recipe.selling_price.map(|p| p.to_string()),
            recipe.target_cost_pct.to_string(),
        ],
    )?;
    let recipe_id = conn.last_insert_rowid();

    for (position, item) in recipe.items.iter().enumerate() {
        let source = item.source;
        conn.execute(
            "INSERT INTO recipe_items (recipe_id, ingredient_id, sub_recipe_id, quantity, unit, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recipe_id,
                source.and_then(|s| s.ingredient_id()),
                source.and_then(|s| s.sub_recipe_id()),
                item.quantity.to_string(),
                item.unit,
                position as i64,
            ],
        )?;
    }

    Ok(recipe_id)
}

/// Remove every ingredient, recipe and BOM of a tenant
pub fn clear_tenant_data(conn: &Connection, tenant: TenantId) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM bom_lines WHERE bom_id IN (SELECT id FROM boms WHERE tenant_id = ?1)",
        [tenant],
    )?;
    tx.execute(
        "DELETE FROM bom_requests WHERE bom_id IN (SELECT id FROM boms WHERE tenant_id = ?1)",
        [tenant],
    )?;
    tx.execute("DELETE FROM boms WHERE tenant_id = ?1", [tenant])?;
    tx.execute(
        "DELETE FROM recipe_items WHERE recipe_id IN (SELECT id FROM recipes WHERE tenant_id = ?1)",
        [tenant],
    )?;
    tx.execute("DELETE FROM recipes WHERE tenant_id = ?1", [tenant])?;
    tx.execute("DELETE FROM ingredients WHERE tenant_id = ?1", [tenant])?;
    tx.commit()?;
    Ok(())
}

/// Load a tenant's whole recipe graph into memory
pub fn load_book(conn: &Connection, tenant: TenantId) -> Result<RecipeBook> {
    let mut book = RecipeBook::new();

    let mut stmt = conn.prepare(
        "SELECT id, name, purchase_unit, purchase_qty, purchase_price, recipe_unit, conversion_factor, yield_percent
         FROM ingredients
         WHERE tenant_id = ?1",
    )?;
    let rows = stmt.query_map([tenant], |row| {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            purchase_unit: row.get(2)?,
            purchase_qty: decimal_at(row, 3)?,
            purchase_price: decimal_at(row, 4)?,
            recipe_unit: row.get(5)?,
            conversion_factor: decimal_at(row, 6)?,
            yield_percent: decimal_at(row, 7)?,
        })
    })?;
    for row in rows {
        book.insert_ingredient(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT i.id, i.recipe_id, i.ingredient_id, i.sub_recipe_id, i.quantity, i.unit
         FROM recipe_items i
         JOIN recipes r ON r.id = i.recipe_id
         WHERE r.tenant_id = ?1
         ORDER BY i.recipe_id, i.sort_order, i.id",
    )?;
    let items: Vec<RecipeItem> = stmt
        .query_map([tenant], |row| {
            Ok(RecipeItem {
                id: row.get(0)?,
                recipe_id: row.get(1)?,
                source: ItemSource::from_columns(row.get(2)?, row.get(3)?),
                quantity: decimal_at(row, 4)?,
                unit: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, yield_qty, yield_unit, selling_price, target_cost_pct
         FROM recipes
         WHERE tenant_id = ?1",
    )?;
    let recipes: Vec<Recipe> = stmt
        .query_map([tenant], |row| {
            Ok(Recipe {
                id: row.get(0)?,
                name: row.get(1)?,
                yield_qty: decimal_at(row, 2)?,
                yield_unit: row.get(3)?,
                selling_price: opt_decimal_at(row, 4)?,
                target_cost_pct: decimal_at(row, 5)?,
                items: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut recipes: HashMap<RecipeId, Recipe> = recipes.into_iter().map(|r| (r.id, r)).collect();
    for item in items {
        if let Some(recipe) = recipes.get_mut(&item.recipe_id) {
            recipe.items.push(item);
        }
    }
    for recipe in recipes.into_values() {
        book.insert_recipe(recipe);
    }

    debug!(
        "Loaded {} ingredients and {} recipes for tenant {}",
        book.ingredient_count(),
        book.recipe_count(),
        tenant
    );
    Ok(book)
}

/// Persist a generated BOM snapshot, returning its id
pub fn save_bom(conn: &Connection, tenant: TenantId, bom: &Bom) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO boms (tenant_id, name, date, total_cost, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tenant, bom.name, bom.date, bom.total_cost.to_string(), bom.created_at],
    )?;
    let bom_id = tx.last_insert_rowid();

    for (position, recipe) in bom.recipes.iter().enumerate() {
        tx.execute(
            "INSERT INTO bom_requests (bom_id, position, recipe_id, recipe_name, portions)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                bom_id,
                position as i64,
                recipe.recipe_id,
                recipe.recipe_name,
                recipe.portions.to_string()
            ],
        )?;
    }

    for (position, line) in bom.lines.iter().enumerate() {
        tx.execute(
            "INSERT INTO bom_lines (bom_id, position, ingredient_id, ingredient_name, total_qty, unit,
                                    unit_cost, line_cost, unit_mismatch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                bom_id,
                position as i64,
                line.ingredient_id,
                line.ingredient_name,
                line.total_qty.to_string(),
                line.unit,
                line.unit_cost.map(|c| c.to_string()),
                line.line_cost.map(|c| c.to_string()),
                line.unit_mismatch,
            ],
        )?;
    }

    tx.commit()?;
    debug!("Saved BOM {} ({} lines)", bom_id, bom.lines.len());
    Ok(bom_id)
}

/// Fetch a stored BOM snapshot
pub fn get_bom(conn: &Connection, tenant: TenantId, bom_id: i64) -> Result<Option<Bom>> {
    let header = conn
        .query_row(
            "SELECT name, date, total_cost, created_at FROM boms WHERE id = ?1 AND tenant_id = ?2",
            params![bom_id, tenant],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, NaiveDate>(1)?,
                    decimal_at(row, 2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((name, date, total_cost, created_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT recipe_id, recipe_name, portions FROM bom_requests WHERE bom_id = ?1 ORDER BY position",
    )?;
    let recipes = stmt
        .query_map([bom_id], |row| {
            Ok(BomRecipe {
                recipe_id: row.get(0)?,
                recipe_name: row.get(1)?,
                portions: decimal_at(row, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT ingredient_id, ingredient_name, total_qty, unit, unit_cost, line_cost, unit_mismatch
         FROM bom_lines
         WHERE bom_id = ?1
         ORDER BY position",
    )?;
    let lines = stmt
        .query_map([bom_id], |row| {
            Ok(BomLine {
                ingredient_id: row.get(0)?,
                ingredient_name: row.get(1)?,
                total_qty: decimal_at(row, 2)?,
                unit: row.get(3)?,
                unit_cost: opt_decimal_at(row, 4)?,
                line_cost: opt_decimal_at(row, 5)?,
                unit_mismatch: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(Bom {
        id: Some(bom_id),
        name,
        date,
        total_cost,
        created_at,
        recipes,
        lines,
    }))
}

/// One row of the BOM listing
#[derive(Debug, Clone)]
pub struct BomSummary {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub total_cost: Decimal,
    pub recipe_count: usize,
    pub ingredient_count: usize,
}

/// List a tenant's BOMs, newest target date first
pub fn list_boms(conn: &Connection, tenant: TenantId) -> Result<Vec<BomSummary>> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.name, b.date, b.total_cost,
                (SELECT COUNT(*) FROM bom_requests r WHERE r.bom_id = b.id),
                (SELECT COUNT(*) FROM bom_lines l WHERE l.bom_id = b.id)
         FROM boms b
         WHERE b.tenant_id = ?1
         ORDER BY b.date DESC, b.id DESC",
    )?;

    let rows = stmt.query_map([tenant], |row| {
        Ok(BomSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            date: row.get(2)?,
            total_cost: decimal_at(row, 3)?,
            recipe_count: row.get::<_, i64>(4)? as usize,
            ingredient_count: row.get::<_, i64>(5)? as usize,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Delete a BOM; returns false when it does not exist for this tenant
pub fn delete_bom(conn: &Connection, tenant: TenantId, bom_id: i64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM boms WHERE id = ?1 AND tenant_id = ?2",
        params![bom_id, tenant],
    )?;
    Ok(deleted > 0)
}
