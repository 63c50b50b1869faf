//! Kitchen BOM
//!
//! Recipe costing and bill-of-materials calculator for food-service kitchens.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use kitchen_bom::config::Settings;
use kitchen_bom::models::{BomRequest, RecipeId};
use kitchen_bom::{bom, calculator, db, import, units};

#[derive(Parser)]
#[command(name = "kitchen-bom")]
#[command(about = "Recipe costing and bill-of-materials calculator")]
struct Cli {
    /// Path to a TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database
    #[arg(short, long, env = "KITCHEN_BOM_DATABASE")]
    database: Option<PathBuf>,

    /// Tenant to operate on
    #[arg(short, long, env = "KITCHEN_BOM_TENANT")]
    tenant: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Replace the tenant's data with a sample kitchen
    LoadSample,

    /// Import ingredients and recipes from a TOML file
    Import {
        /// TOML file with [[ingredients]] and [[recipes]] tables
        file: PathBuf,
    },

    /// Convert a quantity between units
    Convert {
        value: Decimal,
        from: String,
        to: String,

        /// Density in g/ml, needed between weight and volume
        #[arg(long)]
        density: Option<Decimal>,
    },

    /// Show the cost breakdown of a recipe
    Cost {
        recipe_id: RecipeId,

        /// Selling price to use instead of the recipe's own
        #[arg(short, long)]
        price: Option<Decimal>,
    },

    /// Scale a recipe to a number of portions
    Scale { recipe_id: RecipeId, portions: Decimal },

    /// List all recipes
    ListRecipes,

    /// Generate and store a bill of materials
    Bom {
        /// BOM name
        #[arg(short, long)]
        name: String,

        /// Target production date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Recipe and portion count, as RECIPE_ID=PORTIONS (repeatable)
        #[arg(short, long = "recipe", value_parser = parse_request, required = true)]
        recipes: Vec<BomRequest>,
    },

    /// List stored bills of materials
    ListBoms,

    /// Show a stored bill of materials
    ShowBom { id: i64 },

    /// Delete a stored bill of materials
    DeleteBom { id: i64 },
}

fn parse_request(s: &str) -> Result<BomRequest> {
    let Some((id, portions)) = s.split_once('=') else {
        bail!("expected RECIPE_ID=PORTIONS, got '{}'", s);
    };
    let recipe_id = id.trim().parse().with_context(|| format!("invalid recipe id '{}'", id))?;
    let portions: Decimal = portions
        .trim()
        .parse()
        .with_context(|| format!("invalid portion count '{}'", portions))?;
    if portions <= Decimal::ZERO {
        bail!("portions must be positive, got {}", portions);
    }
    Ok(BomRequest { recipe_id, portions })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        settings.database = database;
    }
    if let Some(tenant) = cli.tenant {
        settings.tenant = tenant;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let tenant = settings.tenant;
    let dp = settings.display_scale as usize;

    let open = || -> Result<Connection> {
        let conn = Connection::open(&settings.database)
            .with_context(|| format!("Failed to open {}", settings.database.display()))?;
        db::init_schema(&conn)?;
        Ok(conn)
    };

    match cli.command {
        Commands::Init => {
            open()?;
            println!("Database initialized at: {}", settings.database.display());
        }

        Commands::LoadSample => {
            let stats = import::load_sample(&open()?, tenant)?;
            println!("{}", stats);
        }

        Commands::Import { file } => {
            let stats = import::import_file(&open()?, tenant, &file)?;
            println!("{}", stats);
        }

        Commands::Convert { value, from, to, density } => {
            let converted = units::convert(value, &from, &to, density)?;
            println!("{} {} = {} {}", value, from, converted.normalize(), to);
        }

        Commands::Cost { recipe_id, price } => {
            let book = db::load_book(&open()?, tenant)?;
            let recipe = book.recipe(recipe_id)?;
            let breakdown = calculator::cost_breakdown(&book, recipe, price)?;
            print!("{:.*}", dp, breakdown);
        }

        Commands::Scale { recipe_id, portions } => {
            let book = db::load_book(&open()?, tenant)?;
            let recipe = book.recipe(recipe_id)?;
            let scaled = calculator::scale_recipe(&book, recipe, portions)?;
            print!("{:.*}", dp, scaled);
        }

        Commands::ListRecipes => {
            let book = db::load_book(&open()?, tenant)?;
            let recipes = book.recipes();
            if recipes.is_empty() {
                println!("No recipes in database. Run 'import' or 'load-sample' first.");
            } else {
                println!("{:>5} {:<30} {:>10} {:<10} {:>8}", "ID", "Recipe", "Yield", "Unit", "Items");
                println!("{}", "-".repeat(67));
                for r in recipes {
                    println!(
                        "{:>5} {:<30} {:>10} {:<10} {:>8}",
                        r.id,
                        r.name,
                        r.yield_qty.normalize(),
                        r.yield_unit,
                        r.items.len()
                    );
                }
            }
        }

        Commands::Bom { name, date, recipes } => {
            let conn = open()?;
            let book = db::load_book(&conn, tenant)?;
            let mut generated = bom::generate(&book, &name, date, recipes)?;
            let id = db::save_bom(&conn, tenant, &generated)?;
            generated.id = Some(id);
            info!("Stored BOM {} with total cost {}", id, generated.total_cost);
            print!("{:.*}", dp, generated);
        }

        Commands::ListBoms => {
            let boms = db::list_boms(&open()?, tenant)?;
            if boms.is_empty() {
                println!("No bills of materials stored.");
            } else {
                println!(
                    "{:>5} {:<30} {:<10} {:>12} {:>8} {:>12}",
                    "ID", "Name", "Date", "Total", "Recipes", "Ingredients"
                );
                println!("{}", "-".repeat(82));
                for b in boms {
                    println!(
                        "{:>5} {:<30} {:<10} {:>12} {:>8} {:>12}",
                        b.id,
                        b.name,
                        b.date,
                        b.total_cost.round_dp(settings.display_scale),
                        b.recipe_count,
                        b.ingredient_count
                    );
                }
            }
        }

        Commands::ShowBom { id } => match db::get_bom(&open()?, tenant, id)? {
            Some(stored) => print!("{:.*}", dp, stored),
            None => println!("BOM '{}' not found", id),
        },

        Commands::DeleteBom { id } => {
            if db::delete_bom(&open()?, tenant, id)? {
                println!("Deleted BOM {}", id);
            } else {
                println!("BOM '{}' not found", id);
            }
        }
    }

    Ok(())
}
