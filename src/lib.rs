//! Recipe costing and bill-of-materials calculator
//!
//! Costs ingredients under unit conversion and yield loss, rolls recipe
//! costs up through nested sub-recipes, and merges the ingredient needs of
//! several scaled recipes into one bill of materials.

pub mod bom;
pub mod calculator;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod units;

pub use error::{CostError, UnitError};
