pub mod database;
pub mod fitness; // Fitness platform sync (stub)

pub use database::{Database, FoodLogStore};
pub use fitness::FitnessSync;
