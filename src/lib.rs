pub mod api;
pub mod classifier;
pub mod database_sqlx;
pub mod error;
pub mod models;
pub mod revalidator;
pub mod scheduler;
pub mod session;
pub mod validator;

pub use api::{QuoteProvider, YahooClient};
pub use database_sqlx::{SqliteTickerStore, TickerStore};
pub use revalidator::RevalidationEngine;
