pub mod core;
pub mod ranked_store;
