#[path = "store/persistence.rs"]
mod persistence;
