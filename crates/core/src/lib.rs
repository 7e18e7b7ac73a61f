pub mod config;
pub mod controller;
pub mod edit_state;
pub mod events;
pub mod export;
pub mod history;
pub mod keyboard;
pub mod persistence;
pub mod range_cache;
pub mod row;
pub mod selection;
pub mod validation;
pub mod view_state;
pub mod virtualizer;
