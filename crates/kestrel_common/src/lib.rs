pub mod config;
pub mod datum;
pub mod error;
pub mod hint;
pub mod request_context;
pub mod select_context;
pub mod sharding_value;
pub mod statement;
