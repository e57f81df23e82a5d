pub mod config;
pub mod factory;
pub mod ledger;
pub mod repository;

pub use config::*;
pub use factory::*;
pub use ledger::*;
pub use repository::*;
