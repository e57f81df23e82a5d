pub mod context;
pub mod engine;
pub mod error;
pub mod ids;
pub mod model;
pub mod time;
pub mod types;

pub use context::*;
pub use engine::*;
pub use error::*;
pub use ids::*;
pub use model::*;
pub use time::*;
pub use types::*;
