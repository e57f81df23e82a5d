pub mod changes;
pub mod memory;
pub mod traits;

pub use changes::*;
pub use memory::*;
pub use traits::*;
