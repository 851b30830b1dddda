pub mod coerce;
pub mod error;
pub mod query;
pub mod traits;
pub mod types;

pub use error::*;
pub use query::*;
pub use traits::*;
pub use types::*;
