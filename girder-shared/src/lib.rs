pub mod ids;
pub mod money;

pub use ids::{DocumentKind, PeriodKey};
