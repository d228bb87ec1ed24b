pub mod adaptive;
pub mod traits;

pub use adaptive::AdaptivePolicy;
pub use traits::{DecisionInput, Strategy};
