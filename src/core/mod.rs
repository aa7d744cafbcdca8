// Checkout domain: state machine, models and shared errors
pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod validation {
    pub use crate::validation::*;
}

pub mod errors {
    pub use crate::errors::*;
}
