//! External service integrations.

pub mod sdk_client {
    pub use crate::sdk_client::*;
}

pub mod tokenizer {
    pub use crate::tokenizer::*;
}

pub mod detector {
    pub use crate::detector::*;
}

pub mod submitter {
    pub use crate::submitter::*;
}
