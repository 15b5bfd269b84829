pub mod envelope;
pub mod member;

pub use envelope::*;
pub use member::*;
