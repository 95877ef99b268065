pub mod bank;
pub mod errors;
pub mod ids;
pub mod matcher;
pub mod similarity;

pub use bank::{QaPair, QuestionBank};
pub use errors::BankError;
pub use matcher::{Matcher, MatcherConfig, Resolution};
