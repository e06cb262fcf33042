pub mod compiler;
pub mod config;
pub mod constants;
pub mod parser;
pub mod runtime;

pub use self::{compiler::compile, parser::parse};
