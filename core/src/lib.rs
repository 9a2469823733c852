pub mod ast;
pub mod token;
pub mod util;
