// Core modules: value model, encoders, literal grammar, planning, and error modeling.
pub mod backend;
pub mod cursor;
pub mod encode;
pub mod error;
pub mod literal;
pub mod plan;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;
