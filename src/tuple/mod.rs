mod data_type;
mod schema;
mod value;

pub use data_type::*;
pub use schema::*;
pub use value::*;
