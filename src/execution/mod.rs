mod scan;
mod table;

pub use scan::*;
pub use table::*;
