mod file_header;
mod table_heap;
mod table_scan;

pub use file_header::*;
pub use table_heap::*;
pub use table_scan::*;
