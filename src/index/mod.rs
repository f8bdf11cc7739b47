mod btree_index;
mod btree_iterator;
mod btree_page;
mod index_header;
mod key_comparator;

pub use btree_index::*;
pub use btree_iterator::*;
pub use btree_page::*;
pub use index_header::*;
pub use key_comparator::*;
