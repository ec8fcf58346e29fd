pub mod error;
pub mod header;
pub mod iterator;
pub mod key;
pub mod node;
pub mod tree;

pub use error::BTreeError;
pub use iterator::BTreeIterator;
pub use key::{GenericKey, I64Key, IndexKey};
pub use tree::BPlusTree;
