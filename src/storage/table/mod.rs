pub mod heap;
pub mod tuple;

pub use heap::{TableHeap, TableIterator, TableError};
pub use tuple::{Tuple, Value, TupleError};
