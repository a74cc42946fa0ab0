pub mod store;
pub mod value;

pub use store::{MaterialStore, StorageError, StoreMode, INFO_KEY};
pub use value::{
    unwrap_value, wrap_tensor, Column, ColumnData, Describe, StoredValue, Table, Tensor,
    NDARRAY_CLASS,
};
