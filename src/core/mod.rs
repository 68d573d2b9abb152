pub mod error;
pub mod types;

pub use error::{CanvasError, Result};
pub use types::{
    Entity, EntityKind, LinkageRow, OrderedRow, RowEdit, RowId, TEMP_ID_PREFIX, TagRef,
};
