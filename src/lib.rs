// ============================================================================
// Pipeline Canvas client-state library
// ============================================================================

//! Client-side state for the pipeline canvas admin UI.
//!
//! Linkage rows tie a primary subject (enterprise), a secondary subject
//! (product) and a set of tags (services) together. The UI edits them
//! optimistically; this crate keeps the local table consistent, folds rows
//! that converge on the same key into one, and saves in the background after
//! a quiet period.
//!
//! # Examples
//!
//! ```no_run
//! use pipeline_canvas::{CanvasConfig, CanvasSession, RowEdit};
//!
//! # async fn demo() -> pipeline_canvas::Result<()> {
//! let session = CanvasSession::connect(CanvasConfig::from_env()?)?;
//! session.load().await?;
//!
//! let row = session.add_temporary_row().await;
//! session.edit_field(&row, RowEdit::PrimarySubject("Acme".into())).await?;
//! session.edit_field(&row, RowEdit::SecondarySubject("Billing".into())).await?;
//! session.edit_field(&row, RowEdit::AddTag("API".into())).await?;
//!
//! // saved automatically ten seconds after the last edit, or right away:
//! let report = session.manual_save_all().await?;
//! println!("saved {} row(s)", report.saved());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod entity_store;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod table;
pub mod validation;

pub use config::CanvasConfig;
pub use crate::core::{
    CanvasError, Entity, EntityKind, LinkageRow, OrderedRow, Result, RowEdit, RowId, TagRef,
};
pub use entity_store::{EntityStore, ResolvedRefs};
pub use remote::{
    EntityRef, HttpRemote, InMemoryRemote, LinkageFilter, LinkagePayload, LinkageRecord,
    RemoteCollaborator, RemoteOp,
};
pub use scheduler::{AutoSaveScheduler, AutoSaveState};
pub use session::{
    CanvasSession, EditOutcome, FlushReport, FlushTrigger, LeaveCheck, Notification,
    NotificationLevel, SaveFailure,
};
pub use table::RecordTable;
pub use validation::{IncompleteRow, RequiredField};
