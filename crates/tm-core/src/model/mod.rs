pub mod dest;
pub mod message;
pub mod source;
pub mod state;

pub use dest::{Block, DestPage, PageKind, PagePayload, PersonRecord, PropertyValue};
pub use message::{SyncAction, SyncMessage};
pub use source::{
    SourceComment, SourceDue, SourceItem, SourceItemBundle, SourceProject, SourceSection,
};
pub use state::{ProjectSyncState, SyncSource, SyncStatus, TaskSyncState};
