//! pwat-container: encrypted attachment container, record store and file manager

pub mod container;
pub mod envelope;
pub mod extract;
pub mod field;
pub mod format;
pub mod header;
pub mod import;
pub mod manager;
pub mod naming;
pub mod record;
pub mod store;
pub mod v3;

pub use container::{Container, ContainerFile, ContainerVersion};
pub use envelope::check_passphrase;
pub use extract::ExtractSession;
pub use import::{ImportReport, ImportedAttachment, SkipReason, SkippedImport};
pub use manager::{AttachmentFileManager, ReadSummary, WriteOutcome};
pub use naming::{ContainerPaths, InstallOutcome};
pub use record::{DataChunk, RecordPhase};
pub use store::{AttachmentFilter, AttachmentStore};
