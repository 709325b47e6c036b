//! pwat-core: types and configuration shared by the attachment container crates

pub mod config;
pub mod error;
pub mod types;

pub use config::{PwatConfig, MIN_HASH_ITERATIONS};
pub use error::{PwatError, PwatResult};
pub use types::{
    flags, uiflags, AttachmentRecord, AttachmentRecordEx, ContainerHeader, EntryInfo,
    EntryLookup, FormatVersion, Progress, ProgressEvent, ProgressFunction, ProgressReply,
    SecretBytes, Silent, SHA1_LEN,
};
