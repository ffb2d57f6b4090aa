pub mod draft;
pub mod requests;
pub mod responses;
pub mod value;

pub use draft::{Draft, DraftError, PendingUpload, StepId};
pub use requests::{DecisionKind, DecisionRequest, ListQuery};
pub use responses::{Record, RecordId, RecordPage};
pub use value::{Attachment, FieldMap, FieldValue, LocalId, RepeatableItem};
