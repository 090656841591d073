use serde::Serialize;

use crate::types::{ImageId, TagId};

/// Change notifications published on the [`crate::bus::Bus`].
///
/// Events carry ids, not entities; subscribers read the current snapshot
/// from the owning component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncEvent {
    QueryChanged(QueryChangedPayload),
    ResultsReplaced(ResultsReplacedPayload),
    ImageUpdated(ImageUpdatedPayload),
    CurrentImageChanged(CurrentImageChangedPayload),
    TagsLoaded(TagsLoadedPayload),
    ServiceStatus(ServiceStatusPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryChangedPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultsReplacedPayload {
    pub query_text: String,
    pub version: u64,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUpdatedPayload {
    pub image_id: ImageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentImageChangedPayload {
    pub image_id: Option<ImageId>,
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagsLoadedPayload {
    pub tag_count: usize,
    pub created: Option<TagId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusPayload {
    pub down: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub status: Option<u16>,
}
