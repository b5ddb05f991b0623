use chrono::{DateTime, offset::Utc};
use diesel::{Identifiable, Queryable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::video;

/// Metadata of an uploaded video. The asset URLs point to the object store and are only ever
/// changed by the owner of the video.
#[derive(Identifiable, Queryable, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[diesel(table_name = video)]
#[diesel(primary_key(id))]
pub struct VideoRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    pub update_timestamp: DateTime<Utc>,
}

impl VideoRecord {
    #[inline]
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}
