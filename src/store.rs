use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use uuid::Uuid;

use crate::{error::Error, model::VideoRecord, schema::video};

/// Persistence of video records. Implementations handle their own synchronisation, callers
/// never lock around them.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, Error>;

    /// Writes the mutable fields of the record (asset URLs and update timestamp).
    async fn update_video(&self, video: &VideoRecord) -> Result<(), Error>;
}

pub type DbConnection = Object<AsyncPgConnection>;

pub struct PgVideoStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgVideoStore {
    pub fn new(database_url: &str, max_connections: usize) -> Result<Self, Error> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| {
                log::error!("Failed to build connection pool: {e}");
                Error::DatabaseConnectionError
            })?;

        Ok(Self { pool })
    }

    async fn acquire_db_connection(&self) -> Result<DbConnection, Error> {
        self.pool.get().await.map_err(|e| {
            log::error!("Failed to acquire database connection: {e}");
            Error::DatabaseConnectionError
        })
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, Error> {
        let mut connection = self.acquire_db_connection().await?;
        video::table
            .filter(video::id.eq(id))
            .get_result::<VideoRecord>(&mut connection)
            .await
            .optional()
            .map_err(Error::from)
    }

    async fn update_video(&self, record: &VideoRecord) -> Result<(), Error> {
        let mut connection = self.acquire_db_connection().await?;
        let updated_rows = diesel::update(video::table)
            .filter(video::id.eq(record.id))
            .set((
                video::video_url.eq(&record.video_url),
                video::thumbnail_url.eq(&record.thumbnail_url),
                video::update_timestamp.eq(record.update_timestamp),
            ))
            .execute(&mut connection)
            .await?;

        if updated_rows == 0 {
            return Err(Error::VideoNotFoundError(record.id));
        }

        Ok(())
    }
}
