#[cfg(feature = "auto_migration")]
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use dotenvy::dotenv;
use lazy_static::lazy_static;
use mime::Mime;
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use url::Url;
use uuid::Uuid;
use warp::Filter;

use crate::{
    data::{S3ObjectStore, s3utils::BucketLocation},
    media::{FfmpegFastStart, FfprobeProber},
    store::PgVideoStore,
    util::OptFmt,
    video::UploadPipeline,
};

mod auth;
mod data;
mod error;
mod media;
mod model;
mod schema;
mod store;
#[cfg(test)]
mod testing;
mod util;
mod video;

lazy_static! {
    pub static ref DATABASE_URL: String = std::env::var("DATABASE_URL")
        .expect("Missing environment variable DATABASE_URL must be set to connect to postgres");
    pub static ref MAX_DB_CONNECTIONS: usize = std::env::var("MAX_DB_CONNECTIONS")
        .unwrap_or_else(|_| String::from("25"))
        .parse::<usize>()
        .expect("MAX_DB_CONNECTIONS is not a valid usize");
    pub static ref JWT_SECRET: Arc<str> = {
        let secret = std::env::var("JWT_SECRET")
            .expect("Missing environment variable JWT_SECRET must be set to verify JWT tokens.");
        if secret.is_empty() {
            panic!("JWT_SECRET must not be empty");
        }
        Arc::from(secret)
    };
    pub static ref PORT: u16 = {
        let port_str =
            std::env::var("API_PORT").expect("Missing environment variable API_PORT must be set.");
        u16::from_str(&port_str).expect("API_PORT var is not a valid u16 value")
    };
    pub static ref CERT_PATH: Option<String> = std::env::var("CERT_PATH").ok();
    pub static ref KEY_PATH: Option<String> = std::env::var("KEY_PATH").ok();
    pub static ref ASSETS_ROOT: PathBuf = std::env::var("ASSETS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("videobroker"));
    pub static ref S3_BUCKET: String = std::env::var("S3_BUCKET")
        .expect("Missing environment variable S3_BUCKET must be set.");
    pub static ref S3_LOCATION: BucketLocation = match std::env::var("S3_ENDPOINT") {
        Ok(endpoint) => {
            let endpoint = Url::parse(&endpoint).expect("S3_ENDPOINT is not a valid url");
            if endpoint.cannot_be_a_base() {
                panic!("S3_ENDPOINT '{endpoint}' cannot be used as a base url");
            }
            BucketLocation::Custom { endpoint }
        }
        Err(_) => BucketLocation::Aws {
            region: std::env::var("S3_REGION").unwrap_or_else(|_| String::from("us-east-1")),
        },
    };
    pub static ref S3_ACCESS_KEY: String = std::env::var("S3_ACCESS_KEY")
        .expect("Missing environment variable S3_ACCESS_KEY must be set.");
    pub static ref S3_SECRET_KEY: String = std::env::var("S3_SECRET_KEY")
        .expect("Missing environment variable S3_SECRET_KEY must be set.");
    pub static ref FFMPEG_PATH: String =
        std::env::var("FFMPEG_PATH").unwrap_or_else(|_| String::from("ffmpeg"));
    pub static ref FFPROBE_PATH: String =
        std::env::var("FFPROBE_PATH").unwrap_or_else(|_| String::from("ffprobe"));
    pub static ref PROBE_TIMEOUT: Duration = Duration::from_secs(
        std::env::var("PROBE_TIMEOUT_SECS")
            .map(|v| v
                .parse::<u64>()
                .expect("PROBE_TIMEOUT_SECS is not a valid u64"))
            .unwrap_or(30)
    );
    pub static ref TRANSCODE_TIMEOUT: Duration = Duration::from_secs(
        std::env::var("TRANSCODE_TIMEOUT_SECS")
            .map(|v| v
                .parse::<u64>()
                .expect("TRANSCODE_TIMEOUT_SECS is not a valid u64"))
            .unwrap_or(600)
    );
    pub static ref CONCURRENT_VIDEO_TRANSCODE_LIMIT: usize =
        std::env::var("CONCURRENT_VIDEO_TRANSCODE_LIMIT")
            .map(|v| v
                .parse::<usize>()
                .expect("CONCURRENT_VIDEO_TRANSCODE_LIMIT is not a valid usize"))
            .unwrap_or_else(|_| std::cmp::max(1, std::cmp::min(8, num_cpus::get() / 2)));
}

#[cfg(feature = "auto_migration")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn main() {
    dotenv().ok();

    // initialise certain lazy statics on startup
    lazy_static::initialize(&DATABASE_URL);
    lazy_static::initialize(&MAX_DB_CONNECTIONS);
    lazy_static::initialize(&JWT_SECRET);
    lazy_static::initialize(&PORT);
    lazy_static::initialize(&ASSETS_ROOT);
    lazy_static::initialize(&S3_BUCKET);
    lazy_static::initialize(&S3_LOCATION);
    lazy_static::initialize(&S3_ACCESS_KEY);
    lazy_static::initialize(&S3_SECRET_KEY);
    lazy_static::initialize(&PROBE_TIMEOUT);
    lazy_static::initialize(&TRANSCODE_TIMEOUT);
    lazy_static::initialize(&CONCURRENT_VIDEO_TRANSCODE_LIMIT);

    setup_logger();

    #[cfg(feature = "auto_migration")]
    {
        use diesel::Connection;

        log::info!("Running diesel migrations");
        let mut connection = diesel::PgConnection::establish(&DATABASE_URL)
            .expect("Failed to establish database connection");
        if let Err(e) = connection.run_pending_migrations(MIGRATIONS) {
            panic!("Failed running db migrations: {}", e);
        }
        log::info!("Done running diesel migrations");
    }

    std::fs::create_dir_all(&*ASSETS_ROOT).unwrap_or_else(|e| {
        panic!(
            "Failed to create assets root {}: {e}",
            ASSETS_ROOT.display()
        )
    });

    setup_tokio_runtime();
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime() {
    let videos = Arc::new(
        PgVideoStore::new(&DATABASE_URL, *MAX_DB_CONNECTIONS)
            .expect("Failed to initialise connection pool"),
    );
    let objects = Arc::new(
        S3ObjectStore::new(
            &S3_BUCKET,
            S3_LOCATION.clone(),
            &S3_ACCESS_KEY,
            &S3_SECRET_KEY,
        )
        .expect("Failed to set up object storage"),
    );
    log::info!(
        "Using scratch dir {} with {} concurrent transcodes",
        ASSETS_ROOT.display(),
        *CONCURRENT_VIDEO_TRANSCODE_LIMIT
    );
    let pipeline = Arc::new(UploadPipeline::new(
        ASSETS_ROOT.clone(),
        videos.clone(),
        objects,
        Arc::new(FfprobeProber::new(FFPROBE_PATH.as_str(), *PROBE_TIMEOUT)),
        Arc::new(FfmpegFastStart::new(FFMPEG_PATH.as_str(), *TRANSCODE_TIMEOUT)),
        *CONCURRENT_VIDEO_TRANSCODE_LIMIT,
    ));

    let filter = api_routes(pipeline, JWT_SECRET.clone()).with(warp::log::custom(|info| {
        let log_level = if info.elapsed().as_secs() >= 10 && !info.path().ends_with("/upload") {
            log::Level::Warn
        } else if info.elapsed().as_millis() >= 250 {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        log::log!(
            target: "videobroker::api",
            log_level,
            "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
            OptFmt(info.remote_addr()),
            info.method(),
            info.path(),
            info.version(),
            info.status().as_u16(),
            OptFmt(info.referer()),
            OptFmt(info.user_agent()),
            info.elapsed(),
        );
    }));

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("Received shutdown signal, no longer accepting requests");
    };

    match (CERT_PATH.as_ref(), KEY_PATH.as_ref()) {
        (Some(cert_path), Some(key_path)) => {
            let (addr, server) = warp::serve(filter)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(([0, 0, 0, 0], *PORT), shutdown_signal);
            log::info!("Listening on https://{addr}");
            server.await;
        }
        _ => {
            let (addr, server) = warp::serve(filter)
                .bind_with_graceful_shutdown(([0, 0, 0, 0], *PORT), shutdown_signal);
            log::info!("Listening on http://{addr}");
            server.await;
        }
    }

    videos.close();
    log::info!("Closed database connection pool");
}

fn api_routes(
    pipeline: Arc<UploadPipeline>,
    jwt_secret: Arc<str>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let upload_video_route = warp::path!("videos" / Uuid / "upload")
        .and(warp::post())
        .and(auth::with_user(jwt_secret.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and(video::with_pipeline(pipeline.clone()))
        .and_then(video::upload_video_handler);

    let upload_thumbnail_route = warp::path!("videos" / Uuid / "thumbnail")
        .and(warp::post())
        .and(auth::with_user(jwt_secret.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and(video::with_pipeline(pipeline.clone()))
        .and_then(video::upload_thumbnail_handler);

    let get_video_route = warp::path!("videos" / Uuid)
        .and(warp::get())
        // any logged in user may read a video
        .and(auth::with_user(jwt_secret).map(|_: Uuid| ()).untuple_one())
        .and(video::with_pipeline(pipeline))
        .and_then(video::get_video_handler);

    upload_video_route
        .or(upload_thumbnail_route)
        .or(get_video_route)
        .recover(error::handle_rejection)
}

fn setup_logger() {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs").expect("Failed to create logs/ directory");
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("videobroker", logging_level)
        .level_for("videobroker_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()
        .expect("Failed to set up logging");
}
