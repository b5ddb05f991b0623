diesel::table! {
    video (id) {
        id -> Uuid,
        owner_id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        thumbnail_url -> Nullable<Varchar>,
        video_url -> Nullable<Varchar>,
        creation_timestamp -> Timestamptz,
        update_timestamp -> Timestamptz,
    }
}
