//! Diesel schema for job queue persistence.

diesel::table! {
    /// Queued jobs and their lifecycle state.
    job_queue (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Task type used for filtered claims.
        #[max_length = 255]
        task_name -> Varchar,
        /// Serialized JSON payload.
        payload -> Text,
        /// Lifecycle status.
        #[max_length = 20]
        status -> Varchar,
        /// Ordering key; lower is claimed first.
        priority -> Int4,
        /// Recorded failures.
        attempts -> Int4,
        /// Retry ceiling; zero is unlimited.
        max_attempts -> Int4,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last status-affecting mutation.
        updated_at -> Timestamptz,
        /// Earliest claim time.
        scheduled_at -> Timestamptz,
        /// Current lock owner.
        #[max_length = 255]
        worker_id -> Nullable<Varchar>,
        /// Last fatal error text.
        error_message -> Nullable<Text>,
        /// Whether a worker owns the job.
        locked -> Bool,
        /// Whether the job may ever be claimed again.
        is_active -> Bool,
    }
}
