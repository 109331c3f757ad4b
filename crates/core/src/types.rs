/// All user primary keys are UUIDs, assigned at creation and immutable.
pub type UserId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
