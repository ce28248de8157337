use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub admission_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub tracked_buckets: usize,
    pub tracked_counters: usize,
    pub bucket_capacity: u32,
    pub refill_window_secs: u64,
    pub abuse_threshold: u64,
}

#[derive(Debug, Serialize)]
pub struct BucketView {
    pub tokens: u32,
    pub capacity: u32,
}

#[derive(Debug, Serialize)]
pub struct ActivityView {
    pub count: u64,
    pub window_age_secs: u64,
    pub suspected_abuse: bool,
}

#[derive(Debug, Serialize)]
pub struct IdentityDetail {
    pub identity: String,
    pub bucket: Option<BucketView>,
    pub activity: Option<ActivityView>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        admission_enabled: state.filter.is_enabled(),
    })
}

pub async fn get_identities(State(state): State<AdminState>) -> Json<IdentitySummary> {
    let buckets = state.filter.buckets();
    Json(IdentitySummary {
        tracked_buckets: buckets.tracked_identities(),
        tracked_counters: state.filter.activity().tracked_identities(),
        bucket_capacity: buckets.capacity(),
        refill_window_secs: buckets.refill_window().as_secs(),
        abuse_threshold: state.filter.activity().threshold(),
    })
}

pub async fn get_identity(
    State(state): State<AdminState>,
    Path(identity): Path<String>,
) -> Result<Json<IdentityDetail>, StatusCode> {
    let activity = state.filter.activity();
    let bucket = state.filter.buckets().snapshot(&identity).map(|b| BucketView {
        tokens: b.tokens,
        capacity: b.capacity,
    });
    let counter = activity.snapshot(&identity).map(|a| ActivityView {
        count: a.count,
        window_age_secs: a.window_age.as_secs(),
        suspected_abuse: a.count > activity.threshold(),
    });

    if bucket.is_none() && counter.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(IdentityDetail {
        identity,
        bucket,
        activity: counter,
    }))
}
