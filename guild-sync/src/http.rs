use crate::membership::{Membership, MembershipCache};
use crate::store::KeyValueStore;
use crate::sync::SyncStatus;

use model::Snowflake;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use reply::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::reply;
use warp::Filter;

#[derive(Serialize, Debug)]
struct PingResponse {
    success: bool,
}

#[derive(Serialize, Debug)]
struct MembershipResponse {
    member: bool,
    snapshot: bool,
}

pub async fn listen<S: KeyValueStore>(
    server_addr: &str,
    cache: Arc<MembershipCache<S>>,
    status: Arc<RwLock<SyncStatus>>,
) -> crate::Result<()> {
    let addr = SocketAddr::from_str(server_addr)?;

    warp::serve(routes(cache, status)).run(addr).await;
    Ok(())
}

pub fn routes<S: KeyValueStore>(
    cache: Arc<MembershipCache<S>>,
    status: Arc<RwLock<SyncStatus>>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ping = warp::path("ping").and_then(ping);

    let cache = warp::any().map(move || Arc::clone(&cache));
    let status = warp::any().map(move || Arc::clone(&status));

    let is_member = warp::path("ismember")
        .and(cache.clone())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(is_member::<S>);

    let count = warp::path("count").and(cache).and_then(member_count::<S>);

    let sync_status = warp::path("status").and(status).and_then(sync_status);

    ping.or(is_member).or(count).or(sync_status)
}

async fn ping() -> Result<Json, warp::Rejection> {
    Ok(reply::json(&PingResponse { success: true }))
}

async fn is_member<S: KeyValueStore>(
    cache: Arc<MembershipCache<S>>,
    query: HashMap<String, String>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user_id = match query.get("id") {
        Some(id) => id,
        None => {
            return Ok(reply::with_status(
                reply::json(&json!({
                    "error": "User ID is missing"
                })),
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    let user_id = match Snowflake::from_str(user_id) {
        Ok(id) => id,
        Err(_) => {
            return Ok(reply::with_status(
                reply::json(&json!({
                    "error": "Invalid user ID"
                })),
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    let membership = match cache.is_member_of_guild(user_id).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, %user_id, "Failed to check guild membership");

            return Ok(reply::with_status(
                reply::json(&json!({
                    "error": "Unable to read member snapshot"
                })),
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
    };

    let response = MembershipResponse {
        member: membership.is_member(),
        snapshot: membership != Membership::SnapshotMissing,
    };

    Ok(reply::with_status(reply::json(&response), StatusCode::OK))
}

async fn member_count<S: KeyValueStore>(
    cache: Arc<MembershipCache<S>>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let count = match cache.snapshot().await {
        Ok(snapshot) => snapshot.map_or(0, |s| s.len()),
        Err(e) => {
            error!(error = %e, "Failed to read member snapshot");

            return Ok(reply::with_status(
                reply::json(&json!({
                    "error": "Unable to read member snapshot"
                })),
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
    };

    Ok(reply::with_status(
        reply::json(&json!({
            "count": count
        })),
        StatusCode::OK,
    ))
}

async fn sync_status(
    status: Arc<RwLock<SyncStatus>>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let status = *status.read();
    Ok(reply::json(&status))
}
