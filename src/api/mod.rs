// 11.0: http boundary (warp). holder identity comes from the `x-holder-id`
// header set by the upstream auth layer; this layer never authenticates.
//
//   POST  /positions/open
//   PATCH /positions/close
//   PATCH /positions/revalue
//   GET   /positions?status=&limit=&offset=

mod dto;
mod error;
mod handlers;

pub use dto::{
    AutoClosed, BalanceView, CloseBody, CloseResponse, Envelope, ListQuery, ListResponse, OpenBody, OpenResponse,
    RevalueBody, RevalueResponse,
};
pub use error::{recover, ApiError, ErrorBody, MissingHolder};

use crate::engine::Engine;
use crate::types::HolderId;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::time::Duration;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub engine: Engine,
    pub timeout: Duration,
}

impl ApiContext {
    pub fn new(engine: Engine, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

pub fn routes(ctx: ApiContext) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let open = warp::path!("positions" / "open")
        .and(warp::post())
        .and(with_holder())
        .and(warp::header::optional::<String>("idempotency-key"))
        .and(json_body::<OpenBody>())
        .and(with_context(ctx.clone()))
        .and_then(handlers::open);

    let close = warp::path!("positions" / "close")
        .and(warp::patch())
        .and(with_holder())
        .and(json_body::<CloseBody>())
        .and(with_context(ctx.clone()))
        .and_then(handlers::close);

    let revalue = warp::path!("positions" / "revalue")
        .and(warp::patch())
        .and(with_holder())
        .and(json_body::<RevalueBody>())
        .and(with_context(ctx.clone()))
        .and_then(handlers::revalue);

    let list = warp::path!("positions")
        .and(warp::get())
        .and(with_holder())
        .and(warp::query::<ListQuery>())
        .and(with_context(ctx))
        .and_then(handlers::list);

    open.or(close)
        .or(revalue)
        .or(list)
        .recover(recover)
        .with(warp::trace::request())
}

fn with_context(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn with_holder() -> impl Filter<Extract = (HolderId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-holder-id").and_then(|raw: Option<String>| async move {
        raw.and_then(|v| v.trim().parse::<u64>().ok())
            .map(HolderId)
            .ok_or_else(|| warp::reject::custom(MissingHolder))
    })
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}
