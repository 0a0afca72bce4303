//! Route handlers. Each one parses, hands a closure to the blocking pool
//! under the request timeout, and shapes the reply.

use super::dto::{
    BalanceView, CloseBody, CloseResponse, Envelope, ListQuery, ListResponse, OpenBody, OpenResponse, RevalueBody,
    RevalueResponse,
};
use super::error::ApiError;
use super::ApiContext;
use crate::engine::{CloseRequest, Engine, EngineError, OpenRequest};
use crate::ledger::Page;
use crate::position::PositionStatus;
use crate::types::{Direction, HolderId, Instrument};
use serde::Serialize;
use warp::reply::Response;
use warp::{Rejection, Reply};

/// Runs one engine call on the blocking pool. A call that outlives the timeout
/// answers `Timeout`; it may still complete, so callers reconcile through `list`.
async fn run<T, F>(ctx: &ApiContext, call: F) -> Result<T, EngineError>
where
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    let engine = ctx.engine.clone();
    let task = tokio::task::spawn_blocking(move || call(&engine));
    match tokio::time::timeout(ctx.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(EngineError::Unexpected(format!("engine task failed: {join}"))),
        Err(_) => Err(EngineError::Timeout),
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    warp::reply::json(&Envelope::ok(data)).into_response()
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Result<Response, Rejection> {
    Ok(match result {
        Ok(data) => ok(data),
        Err(err) => err.into_response(),
    })
}

pub async fn open(
    holder: HolderId,
    header_key: Option<String>,
    body: OpenBody,
    ctx: ApiContext,
) -> Result<Response, Rejection> {
    // header wins over body
    let idempotency_key = header_key
        .or(body.idempotency_key)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    let request = OpenRequest {
        holder,
        instrument: Instrument::new(body.instrument, body.asset_class),
        direction: Direction::parse(&body.direction),
        investment: body.investment,
        multiplier: body.multiplier,
        market_price: body.market_price,
        stop_loss: body.stop_loss,
        take_profit: body.take_profit,
        idempotency_key,
    };

    let result = run(&ctx, move |engine| engine.open(request))
        .await
        .map(|outcome| OpenResponse {
            balance: BalanceView::from(&outcome.balance),
            position: outcome.position,
            duplicate: outcome.duplicate,
        })
        .map_err(ApiError::from);
    respond(result)
}

pub async fn close(holder: HolderId, body: CloseBody, ctx: ApiContext) -> Result<Response, Rejection> {
    let request = CloseRequest {
        holder,
        position_id: body.position_id,
        exit_price: body.exit_price,
        reason: body.reason,
    };
    let result = run(&ctx, move |engine| engine.close(request))
        .await
        .map(CloseResponse::from)
        .map_err(ApiError::from);
    respond(result)
}

pub async fn list(holder: HolderId, query: ListQuery, ctx: ApiContext) -> Result<Response, Rejection> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None | Some("all") => None,
        Some(raw) => match PositionStatus::parse(raw) {
            Some(status) => Some(status),
            None => return respond::<()>(Err(ApiError::BadRequest(format!("unknown status filter: {raw}")))),
        },
    };
    let defaults = Page::default();
    let page = Page {
        limit: query.limit.unwrap_or(defaults.limit),
        offset: query.offset.unwrap_or(defaults.offset),
    };

    let max_page = ctx.engine.config().max_page_size;
    let result = run(&ctx, move |engine| engine.list(holder, status, page))
        .await
        .map(|outcome| ListResponse {
            balance: BalanceView::from(&outcome.balance),
            positions: outcome.positions,
            total: outcome.total,
            limit: page.limit.clamp(1, max_page),
            offset: page.offset,
        })
        .map_err(ApiError::from);
    respond(result)
}

pub async fn revalue(holder: HolderId, body: RevalueBody, ctx: ApiContext) -> Result<Response, Rejection> {
    let result = run(&ctx, move |engine| {
        engine.revalue_and_settle(holder, &body.instrument, body.mid_price)
    })
    .await
    .map(RevalueResponse::from)
    .map_err(ApiError::from);
    respond(result)
}
