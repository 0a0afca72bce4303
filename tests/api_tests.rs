//! HTTP boundary tests.
//!
//! Requests go through the full warp filter stack, including the recover
//! handler, against an engine backed by the in-memory ledger.

use margin_settle::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;

fn engine() -> Engine {
    let config = EngineConfig {
        spreads: SpreadTable::zero(),
        ..EngineConfig::default()
    };
    let ledger = Arc::new(InMemoryLedger::new("USD"));
    ledger.fund(HolderId(1), Quote::new(dec!(1_000)), Timestamp::from_millis(0));
    Engine::new(config, ledger).with_eligibility(Arc::new(TierPolicy::from_config(&EligibilityConfig::default())))
}

fn context() -> ApiContext {
    ApiContext::new(engine(), Duration::from_secs(5))
}

fn open_body(investment: &str, multiplier: u32) -> Value {
    json!({
        "instrument": "BTCUSD",
        "asset_class": "crypto",
        "direction": "buy",
        "investment": investment,
        "multiplier": multiplier,
        "market_price": "100",
    })
}

// decimals serialize as strings and keep their scale
fn num(v: &Value) -> Decimal {
    v.as_str().and_then(|s| s.parse().ok()).unwrap_or_else(|| panic!("not a decimal: {v}"))
}

async fn call(ctx: &ApiContext, method: &str, path: &str, holder: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = warp::test::request().method(method).path(path);
    if let Some(holder) = holder {
        req = req.header("x-holder-id", holder);
    }
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.reply(&routes(ctx.clone())).await;
    let status = resp.status();
    let value = serde_json::from_slice(resp.body()).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn open_returns_position_and_balance() {
    let ctx = context();
    let (status, body) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("50", 10))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["duplicate"], false);
    assert_eq!(data["position"]["direction"], "buy");
    assert_eq!(data["position"]["status"], "active");
    assert_eq!(num(&data["position"]["liquidation_price"]), dec!(90));
    assert_eq!(num(&data["balance"]["available"]), dec!(950));
}

#[tokio::test]
async fn legacy_field_names_are_accepted() {
    let ctx = context();
    let body = json!({
        "instrument": "ethusd",
        "direction": "sell",
        "amount": 25,
        "leverage": 4,
        "market_price": 2000,
    });
    let (status, body) = call(&ctx, "POST", "/positions/open", Some("1"), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["position"]["instrument"]["symbol"], "ETHUSD");
    assert_eq!(body["data"]["position"]["direction"], "sell");
    assert_eq!(body["data"]["position"]["multiplier"], 4);
}

#[tokio::test]
async fn idempotency_header_replays() {
    let ctx = context();
    let send = || async {
        let resp = warp::test::request()
            .method("POST")
            .path("/positions/open")
            .header("x-holder-id", "1")
            .header("idempotency-key", "abc-123")
            .json(&open_body("40", 5))
            .reply(&routes(ctx.clone()))
            .await;
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        (resp.status(), body)
    };

    let (s1, first) = send().await;
    let (s2, second) = send().await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);
    assert_eq!(second["data"]["duplicate"], true);
    assert_eq!(first["data"]["position"]["id"], second["data"]["position"]["id"]);
    assert_eq!(second["data"]["position"]["idempotency_key"], "abc-123");
    assert_eq!(num(&second["data"]["balance"]["available"]), dec!(960));
}

#[tokio::test]
async fn missing_holder_is_unauthorized() {
    let ctx = context();
    let (status, body) = call(&ctx, "POST", "/positions/open", None, Some(open_body("50", 10))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&ctx, "GET", "/positions", Some("not-a-number"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn open_error_statuses() {
    let ctx = context();

    let (status, body) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("-5", 10))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("5000", 10))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "insufficient_funds");

    // default tier caps the multiplier at 100x
    let (status, body) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("5", 500))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "eligibility_denied");

    let (status, _) = call(&ctx, "POST", "/positions/open", Some("1"), Some(json!({ "instrument": "BTCUSD" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn close_then_close_again() {
    let ctx = context();
    let (_, opened) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("50", 10))).await;
    let id = opened["data"]["position"]["id"].clone();

    let close = json!({ "position_id": id, "exit_price": "110", "reason": "manual" });
    let (status, body) = call(&ctx, "PATCH", "/positions/close", Some("1"), Some(close.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["position"]["status"], "closed");
    assert_eq!(body["data"]["result"]["outcome"], "win");
    assert_eq!(num(&body["data"]["result"]["percent_return"]), dec!(100));
    assert_eq!(num(&body["data"]["credit"]), dec!(100));
    assert_eq!(num(&body["data"]["balance"]["available"]), dec!(1050));

    let (status, body) = call(&ctx, "PATCH", "/positions/close", Some("1"), Some(close)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "already_closed");
    assert_eq!(body["error"]["position"]["status"], "closed");
    assert_eq!(num(&body["error"]["position"]["final_pnl"]), dec!(50));
}

#[tokio::test]
async fn close_unknown_or_foreign_position_is_not_found() {
    let ctx = context();
    let (_, opened) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("50", 10))).await;
    let id = opened["data"]["position"]["id"].clone();

    let close = json!({ "position_id": id, "exit_price": "100" });
    let (status, _) = call(&ctx, "PATCH", "/positions/close", Some("2"), Some(close)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let close = json!({ "position_id": PositionId::generate(), "exit_price": "100" });
    let (status, body) = call(&ctx, "PATCH", "/positions/close", Some("1"), Some(close)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn list_filters_by_status() {
    let ctx = context();
    for inv in ["10", "20", "30"] {
        call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body(inv, 2))).await;
    }

    let (status, body) = call(&ctx, "GET", "/positions?status=active&limit=2", Some("1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["positions"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["limit"], 2);
    assert_eq!(num(&body["data"]["balance"]["available"]), dec!(940));

    let (status, body) = call(&ctx, "GET", "/positions?status=liquidated", Some("1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (status, _) = call(&ctx, "GET", "/positions?status=bogus", Some("1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn revalue_settles_liquidations() {
    let ctx = context();
    let (_, opened) = call(&ctx, "POST", "/positions/open", Some("1"), Some(open_body("50", 10))).await;
    let id = opened["data"]["position"]["id"].clone();

    let tick = json!({ "instrument": "BTCUSD", "mid_price": "89" });
    let (status, body) = call(&ctx, "PATCH", "/positions/revalue", Some("1"), Some(tick)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revalued"], 1);
    assert_eq!(body["data"]["closed"][0]["position_id"], id);
    assert_eq!(body["data"]["closed"][0]["status"], "liquidated");
    assert_eq!(num(&body["data"]["closed"][0]["credit"]), dec!(0));
    assert_eq!(num(&body["data"]["balance"]["available"]), dec!(950));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let ctx = context();
    let (status, body) = call(&ctx, "GET", "/nope", Some("1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

/// Ledger whose balance reads take longer than the request timeout.
struct SlowLedger(InMemoryLedger);

impl LedgerStore for SlowLedger {
    fn balance(&self, holder: HolderId) -> Result<Option<Balance>, LedgerError> {
        std::thread::sleep(Duration::from_millis(300));
        self.0.balance(holder)
    }

    fn position(&self, id: PositionId) -> Result<Option<Position>, LedgerError> {
        self.0.position(id)
    }

    fn find_by_idempotency_key(&self, holder: HolderId, key: &str) -> Result<Option<Position>, LedgerError> {
        self.0.find_by_idempotency_key(holder, key)
    }

    fn positions(&self, holder: HolderId, status: Option<PositionStatus>, page: Page) -> Result<PositionPage, LedgerError> {
        self.0.positions(holder, status, page)
    }

    fn active_positions(&self, holder: HolderId, symbol: &str) -> Result<Vec<Position>, LedgerError> {
        self.0.active_positions(holder, symbol)
    }

    fn open(&self, transition: OpenTransition) -> Result<Applied, LedgerError> {
        self.0.open(transition)
    }

    fn close(&self, transition: CloseTransition) -> Result<Applied, LedgerError> {
        self.0.close(transition)
    }

    fn mark(&self, marks: &[RevaluationMark]) -> Result<usize, LedgerError> {
        self.0.mark(marks)
    }
}

#[tokio::test]
async fn slow_engine_call_times_out() {
    let ledger = InMemoryLedger::new("USD");
    ledger.fund(HolderId(1), Quote::new(dec!(100)), Timestamp::from_millis(0));
    let engine = Engine::new(EngineConfig::default(), Arc::new(SlowLedger(ledger)));
    let ctx = ApiContext::new(engine, Duration::from_millis(20));

    let (status, body) = call(&ctx, "GET", "/positions", Some("1"), None).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "timeout");
    assert_eq!(body["error"]["retryable"], true);
}
