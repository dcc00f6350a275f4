// Allow our units_micros digit grouping convention (e.g., 1_500000 = 1.5)
#![allow(clippy::inconsistent_digit_grouping)]

//! End-to-end ledger scenarios through the public API.

use chrono::{NaiveDate, NaiveDateTime};

use paperbook::analytics::{self, series};
use paperbook::construct::{self, WeightingStrategy};
use paperbook::feed::MemoryFeed;
use paperbook::ledger::{FixedClock, Ledger, OrderRequest};
use paperbook::store::{JsonFileStore, LedgerStore, MemoryStore};
use paperbook::valuation;
use paperbook::{AccountId, ErrorKind, InstrumentCode, Money};

fn aaa() -> InstrumentCode {
    InstrumentCode::new("AAA")
}
fn bbb() -> InstrumentCode {
    InstrumentCode::new("BBB")
}
fn ccc() -> InstrumentCode {
    InstrumentCode::new("CCC")
}

fn ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn units(n: i64) -> Money {
    Money::from_units(n)
}

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

fn ledger() -> (Ledger<MemoryStore>, AccountId) {
    let mut ledger = Ledger::new(MemoryStore::new()).with_clock(FixedClock(ts()));
    let account = ledger.open_account("paper", units(10_000_000)).unwrap();
    (ledger, account)
}

fn buy_at(ledger: &mut Ledger<MemoryStore>, account: AccountId, code: InstrumentCode, qty: u64, price: i64) {
    ledger
        .execute_buy(OrderRequest::new(account, code, qty).at_price(units(price)), &MemoryFeed::default())
        .unwrap();
}

// ============================================================================
// Scenarios A-C: buy, average up, sell out
// ============================================================================

#[test]
fn scenario_a_first_buy() {
    let (mut ledger, account) = ledger();
    let receipt = ledger
        .execute_buy(
            OrderRequest::new(account, aaa(), 10).at_price(units(1_000)),
            &MemoryFeed::default(),
        )
        .unwrap();

    assert_eq!(receipt.commission, money("1.5"));
    assert_eq!(receipt.total_amount, money("10001.5"));
    assert_eq!(receipt.cash_after, money("9989998.5"));

    let pos = ledger.position(account, aaa()).unwrap();
    assert_eq!(pos.quantity, 10);
    assert_eq!(pos.avg_price, units(1_000));
}

#[test]
fn scenario_b_average_up() {
    let (mut ledger, account) = ledger();
    buy_at(&mut ledger, account, aaa(), 10, 1_000);
    buy_at(&mut ledger, account, aaa(), 10, 1_200);

    let pos = ledger.position(account, aaa()).unwrap();
    assert_eq!(pos.quantity, 20);
    assert_eq!(pos.avg_price, units(1_100));
}

#[test]
fn scenario_c_sell_out() {
    let (mut ledger, account) = ledger();
    buy_at(&mut ledger, account, aaa(), 10, 1_000);
    buy_at(&mut ledger, account, aaa(), 10, 1_200);
    let cash_before = ledger.account(account).unwrap().cash_balance;

    let receipt = ledger
        .execute_sell(
            OrderRequest::new(account, aaa(), 20).at_price(units(1_300)),
            &MemoryFeed::default(),
        )
        .unwrap();

    assert_eq!(receipt.realized_pl, units(4_000));
    assert_eq!(receipt.remaining_quantity, 0);
    assert!(ledger.position(account, aaa()).is_none());
    let commission = money("3.9");
    assert_eq!(receipt.commission, commission);
    assert_eq!(
        ledger.account(account).unwrap().cash_balance,
        cash_before + units(26_000) - commission
    );
}

#[test]
fn round_trip_costs_two_commissions() {
    let (mut ledger, account) = ledger();
    buy_at(&mut ledger, account, aaa(), 10, 1_000);
    ledger
        .execute_sell(
            OrderRequest::new(account, aaa(), 10).at_price(units(1_000)),
            &MemoryFeed::default(),
        )
        .unwrap();
    assert_eq!(
        ledger.account(account).unwrap().cash_balance,
        units(10_000_000) - money("3")
    );
}

#[test]
fn rejected_orders_leave_state_unchanged() {
    let (mut ledger, account) = ledger();
    buy_at(&mut ledger, account, aaa(), 10, 1_000);
    let before = ledger.store().state().clone();
    let feed = MemoryFeed::default();

    let err = ledger
        .execute_sell(OrderRequest::new(account, aaa(), 11).at_price(units(1_000)), &feed)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientShares);

    let err = ledger
        .execute_buy(OrderRequest::new(account, bbb(), 1_000_000).at_price(units(1_000)), &feed)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    let err = ledger
        .execute_sell(OrderRequest::new(account, bbb(), 1).at_price(units(1_000)), &feed)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPosition);

    let err = ledger
        .execute_buy(OrderRequest::new(account, ccc(), 1), &feed)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPrice);

    assert_eq!(ledger.store().state(), &before);
}

// ============================================================================
// Scenario D: equal weight
// ============================================================================

#[test]
fn scenario_d_equal_weight() {
    let feed = MemoryFeed::default();
    let allocation = construct::construct(
        WeightingStrategy::EqualWeight,
        &[aaa(), bbb(), ccc()],
        &feed,
        &feed,
        construct::Window::trailing(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), 252),
    )
    .unwrap();

    for (_, w) in &allocation.weights {
        assert!((w - 1.0 / 3.0).abs() < 1e-12);
    }
    let sum: f64 = allocation.weights.iter().map(|(_, w)| w).sum();
    assert!((sum - 1.0).abs() < 1e-9);
    assert_eq!(allocation.sector_distribution.get("Unknown"), Some(&3));
}

// ============================================================================
// Scenario E: win rate and drawdown of a return series
// ============================================================================

#[test]
fn scenario_e_win_rate_and_drawdown() {
    let returns = [0.01, -0.02, 0.015, -0.01];
    assert_eq!(analytics::win_rate(&returns), 50.0);

    let curve = series::cumulative(&returns);
    let dd = analytics::max_drawdown(&curve);
    // Deepest fall is the -2% day from the 1.01 peak
    assert!((dd.max_drawdown_pct - (-2.0)).abs() < 1e-9);
    assert!(dd.max_drawdown_pct <= 0.0);
    assert!(dd.max_drawdown_pct >= -2.0 - 1e-9);
}

// ============================================================================
// Daily workflow: trade, mark, snapshot, report
// ============================================================================

#[test]
fn daily_workflow() {
    let (mut ledger, account) = ledger();
    let mut feed = MemoryFeed::builder()
        .with_quote(aaa(), units(1_000))
        .with_quote(bbb(), units(500))
        .build();

    ledger
        .execute_buy(OrderRequest::new(account, aaa(), 100), &feed)
        .unwrap();
    ledger
        .execute_buy(OrderRequest::new(account, bbb(), 200), &feed)
        .unwrap();

    let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
    valuation::record_snapshot(&mut ledger, &feed, account, day(4)).unwrap();

    feed.set_quote(aaa(), units(1_100));
    feed.set_quote(bbb(), units(400));
    let snap = valuation::record_snapshot(&mut ledger, &feed, account, day(5)).unwrap();
    // Recording again on the same day replaces the row
    valuation::record_snapshot(&mut ledger, &feed, account, day(5)).unwrap();

    let history = valuation::history(&ledger, account, 30);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1], snap);

    // AAA +10% and BBB -20%: the default rule flags BBB only
    let signals = valuation::exit_signals(&ledger, account, valuation::ExitRule::default()).unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].code, bbb());

    let summary = analytics::trade_summary(&ledger, account).unwrap();
    assert_eq!(summary.replay.buy_count, 2);
    assert_eq!(summary.unrealized_pl, units(10_000 - 20_000));

    let report = analytics::performance_report(&ledger, account, 30).unwrap();
    assert_eq!(report.history.len(), 2);
    assert!(report.stats.max_drawdown < 0.0);
}

// ============================================================================
// File-backed store
// ============================================================================

#[test]
fn json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let feed = MemoryFeed::default();

    let account = {
        let store = JsonFileStore::open(&path).unwrap();
        let mut ledger = Ledger::new(store).with_clock(FixedClock(ts()));
        let account = ledger.open_account("paper", units(10_000_000)).unwrap();
        ledger
            .execute_buy(OrderRequest::new(account, aaa(), 10).at_price(units(1_000)), &feed)
            .unwrap();
        account
    };

    let mut ledger = Ledger::new(JsonFileStore::open(&path).unwrap()).with_clock(FixedClock(ts()));
    assert_eq!(ledger.account(account).unwrap().cash_balance, money("9989998.5"));
    assert_eq!(ledger.position(account, aaa()).unwrap().avg_price, units(1_000));

    // Ids keep counting after reload
    let receipt = ledger
        .execute_sell(OrderRequest::new(account, aaa(), 5).at_price(units(1_000)), &feed)
        .unwrap();
    assert_eq!(receipt.trade_id.0, 2);
    assert_eq!(ledger.trade_log(account).len(), 2);
}
