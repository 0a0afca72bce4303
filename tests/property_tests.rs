//! Property-based tests for the settlement math.
//!
//! These tests verify the money invariants hold under random inputs.

use margin_settle::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $100,000
}

fn investment_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $100,000
}

fn multiplier_strategy() -> impl Strategy<Value = u32> {
    1u32..=1000u32
}

// 1e-28 up to ~9.2e18, spread across every scale
fn wide_price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..i64::MAX, 0u32..=28u32).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Long), Just(Direction::Short)]
}

fn spread_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=100i64).prop_map(|x| Decimal::new(x, 4)) // 0.01% to 1%
}

fn position(direction: Direction, investment: Decimal, multiplier: u32, price: Decimal, spread: Decimal) -> Position {
    let params = math::validate_open(investment, multiplier, 1000, price, None, None).unwrap();
    Position::open(
        PositionId::generate(),
        HolderId(1),
        Instrument::new("BTCUSD", AssetClass::Crypto),
        direction,
        &params,
        spread,
        None,
        Timestamp::from_millis(0),
    )
}

proptest! {
    /// Whatever the exit, a close never takes more than the investment.
    #[test]
    fn loss_never_exceeds_investment(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in multiplier_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let pos = position(direction, investment, multiplier, entry, Decimal::ZERO);
        let s = pos.settle(Price::new_unchecked(exit), CloseReason::Manual).unwrap();

        prop_assert!(s.final_pnl.value() >= -investment);
        prop_assert!(!s.credit.is_negative());
        prop_assert_eq!(s.credit.value(), investment + s.final_pnl.value());
    }

    /// Extreme but valid prices never panic, and the cap still holds at close.
    #[test]
    fn extreme_prices_settle_within_the_cap(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in multiplier_strategy(),
        entry in wide_price_strategy(),
        exit in wide_price_strategy(),
        spread in spread_strategy(),
    ) {
        let mut pos = position(direction, investment, multiplier, entry, spread);
        let mid = Price::new_unchecked(exit);
        pos.revalue(mid, Timestamp::from_millis(1));

        match pos.trigger_at(pos.current_price) {
            Some(CloseReason::Liquidated) => {
                let s = pos.settle(mid, CloseReason::Liquidated).unwrap();
                prop_assert_eq!(s.final_pnl.value(), -investment);
                prop_assert_eq!(s.credit.value(), Decimal::ZERO);
            }
            _ => {
                let s = pos.settle(mid, CloseReason::Manual).unwrap();
                prop_assert!(s.final_pnl.value() >= -investment);
                prop_assert!(!s.credit.is_negative());
            }
        }
    }

    /// The trigger reported at a mark is always a reason settle accepts at that mid.
    #[test]
    fn triggers_agree_with_settlement(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in multiplier_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        spread in spread_strategy(),
    ) {
        let pos = position(direction, investment, multiplier, entry, spread);
        let mid = Price::new_unchecked(exit);
        if let Some(reason) = pos.trigger_at(pos.mark_price(mid)) {
            let s = pos.settle(mid, reason).unwrap();
            prop_assert_eq!(s.status, reason.terminal_status());
        }
    }

    /// Past the liquidation price the position is always liquidatable.
    #[test]
    fn beyond_liquidation_price_liquidates(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in 2u32..=1000u32,
        entry in price_strategy(),
        overshoot in 1i64..=50i64,
    ) {
        let pos = position(direction, investment, multiplier, entry, Decimal::ZERO);
        let f = Decimal::new(overshoot, 2);
        let mid = match direction {
            Direction::Long => pos.liquidation_price * (Decimal::ONE - f),
            Direction::Short => pos.liquidation_price * (Decimal::ONE + f),
        };
        prop_assume!(mid > Decimal::ZERO);

        let mark = pos.mark_price(Price::new_unchecked(mid));
        prop_assert_eq!(pos.trigger_at(mark), Some(CloseReason::Liquidated));
        let s = pos.settle(Price::new_unchecked(mid), CloseReason::Liquidated).unwrap();
        prop_assert_eq!(s.final_pnl.value(), -investment);
        prop_assert_eq!(s.credit.value(), Decimal::ZERO);
    }

    /// Just inside the liquidation price nothing fires.
    #[test]
    fn inside_liquidation_price_survives(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in 2u32..=1000u32,
        entry in price_strategy(),
    ) {
        let pos = position(direction, investment, multiplier, entry, Decimal::ZERO);
        let mid = match direction {
            Direction::Long => pos.liquidation_price * dec!(1.001),
            Direction::Short => pos.liquidation_price * dec!(0.999),
        };
        prop_assert_eq!(pos.trigger_at(Price::new_unchecked(mid)), None);
    }

    /// Opening and closing at the same mid costs the spread and nothing else.
    #[test]
    fn same_mid_round_trip_loses_spread(
        direction in direction_strategy(),
        investment in investment_strategy(),
        multiplier in 1u32..=50u32,
        mid in price_strategy(),
        spread in spread_strategy(),
    ) {
        let pos = position(direction, investment, multiplier, mid, spread);
        let s = pos.settle(Price::new_unchecked(mid), CloseReason::Manual).unwrap();
        prop_assert!(s.final_pnl.is_negative());

        let flat = position(direction, investment, multiplier, mid, Decimal::ZERO);
        let s = flat.settle(Price::new_unchecked(mid), CloseReason::Manual).unwrap();
        prop_assert_eq!(s.final_pnl.value(), Decimal::ZERO);
    }

    /// Floating pnl has the right sign on both sides.
    #[test]
    fn pnl_sign_follows_direction(
        investment in investment_strategy(),
        multiplier in multiplier_strategy(),
        entry in price_strategy(),
        delta in -500i64..=500i64,
    ) {
        let current = entry + Decimal::new(delta, 2);
        prop_assume!(current > Decimal::ZERO && current != entry);

        let long = position(Direction::Long, investment, multiplier, entry, Decimal::ZERO);
        let short = position(Direction::Short, investment, multiplier, entry, Decimal::ZERO);
        let price = Price::new_unchecked(current);

        prop_assert_eq!(long.pnl_at(price).is_positive(), current > entry);
        prop_assert_eq!(short.pnl_at(price).is_positive(), current < entry);
    }

    /// Out-of-range opens never produce a position.
    #[test]
    fn invalid_open_parameters_rejected(
        investment in -1_000i64..=0i64,
        multiplier in 1001u32..=5000u32,
        price in price_strategy(),
    ) {
        prop_assert!(math::validate_open(Decimal::new(investment, 2), 10, 1000, price, None, None).is_err());
        prop_assert!(math::validate_open(dec!(10), multiplier, 1000, price, None, None).is_err());
        prop_assert!(math::validate_open(dec!(10), 0, 1000, price, None, None).is_err());
        prop_assert!(math::validate_open(dec!(10), 10, 1000, -price, None, None).is_err());
    }
}
