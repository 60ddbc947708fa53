//! Order admission gate and daily risk accounting.
//!
//! All mutable risk state lives behind one mutex; `admit` is a single atomic
//! check-and-record so two concurrent intents can never both pass the rate
//! check against a stale count.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use kite_core::config::RiskConfig;
use kite_core::types::OrderIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tracing::{info, warn};

/// Trailing window for the admission rate check.
const RATE_WINDOW_SECS: i64 = 60;

/// IST offset (UTC+5:30). The exchange session and the risk day boundary are
/// both defined in exchange-local time.
fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

/// Why an intent was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Outside the exchange session.
    MarketClosed,
    /// Notional value exceeds the single-order limit.
    OrderTooLarge,
    /// Cumulative realized loss has reached the daily hard stop.
    DailyLossLimitReached,
    /// Too many admissions in the trailing rate window.
    RateLimited,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::MarketClosed => "market closed",
            RejectReason::OrderTooLarge => "order notional exceeds limit",
            RejectReason::DailyLossLimitReached => "daily loss limit reached",
            RejectReason::RateLimited => "order rate limit reached",
        };
        f.write_str(s)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    Admitted,
    Rejected(RejectReason),
}

impl AdmissionResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionResult::Admitted)
    }
}

/// Mutable risk counters for the current trading day. Exclusively owned by
/// [`RiskManager`]; reset at the IST day boundary.
struct RiskState {
    day: NaiveDate,
    cumulative_loss: Decimal,
    admissions: VecDeque<DateTime<Utc>>,
    seen_fills: HashSet<String>,
}

impl RiskState {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            cumulative_loss: Decimal::ZERO,
            admissions: VecDeque::new(),
            seen_fills: HashSet::new(),
        }
    }
}

/// Process-wide admission gate.
pub struct RiskManager {
    limits: RiskConfig,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(limits: RiskConfig) -> Self {
        let today = Utc::now().with_timezone(&ist()).date_naive();
        Self {
            limits,
            state: Mutex::new(RiskState::new(today)),
        }
    }

    /// Admit or reject an intent. Checks run in a fixed order and the first
    /// failure wins; a successful admission records its timestamp before the
    /// lock is released.
    pub fn admit(&self, intent: &OrderIntent, reference_price: Decimal) -> AdmissionResult {
        self.admit_at(intent, reference_price, Utc::now())
    }

    fn admit_at(
        &self,
        intent: &OrderIntent,
        reference_price: Decimal,
        now: DateTime<Utc>,
    ) -> AdmissionResult {
        let mut state = self.state.lock().unwrap();
        Self::roll_day(&mut state, now);

        let local = now.with_timezone(&ist()).time();
        if self.limits.enforce_market_hours
            && (local < self.limits.market_open || local > self.limits.market_close)
        {
            return AdmissionResult::Rejected(RejectReason::MarketClosed);
        }

        let notional = Decimal::from(intent.quantity) * reference_price;
        if notional > self.limits.max_order_value {
            warn!(
                symbol = %intent.instrument.tradingsymbol,
                %notional,
                limit = %self.limits.max_order_value,
                "Rejecting oversized order"
            );
            return AdmissionResult::Rejected(RejectReason::OrderTooLarge);
        }

        if state.cumulative_loss >= self.limits.max_daily_loss {
            warn!(
                cumulative_loss = %state.cumulative_loss,
                limit = %self.limits.max_daily_loss,
                "Daily loss limit reached, trading halted until day reset"
            );
            return AdmissionResult::Rejected(RejectReason::DailyLossLimitReached);
        }

        let window_start = now - Duration::seconds(RATE_WINDOW_SECS);
        while state
            .admissions
            .front()
            .is_some_and(|&t| t < window_start)
        {
            state.admissions.pop_front();
        }
        if state.admissions.len() >= self.limits.max_orders_per_window {
            return AdmissionResult::Rejected(RejectReason::RateLimited);
        }

        state.admissions.push_back(now);
        AdmissionResult::Admitted
    }

    /// Record realized P&L for a terminal fill. Idempotent: delivering the
    /// same fill id twice changes the counters exactly once.
    pub fn record_outcome(&self, fill_id: &str, pnl: Decimal) {
        let mut state = self.state.lock().unwrap();
        Self::roll_day(&mut state, Utc::now());

        if !state.seen_fills.insert(fill_id.to_string()) {
            return;
        }

        if pnl < Decimal::ZERO {
            state.cumulative_loss -= pnl;
        }
        info!(
            fill_id,
            %pnl,
            cumulative_loss = %state.cumulative_loss,
            "Recorded realized P&L"
        );
    }

    /// Cumulative realized loss for the current trading day (positive value).
    pub fn cumulative_loss(&self) -> Decimal {
        self.state.lock().unwrap().cumulative_loss
    }

    /// Clear all daily counters immediately.
    pub fn reset_daily(&self) {
        let mut state = self.state.lock().unwrap();
        let day = state.day;
        *state = RiskState::new(day);
        info!("Risk state reset");
    }

    fn roll_day(state: &mut RiskState, now: DateTime<Utc>) {
        let today = now.with_timezone(&ist()).date_naive();
        if today != state.day {
            info!(%today, "Trading day rolled over, resetting risk state");
            *state = RiskState::new(today);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_core::types::{Exchange, Instrument, OrderSide};

    fn limits() -> RiskConfig {
        RiskConfig {
            enforce_market_hours: false,
            ..RiskConfig::default()
        }
    }

    fn intent(quantity: u32) -> OrderIntent {
        OrderIntent::market(
            Instrument::new(Exchange::Nse, "INFY"),
            OrderSide::Buy,
            quantity,
        )
    }

    #[test]
    fn test_admits_within_limits() {
        let manager = RiskManager::new(limits());
        // 10 * 1380 = 13_800 <= 50_000
        let result = manager.admit(&intent(10), Decimal::new(1380, 0));
        assert!(result.is_admitted());
    }

    #[test]
    fn test_rejects_oversized_notional_without_mutating_state() {
        let manager = RiskManager::new(limits());
        // 100 * 1380 = 138_000 > 50_000
        let result = manager.admit(&intent(100), Decimal::new(1380, 0));
        assert_eq!(result, AdmissionResult::Rejected(RejectReason::OrderTooLarge));

        // The rejected intent consumed no rate-window slot.
        for _ in 0..limits().max_orders_per_window {
            assert!(manager.admit(&intent(1), Decimal::ONE).is_admitted());
        }
    }

    #[test]
    fn test_daily_loss_hard_stop() {
        let manager = RiskManager::new(limits());
        manager.record_outcome("F-1", Decimal::new(-10_000, 0));

        let result = manager.admit(&intent(1), Decimal::ONE);
        assert_eq!(
            result,
            AdmissionResult::Rejected(RejectReason::DailyLossLimitReached)
        );

        manager.reset_daily();
        assert!(manager.admit(&intent(1), Decimal::ONE).is_admitted());
    }

    #[test]
    fn test_eleventh_admission_in_window_rate_limited() {
        let manager = RiskManager::new(limits());
        let now = Utc::now();
        for i in 0..10 {
            let at = now + Duration::seconds(i);
            assert!(manager.admit_at(&intent(1), Decimal::ONE, at).is_admitted());
        }
        let result = manager.admit_at(&intent(1), Decimal::ONE, now + Duration::seconds(10));
        assert_eq!(result, AdmissionResult::Rejected(RejectReason::RateLimited));

        // Once the earliest admissions age out of the window, capacity returns.
        let later = now + Duration::seconds(65);
        assert!(manager.admit_at(&intent(1), Decimal::ONE, later).is_admitted());
    }

    #[test]
    fn test_record_outcome_is_idempotent() {
        let manager = RiskManager::new(limits());
        manager.record_outcome("F-7", Decimal::new(-2_500, 0));
        manager.record_outcome("F-7", Decimal::new(-2_500, 0));
        assert_eq!(manager.cumulative_loss(), Decimal::new(2_500, 0));
    }

    #[test]
    fn test_profits_do_not_reduce_cumulative_loss() {
        let manager = RiskManager::new(limits());
        manager.record_outcome("F-1", Decimal::new(-1_000, 0));
        manager.record_outcome("F-2", Decimal::new(5_000, 0));
        assert_eq!(manager.cumulative_loss(), Decimal::new(1_000, 0));
    }

    #[test]
    fn test_market_hours_enforced() {
        let config = RiskConfig::default();
        assert!(config.enforce_market_hours);
        let manager = RiskManager::new(config);

        // 03:00 UTC = 08:30 IST, before the 09:15 open.
        let before_open = Utc::now()
            .date_naive()
            .and_hms_opt(3, 0, 0)
            .unwrap()
            .and_utc();
        let result = manager.admit_at(&intent(1), Decimal::ONE, before_open);
        assert_eq!(result, AdmissionResult::Rejected(RejectReason::MarketClosed));

        // 05:00 UTC = 10:30 IST, inside the session.
        let in_session = Utc::now()
            .date_naive()
            .and_hms_opt(5, 0, 0)
            .unwrap()
            .and_utc();
        assert!(manager
            .admit_at(&intent(1), Decimal::ONE, in_session)
            .is_admitted());
    }
}
