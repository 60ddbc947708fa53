//! Sequential market analyzer.
//!
//! A pure, deterministic pipeline over a close-price and volume series.
//! Four steps run in fixed order (momentum, trend, volume, synthesis), each
//! contributing one reasoning step to the result; later steps add context
//! but never contradict earlier numeric facts. Ties resolve to HOLD.

use kite_core::types::{AnalysisResult, Confidence, Decision, Instrument, ReasoningStep};
use kite_core::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Periods in the trend window; also the minimum series length.
pub const TREND_WINDOW: usize = 5;

/// Normalized slope magnitude (percent per period) below which the trend is
/// classified Flat.
const FLAT_SLOPE_DEADBAND_PCT: f64 = 0.1;

/// Latest volume above this multiple of the window average is Above-average.
const VOLUME_HIGH_RATIO: f64 = 1.2;

/// Latest volume below this multiple of the window average is Below-average.
const VOLUME_LOW_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeLevel {
    Above,
    Below,
    Normal,
}

#[derive(Debug, Default)]
pub struct SequentialAnalyzer;

impl SequentialAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a close-price and volume series, oldest first. Requires at
    /// least [`TREND_WINDOW`] periods of both; never pads missing data.
    pub fn analyze(
        &self,
        instrument: &Instrument,
        closes: &[Decimal],
        volumes: &[u64],
    ) -> Result<AnalysisResult> {
        let supplied = closes.len().min(volumes.len());
        if supplied < TREND_WINDOW {
            return Err(Error::InsufficientData {
                required: TREND_WINDOW,
                supplied,
            });
        }

        let mut steps = Vec::with_capacity(4);

        let (momentum_pct, momentum_dir) = Self::momentum_step(closes, &mut steps);
        let trend_dir = Self::trend_step(closes, &mut steps);
        let volume_level = Self::volume_step(volumes, &mut steps);
        let (decision, confidence) =
            Self::synthesis_step(momentum_pct, momentum_dir, trend_dir, volume_level, &mut steps);

        Ok(AnalysisResult {
            instrument: instrument.clone(),
            steps,
            decision,
            confidence,
        })
    }

    fn momentum_step(closes: &[Decimal], steps: &mut Vec<ReasoningStep>) -> (f64, Direction) {
        let latest = closes[closes.len() - 1];
        let prior = closes[closes.len() - 2];
        let pct = if prior.is_zero() {
            0.0
        } else {
            ((latest - prior) / prior * Decimal::new(100, 0))
                .to_f64()
                .unwrap_or(0.0)
        };

        let direction = if pct > 0.0 {
            Direction::Up
        } else if pct < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        };

        let conclusion = match direction {
            Direction::Up => format!("positive momentum of {pct:.2}%"),
            Direction::Down => format!("negative momentum of {pct:.2}%"),
            Direction::Flat => "no significant change in price".to_string(),
        };
        steps.push(ReasoningStep::new(
            "momentum",
            format!("latest close {latest} vs prior close {prior} ({pct:+.2}%)"),
            conclusion,
        ));

        (pct, direction)
    }

    fn trend_step(closes: &[Decimal], steps: &mut Vec<ReasoningStep>) -> Direction {
        let window: Vec<f64> = closes[closes.len() - TREND_WINDOW..]
            .iter()
            .map(|c| c.to_f64().unwrap_or(0.0))
            .collect();

        let n = window.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = window.iter().sum::<f64>() / n;

        let mut cov = 0.0;
        let mut var_x = 0.0;
        for (i, y) in window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            cov += dx * (y - mean_y);
            var_x += dx * dx;
        }
        let slope = cov / var_x;
        // Slope as a percentage of the mean price per period, so the deadband
        // is scale-free.
        let slope_pct = if mean_y == 0.0 {
            0.0
        } else {
            slope / mean_y * 100.0
        };

        let variance = window.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / n;
        let volatility = variance.sqrt();

        let direction = if slope_pct.abs() < FLAT_SLOPE_DEADBAND_PCT {
            Direction::Flat
        } else if slope_pct > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };

        let conclusion = match direction {
            Direction::Up => format!("upward trend ({slope_pct:.2}%/period)"),
            Direction::Down => format!("downward trend ({slope_pct:.2}%/period)"),
            Direction::Flat => "no significant change in trend (flat)".to_string(),
        };
        steps.push(ReasoningStep::new(
            "trend",
            format!(
                "{TREND_WINDOW}-period slope {slope_pct:+.3}%/period, volatility {volatility:.2}"
            ),
            conclusion,
        ));

        direction
    }

    fn volume_step(volumes: &[u64], steps: &mut Vec<ReasoningStep>) -> VolumeLevel {
        let window = &volumes[volumes.len() - TREND_WINDOW..];
        let average = window.iter().sum::<u64>() as f64 / window.len() as f64;
        let latest = *window.last().unwrap() as f64;
        let ratio = if average == 0.0 { 1.0 } else { latest / average };

        let level = if ratio > VOLUME_HIGH_RATIO {
            VolumeLevel::Above
        } else if ratio < VOLUME_LOW_RATIO {
            VolumeLevel::Below
        } else {
            VolumeLevel::Normal
        };

        let conclusion = match level {
            VolumeLevel::Above => "above-average volume".to_string(),
            VolumeLevel::Below => "below-average volume".to_string(),
            VolumeLevel::Normal => "no significant change in volume".to_string(),
        };
        steps.push(ReasoningStep::new(
            "volume",
            format!("latest volume {latest:.0} vs window average {average:.0} ({ratio:.2}x)"),
            conclusion,
        ));

        level
    }

    /// Fixed precedence: a directional call requires momentum and trend
    /// agreeing in direction with above-average volume. Anything else holds.
    fn synthesis_step(
        momentum_pct: f64,
        momentum: Direction,
        trend: Direction,
        volume: VolumeLevel,
        steps: &mut Vec<ReasoningStep>,
    ) -> (Decision, Confidence) {
        let (decision, confidence) = match (momentum, trend, volume) {
            (Direction::Up, Direction::Up, VolumeLevel::Above) => (Decision::Buy, Confidence::High),
            (Direction::Down, Direction::Down, VolumeLevel::Above) => {
                (Decision::Sell, Confidence::High)
            }
            _ => {
                let genuinely_flat = trend == Direction::Flat
                    && momentum_pct.abs() < FLAT_SLOPE_DEADBAND_PCT
                    && volume != VolumeLevel::Above;
                if genuinely_flat {
                    (Decision::Hold, Confidence::Moderate)
                } else {
                    (Decision::Hold, Confidence::Low)
                }
            }
        };

        let conclusion = match decision {
            Decision::Buy => "momentum, trend, and volume all favor buying".to_string(),
            Decision::Sell => "momentum, trend, and volume all favor selling".to_string(),
            Decision::Hold => "signals do not agree on a direction, holding".to_string(),
        };
        steps.push(ReasoningStep::new(
            "synthesis",
            format!("momentum {momentum:?}, trend {trend:?}, volume {volume:?}"),
            conclusion,
        ));

        (decision, confidence)
    }
}
