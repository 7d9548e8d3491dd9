//! Rolling-window risk statistics over a single fund's cleaned price series.
//!
//! Every statistic of a record is computed over the same trailing window of `window` daily
//! returns. A fund with fewer returns than the window yields no records at all.

use crate::domain::price::{PriceObservation, RiskMetricRecord};
use crate::policy::EngineConfig;
use std::collections::BTreeMap;

// Denominators at or below this are treated as zero.
const ZERO_TOLERANCE: f64 = 1e-12;

const VAR_QUANTILE: f64 = 0.05;

/// Sorts by date and drops rows that cannot feed a return: non-finite or non-positive prices and
/// repeated dates (first occurrence wins).
pub fn clean_series(mut series: Vec<PriceObservation>) -> Vec<PriceObservation> {
    let before = series.len();
    series.retain(|o| {
        o.close_price.is_finite()
            && o.close_price > 0.0
            && o.benchmark_close_price.is_finite()
            && o.benchmark_close_price > 0.0
    });
    // Stable sort keeps the first-seen row of a duplicated date in front.
    series.sort_by_key(|o| o.date);
    series.dedup_by_key(|o| o.date);

    let dropped = before - series.len();
    if dropped > 0 {
        if let Some(first) = series.first() {
            tracing::debug!(fund_id = %first.fund_id, dropped, "dropped invalid price rows");
        }
    }
    series
}

/// Daily simple returns `p_t / p_{t-1} - 1`; element `i` belongs to `series[i + 1]`.
pub fn daily_returns(prices: impl Iterator<Item = f64>) -> Vec<f64> {
    let prices: Vec<f64> = prices.collect();
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Computes one record per date that closes a full trailing window.
///
/// `series` must already be cleaned (see [`clean_series`]) and belong to a single fund.
pub fn compute_fund_metrics(series: &[PriceObservation], cfg: &EngineConfig) -> Vec<RiskMetricRecord> {
    let window = cfg.window;
    if series.len() < window + 1 {
        return Vec::new();
    }

    let returns = daily_returns(series.iter().map(|o| o.close_price));
    let bench = daily_returns(series.iter().map(|o| o.benchmark_close_price));

    let mut out = Vec::with_capacity(returns.len() + 1 - window);
    for end in window..=returns.len() {
        let obs = &series[end];
        out.push(window_metrics(
            &obs.fund_id,
            obs,
            &returns[end - window..end],
            &bench[end - window..end],
            cfg.trading_days_per_year,
        ));
    }
    out
}

fn window_metrics(
    fund_id: &str,
    obs: &PriceObservation,
    r: &[f64],
    bench: &[f64],
    periods: f64,
) -> RiskMetricRecord {
    let n = r.len() as f64;
    let mean_r = mean(r);
    let volatility = sample_std(r, mean_r) * periods.sqrt();
    let annual_return = mean_r * periods;

    let downside_deviation =
        (r.iter().map(|x| x.min(0.0).powi(2)).sum::<f64>() / n * periods).sqrt();

    RiskMetricRecord {
        fund_id: fund_id.to_string(),
        date: obs.date,
        volatility,
        max_drawdown: max_drawdown(r),
        value_at_risk_95: quantile_sorted(&sorted_copy(r), VAR_QUANTILE),
        beta: beta(r, bench),
        sharpe_ratio: ratio(annual_return, volatility),
        sortino_ratio: ratio(annual_return, downside_deviation),
        downside_deviation,
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_std(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
    (ss / (xs.len() as f64 - 1.0)).sqrt()
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if !den.is_finite() || den <= ZERO_TOLERANCE {
        return None;
    }
    let v = num / den;
    v.is_finite().then_some(v)
}

/// Largest peak-to-trough decline of the compounded return path, as a fraction of the peak.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cum = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for r in returns {
        cum *= 1.0 + r;
        peak = peak.max(cum);
        if peak > 0.0 {
            worst = worst.max((peak - cum) / peak);
        }
    }
    worst
}

/// Sample covariance with the benchmark over benchmark sample variance.
pub fn beta(r: &[f64], bench: &[f64]) -> Option<f64> {
    if r.len() != bench.len() || r.len() < 2 {
        return None;
    }
    let mr = mean(r);
    let mb = mean(bench);
    let denom = r.len() as f64 - 1.0;
    let cov: f64 = r
        .iter()
        .zip(bench.iter())
        .map(|(a, b)| (a - mr) * (b - mb))
        .sum::<f64>()
        / denom;
    let var_b: f64 = bench.iter().map(|b| (b - mb).powi(2)).sum::<f64>() / denom;
    ratio(cov, var_b)
}

pub(crate) fn sorted_copy(xs: &[f64]) -> Vec<f64> {
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Linear-interpolated quantile of an ascending slice (`q` in [0, 1]).
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Percent change over the last `days` observations, if the series reaches back that far.
pub fn trailing_return_pct(series: &[PriceObservation], days: usize) -> Option<f64> {
    if days == 0 || series.len() < days + 1 {
        return None;
    }
    let end = series.last()?.close_price;
    let start = series[series.len() - 1 - days].close_price;
    (start > 0.0).then(|| (end / start - 1.0) * 100.0)
}

/// Mean reported volume over the last `days` observations that carry one.
pub fn recent_avg_volume(series: &[PriceObservation], days: usize) -> Option<f64> {
    let start = series.len().saturating_sub(days);
    let vols: Vec<f64> = series[start..]
        .iter()
        .filter_map(|o| o.volume)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    (!vols.is_empty()).then(|| mean(&vols))
}

/// Runs the calculator over every fund, in fund id order.
pub fn compute_universe_metrics(
    prices: &BTreeMap<String, Vec<PriceObservation>>,
    cfg: &EngineConfig,
) -> Vec<RiskMetricRecord> {
    let mut out = Vec::new();
    let mut short_history = 0usize;
    for (fund_id, series) in prices {
        let records = compute_fund_metrics(series, cfg);
        if records.is_empty() {
            short_history += 1;
            tracing::debug!(
                fund_id = %fund_id,
                observations = series.len(),
                window = cfg.window,
                "insufficient history; fund has no risk metrics"
            );
        }
        out.extend(records);
    }

    tracing::info!(
        funds = prices.len(),
        short_history,
        records = out.len(),
        "risk metrics computed"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(fund_id: &str, closes: &[f64], bench: &[f64]) -> Vec<PriceObservation> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .zip(bench.iter())
            .enumerate()
            .map(|(i, (c, b))| PriceObservation {
                fund_id: fund_id.to_string(),
                date: start + Duration::days(i as i64),
                close_price: *c,
                benchmark_close_price: *b,
                volume: Some(1000.0 + i as f64),
            })
            .collect()
    }

    fn zigzag(n: usize, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 * (1.0 + amp * ((i % 7) as f64 - 3.0) / 3.0) * (1.0 + 0.001 * i as f64))
            .collect()
    }

    fn small_cfg(window: usize) -> EngineConfig {
        EngineConfig {
            window,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn constant_price_has_zero_risk_and_undefined_ratios() {
        let closes = vec![50.0; 130];
        let bench = zigzag(130, 0.02);
        let s = series("A", &closes, &bench);
        let recs = compute_fund_metrics(&s, &EngineConfig::default());

        // 129 returns, window 126 -> 4 records.
        assert_eq!(recs.len(), 4);
        for r in &recs {
            assert_eq!(r.volatility, 0.0);
            assert_eq!(r.max_drawdown, 0.0);
            assert_eq!(r.downside_deviation, 0.0);
            assert_eq!(r.value_at_risk_95, 0.0);
            assert_eq!(r.sharpe_ratio, None);
            assert_eq!(r.sortino_ratio, None);
            assert_eq!(r.beta, Some(0.0));
        }
    }

    #[test]
    fn short_history_yields_no_records() {
        let s = series("A", &zigzag(126, 0.01), &zigzag(126, 0.01));
        assert!(compute_fund_metrics(&s, &EngineConfig::default()).is_empty());
    }

    #[test]
    fn record_dates_close_each_window() {
        let closes = zigzag(20, 0.03);
        let s = series("A", &closes, &closes);
        let recs = compute_fund_metrics(&s, &small_cfg(5));
        assert_eq!(recs.len(), 15);
        assert_eq!(recs[0].date, s[5].date);
        assert_eq!(recs.last().unwrap().date, s[19].date);
    }

    #[test]
    fn beta_against_itself_is_one_and_constant_benchmark_is_undefined() {
        let closes = zigzag(30, 0.03);
        let s = series("A", &closes, &closes);
        for r in compute_fund_metrics(&s, &small_cfg(10)) {
            assert!((r.beta.unwrap() - 1.0).abs() < 1e-9);
        }

        let flat = vec![10.0; 30];
        let s = series("A", &closes, &flat);
        for r in compute_fund_metrics(&s, &small_cfg(10)) {
            assert_eq!(r.beta, None);
        }
    }

    #[test]
    fn max_drawdown_of_known_path() {
        // 100 -> 110 -> 88 -> 99: peak 110, trough 88 => 20%.
        let r = [0.10, -0.20, 0.125];
        assert!((max_drawdown(&r) - 0.20).abs() < 1e-12);
        assert_eq!(max_drawdown(&[0.01, 0.0, 0.02]), 0.0);
    }

    #[test]
    fn var_uses_linear_interpolation() {
        let sorted: Vec<f64> = (0..=20).map(|i| i as f64).collect();
        assert!((quantile_sorted(&sorted, 0.05) - 1.0).abs() < 1e-12);
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile_sorted(&sorted, 0.05) - 1.15).abs() < 1e-12);
    }

    #[test]
    fn sharpe_and_sortino_share_the_window_mean() {
        let closes = zigzag(40, 0.02);
        let s = series("A", &closes, &closes);
        let cfg = small_cfg(20);
        let returns = daily_returns(s.iter().map(|o| o.close_price));
        let recs = compute_fund_metrics(&s, &cfg);
        let last = recs.last().unwrap();

        let w = &returns[returns.len() - 20..];
        let m = w.iter().sum::<f64>() / 20.0;
        let sd = (w.iter().map(|x| (x - m).powi(2)).sum::<f64>() / 19.0).sqrt() * 252f64.sqrt();
        assert!((last.volatility - sd).abs() < 1e-12);
        assert!((last.sharpe_ratio.unwrap() - m * 252.0 / sd).abs() < 1e-9);
        assert!(
            (last.sortino_ratio.unwrap() - m * 252.0 / last.downside_deviation).abs() < 1e-9
        );
    }

    #[test]
    fn clean_series_drops_bad_rows_and_duplicate_dates() {
        let mut s = series("A", &[10.0, 11.0, f64::NAN, 12.0, -1.0], &[1.0; 5]);
        let dup = PriceObservation {
            close_price: 99.0,
            ..s[1].clone()
        };
        s.push(dup);
        s.reverse();
        let cleaned = clean_series(s);
        let closes: Vec<f64> = cleaned.iter().map(|o| o.close_price).collect();
        assert_eq!(closes.len(), 3);
        assert!(cleaned.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn metrics_are_idempotent() {
        let mut prices = BTreeMap::new();
        for (id, amp) in [("A", 0.01), ("B", 0.03), ("C", 0.05)] {
            prices.insert(id.to_string(), series(id, &zigzag(200, amp), &zigzag(200, 0.02)));
        }
        let cfg = EngineConfig::default();
        let a = compute_universe_metrics(&prices, &cfg);
        let b = compute_universe_metrics(&prices, &cfg);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn trailing_helpers() {
        let s = series("A", &[100.0, 105.0, 110.0, 120.0], &[1.0; 4]);
        assert!((trailing_return_pct(&s, 3).unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(trailing_return_pct(&s, 4), None);
        assert!((recent_avg_volume(&s, 2).unwrap() - 1002.5).abs() < 1e-9);
    }
}
