use crate::domain::fund::FundSnapshot;
use crate::domain::price::PriceObservation;
use crate::ingest::table::{cell, parse_date, parse_number, Table};
use crate::risk::metrics::clean_series;
use anyhow::Result;
use std::collections::BTreeMap;

// Header aliases: canonical name first, then data.go.kr / Korean export names.
const FUND_ID: &[&str] = &["fund_id", "srtnCd", "종목코드", "티커", "ticker"];
const DATE: &[&str] = &["date", "basDt", "일자", "날짜"];
const CLOSE: &[&str] = &["close_price", "clpr", "종가", "close"];
const BENCHMARK_CLOSE: &[&str] = &["benchmark_close_price", "bssIdxClpr", "기초지수종가"];
const VOLUME: &[&str] = &["volume", "trqu", "거래량"];

const NAME: &[&str] = &["name", "itmsNm", "종목명"];
const CATEGORY: &[&str] = &["category", "분류체계"];
const BASE_INDEX: &[&str] = &["base_index", "basIdxNm", "기초지수"];
const RETURN_1Y: &[&str] = &["return_1y", "1년수익률"];
const RETURN_3M: &[&str] = &["return_3m", "3개월수익률"];
const VOLATILITY: &[&str] = &["volatility", "변동성"];
const EXPENSE_RATIO: &[&str] = &["expense_ratio", "총보수"];
const AUM: &[&str] = &["aum", "자산규모"];
const AVG_VOLUME: &[&str] = &["avg_volume", "평균거래량", "거래량"];

/// Groups price rows by fund and cleans each series.
///
/// Rows with a blank id or an unparsable date are dropped here; invalid prices are dropped by
/// [`clean_series`].
pub fn prices_from_table(table: &Table) -> Result<BTreeMap<String, Vec<PriceObservation>>> {
    let id_col = table.require_column("fund_id", FUND_ID)?;
    let date_col = table.require_column("date", DATE)?;
    let close_col = table.require_column("close_price", CLOSE)?;
    let bench_col = table.require_column("benchmark_close_price", BENCHMARK_CLOSE)?;
    let volume_col = table.column(VOLUME);

    let mut grouped: BTreeMap<String, Vec<PriceObservation>> = BTreeMap::new();
    let mut skipped = 0usize;
    for row in table.rows() {
        let (Some(fund_id), Some(date)) = (
            cell(row, Some(id_col)),
            cell(row, Some(date_col)).and_then(parse_date),
        ) else {
            skipped += 1;
            continue;
        };

        grouped
            .entry(fund_id.to_string())
            .or_default()
            .push(PriceObservation {
                fund_id: fund_id.to_string(),
                date,
                close_price: cell(row, Some(close_col))
                    .and_then(parse_number)
                    .unwrap_or(f64::NAN),
                benchmark_close_price: cell(row, Some(bench_col))
                    .and_then(parse_number)
                    .unwrap_or(f64::NAN),
                volume: cell(row, volume_col).and_then(parse_number),
            });
    }

    let out: BTreeMap<String, Vec<PriceObservation>> = grouped
        .into_iter()
        .map(|(id, series)| (id, clean_series(series)))
        .collect();

    let observations: usize = out.values().map(Vec::len).sum();
    tracing::info!(
        rows = table.len(),
        skipped,
        funds = out.len(),
        observations,
        "loaded price series"
    );
    Ok(out)
}

/// One snapshot per fund id; the last row for a repeated id wins.
pub fn snapshots_from_table(table: &Table) -> Result<BTreeMap<String, FundSnapshot>> {
    let id_col = table.require_column("fund_id", FUND_ID)?;
    let name_col = table.column(NAME);
    let category_col = table.column(CATEGORY);
    let base_index_col = table.column(BASE_INDEX);
    let return_1y_col = table.column(RETURN_1Y);
    let return_3m_col = table.column(RETURN_3M);
    let volatility_col = table.column(VOLATILITY);
    let expense_col = table.column(EXPENSE_RATIO);
    let aum_col = table.column(AUM);
    let avg_volume_col = table.column(AVG_VOLUME);

    let number = |row: &csv::StringRecord, col: Option<usize>| cell(row, col).and_then(parse_number);

    let mut out = BTreeMap::new();
    let mut skipped = 0usize;
    for row in table.rows() {
        let Some(fund_id) = cell(row, Some(id_col)) else {
            skipped += 1;
            continue;
        };
        let snapshot = FundSnapshot {
            fund_id: fund_id.to_string(),
            name: cell(row, name_col).unwrap_or(fund_id).to_string(),
            category: cell(row, category_col).map(str::to_string),
            base_index: cell(row, base_index_col).map(str::to_string),
            return_1y: number(row, return_1y_col),
            return_3m: number(row, return_3m_col),
            volatility: number(row, volatility_col),
            expense_ratio: number(row, expense_col),
            aum: number(row, aum_col),
            avg_volume: number(row, avg_volume_col),
        };
        out.insert(snapshot.fund_id.clone(), snapshot);
    }

    tracing::info!(rows = table.len(), skipped, funds = out.len(), "loaded fund snapshots");
    Ok(out)
}
