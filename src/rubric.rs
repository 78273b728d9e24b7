use std::collections::HashMap;

use crate::models::{BandGap, BandKey, BandOverlap, RubricRow};

/// Rubric bands grouped by KPI key. Bands keep the order they were supplied
/// in, which decides ties when ranges overlap.
#[derive(Debug, Clone, Default)]
pub struct RubricIndex {
    by_kpi: HashMap<String, Vec<RubricRow>>,
}

impl RubricIndex {
    pub fn build<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = RubricRow>,
    {
        let mut by_kpi: HashMap<String, Vec<RubricRow>> = HashMap::new();

        for row in rows {
            if row.kpi_key.trim().is_empty() {
                tracing::debug!(band = %row.band_key, "skipping rubric row with blank kpi key");
                continue;
            }
            by_kpi.entry(row.kpi_key.clone()).or_default().push(row);
        }

        Self { by_kpi }
    }

    pub fn bands(&self, kpi_key: &str) -> &[RubricRow] {
        self.by_kpi.get(kpi_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn kpi_keys(&self) -> impl Iterator<Item = &str> {
        let mut keys: Vec<&str> = self.by_kpi.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys.into_iter()
    }

    pub fn len(&self) -> usize {
        self.by_kpi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kpi.is_empty()
    }

    /// Pairs of bands under one KPI whose ranges intersect. Overlaps are
    /// reported, not rejected: lookups still take the first match. Bands
    /// that only share a boundary value do not count.
    pub fn overlaps(&self) -> Vec<BandOverlap> {
        let mut found = Vec::new();

        for kpi_key in self.kpi_keys() {
            let bands = self.bands(kpi_key);
            for (i, first) in bands.iter().enumerate() {
                for second in &bands[i + 1..] {
                    if ranges_intersect(first, second) {
                        found.push(BandOverlap {
                            kpi_key: kpi_key.to_string(),
                            first: first.band_key,
                            second: second.band_key,
                        });
                    }
                }
            }
        }

        found
    }

    /// Stretches of each KPI's value range that no band covers.
    pub fn gaps(&self) -> Vec<BandGap> {
        let mut found = Vec::new();

        for kpi_key in self.kpi_keys() {
            let mut spans: Vec<(f64, f64)> = self
                .bands(kpi_key)
                .iter()
                .map(|band| {
                    (
                        band.min_value.unwrap_or(f64::NEG_INFINITY),
                        band.max_value.unwrap_or(f64::INFINITY),
                    )
                })
                .filter(|(low, high)| low <= high)
                .collect();
            spans.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut reach = f64::NEG_INFINITY;
            let mut covered_any = false;
            for (low, high) in spans {
                if low > reach {
                    found.push(gap(kpi_key, covered_any.then_some(reach), Some(low)));
                }
                reach = reach.max(high);
                covered_any = true;
            }

            if !covered_any {
                found.push(gap(kpi_key, None, None));
            } else if reach < f64::INFINITY {
                found.push(gap(kpi_key, Some(reach), None));
            }
        }

        found
    }
}

fn gap(kpi_key: &str, above: Option<f64>, below: Option<f64>) -> BandGap {
    BandGap {
        kpi_key: kpi_key.to_string(),
        above,
        below,
    }
}

fn ranges_intersect(a: &RubricRow, b: &RubricRow) -> bool {
    let low = match (a.min_value, b.min_value) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) | (None, x) => x,
    };
    let high = match (a.max_value, b.max_value) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) | (None, x) => x,
    };

    match (low, high) {
        (Some(low), Some(high)) => low < high,
        _ => true,
    }
}

/// First band in `bands` whose inclusive range holds `value`.
pub fn pick_row(value: Option<f64>, bands: &[RubricRow]) -> Option<&RubricRow> {
    let value = value.filter(|v| v.is_finite())?;
    bands.iter().find(|band| band.contains(value))
}

pub fn pick_band(value: Option<f64>, bands: &[RubricRow]) -> BandKey {
    pick_row(value, bands)
        .map(|band| band.band_key)
        .unwrap_or(BandKey::NoData)
}
