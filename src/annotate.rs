use serde_json::Value;

use crate::models::{BandKey, FieldSpec, ReportRow, RowScore, RubricRow};
use crate::rubric::{pick_band, pick_row, RubricIndex};

const P4P_METRICS: &[&str] = &["tnps_score", "ftr_rate", "tool_usage_rate"];
const SMART_METRICS: &[&str] = &["tnps_score", "ftr_rate", "repeat_rate", "pure_pass_rate"];
const TECH_METRICS: &[&str] = &[
    "tnps_score",
    "ftr_rate",
    "tool_usage_rate",
    "repeat_rate",
    "rework_rate",
];

/// Built-in KPI fields for a class type. Unknown class types get the TECH set.
pub fn standard_fields(class_type: &str) -> Vec<FieldSpec> {
    let metrics = match class_type.trim().to_ascii_uppercase().as_str() {
        "P4P" => P4P_METRICS,
        "SMART" => SMART_METRICS,
        _ => TECH_METRICS,
    };
    metrics.iter().map(|metric| FieldSpec::for_metric(metric)).collect()
}

fn bands_for<'a>(index: &'a RubricIndex, spec: &FieldSpec) -> &'a [RubricRow] {
    spec.kpi_key
        .as_deref()
        .map(|kpi_key| index.bands(kpi_key))
        .unwrap_or(&[])
}

/// Returns copies of `rows` carrying one band field per spec. A KPI with no
/// rubric bands yields `NO_DATA` for that field.
pub fn annotate(rows: &[ReportRow], index: &RubricIndex, fields: &[FieldSpec]) -> Vec<ReportRow> {
    rows.iter()
        .map(|row| {
            let mut annotated = row.clone();
            for spec in fields {
                let band = pick_band(row.numeric(&spec.source_field), bands_for(index, spec));
                annotated
                    .fields
                    .insert(spec.output_field.clone(), Value::String(band.to_string()));
            }
            annotated
        })
        .collect()
}

/// Sums the rubric points of the bands a row falls in.
pub fn score_row(row: &ReportRow, index: &RubricIndex, fields: &[FieldSpec]) -> RowScore {
    let mut score = RowScore {
        tech_id: row.tech_id.clone(),
        full_name: row.full_name.clone(),
        points: 0.0,
        banded_fields: 0,
        no_data_fields: 0,
    };

    for spec in fields {
        match pick_row(row.numeric(&spec.source_field), bands_for(index, spec)) {
            Some(band) if band.band_key != BandKey::NoData => {
                score.banded_fields += 1;
                score.points += band.score_value.unwrap_or(0.0);
            }
            _ => score.no_data_fields += 1,
        }
    }

    score
}

pub fn rank_rows(rows: &[ReportRow], index: &RubricIndex, fields: &[FieldSpec]) -> Vec<RowScore> {
    let mut scores: Vec<RowScore> = rows
        .iter()
        .map(|row| score_row(row, index, fields))
        .collect();
    scores.sort_by(|a, b| {
        b.points
            .partial_cmp(&a.points)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    scores
}
