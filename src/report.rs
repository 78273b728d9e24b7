use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::annotate::{annotate, rank_rows};
use crate::models::{BandKey, BandSummary, FieldSpec, ReportRow};
use crate::rubric::RubricIndex;

pub fn summarize_bands(rows: &[ReportRow], fields: &[FieldSpec]) -> Vec<BandSummary> {
    fields
        .iter()
        .map(|spec| {
            let mut counts: BTreeMap<BandKey, usize> = BTreeMap::new();
            for row in rows {
                *counts.entry(row.band(&spec.output_field)).or_insert(0) += 1;
            }
            BandSummary {
                output_field: spec.output_field.clone(),
                counts,
            }
        })
        .collect()
}

fn format_counts(summary: &BandSummary) -> String {
    BandKey::ALL
        .iter()
        .filter_map(|band| {
            summary
                .counts
                .get(band)
                .map(|count| format!("{band} {count}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_report(
    scope: &str,
    fiscal_month: NaiveDate,
    rows: &[ReportRow],
    index: &RubricIndex,
    fields: &[FieldSpec],
) -> String {
    let annotated = annotate(rows, index, fields);
    let summaries = summarize_bands(&annotated, fields);
    let scores = rank_rows(rows, index, fields);

    let mut output = String::new();

    let _ = writeln!(output, "# KPI Band Report");
    let _ = writeln!(
        output,
        "Generated for {} (fiscal month {})",
        scope,
        fiscal_month.format("%Y-%m")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Band Distribution");

    if annotated.is_empty() {
        let _ = writeln!(output, "No metric rows recorded for this month.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {}", summary.output_field, format_counts(summary));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Technicians by Rubric Points");

    if scores.is_empty() {
        let _ = writeln!(output, "No technicians with metrics in this month.");
    } else {
        let header: Vec<&str> = fields.iter().map(|spec| spec.source_field.as_str()).collect();
        let _ = writeln!(output, "| Technician | Points | {} |", header.join(" | "));
        let _ = writeln!(output, "|---|---|{}", "---|".repeat(header.len()));

        let by_tech: BTreeMap<&str, &ReportRow> = annotated
            .iter()
            .map(|row| (row.tech_id.as_str(), row))
            .collect();

        for score in scores.iter() {
            let bands: Vec<String> = match by_tech.get(score.tech_id.as_str()) {
                Some(row) => fields
                    .iter()
                    .map(|spec| row.band(&spec.output_field).to_string())
                    .collect(),
                None => vec![BandKey::NoData.to_string(); fields.len()],
            };
            let _ = writeln!(
                output,
                "| {} ({}) | {:.1} | {} |",
                score.full_name,
                score.tech_id,
                score.points,
                bands.join(" | ")
            );
        }
    }

    let overlaps = index.overlaps();
    let gaps = index.gaps();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Rubric Warnings");

    let unconfigured: Vec<&str> = fields
        .iter()
        .filter_map(|spec| spec.kpi_key.as_deref())
        .filter(|kpi_key| index.bands(kpi_key).is_empty())
        .collect();

    if overlaps.is_empty() && gaps.is_empty() && unconfigured.is_empty() {
        let _ = writeln!(output, "No rubric issues detected.");
    } else {
        for overlap in overlaps.iter() {
            let _ = writeln!(
                output,
                "- {}: {} overlaps {} (first listed wins)",
                overlap.kpi_key, overlap.first, overlap.second
            );
        }
        for gap in gaps.iter() {
            let _ = writeln!(output, "- {}: no band covers {}", gap.kpi_key, gap);
        }
        for kpi_key in unconfigured {
            let _ = writeln!(output, "- {kpi_key}: no rubric bands configured");
        }
    }

    let no_data: Vec<&ReportRow> = annotated
        .iter()
        .filter(|row| {
            fields
                .iter()
                .any(|spec| row.band(&spec.output_field) == BandKey::NoData)
        })
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Missing Data");

    if no_data.is_empty() {
        let _ = writeln!(output, "Every technician has a band for every KPI.");
    } else {
        for row in no_data {
            let missing: Vec<&str> = fields
                .iter()
                .filter(|spec| row.band(&spec.output_field) == BandKey::NoData)
                .map(|spec| spec.source_field.as_str())
                .collect();
            let _ = writeln!(output, "- {} ({}): {}", row.full_name, row.tech_id, missing.join(", "));
        }
    }

    output
}
