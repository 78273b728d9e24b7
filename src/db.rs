use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::models::{BandKey, ReportRow, RubricRow};

const IDENTITY_COLUMNS: [&str; 5] = ["tech_id", "full_name", "class_type", "pc_org", "fiscal_month"];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_band<'e, E>(executor: E, row: &RubricRow, band_order: i32) -> anyhow::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO teamoptix.rubric_bands
        (id, class_type, pc_org, kpi_key, band_key, min_value, max_value, score_value, band_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (class_type, COALESCE(pc_org, ''), kpi_key, band_key) DO UPDATE
        SET min_value = EXCLUDED.min_value,
            max_value = EXCLUDED.max_value,
            score_value = EXCLUDED.score_value,
            band_order = EXCLUDED.band_order,
            updated_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&row.class_type)
    .bind(&row.pc_org)
    .bind(&row.kpi_key)
    .bind(row.band_key.as_str())
    .bind(row.min_value)
    .bind(row.max_value)
    .bind(row.score_value)
    .bind(band_order)
    .execute(executor)
    .await?;
    Ok(())
}

/// Position of each band among the bands of its own
/// `(class_type, pc_org, kpi_key)` scope, in input order.
pub fn order_within_scope(rows: &[RubricRow]) -> Vec<i32> {
    let mut next: HashMap<(&str, Option<&str>, &str), i32> = HashMap::new();
    rows.iter()
        .map(|row| {
            let slot = next
                .entry((row.class_type.as_str(), row.pc_org.as_deref(), row.kpi_key.as_str()))
                .or_insert(0);
            let order = *slot;
            *slot += 1;
            order
        })
        .collect()
}

async fn upsert_metrics(
    pool: &PgPool,
    tech_id: &str,
    full_name: &str,
    class_type: &str,
    pc_org: Option<&str>,
    fiscal_month: NaiveDate,
    metrics: &Value,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO teamoptix.tech_metrics
        (id, tech_id, full_name, class_type, pc_org, fiscal_month, metrics)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tech_id, class_type, fiscal_month) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            pc_org = EXCLUDED.pc_org,
            metrics = EXCLUDED.metrics
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tech_id)
    .bind(full_name)
    .bind(class_type)
    .bind(pc_org)
    .bind(fiscal_month)
    .bind(metrics)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

fn seed_band(
    class_type: &str,
    kpi_key: &str,
    band_key: BandKey,
    min_value: Option<f64>,
    max_value: Option<f64>,
    score_value: f64,
) -> RubricRow {
    RubricRow {
        kpi_key: kpi_key.to_string(),
        band_key,
        min_value,
        max_value,
        score_value: Some(score_value),
        class_type: class_type.to_string(),
        pc_org: None,
    }
}

fn with_org(mut row: RubricRow, pc_org: &str) -> RubricRow {
    row.pc_org = Some(pc_org.to_string());
    row
}

/// Seed rubrics. Neighbouring bands share their boundary value and the
/// better band is listed first, so a boundary value takes the better band
/// and no value falls between bands.
pub fn seed_bands() -> Vec<RubricRow> {
    use BandKey::{Exceeds, Meets, Misses, NeedsImprovement};

    let mut bands = Vec::new();
    for class_type in ["P4P", "SMART", "TECH"] {
        bands.extend([
            seed_band(class_type, "tnps_score", Exceeds, Some(90.0), None, 4.0),
            seed_band(class_type, "tnps_score", Meets, Some(70.0), Some(90.0), 3.0),
            seed_band(class_type, "tnps_score", NeedsImprovement, Some(60.0), Some(70.0), 2.0),
            seed_band(class_type, "tnps_score", Misses, None, Some(60.0), 1.0),
            seed_band(class_type, "ftr_rate", Exceeds, Some(95.0), None, 4.0),
            seed_band(class_type, "ftr_rate", Meets, Some(88.0), Some(95.0), 3.0),
            seed_band(class_type, "ftr_rate", NeedsImprovement, Some(82.0), Some(88.0), 2.0),
            seed_band(class_type, "ftr_rate", Misses, None, Some(82.0), 1.0),
            seed_band(class_type, "tool_usage_rate", Exceeds, Some(0.95), None, 4.0),
            seed_band(class_type, "tool_usage_rate", Meets, Some(0.85), Some(0.95), 3.0),
            seed_band(class_type, "tool_usage_rate", Misses, None, Some(0.85), 1.0),
            seed_band(class_type, "pure_pass_rate", Exceeds, Some(92.0), None, 4.0),
            seed_band(class_type, "pure_pass_rate", Meets, Some(85.0), Some(92.0), 3.0),
            seed_band(class_type, "pure_pass_rate", Misses, None, Some(85.0), 1.0),
            // lower is better
            seed_band(class_type, "repeat_rate", Exceeds, None, Some(2.0), 4.0),
            seed_band(class_type, "repeat_rate", Meets, Some(2.0), Some(4.0), 3.0),
            seed_band(class_type, "repeat_rate", Misses, Some(4.0), None, 1.0),
            seed_band(class_type, "rework_rate", Exceeds, None, Some(1.5), 4.0),
            seed_band(class_type, "rework_rate", Meets, Some(1.5), Some(3.0), 3.0),
            seed_band(class_type, "rework_rate", Misses, Some(3.0), None, 1.0),
        ]);
    }

    bands.extend([
        with_org(seed_band("P4P", "tnps_score", Exceeds, Some(92.0), None, 5.0), "PC-410"),
        with_org(seed_band("P4P", "tnps_score", Meets, Some(75.0), Some(92.0), 3.0), "PC-410"),
        with_org(seed_band("P4P", "tnps_score", NeedsImprovement, Some(62.0), Some(75.0), 2.0), "PC-410"),
        with_org(seed_band("P4P", "tnps_score", Misses, None, Some(62.0), 1.0), "PC-410"),
    ]);

    bands
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let bands = seed_bands();
    for (band, order) in bands.iter().zip(order_within_scope(&bands)) {
        upsert_band(pool, band, order).await?;
    }

    let fiscal_month = NaiveDate::from_ymd_opt(2026, 9, 1).context("invalid date")?;
    let technicians = vec![
        ("T1001", "Dana Ortiz", "P4P", "PC-410", json!({ "tnps_score": 93.4, "ftr_rate": 91.2, "tool_usage_rate": 0.97 })),
        ("T1002", "Marcus Bell", "P4P", "PC-410", json!({ "tnps_score": 68.0, "ftr_rate": 84.5, "tool_usage_rate": 0.81 })),
        ("T1005", "Ines Duarte", "P4P", "PC-388", json!({ "tnps_score": 89.995, "ftr_rate": 95.0, "tool_usage_rate": 0.9 })),
        ("T1003", "Priya Nair", "SMART", "PC-522", json!({ "tnps_score": 81.0, "ftr_rate": 96.1, "repeat_rate": 1.8, "pure_pass_rate": 90.4 })),
        ("T1004", "Leo Grant", "TECH", "PC-522", json!({ "tnps_score": null, "ftr_rate": 79.3, "tool_usage_rate": 0.88, "repeat_rate": 5.2, "rework_rate": 2.4 })),
    ];

    for (tech_id, full_name, class_type, pc_org, metrics) in technicians {
        upsert_metrics(pool, tech_id, full_name, class_type, Some(pc_org), fiscal_month, &metrics)
            .await?;
    }

    tracing::info!(bands = bands.len(), "seeded rubric and metric rows");
    Ok(())
}

/// Org-scoped bands replace the class-wide bands of the same KPI.
pub fn prefer_org_scope(rows: Vec<RubricRow>, pc_org: Option<&str>) -> Vec<RubricRow> {
    let Some(pc_org) = pc_org else {
        return rows.into_iter().filter(|row| row.pc_org.is_none()).collect();
    };

    let overridden: HashSet<String> = rows
        .iter()
        .filter(|row| row.pc_org.as_deref() == Some(pc_org))
        .map(|row| row.kpi_key.clone())
        .collect();

    rows.into_iter()
        .filter(|row| match row.pc_org.as_deref() {
            Some(org) => org == pc_org,
            None => !overridden.contains(&row.kpi_key),
        })
        .collect()
}

pub async fn fetch_rubric(
    pool: &PgPool,
    class_type: &str,
    pc_org: Option<&str>,
) -> anyhow::Result<Vec<RubricRow>> {
    let records = sqlx::query(
        "SELECT kpi_key, band_key, min_value, max_value, score_value, class_type, pc_org \
         FROM teamoptix.rubric_bands \
         WHERE class_type = $1 AND (pc_org IS NULL OR pc_org = $2) \
         ORDER BY kpi_key, band_order, band_key",
    )
    .bind(class_type)
    .bind(pc_org)
    .fetch_all(pool)
    .await?;

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let band_key: String = record.get("band_key");
        rows.push(RubricRow {
            kpi_key: record.get("kpi_key"),
            band_key: band_key
                .parse()
                .with_context(|| format!("stored rubric band for class {class_type}"))?,
            min_value: record.get("min_value"),
            max_value: record.get("max_value"),
            score_value: record.get("score_value"),
            class_type: record.get("class_type"),
            pc_org: record.get("pc_org"),
        });
    }

    let rows = prefer_org_scope(rows, pc_org);
    tracing::debug!(class_type, ?pc_org, bands = rows.len(), "fetched rubric");
    Ok(rows)
}

pub async fn fetch_report_rows(
    pool: &PgPool,
    class_type: &str,
    fiscal_month: NaiveDate,
    pc_org: Option<&str>,
) -> anyhow::Result<Vec<ReportRow>> {
    let mut query = String::from(
        "SELECT tech_id, full_name, class_type, pc_org, fiscal_month, metrics \
         FROM teamoptix.tech_metrics \
         WHERE class_type = $1 AND fiscal_month = $2",
    );
    if pc_org.is_some() {
        query.push_str(" AND pc_org = $3");
    }
    query.push_str(" ORDER BY full_name");

    let mut rows = sqlx::query(&query).bind(class_type).bind(fiscal_month);
    if let Some(value) = pc_org {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut report_rows = Vec::with_capacity(records.len());

    for record in records {
        let tech_id: String = record.get("tech_id");
        let metrics: Value = record.get("metrics");
        let Value::Object(fields) = metrics else {
            anyhow::bail!("metrics for technician {tech_id} is not a JSON object");
        };

        report_rows.push(ReportRow {
            tech_id,
            full_name: record.get("full_name"),
            class_type: record.get("class_type"),
            pc_org: record.get("pc_org"),
            fiscal_month: record.get("fiscal_month"),
            fields: fields.into_iter().collect(),
        });
    }

    tracing::debug!(class_type, %fiscal_month, rows = report_rows.len(), "fetched report rows");
    Ok(report_rows)
}

/// Loads rubric bands from CSV. Each KPI named in the file is replaced as a
/// whole for its class type and org, so band order always follows the file.
pub async fn import_rubric_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        class_type: String,
        pc_org: Option<String>,
        kpi_key: String,
        band_key: String,
        min_value: Option<f64>,
        max_value: Option<f64>,
        score_value: Option<f64>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut bands = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        if row.kpi_key.trim().is_empty() {
            tracing::warn!(line = line + 2, "skipping rubric row with blank kpi_key");
            continue;
        }

        bands.push(RubricRow {
            kpi_key: row.kpi_key.trim().to_string(),
            band_key: row
                .band_key
                .parse()
                .with_context(|| format!("line {} of {}", line + 2, csv_path.display()))?,
            min_value: row.min_value,
            max_value: row.max_value,
            score_value: row.score_value,
            class_type: row.class_type.trim().to_string(),
            pc_org: row
                .pc_org
                .map(|org| org.trim().to_string())
                .filter(|org| !org.is_empty()),
        });
    }

    let mut tx = pool.begin().await?;

    let mut replaced = HashSet::new();
    for band in &bands {
        let scope = (band.class_type.as_str(), band.pc_org.as_deref(), band.kpi_key.as_str());
        if replaced.insert(scope) {
            sqlx::query(
                "DELETE FROM teamoptix.rubric_bands \
                 WHERE class_type = $1 AND COALESCE(pc_org, '') = COALESCE($2, '') AND kpi_key = $3",
            )
            .bind(scope.0)
            .bind(scope.1)
            .bind(scope.2)
            .execute(&mut *tx)
            .await?;
        }
    }

    for (band, order) in bands.iter().zip(order_within_scope(&bands)) {
        upsert_band(&mut *tx, band, order).await?;
    }

    tx.commit().await?;

    tracing::info!(
        imported = bands.len(),
        kpis = replaced.len(),
        path = %csv_path.display(),
        "imported rubric bands"
    );
    Ok(bands.len())
}

/// Every non-identity column becomes a metric. Numeric text is stored as a
/// JSON number, blanks are dropped, anything else is kept as text.
pub fn metrics_from_record(headers: &csv::StringRecord, record: &csv::StringRecord) -> Value {
    let mut metrics = BTreeMap::new();

    for (header, raw) in headers.iter().zip(record.iter()) {
        if IDENTITY_COLUMNS.contains(&header) {
            continue;
        }
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string()));
        metrics.insert(header.to_string(), value);
    }

    Value::Object(metrics.into_iter().collect())
}

pub async fn import_metrics_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|header| header == name);

    let tech_col = column("tech_id").context("metrics CSV needs a tech_id column")?;
    let name_col = column("full_name").context("metrics CSV needs a full_name column")?;
    let class_col = column("class_type").context("metrics CSV needs a class_type column")?;
    let month_col = column("fiscal_month").context("metrics CSV needs a fiscal_month column")?;
    let org_col = column("pc_org");

    let mut imported = 0usize;

    for result in reader.records() {
        let record = result?;
        let field = |index: usize| record.get(index).unwrap_or_default().trim();

        let fiscal_month = NaiveDate::parse_from_str(field(month_col), "%Y-%m-%d")
            .with_context(|| format!("invalid fiscal_month for technician {}", field(tech_col)))?;
        let pc_org = org_col.map(field).filter(|org| !org.is_empty());
        let metrics = metrics_from_record(&headers, &record);

        let affected = upsert_metrics(
            pool,
            field(tech_col),
            field(name_col),
            field(class_col),
            pc_org,
            fiscal_month,
            &metrics,
        )
        .await?;

        if affected > 0 {
            imported += 1;
        }
    }

    tracing::info!(imported, path = %csv_path.display(), "imported metric rows");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::standard_fields;
    use crate::rubric::{pick_band, RubricIndex};

    fn scoped(kpi_key: &str, band_key: BandKey, pc_org: Option<&str>) -> RubricRow {
        RubricRow {
            kpi_key: kpi_key.to_string(),
            band_key,
            min_value: None,
            max_value: None,
            score_value: None,
            class_type: "P4P".to_string(),
            pc_org: pc_org.map(str::to_string),
        }
    }

    #[test]
    fn org_bands_override_class_bands_per_kpi() {
        let rows = vec![
            scoped("ftr_rate", BandKey::Meets, None),
            scoped("tnps_score", BandKey::Meets, None),
            scoped("tnps_score", BandKey::Exceeds, Some("PC-410")),
        ];

        let picked = prefer_org_scope(rows, Some("PC-410"));

        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].kpi_key, "ftr_rate");
        assert_eq!(picked[1].pc_org.as_deref(), Some("PC-410"));
    }

    #[test]
    fn without_org_only_class_bands_are_kept() {
        let rows = vec![
            scoped("tnps_score", BandKey::Meets, None),
            scoped("tnps_score", BandKey::Exceeds, Some("PC-410")),
        ];

        let picked = prefer_org_scope(rows, None);

        assert_eq!(picked.len(), 1);
        assert!(picked[0].pc_org.is_none());
    }

    fn seeded(class_type: &str, pc_org: Option<&str>, kpi_key: &str) -> Vec<RubricRow> {
        let rows = seed_bands()
            .into_iter()
            .filter(|row| row.class_type == class_type)
            .collect();
        prefer_org_scope(rows, pc_org)
            .into_iter()
            .filter(|row| row.kpi_key == kpi_key)
            .collect()
    }

    #[test]
    fn seeded_bands_leave_no_value_unbanded() {
        let scopes = [("P4P", None), ("P4P", Some("PC-410")), ("SMART", None), ("TECH", None)];
        for (class_type, pc_org) in scopes {
            let rows = seed_bands()
                .into_iter()
                .filter(|row| row.class_type == class_type)
                .collect();
            let index = RubricIndex::build(prefer_org_scope(rows, pc_org));
            assert!(index.gaps().is_empty(), "{class_type} {pc_org:?}: {:?}", index.gaps());
            assert!(index.overlaps().is_empty(), "{class_type} {pc_org:?}");

            for kpi_key in index.kpi_keys() {
                let bands = index.bands(kpi_key);
                for band in bands {
                    for edge in [band.min_value, band.max_value].into_iter().flatten() {
                        for value in [edge - 0.005, edge, edge + 0.005] {
                            assert_ne!(
                                pick_band(Some(value), bands),
                                BandKey::NoData,
                                "{class_type} {pc_org:?} {kpi_key} at {value}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn seeded_boundaries_take_the_better_band() {
        let tnps = seeded("P4P", None, "tnps_score");
        assert_eq!(pick_band(Some(89.995), &tnps), BandKey::Meets);
        assert_eq!(pick_band(Some(90.0), &tnps), BandKey::Exceeds);
        assert_eq!(pick_band(Some(70.0), &tnps), BandKey::Meets);
        assert_eq!(pick_band(Some(60.0), &tnps), BandKey::NeedsImprovement);

        let repeat = seeded("SMART", None, "repeat_rate");
        assert_eq!(pick_band(Some(2.0), &repeat), BandKey::Exceeds);
        assert_eq!(pick_band(Some(2.005), &repeat), BandKey::Meets);
        assert_eq!(pick_band(Some(4.0), &repeat), BandKey::Meets);
    }

    #[test]
    fn seeded_org_override_keeps_a_full_rubric() {
        let tnps = seeded("P4P", Some("PC-410"), "tnps_score");

        assert_eq!(tnps.len(), 4);
        assert!(tnps.iter().all(|row| row.pc_org.as_deref() == Some("PC-410")));
        assert_eq!(pick_band(Some(68.0), &tnps), BandKey::NeedsImprovement);
        assert_eq!(pick_band(Some(81.0), &tnps), BandKey::Meets);
        assert_eq!(pick_band(Some(93.4), &tnps), BandKey::Exceeds);
    }

    #[test]
    fn partial_org_override_is_reported_as_gap() {
        let mut rows: Vec<RubricRow> = seed_bands()
            .into_iter()
            .filter(|row| row.class_type == "P4P" && row.pc_org.is_none())
            .collect();
        rows.push(RubricRow {
            pc_org: Some("PC-999".to_string()),
            ..seed_band("P4P", "tnps_score", BandKey::Exceeds, Some(92.0), None, 5.0)
        });

        let index = RubricIndex::build(prefer_org_scope(rows, Some("PC-999")));

        assert_eq!(pick_band(Some(68.0), index.bands("tnps_score")), BandKey::NoData);
        let gaps = index.gaps();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kpi_key, "tnps_score");
        assert_eq!((gaps[0].above, gaps[0].below), (None, Some(92.0)));
    }

    #[test]
    fn every_standard_field_has_seeded_bands() {
        for class_type in ["P4P", "SMART", "TECH"] {
            let index = RubricIndex::build(prefer_org_scope(
                seed_bands().into_iter().filter(|row| row.class_type == class_type).collect(),
                None,
            ));
            for spec in standard_fields(class_type) {
                let kpi_key = spec.kpi_key.unwrap();
                assert!(!index.bands(&kpi_key).is_empty(), "{class_type} {kpi_key}");
            }
        }
    }

    #[test]
    fn band_order_counts_within_each_scope() {
        let mut rows = vec![
            scoped("tnps_score", BandKey::Exceeds, None),
            scoped("ftr_rate", BandKey::Exceeds, None),
            scoped("tnps_score", BandKey::Meets, None),
            scoped("tnps_score", BandKey::Exceeds, Some("PC-410")),
        ];
        rows.push(RubricRow {
            class_type: "SMART".to_string(),
            ..scoped("tnps_score", BandKey::Misses, None)
        });
        rows.push(scoped("tnps_score", BandKey::Misses, None));

        assert_eq!(order_within_scope(&rows), vec![0, 0, 1, 0, 0, 2]);
    }

    #[test]
    fn metric_columns_exclude_identity_and_blanks() {
        let headers = csv::StringRecord::from(vec![
            "tech_id",
            "full_name",
            "class_type",
            "fiscal_month",
            "tnps_score",
            "ftr_rate",
            "notes",
        ]);
        let record = csv::StringRecord::from(vec![
            "T1001", "Dana Ortiz", "P4P", "2026-09-01", " 93.5 ", "", "late",
        ]);

        let metrics = metrics_from_record(&headers, &record);

        assert_eq!(metrics, json!({ "tnps_score": 93.5, "notes": "late" }));
    }
}
