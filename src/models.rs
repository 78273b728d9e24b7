use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BandKey {
    Exceeds,
    Meets,
    NeedsImprovement,
    Misses,
    NoData,
}

impl BandKey {
    pub const ALL: [BandKey; 5] = [
        BandKey::Exceeds,
        BandKey::Meets,
        BandKey::NeedsImprovement,
        BandKey::Misses,
        BandKey::NoData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BandKey::Exceeds => "EXCEEDS",
            BandKey::Meets => "MEETS",
            BandKey::NeedsImprovement => "NEEDS_IMPROVEMENT",
            BandKey::Misses => "MISSES",
            BandKey::NoData => "NO_DATA",
        }
    }
}

impl fmt::Display for BandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown band key '{0}'")]
pub struct ParseBandKeyError(pub String);

impl FromStr for BandKey {
    type Err = ParseBandKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "EXCEEDS" => Ok(BandKey::Exceeds),
            "MEETS" => Ok(BandKey::Meets),
            "NEEDS_IMPROVEMENT" => Ok(BandKey::NeedsImprovement),
            "MISSES" => Ok(BandKey::Misses),
            "NO_DATA" => Ok(BandKey::NoData),
            _ => Err(ParseBandKeyError(value.to_string())),
        }
    }
}

/// One scoring band of a KPI rubric. Bounds are inclusive; `None` leaves
/// that side open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricRow {
    pub kpi_key: String,
    pub band_key: BandKey,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub score_value: Option<f64>,
    pub class_type: String,
    pub pc_org: Option<String>,
}

impl RubricRow {
    pub fn contains(&self, value: f64) -> bool {
        self.min_value.is_none_or(|min| value >= min)
            && self.max_value.is_none_or(|max| value <= max)
    }
}

/// A technician's metric values for one fiscal month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub tech_id: String,
    pub full_name: String,
    pub class_type: String,
    pub pc_org: Option<String>,
    pub fiscal_month: NaiveDate,
    pub fields: BTreeMap<String, Value>,
}

impl ReportRow {
    /// Reads a field as a number. JSON numbers pass through, numeric strings
    /// are parsed, everything else is `None`.
    pub fn numeric(&self, field: &str) -> Option<f64> {
        match self.fields.get(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn band(&self, field: &str) -> BandKey {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .and_then(|text| text.parse().ok())
            .unwrap_or(BandKey::NoData)
    }
}

/// Which metric to band, against which KPI rubric, and where to put the
/// result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub source_field: String,
    pub kpi_key: Option<String>,
    pub output_field: String,
}

impl FieldSpec {
    pub fn new(source_field: &str, kpi_key: Option<&str>, output_field: &str) -> Self {
        Self {
            source_field: source_field.to_string(),
            kpi_key: kpi_key.map(str::to_string),
            output_field: output_field.to_string(),
        }
    }

    /// `tnps_score` banded against its own rubric into `__tnps_score_band_key`.
    pub fn for_metric(metric: &str) -> Self {
        Self::new(metric, Some(metric), &format!("__{metric}_band_key"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowScore {
    pub tech_id: String,
    pub full_name: String,
    pub points: f64,
    pub banded_fields: usize,
    pub no_data_fields: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub output_field: String,
    pub counts: BTreeMap<BandKey, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandOverlap {
    pub kpi_key: String,
    pub first: BandKey,
    pub second: BandKey,
}

/// A stretch of the value range no band of a KPI covers. `None` bounds are
/// unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct BandGap {
    pub kpi_key: String,
    pub above: Option<f64>,
    pub below: Option<f64>,
}

impl fmt::Display for BandGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.above, self.below) {
            (Some(above), Some(below)) => write!(f, "values between {above} and {below}"),
            (Some(above), None) => write!(f, "values above {above}"),
            (None, Some(below)) => write!(f, "values below {below}"),
            (None, None) => f.write_str("all values"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_keys_parse_loosely() {
        assert_eq!("needs-improvement".parse::<BandKey>().unwrap(), BandKey::NeedsImprovement);
        assert_eq!(" meets ".parse::<BandKey>().unwrap(), BandKey::Meets);
        assert_eq!("No Data".parse::<BandKey>().unwrap(), BandKey::NoData);
        assert_eq!("exceeds".parse::<BandKey>().unwrap(), BandKey::Exceeds);
    }

    #[test]
    fn unknown_band_key_is_rejected() {
        let err = "OUTSTANDING".parse::<BandKey>().unwrap_err();
        assert_eq!(err.0, "OUTSTANDING");
        assert_eq!(err.to_string(), "unknown band key 'OUTSTANDING'");
        assert!("".parse::<BandKey>().is_err());
    }

    #[test]
    fn band_key_text_round_trips() {
        for band in BandKey::ALL {
            assert_eq!(band.as_str().parse::<BandKey>().unwrap(), band);
            assert_eq!(band.to_string(), band.as_str());
            assert_eq!(serde_json::to_value(band).unwrap(), serde_json::json!(band.as_str()));
        }
    }

    #[test]
    fn gaps_describe_their_bounds() {
        let gap = |above, below| BandGap {
            kpi_key: "tnps_score".to_string(),
            above,
            below,
        };
        assert_eq!(gap(Some(69.0), Some(70.0)).to_string(), "values between 69 and 70");
        assert_eq!(gap(None, Some(60.0)).to_string(), "values below 60");
        assert_eq!(gap(Some(92.0), None).to_string(), "values above 92");
    }
}
