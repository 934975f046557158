//! Aggregates over the caller's submissions. Everything is computed in
//! memory from a full scan; nothing is cached or persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::ApiError;
use crate::store::Filter;
use crate::submissions;
use crate::types::{GrowthStage, Submission, User};
use crate::AppState;

pub const DEFAULT_TREND_DAYS: i64 = 30;
/// Ten years; keeps the window start inside chrono's range
pub const MAX_TREND_DAYS: i64 = 3650;
const RECENT_LIMIT: usize = 5;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub total_submissions: usize,
    pub submissions_by_status: BTreeMap<String, usize>,
    pub submissions_by_stage: BTreeMap<String, usize>,
    pub recent_submissions: Vec<Submission>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Period {
    pub start_date: String,
    pub end_date: String,
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct Trends {
    pub daily_submissions: BTreeMap<String, usize>,
    /// field id -> stages in observation order
    pub stage_progression: BTreeMap<String, Vec<GrowthStage>>,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Summary,
    Detailed,
    FieldAnalysis,
}

impl ReportType {
    /// Unknown or missing types fall back to a summary
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("detailed") => ReportType::Detailed,
            Some("field_analysis") => ReportType::FieldAnalysis,
            _ => ReportType::Summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub total_submissions: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub stage_distribution: BTreeMap<String, usize>,
    pub condition_frequency: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct DetailedReport {
    pub submissions: Vec<Submission>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct FieldSummary {
    pub submission_count: usize,
    pub stages: BTreeMap<String, usize>,
    pub conditions: BTreeMap<String, usize>,
    pub latest_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FieldAnalysisReport {
    pub field_analysis: BTreeMap<String, FieldSummary>,
    pub total_fields: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReportData {
    Summary(SummaryReport),
    Detailed(DetailedReport),
    FieldAnalysis(FieldAnalysisReport),
}

#[derive(Debug, Serialize)]
pub struct Report {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub data: ReportData,
    pub generated_at: DateTime<Utc>,
}

pub async fn get_dashboard(state: &AppState, principal: &User) -> Result<Dashboard, ApiError> {
    let all = submissions::accessible(state, principal, Filter::new()).await?;
    Ok(dashboard(&all, Utc::now()))
}

pub async fn get_trends(
    state: &AppState,
    principal: &User,
    days: Option<i64>,
) -> Result<Trends, ApiError> {
    let all = submissions::accessible(state, principal, Filter::new()).await?;
    Ok(trends(&all, days.unwrap_or(DEFAULT_TREND_DAYS), Utc::now()))
}

/// `start_date` / `end_date` are inclusive `YYYY-MM-DD` bounds on the
/// creation date; values that do not parse are ignored.
pub async fn get_report(
    state: &AppState,
    principal: &User,
    report_type: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Report, ApiError> {
    let all = submissions::accessible(state, principal, Filter::new()).await?;
    Ok(report(
        all,
        ReportType::parse(report_type),
        start_date.and_then(parse_date),
        end_date.and_then(parse_date),
        Utc::now(),
    ))
}

pub fn dashboard(submissions: &[Submission], now: DateTime<Utc>) -> Dashboard {
    let mut recent: Vec<Submission> = submissions.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(RECENT_LIMIT);

    Dashboard {
        total_submissions: submissions.len(),
        submissions_by_status: count_by(submissions, |s| s.status.as_str()),
        submissions_by_stage: count_by(submissions, |s| s.growth_stage.as_str()),
        recent_submissions: recent,
        last_updated: now,
    }
}

pub fn trends(submissions: &[Submission], days: i64, now: DateTime<Utc>) -> Trends {
    let days = days.clamp(0, MAX_TREND_DAYS);
    let start = now - Duration::days(days);
    let in_window: Vec<&Submission> = submissions
        .iter()
        .filter(|s| s.created_at >= start && s.created_at <= now)
        .collect();

    let mut daily_submissions = BTreeMap::new();
    for s in &in_window {
        *daily_submissions
            .entry(s.created_at.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
    }

    let mut observations: BTreeMap<String, Vec<(DateTime<Utc>, GrowthStage)>> = BTreeMap::new();
    for s in in_window.iter().filter(|s| !s.field_id.is_empty()) {
        observations
            .entry(s.field_id.clone())
            .or_default()
            .push((s.date, s.growth_stage));
    }
    let stage_progression = observations
        .into_iter()
        .map(|(field_id, mut seen)| {
            seen.sort_by_key(|(date, _)| *date);
            (field_id, seen.into_iter().map(|(_, stage)| stage).collect())
        })
        .collect();

    Trends {
        daily_submissions,
        stage_progression,
        period: Period {
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: now.format("%Y-%m-%d").to_string(),
            days,
        },
    }
}

pub fn report(
    submissions: Vec<Submission>,
    report_type: ReportType,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Report {
    let selected: Vec<Submission> = submissions
        .into_iter()
        .filter(|s| {
            let day = s.created_at.date_naive();
            start.map_or(true, |start| day >= start) && end.map_or(true, |end| day <= end)
        })
        .collect();

    let data = match report_type {
        ReportType::Summary => ReportData::Summary(SummaryReport {
            total_submissions: selected.len(),
            status_distribution: count_by(&selected, |s| s.status.as_str()),
            stage_distribution: count_by(&selected, |s| s.growth_stage.as_str()),
            condition_frequency: condition_counts(selected.iter()),
        }),
        ReportType::Detailed => ReportData::Detailed(DetailedReport {
            total_count: selected.len(),
            submissions: selected,
        }),
        ReportType::FieldAnalysis => {
            let mut by_field: BTreeMap<String, Vec<&Submission>> = BTreeMap::new();
            for s in &selected {
                by_field.entry(s.field_id.clone()).or_default().push(s);
            }

            let field_analysis: BTreeMap<String, FieldSummary> = by_field
                .into_iter()
                .filter_map(|(field_id, group)| {
                    let latest_date = group.iter().map(|s| s.date).max()?;
                    Some((
                        field_id,
                        FieldSummary {
                            submission_count: group.len(),
                            stages: count_by(group.iter().copied(), |s| s.growth_stage.as_str()),
                            conditions: condition_counts(group.iter().copied()),
                            latest_date,
                        },
                    ))
                })
                .collect();

            ReportData::FieldAnalysis(FieldAnalysisReport {
                total_fields: field_analysis.len(),
                field_analysis,
            })
        }
    };

    Report {
        report_type,
        data,
        generated_at: now,
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn count_by<'a, I, F>(submissions: I, key: F) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a Submission>,
    F: Fn(&Submission) -> &str,
{
    let mut counts = BTreeMap::new();
    for s in submissions {
        *counts.entry(key(s).to_string()).or_insert(0) += 1;
    }
    counts
}

fn condition_counts<'a>(submissions: impl Iterator<Item = &'a Submission>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for s in submissions {
        for condition in &s.plant_conditions {
            *counts.entry(condition.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SubmissionStatus, TraitMeasurements};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 9, 0, 0).unwrap()
    }

    fn submission(
        id: &str,
        field_id: &str,
        created: u32,
        observed: u32,
        stage: GrowthStage,
        status: SubmissionStatus,
        conditions: &[&str],
    ) -> Submission {
        Submission {
            id: id.to_string(),
            user_id: "u1".to_string(),
            field_id: field_id.to_string(),
            date: at(observed),
            growth_stage: stage,
            plant_conditions: conditions.iter().map(|c| c.to_string()).collect(),
            trait_measurements: TraitMeasurements::default(),
            notes: String::new(),
            observer_name: "Ana".to_string(),
            images: vec![],
            status,
            created_at: at(created),
            updated_at: at(created),
        }
    }

    fn sample() -> Vec<Submission> {
        use GrowthStage::*;
        use SubmissionStatus::*;
        vec![
            submission("s1", "f1", 1, 1, Seedling, Submitted, &["healthy"]),
            submission("s2", "f1", 5, 4, Tillering, Approved, &["healthy", "weeds"]),
            submission("s3", "f2", 3, 3, Seedling, Submitted, &[]),
            submission("s4", "f1", 10, 10, Booting, UnderReview, &["pests"]),
            submission("s5", "f2", 8, 9, Tillering, Rejected, &["weeds"]),
            submission("s6", "f3", 9, 2, Seedling, Submitted, &[]),
        ]
    }

    #[test]
    fn test_dashboard() {
        let now = at(20);
        let dashboard = dashboard(&sample(), now);

        assert_eq!(dashboard.total_submissions, 6);
        assert_eq!(dashboard.submissions_by_status["submitted"], 3);
        assert_eq!(dashboard.submissions_by_status["under_review"], 1);
        assert_eq!(dashboard.submissions_by_stage["Seedling"], 3);
        assert_eq!(dashboard.submissions_by_stage["Booting"], 1);

        let recent: Vec<&str> = dashboard
            .recent_submissions
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(recent, ["s4", "s6", "s5", "s2", "s3"]);
        assert_eq!(dashboard.last_updated, now);
    }

    #[test]
    fn test_trends_window_and_progression() {
        let trends = trends(&sample(), 10, at(12));

        // s1 was created on the 1st, outside the 10 day window
        assert_eq!(trends.daily_submissions.values().sum::<usize>(), 5);
        assert_eq!(trends.daily_submissions["2024-06-05"], 1);
        assert!(!trends.daily_submissions.contains_key("2024-06-01"));

        assert_eq!(
            trends.stage_progression["f1"],
            vec![GrowthStage::Tillering, GrowthStage::Booting]
        );
        assert_eq!(
            trends.stage_progression["f2"],
            vec![GrowthStage::Seedling, GrowthStage::Tillering]
        );
        assert_eq!(trends.period.start_date, "2024-06-02");
        assert_eq!(trends.period.end_date, "2024-06-12");
        assert_eq!(trends.period.days, 10);
    }

    #[test]
    fn test_trend_window_is_clamped() {
        let now = at(12);

        let huge = trends(&sample(), 100_000_000, now);
        assert_eq!(huge.period.days, MAX_TREND_DAYS);
        assert_eq!(huge.daily_submissions.values().sum::<usize>(), 6);

        assert_eq!(trends(&sample(), i64::MAX, now).period.days, MAX_TREND_DAYS);

        let negative = trends(&sample(), i64::MIN, now);
        assert_eq!(negative.period.days, 0);
        assert!(negative.daily_submissions.is_empty());
    }

    #[test]
    fn test_summary_report_with_inclusive_dates() {
        let report = report(
            sample(),
            ReportType::parse(None),
            parse_date("2024-06-03"),
            parse_date("2024-06-09"),
            at(20),
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "summary");
        // s3 (3rd), s2 (5th), s5 (8th), s6 (9th)
        assert_eq!(json["data"]["total_submissions"], 4);
        assert_eq!(
            json["data"]["condition_frequency"],
            json!({"healthy": 1, "weeds": 2})
        );
        assert_eq!(json["data"]["stage_distribution"]["Seedling"], 2);
    }

    #[test]
    fn test_unparseable_dates_are_ignored() {
        let report = report(
            sample(),
            ReportType::parse(Some("detailed")),
            parse_date("yesterday"),
            parse_date("2024-13-40"),
            at(20),
        );

        match report.data {
            ReportData::Detailed(detailed) => {
                assert_eq!(detailed.total_count, 6);
                assert_eq!(detailed.submissions.len(), 6);
            }
            other => panic!("expected a detailed report, got {:?}", other),
        }
    }

    #[test]
    fn test_field_analysis() {
        let report = report(sample(), ReportType::parse(Some("field_analysis")), None, None, at(20));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["type"], "field_analysis");
        assert_eq!(json["data"]["total_fields"], 3);

        let f1 = &json["data"]["field_analysis"]["f1"];
        assert_eq!(f1["submission_count"], 3);
        assert_eq!(f1["stages"], json!({"Seedling": 1, "Tillering": 1, "Booting": 1}));
        assert_eq!(f1["conditions"], json!({"healthy": 2, "weeds": 1, "pests": 1}));
        assert_eq!(f1["latest_date"], json!(at(10)));
    }

    #[test]
    fn test_unknown_report_type_is_summary() {
        assert_eq!(ReportType::parse(Some("pie-chart")), ReportType::Summary);
    }
}
