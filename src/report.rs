use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Duration, NaiveTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregate::{self, ReportSummary};
use crate::assemble::{self, ReportMeta};
use crate::db;
use crate::enrich::{self, TextGenerator};
use crate::filter::FilterSpec;
use crate::models::{Report, ReportStatus, ReportType, Unit};
use crate::notify::Notifier;

pub const REPORT_TTL_DAYS: i64 = 30;
const RISK_ASSESSMENT_LIMIT: i64 = 50;
const DISTRICT_TOP_UNITS: usize = 5;
const RECENT_ALERTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

pub struct ReportPipeline<G> {
    pool: PgPool,
    generator: G,
    notifier: Notifier,
}

impl<G: TextGenerator> ReportPipeline<G> {
    pub fn new(pool: PgPool, generator: G, notifier: Notifier) -> Self {
        Self {
            pool,
            generator,
            notifier,
        }
    }

    /// Run one report generation to completion. The record is created in
    /// `generating` state and transitioned exactly once: to `ready` with
    /// the assembled payload, or to `failed` with none.
    pub async fn generate(
        &self,
        report_type: ReportType,
        requested_by: &str,
        filters: serde_json::Value,
    ) -> anyhow::Result<Report> {
        let report = db::insert_report(&self.pool, report_type, requested_by, &filters).await?;
        info!(
            report_id = %report.id,
            report_type = report_type.as_str(),
            "report generation started"
        );

        match self.build_payload(&report).await {
            Ok(data) => {
                let expires_at = Utc::now() + Duration::days(REPORT_TTL_DAYS);
                let transitioned =
                    db::finalize_report_ready(&self.pool, report.id, &data, expires_at).await?;
                if transitioned {
                    self.notifier.report_ready(&self.pool, &report).await;
                    info!(report_id = %report.id, "report ready");
                } else {
                    warn!(report_id = %report.id, "report already finalized, skipping write");
                }
                db::get_report(&self.pool, report.id).await
            }
            Err(err) => {
                if let Err(finalize_err) = db::finalize_report_failed(&self.pool, report.id).await {
                    error!(report_id = %report.id, %finalize_err, "failed to record failure");
                }
                Err(err.context(format!("report {} generation failed", report.id)))
            }
        }
    }

    /// Fetch, aggregate, enrich, assemble, encode. Any error here is
    /// fatal to the report; enrichment degradation is handled inside
    /// `enrich` and never surfaces as an error.
    async fn build_payload(&self, report: &Report) -> anyhow::Result<serde_json::Value> {
        let filter = FilterSpec::from_json(&report.filters)?;
        let sla = db::fetch_sla_by_district(&self.pool).await?;
        let today = Utc::now().date_naive();

        let (units, mut sections) = match report.report_type {
            ReportType::DailySummary => {
                let start_of_day = today.and_time(NaiveTime::MIN).and_utc();
                let units = db::fetch_units(&self.pool, &filter, Some(start_of_day)).await?;
                let alerts_today = db::count_alerts_since(&self.pool, today).await?;
                let sections = json!({
                    "date": today,
                    "alerts_today": alerts_today,
                });
                (units, sections)
            }
            ReportType::WeeklyAnalysis => {
                let units = db::fetch_units(&self.pool, &filter, None).await?;
                let alerts_this_week =
                    db::count_alerts_since(&self.pool, today - Duration::days(7)).await?;
                let sections = json!({
                    "period": "Last 7 days",
                    "alerts_this_week": alerts_this_week,
                });
                (units, sections)
            }
            ReportType::DistrictPerformance => {
                let units = db::fetch_units(&self.pool, &filter, None).await?;
                (units, json!({}))
            }
            ReportType::RiskAssessment => {
                let mut units =
                    db::fetch_high_risk_units(&self.pool, 0.0, RISK_ASSESSMENT_LIMIT).await?;
                db::hydrate_unit_details(&self.pool, &mut units).await?;
                let sections = risk_assessment_sections(&units);
                (units, sections)
            }
            ReportType::Custom => {
                let units = db::fetch_units(&self.pool, &filter, None).await?;
                let sections = json!({ "filters_applied": report.filters });
                (units, sections)
            }
        };

        let summary = aggregate::summarize(&units, &sla);
        if report.report_type == ReportType::DistrictPerformance {
            sections = district_sections(&summary, &units);
        }

        let narrative = enrich::enrich(&self.generator, report.report_type, &summary).await;
        let meta = ReportMeta {
            id: report.id,
            report_type: report.report_type,
            title: report.title.clone(),
            description: report.description.clone(),
            requested_by: report.requested_by.clone(),
            generated_at: Utc::now(),
            filters: report.filters.clone(),
        };
        assemble::to_json(&assemble::assemble(meta, summary, sections, narrative))
    }

    pub async fn get(&self, report_id: Uuid) -> anyhow::Result<Report> {
        db::get_report(&self.pool, report_id).await
    }

    pub async fn list(&self, requested_by: &str, limit: i64) -> anyhow::Result<Vec<Report>> {
        db::list_reports(&self.pool, requested_by, limit).await
    }

    /// Render a ready report in the requested encoding. Only `ready`
    /// reports expose a payload, and only until expiry.
    pub async fn export(
        &self,
        report_id: Uuid,
        format: ExportFormat,
    ) -> anyhow::Result<(String, Vec<u8>)> {
        let report = db::get_report(&self.pool, report_id).await?;
        anyhow::ensure!(
            report.status == ReportStatus::Ready,
            "report {} is not ready (status: {})",
            report.id,
            report.status.as_str()
        );
        if let Some(expires_at) = report.expires_at {
            anyhow::ensure!(expires_at > Utc::now(), "report {} has expired", report.id);
        }
        let data = report
            .data
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ready report {} has no payload", report.id))?;

        let (extension, bytes) = match format {
            ExportFormat::Json => (
                "json",
                serde_json::to_vec_pretty(data).context("failed to render JSON export")?,
            ),
            ExportFormat::Csv => {
                let payload = assemble::from_json(data)?;
                ("csv", assemble::to_csv(&payload)?.into_bytes())
            }
        };

        Ok((
            format!("{}.{extension}", sanitize_filename(&report.title)),
            bytes,
        ))
    }
}

pub fn store_export(dir: &Path, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let path = dir.join(filename);
    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to write export {}", path.display()))?;
    Ok(path)
}

fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// Alert history is trimmed to the most recent entries per unit.
fn risk_assessment_sections(units: &[Unit]) -> serde_json::Value {
    let trimmed: Vec<Unit> = units
        .iter()
        .map(|unit| {
            let mut unit = unit.clone();
            let skip = unit.alert_history.len().saturating_sub(RECENT_ALERTS);
            unit.alert_history.drain(..skip);
            unit
        })
        .collect();

    json!({
        "high_risk_units": trimmed,
        "risk_summary": {
            "critical_count": units.iter().filter(|u| u.risk_score > 90.0).count(),
            "high_count": units.iter().filter(|u| u.risk_score > 80.0).count(),
            "total_arrears": units.iter().map(|u| u.arrears).sum::<f64>(),
        },
    })
}

fn district_sections(summary: &ReportSummary, units: &[Unit]) -> serde_json::Value {
    let districts: Vec<serde_json::Value> = summary
        .districts
        .iter()
        .map(|district| {
            let members: Vec<Unit> = units
                .iter()
                .filter(|u| u.district == district.name)
                .cloned()
                .collect();
            json!({
                "name": district.name,
                "performance_score": aggregate::performance_score(district),
                "recommendations": aggregate::district_recommendations(district),
                "top_risk_units": aggregate::top_risk(&members, DISTRICT_TOP_UNITS),
            })
        })
        .collect();
    json!({ "districts": districts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{summarize, tests::sample_unit};
    use crate::models::Tier;
    use std::collections::HashMap;

    #[test]
    fn filenames_keep_only_alphanumerics() {
        assert_eq!(
            sanitize_filename("Daily Risk Summary (Aug/2026)"),
            "Daily_Risk_Summary__Aug_2026_"
        );
    }

    #[test]
    fn risk_assessment_sections_count_critical_bands() {
        let units = vec![
            sample_unit("A", "Chennai", 95.0, Tier::High, 10_000.0),
            sample_unit("B", "Chennai", 85.0, Tier::High, 5_000.0),
            sample_unit("C", "Madurai", 75.0, Tier::High, 2_000.0),
        ];
        let sections = risk_assessment_sections(&units);
        assert_eq!(sections["risk_summary"]["critical_count"], 1);
        assert_eq!(sections["risk_summary"]["high_count"], 2);
        assert_eq!(sections["risk_summary"]["total_arrears"], 17_000.0);
        assert_eq!(
            sections["high_risk_units"].as_array().map(|a| a.len()),
            Some(3)
        );
    }

    #[test]
    fn risk_assessment_sections_trim_alert_history() {
        let mut unit = sample_unit("A", "Chennai", 95.0, Tier::High, 0.0);
        for day in 1..=5 {
            unit.alert_history.push(crate::models::AlertEvent {
                occurred_at: chrono::NaiveDate::from_ymd_opt(2026, 8, day).unwrap(),
                alert_type: "payment_overdue".to_string(),
                severity: Tier::High,
            });
        }
        let sections = risk_assessment_sections(&[unit]);
        let alerts = sections["high_risk_units"][0]["alert_history"]
            .as_array()
            .expect("alert history array");
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0]["occurred_at"], "2026-08-03");
    }

    #[test]
    fn district_sections_cover_each_district() {
        let units = vec![
            sample_unit("A", "Chennai", 90.0, Tier::High, 1.0),
            sample_unit("B", "Chennai", 80.0, Tier::High, 1.0),
            sample_unit("C", "Madurai", 30.0, Tier::Low, 1.0),
        ];
        let summary = summarize(&units, &HashMap::from([("Chennai".to_string(), 85.0)]));
        let sections = district_sections(&summary, &units);
        let districts = sections["districts"].as_array().expect("districts");
        assert_eq!(districts.len(), 2);
        assert_eq!(districts[0]["name"], "Chennai");
        assert_eq!(
            districts[0]["top_risk_units"].as_array().map(|a| a.len()),
            Some(2)
        );
        assert_eq!(districts[0]["top_risk_units"][0]["urn"], "A");
    }
}
