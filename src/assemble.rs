use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::ReportSummary;
use crate::enrich::Narrative;
use crate::models::{ReportType, RiskLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub id: Uuid,
    pub report_type: ReportType,
    pub title: String,
    pub description: String,
    pub requested_by: String,
    pub generated_at: DateTime<Utc>,
    pub filters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedAnalysis {
    pub summary: ReportSummary,
    pub sections: serde_json::Value,
    pub technical_analysis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub narrative: String,
    pub enriched_fields: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compliance {
    pub certified_by: String,
    pub framework: String,
    pub retention_days: i64,
    pub disclaimer: String,
}

impl Compliance {
    pub fn standard() -> Self {
        Self {
            certified_by: "Consumer Risk Analytics Cell".to_string(),
            framework: "Distribution licensee revenue-protection reporting".to_string(),
            retention_days: 30,
            disclaimer: "Figures reflect the scoring snapshot at generation time; \
                         narrative sections may be system-templated."
                .to_string(),
        }
    }
}

/// The JSON form of this struct is what gets persisted as the report
/// payload; the CSV form is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub meta: ReportMeta,
    pub executive_summary: String,
    pub detailed_analysis: DetailedAnalysis,
    pub recommendations: Vec<String>,
    pub risk_assessment: RiskAssessment,
    pub compliance: Compliance,
}

pub fn assemble(
    meta: ReportMeta,
    summary: ReportSummary,
    sections: serde_json::Value,
    narrative: Narrative,
) -> ReportPayload {
    ReportPayload {
        meta,
        executive_summary: narrative.executive_summary,
        detailed_analysis: DetailedAnalysis {
            summary,
            sections,
            technical_analysis: narrative.technical_analysis,
        },
        recommendations: narrative.recommendations,
        risk_assessment: RiskAssessment {
            risk_level: narrative.risk_level,
            narrative: narrative.risk_narrative,
            enriched_fields: narrative.enriched_fields,
        },
        compliance: Compliance::standard(),
    }
}

pub fn to_json(payload: &ReportPayload) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(payload).context("failed to encode report payload")
}

pub fn from_json(value: &serde_json::Value) -> anyhow::Result<ReportPayload> {
    serde_json::from_value(value.clone()).context("stored report payload is malformed")
}

/// Flattened, section-delimited CSV rendering with a fixed section order.
pub fn to_csv(payload: &ReportPayload) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    let report_id = payload.meta.id.to_string();
    let generated_at = payload.meta.generated_at.to_rfc3339();
    writer.write_record(["Report", payload.meta.title.as_str()])?;
    writer.write_record(["Type", payload.meta.report_type.as_str()])?;
    writer.write_record(["Report ID", report_id.as_str()])?;
    writer.write_record(["Generated At", generated_at.as_str()])?;
    writer.write_record(["Requested By", payload.meta.requested_by.as_str()])?;
    writer.write_record([""])?;

    let summary = &payload.detailed_analysis.summary;
    writer.write_record([
        "Total Units",
        "High",
        "Medium",
        "Low",
        "Avg Risk Score",
        "Total Arrears",
        "Risk Level",
    ])?;
    writer.write_record([
        summary.total_units.to_string(),
        summary.high_count.to_string(),
        summary.medium_count.to_string(),
        summary.low_count.to_string(),
        format!("{:.2}", summary.avg_risk_score),
        format!("{:.2}", summary.total_arrears),
        payload.risk_assessment.risk_level.as_str().to_string(),
    ])?;
    writer.write_record([""])?;

    writer.write_record([
        "District",
        "Total Units",
        "High",
        "Medium",
        "Low",
        "Avg Risk Score",
        "SLA Compliance",
        "Total Arrears",
    ])?;
    for district in &summary.districts {
        writer.write_record([
            district.name.clone(),
            district.total_units.to_string(),
            district.high_count.to_string(),
            district.medium_count.to_string(),
            district.low_count.to_string(),
            format!("{:.2}", district.avg_risk_score),
            format!("{:.2}", district.sla_compliance),
            format!("{:.2}", district.total_arrears),
        ])?;
    }
    writer.write_record([""])?;

    writer.write_record(["URN", "Name", "District", "Risk Score", "Tier", "Arrears"])?;
    for unit in &summary.top_risk_units {
        writer.write_record([
            unit.urn.clone(),
            unit.name.clone(),
            unit.district.clone(),
            format!("{:.2}", unit.risk_score),
            unit.tier.as_str().to_string(),
            format!("{:.2}", unit.arrears),
        ])?;
    }
    writer.write_record([""])?;

    let narrative = format!(
        "{}\n\n{}\n\n{}",
        payload.executive_summary,
        payload.risk_assessment.narrative,
        payload.detailed_analysis.technical_analysis,
    );
    writer.write_record(["Narrative", narrative.as_str()])?;
    writer.write_record([""])?;

    writer.write_record(["#", "Recommendation"])?;
    for (index, recommendation) in payload.recommendations.iter().enumerate() {
        writer.write_record([(index + 1).to_string(), recommendation.clone()])?;
    }
    writer.write_record([""])?;

    let retention = payload.compliance.retention_days.to_string();
    writer.write_record(["Certified By", payload.compliance.certified_by.as_str()])?;
    writer.write_record(["Framework", payload.compliance.framework.as_str()])?;
    writer.write_record(["Retention Days", retention.as_str()])?;
    writer.write_record(["Disclaimer", payload.compliance.disclaimer.as_str()])?;

    let bytes = writer
        .into_inner()
        .context("failed to flush CSV assembly buffer")?;
    String::from_utf8(bytes).context("CSV assembly produced invalid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{summarize, tests::sample_unit};
    use crate::models::Tier;
    use std::collections::HashMap;

    fn fixture_payload() -> ReportPayload {
        let mut units = vec![
            sample_unit("TN001", "Chennai, North", 92.0, Tier::High, 84_500.0),
            sample_unit("TN002", "Madurai", 55.0, Tier::Medium, 4_200.0),
            sample_unit("TN003", "Salem", 12.0, Tier::Low, 0.0),
        ];
        units[0].name = "Mills \"Alpha\", Unit 7".to_string();
        let summary = summarize(&units, &HashMap::new());
        let meta = ReportMeta {
            id: Uuid::new_v4(),
            report_type: ReportType::DailySummary,
            title: "Daily Risk Summary".to_string(),
            description: "Daily overview".to_string(),
            requested_by: "ops@example.com".to_string(),
            generated_at: Utc::now(),
            filters: serde_json::Value::Null,
        };
        let narrative = Narrative {
            executive_summary: "Line one,\nwith a \"quoted\" phrase".to_string(),
            recommendations: vec!["Check unit TN001, then TN002".to_string()],
            risk_level: RiskLevel::Critical,
            risk_narrative: "High concentration in Chennai, North".to_string(),
            technical_analysis: "Scores skew high".to_string(),
            enriched_fields: 0,
        };
        assemble(meta, summary, serde_json::json!({}), narrative)
    }

    #[test]
    fn json_form_carries_all_narrative_and_numeric_content() {
        let payload = fixture_payload();
        let json = to_json(&payload).expect("encode");

        assert!(json["executive_summary"].is_string());
        assert!(json["detailed_analysis"]["technical_analysis"].is_string());
        assert!(json["risk_assessment"]["narrative"].is_string());
        assert_eq!(json["risk_assessment"]["risk_level"], "CRITICAL");
        assert!(json["recommendations"].is_array());
        assert_eq!(json["detailed_analysis"]["summary"]["total_units"], 3);
        assert_eq!(
            json["detailed_analysis"]["summary"]["districts"]
                .as_array()
                .map(|a| a.len()),
            Some(3)
        );

        let decoded = from_json(&json).expect("round trip");
        assert_eq!(decoded.meta.id, payload.meta.id);
    }

    #[test]
    fn malformed_payload_fails_decode() {
        let broken = serde_json::json!({ "meta": { "id": "not-a-uuid" } });
        assert!(from_json(&broken).is_err());
    }

    #[test]
    fn csv_fields_with_commas_and_quotes_reparse_unchanged() {
        let payload = fixture_payload();
        let rendered = to_csv(&payload).expect("render");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(rendered.as_bytes());
        let mut fields: Vec<String> = Vec::new();
        for record in reader.records() {
            let record = record.expect("valid CSV");
            fields.extend(record.iter().map(|f| f.to_string()));
        }

        assert!(fields.iter().any(|f| f == "Mills \"Alpha\", Unit 7"));
        assert!(fields.iter().any(|f| f == "Chennai, North"));
        assert!(fields
            .iter()
            .any(|f| f.contains("Line one,\nwith a \"quoted\" phrase")));
    }

    #[test]
    fn csv_sections_appear_in_fixed_order() {
        let payload = fixture_payload();
        let rendered = to_csv(&payload).expect("render");

        let report = rendered.find("Report,").expect("header section");
        let totals = rendered.find("Total Units,High").expect("summary section");
        let district = rendered.find("District,Total Units").expect("district table");
        let units = rendered.find("URN,Name").expect("unit table");
        let narrative = rendered.find("Narrative,").expect("narrative section");
        let recs = rendered.find("#,Recommendation").expect("recommendations");
        let certified = rendered.find("Certified By,").expect("compliance block");

        assert!(report < totals);
        assert!(totals < district);
        assert!(district < units);
        assert!(units < narrative);
        assert!(narrative < recs);
        assert!(recs < certified);
    }
}
