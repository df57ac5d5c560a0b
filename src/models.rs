use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored tiers are authoritative; `for_score` exists only to flag mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "low" => Ok(Tier::Low),
            "medium" => Ok(Tier::Medium),
            "high" => Ok(Tier::High),
            other => anyhow::bail!("unknown risk tier {other:?}"),
        }
    }

    pub fn for_score(score: f64) -> Self {
        if score > 70.0 {
            Tier::High
        } else if score >= 40.0 {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Critical,
    High,
    Moderate,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::High => "HIGH",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum ReportType {
    DailySummary,
    WeeklyAnalysis,
    DistrictPerformance,
    RiskAssessment,
    Custom,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::DailySummary => "daily_summary",
            ReportType::WeeklyAnalysis => "weekly_analysis",
            ReportType::DistrictPerformance => "district_performance",
            ReportType::RiskAssessment => "risk_assessment",
            ReportType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "daily_summary" => Ok(ReportType::DailySummary),
            "weekly_analysis" => Ok(ReportType::WeeklyAnalysis),
            "district_performance" => Ok(ReportType::DistrictPerformance),
            "risk_assessment" => Ok(ReportType::RiskAssessment),
            "custom" => Ok(ReportType::Custom),
            other => anyhow::bail!("unknown report type {other:?}"),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportType::DailySummary => "Daily Risk Summary",
            ReportType::WeeklyAnalysis => "Weekly Risk Analysis",
            ReportType::DistrictPerformance => "District Performance Report",
            ReportType::RiskAssessment => "High Risk Assessment",
            ReportType::Custom => "Custom Report",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReportType::DailySummary => "Daily overview of risk metrics and alerts",
            ReportType::WeeklyAnalysis => "Weekly trend analysis with narrative insights",
            ReportType::DistrictPerformance => "Comprehensive district performance analysis",
            ReportType::RiskAssessment => "Detailed assessment of high-risk units",
            ReportType::Custom => "Custom analysis based on supplied filters",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapDriver {
    pub feature: String,
    pub impact: f64,
    pub observed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub occurred_at: NaiveDate,
    pub alert_type: String,
    pub severity: Tier,
}

/// A monitored consumer account, created and updated by the upstream
/// ingestion process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub urn: String,
    pub name: String,
    pub district: String,
    pub service_no: String,
    pub risk_score: f64,
    pub tier: Tier,
    pub kwh_consumption: Vec<f64>,
    pub arrears: f64,
    pub disconnect_flag: bool,
    pub peer_percentile: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub shap_drivers: Vec<ShapDriver>,
    #[serde(default)]
    pub alert_history: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictSummary {
    pub name: String,
    pub total_units: usize,
    pub low_count: usize,
    pub medium_count: usize,
    pub high_count: usize,
    pub avg_risk_score: f64,
    pub sla_compliance: f64,
    pub total_arrears: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    Ready,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Generating => "generating",
            ReportStatus::Ready => "ready",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "generating" => Ok(ReportStatus::Generating),
            "ready" => Ok(ReportStatus::Ready),
            "failed" => Ok(ReportStatus::Failed),
            other => anyhow::bail!("unknown report status {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub report_type: ReportType,
    pub title: String,
    pub description: String,
    pub status: ReportStatus,
    pub filters: serde_json::Value,
    pub data: Option<serde_json::Value>,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub generated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub report_id: Option<Uuid>,
    pub urn: Option<String>,
    pub notif_type: String,
    pub title: String,
    pub message: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}
