use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::aggregate::ReportSummary;
use crate::models::{ReportType, RiskLevel};

const SYSTEM_PROMPT: &str = "You are an analyst for an electricity distribution \
utility's consumer risk desk. Provide concise, actionable prose.";
const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.2;

/// External text-generation endpoint. Implementations return generated
/// prose or an error; callers fall back to templates on any error.
pub trait TextGenerator: Sync {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<String>> + Send;
}

/// OpenAI-compatible chat-completions client. An absent credential is an
/// error, so every field takes the template path.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl TextGenerator for OpenAiClient {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not configured"))?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": prompt }
                ],
                "max_tokens": MAX_TOKENS,
                "temperature": TEMPERATURE,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("text generation failed: {status} - {body}");
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("text generation returned no choices"))?;
        Ok(content)
    }
}

#[derive(Debug, Clone)]
pub struct Narrative {
    pub executive_summary: String,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_narrative: String,
    pub technical_analysis: String,
    pub enriched_fields: usize,
}

/// Pure function of tier fractions. Identical whether or not the
/// external generator is reachable; escalation depends on it.
pub fn risk_level(summary: &ReportSummary) -> RiskLevel {
    if summary.total_units == 0 {
        return RiskLevel::Low;
    }
    let total = summary.total_units as f64;
    let high_fraction = summary.high_count as f64 / total;
    let medium_fraction = summary.medium_count as f64 / total;

    if high_fraction > 0.15 {
        RiskLevel::Critical
    } else if high_fraction > 0.10 || medium_fraction > 0.30 {
        RiskLevel::High
    } else if high_fraction > 0.05 || medium_fraction > 0.20 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}

/// Request the four prose fields concurrently and join before returning.
/// Each field degrades independently to its template on error; this never
/// fails the report.
pub async fn enrich<G: TextGenerator>(
    generator: &G,
    report_type: ReportType,
    summary: &ReportSummary,
) -> Narrative {
    let level = risk_level(summary);
    let context = summary_context(report_type, summary, level);

    let executive_prompt =
        format!("{context}\n\nWrite a 3-4 sentence executive summary for utility leadership.");
    let recommendations_prompt =
        format!("{context}\n\nList 3-5 prioritized operational recommendations, one per line.");
    let risk_prompt = format!(
        "{context}\n\nWrite a short risk assessment narrative for the {} level.",
        level.as_str()
    );
    let technical_prompt =
        format!("{context}\n\nWrite a technical analysis of the score distribution and trends.");

    let (executive, recommendations, risk_prose, technical) = tokio::join!(
        generator.generate(SYSTEM_PROMPT, &executive_prompt),
        generator.generate(SYSTEM_PROMPT, &recommendations_prompt),
        generator.generate(SYSTEM_PROMPT, &risk_prompt),
        generator.generate(SYSTEM_PROMPT, &technical_prompt),
    );

    let mut enriched_fields = 0;
    let executive_summary = match executive {
        Ok(text) => {
            enriched_fields += 1;
            text
        }
        Err(err) => {
            warn!(field = "executive_summary", %err, "enrichment failed, using template");
            template_executive(summary, level)
        }
    };
    let recommendations = match recommendations {
        Ok(text) => {
            enriched_fields += 1;
            parse_recommendations(&text)
        }
        Err(err) => {
            warn!(field = "recommendations", %err, "enrichment failed, using template");
            template_recommendations(summary, level)
        }
    };
    let risk_narrative = match risk_prose {
        Ok(text) => {
            enriched_fields += 1;
            text
        }
        Err(err) => {
            warn!(field = "risk_narrative", %err, "enrichment failed, using template");
            template_risk_narrative(summary, level)
        }
    };
    let technical_analysis = match technical {
        Ok(text) => {
            enriched_fields += 1;
            text
        }
        Err(err) => {
            warn!(field = "technical_analysis", %err, "enrichment failed, using template");
            template_technical(summary)
        }
    };

    Narrative {
        executive_summary,
        recommendations,
        risk_level: level,
        risk_narrative,
        technical_analysis,
        enriched_fields,
    }
}

fn summary_context(report_type: ReportType, summary: &ReportSummary, level: RiskLevel) -> String {
    let top_districts: Vec<&str> = summary
        .districts
        .iter()
        .filter(|d| d.high_count > 0)
        .take(5)
        .map(|d| d.name.as_str())
        .collect();

    format!(
        "Report type: {}\nTotal units: {}\nTier distribution: {} high / {} medium / {} low\n\
         Average risk score: {:.2}\nOutstanding arrears: {:.2}\nOverall risk level: {}\n\
         Districts with high-tier units: {}",
        report_type.as_str(),
        summary.total_units,
        summary.high_count,
        summary.medium_count,
        summary.low_count,
        summary.avg_risk_score,
        summary.total_arrears,
        level.as_str(),
        if top_districts.is_empty() {
            "none".to_string()
        } else {
            top_districts.join(", ")
        },
    )
}

fn parse_recommendations(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| strip_list_marker(line.trim()).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

// A digit run only counts as a marker when `.` or `)` follows; lines that
// start with a bare number ("24x7 monitoring") are content.
fn strip_list_marker(line: &str) -> &str {
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_digits.len() < line.len()
        && (after_digits.starts_with('.') || after_digits.starts_with(')'))
    {
        return after_digits[1..].trim_start();
    }
    line.trim_start_matches(['-', '*']).trim_start()
}

fn template_executive(summary: &ReportSummary, level: RiskLevel) -> String {
    format!(
        "Monitoring covers {} units with an average risk score of {:.1}. \
         {} units sit in the high tier and {} in the medium tier, for an \
         overall {} risk level. Outstanding arrears across the set total {:.2}.",
        summary.total_units,
        summary.avg_risk_score,
        summary.high_count,
        summary.medium_count,
        level.as_str(),
        summary.total_arrears,
    )
}

fn template_recommendations(summary: &ReportSummary, level: RiskLevel) -> Vec<String> {
    let mut recommendations = vec![format!(
        "Review the {} highest-risk units and schedule field follow-up",
        summary.top_risk_units.len()
    )];
    if matches!(level, RiskLevel::Critical | RiskLevel::High) {
        recommendations.push("Escalate high-tier districts to the operations lead".to_string());
    }
    if summary.total_arrears > 0.0 {
        recommendations.push(format!(
            "Target collection actions at {:.2} in outstanding arrears",
            summary.total_arrears
        ));
    }
    recommendations.push("Re-run the assessment after the next scoring cycle".to_string());
    recommendations
}

fn template_risk_narrative(summary: &ReportSummary, level: RiskLevel) -> String {
    let total = summary.total_units.max(1) as f64;
    format!(
        "Overall risk level is {}: {:.1}% of units are high tier and {:.1}% \
         are medium tier. {} units are trending toward deterioration.",
        level.as_str(),
        summary.high_count as f64 / total * 100.0,
        summary.medium_count as f64 / total * 100.0,
        summary.trend.deteriorating,
    )
}

fn template_technical(summary: &ReportSummary) -> String {
    format!(
        "Score distribution: {} improving (<50), {} stable (50-79), {} \
         deteriorating (>=80) across {} districts. Mean risk score {:.2}.",
        summary.trend.improving,
        summary.trend.stable,
        summary.trend.deteriorating,
        summary.districts.len(),
        summary.avg_risk_score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{summarize, tests::sample_unit};
    use crate::models::Tier;
    use std::collections::HashMap;

    pub struct FailingGenerator;

    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("endpoint unreachable")
        }
    }

    pub struct CannedGenerator(pub &'static str);

    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn summary_with(high: usize, medium: usize, low: usize) -> ReportSummary {
        let mut units = Vec::new();
        for i in 0..high {
            units.push(sample_unit(&format!("H{i}"), "Chennai", 85.0, Tier::High, 1.0));
        }
        for i in 0..medium {
            units.push(sample_unit(&format!("M{i}"), "Madurai", 55.0, Tier::Medium, 1.0));
        }
        for i in 0..low {
            units.push(sample_unit(&format!("L{i}"), "Salem", 20.0, Tier::Low, 1.0));
        }
        summarize(&units, &HashMap::new())
    }

    #[test]
    fn risk_level_follows_fraction_thresholds() {
        // 20% high fraction crosses the >15% rule.
        assert_eq!(risk_level(&summary_with(20, 30, 50)), RiskLevel::Critical);
        assert_eq!(risk_level(&summary_with(12, 0, 88)), RiskLevel::High);
        assert_eq!(risk_level(&summary_with(0, 31, 69)), RiskLevel::High);
        assert_eq!(risk_level(&summary_with(6, 0, 94)), RiskLevel::Moderate);
        assert_eq!(risk_level(&summary_with(0, 21, 79)), RiskLevel::Moderate);
        assert_eq!(risk_level(&summary_with(0, 0, 100)), RiskLevel::Low);
        assert_eq!(risk_level(&summary_with(0, 0, 0)), RiskLevel::Low);
    }

    #[tokio::test]
    async fn always_failing_generator_degrades_to_templates() {
        let summary = summary_with(20, 30, 50);
        let narrative = enrich(&FailingGenerator, ReportType::WeeklyAnalysis, &summary).await;

        assert_eq!(narrative.enriched_fields, 0);
        assert_eq!(narrative.risk_level, RiskLevel::Critical);
        assert!(!narrative.executive_summary.is_empty());
        assert!(!narrative.recommendations.is_empty());
        assert!(!narrative.risk_narrative.is_empty());
        assert!(!narrative.technical_analysis.is_empty());
    }

    #[tokio::test]
    async fn risk_level_is_independent_of_generated_text() {
        let summary = summary_with(20, 30, 50);
        let canned = enrich(
            &CannedGenerator("Everything is perfectly calm."),
            ReportType::RiskAssessment,
            &summary,
        )
        .await;
        let templated = enrich(&FailingGenerator, ReportType::RiskAssessment, &summary).await;
        assert_eq!(canned.risk_level, RiskLevel::Critical);
        assert_eq!(canned.risk_level, templated.risk_level);
        assert_eq!(canned.enriched_fields, 4);
    }

    #[test]
    fn recommendations_parse_strips_list_markers() {
        let parsed = parse_recommendations("1. First action\n- Second action\n\n3) Third");
        assert_eq!(parsed, vec!["First action", "Second action", "Third"]);
    }

    #[test]
    fn recommendations_parse_keeps_leading_numbers_in_content() {
        let parsed = parse_recommendations(
            "24x7 monitoring for feeder 3\n2. Inspect transformer bay\n90 day payment plan",
        );
        assert_eq!(
            parsed,
            vec![
                "24x7 monitoring for feeder 3",
                "Inspect transformer bay",
                "90 day payment plan",
            ]
        );
    }
}
