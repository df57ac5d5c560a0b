use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db;
use crate::models::Report;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const ALERT_SCORE_FLOOR: f64 = 80.0;
const ALERT_SCAN_LIMIT: i64 = 200;

/// Notification sink. Record creation and outbound delivery are both
/// best-effort: report readiness never depends on either succeeding.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
        }
    }

    /// Record and deliver the completion notification for a report that
    /// just reached `ready`. Errors are logged and swallowed; a retry
    /// may produce a duplicate notification, which is acceptable.
    pub async fn report_ready(&self, pool: &PgPool, report: &Report) {
        let title = "Report Generated Successfully";
        let message = format!(
            "Your {} report is ready for download.",
            report.report_type.as_str().replace('_', " ")
        );

        match db::insert_notification(
            pool,
            &report.requested_by,
            Some(report.id),
            None,
            "report_ready",
            title,
            &message,
            "MEDIUM",
        )
        .await
        {
            Ok(id) => info!(notification_id = %id, report_id = %report.id, "notification recorded"),
            Err(err) => {
                warn!(report_id = %report.id, %err, "failed to record completion notification")
            }
        }

        self.deliver(&report.requested_by, title, &message).await;
    }

    /// Scan high-tier units and raise one `risk_alert` notification per
    /// recipient per unit per day.
    pub async fn scan_risk_alerts(
        &self,
        pool: &PgPool,
        recipients: &[String],
    ) -> anyhow::Result<usize> {
        let units = db::fetch_high_risk_units(pool, ALERT_SCORE_FLOOR, ALERT_SCAN_LIMIT).await?;
        let mut alerts_sent = 0usize;

        for unit in &units {
            for recipient in recipients {
                if db::has_alert_today(pool, recipient, &unit.urn).await? {
                    continue;
                }
                let title = format!("Critical Risk Alert: {}", unit.name);
                let message = format!(
                    "Unit {} ({}) in {} has a risk score of {:.0}. Immediate attention required.",
                    unit.name, unit.urn, unit.district, unit.risk_score
                );
                db::insert_notification(
                    pool,
                    recipient,
                    None,
                    Some(&unit.urn),
                    "risk_alert",
                    &title,
                    &message,
                    "HIGH",
                )
                .await?;
                self.deliver(recipient, &title, &message).await;
                alerts_sent += 1;
            }
        }

        info!(
            alerts_sent,
            units_checked = units.len(),
            "risk alert scan complete"
        );
        Ok(alerts_sent)
    }

    /// Fire the delivery webhook with a bounded timeout; failures are
    /// logged only.
    async fn deliver(&self, user_id: &str, title: &str, message: &str) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let request = self.client.post(url).json(&json!({
            "user_id": user_id,
            "title": title,
            "message": message,
        }));

        match tokio::time::timeout(DELIVERY_TIMEOUT, request.send()).await {
            Ok(Ok(response)) if response.status().is_success() => {}
            Ok(Ok(response)) => {
                warn!(user_id, status = %response.status(), "notification delivery rejected")
            }
            Ok(Err(err)) => warn!(user_id, %err, "notification delivery failed"),
            Err(_) => warn!(user_id, "notification delivery timed out"),
        }
    }
}
