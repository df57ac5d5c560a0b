use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::filter::{Bind, FilterSpec};
use crate::models::{
    AlertEvent, Notification, Report, ReportStatus, ReportType, ShapDriver, Tier, Unit,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn apply_bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    bind: &Bind,
) -> Query<'q, Postgres, PgArguments> {
    match bind {
        Bind::Text(value) => query.bind(value.clone()),
        Bind::Number(value) => query.bind(*value),
        Bind::Flag(value) => query.bind(*value),
        Bind::TextArray(values) => query.bind(values.clone()),
    }
}

fn unit_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Unit> {
    let tier: String = row.get("tier");
    Ok(Unit {
        urn: row.get("urn"),
        name: row.get("name"),
        district: row.get("district"),
        service_no: row.get("service_no"),
        risk_score: row.get("risk_score"),
        tier: Tier::parse(&tier)?,
        kwh_consumption: row.get("kwh_consumption"),
        arrears: row.get("arrears"),
        disconnect_flag: row.get("disconnect_flag"),
        peer_percentile: row.get("peer_percentile"),
        last_updated: row.get("last_updated"),
        shap_drivers: Vec::new(),
        alert_history: Vec::new(),
    })
}

const UNIT_COLUMNS: &str = "urn, name, district, service_no, risk_score, tier, \
     kwh_consumption, arrears, disconnect_flag, peer_percentile, last_updated";

pub async fn fetch_units(
    pool: &PgPool,
    filter: &FilterSpec,
    updated_since: Option<DateTime<Utc>>,
) -> anyhow::Result<Vec<Unit>> {
    filter.validate()?;

    let mut sql = format!("SELECT {UNIT_COLUMNS} FROM grid_risk.units");
    let mut predicates = Vec::new();
    let mut first_param = 1;

    if updated_since.is_some() {
        predicates.push(format!("last_updated >= ${first_param}"));
        first_param += 1;
    }
    let (filter_sql, binds) = filter.to_sql(first_param);
    if !filter_sql.is_empty() {
        predicates.push(filter_sql);
    }
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }
    sql.push_str(" ORDER BY last_updated DESC, urn");

    let mut query = sqlx::query(&sql);
    if let Some(since) = updated_since {
        query = query.bind(since);
    }
    for bind in &binds {
        query = apply_bind(query, bind);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("failed to fetch units")?;
    rows.iter().map(unit_from_row).collect()
}

pub async fn fetch_high_risk_units(
    pool: &PgPool,
    min_score: f64,
    limit: i64,
) -> anyhow::Result<Vec<Unit>> {
    let rows = sqlx::query(&format!(
        "SELECT {UNIT_COLUMNS} FROM grid_risk.units \
         WHERE tier = 'high' AND risk_score >= $1 \
         ORDER BY risk_score DESC, urn LIMIT $2"
    ))
    .bind(min_score)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch high-risk units")?;
    rows.iter().map(unit_from_row).collect()
}

pub async fn hydrate_unit_details(pool: &PgPool, units: &mut [Unit]) -> anyhow::Result<()> {
    if units.is_empty() {
        return Ok(());
    }
    let urns: Vec<String> = units.iter().map(|u| u.urn.clone()).collect();

    let driver_rows = sqlx::query(
        "SELECT urn, feature, impact, observed FROM grid_risk.shap_drivers \
         WHERE urn = ANY($1) ORDER BY urn, position",
    )
    .bind(&urns)
    .fetch_all(pool)
    .await
    .context("failed to fetch risk drivers")?;

    let mut drivers: HashMap<String, Vec<ShapDriver>> = HashMap::new();
    for row in driver_rows {
        drivers
            .entry(row.get("urn"))
            .or_default()
            .push(ShapDriver {
                feature: row.get("feature"),
                impact: row.get("impact"),
                observed: row.get("observed"),
            });
    }

    let alert_rows = sqlx::query(
        "SELECT urn, occurred_at, alert_type, severity FROM grid_risk.alert_history \
         WHERE urn = ANY($1) ORDER BY urn, occurred_at",
    )
    .bind(&urns)
    .fetch_all(pool)
    .await
    .context("failed to fetch alert history")?;

    let mut alerts: HashMap<String, Vec<AlertEvent>> = HashMap::new();
    for row in alert_rows {
        let severity: String = row.get("severity");
        alerts
            .entry(row.get("urn"))
            .or_default()
            .push(AlertEvent {
                occurred_at: row.get("occurred_at"),
                alert_type: row.get("alert_type"),
                severity: Tier::parse(&severity)?,
            });
    }

    for unit in units.iter_mut() {
        unit.shap_drivers = drivers.remove(&unit.urn).unwrap_or_default();
        unit.alert_history = alerts.remove(&unit.urn).unwrap_or_default();
    }
    Ok(())
}

pub async fn count_alerts_since(pool: &PgPool, since: NaiveDate) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM grid_risk.alert_history WHERE occurred_at >= $1")
        .bind(since)
        .fetch_one(pool)
        .await
        .context("failed to count alerts")?;
    Ok(row.get("n"))
}

pub async fn fetch_sla_by_district(pool: &PgPool) -> anyhow::Result<HashMap<String, f64>> {
    let rows = sqlx::query("SELECT name, sla_compliance FROM grid_risk.district_stats")
        .fetch_all(pool)
        .await
        .context("failed to fetch district stats")?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("name"), row.get("sla_compliance")))
        .collect())
}

fn report_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Report> {
    let report_type: String = row.get("report_type");
    let status: String = row.get("status");
    Ok(Report {
        id: row.get("id"),
        report_type: ReportType::parse(&report_type)?,
        title: row.get("title"),
        description: row.get("description"),
        status: ReportStatus::parse(&status)?,
        filters: row.get("filters"),
        data: row.get("data"),
        requested_by: row.get("requested_by"),
        created_at: row.get("created_at"),
        generated_at: row.get("generated_at"),
        expires_at: row.get("expires_at"),
    })
}

pub async fn insert_report(
    pool: &PgPool,
    report_type: ReportType,
    requested_by: &str,
    filters: &serde_json::Value,
) -> anyhow::Result<Report> {
    let row = sqlx::query(
        r#"
        INSERT INTO grid_risk.reports
        (id, report_type, title, description, status, filters, requested_by)
        VALUES ($1, $2, $3, $4, 'generating', $5, $6)
        RETURNING id, report_type, title, description, status, filters, data,
                  requested_by, created_at, generated_at, expires_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(report_type.as_str())
    .bind(report_type.title())
    .bind(report_type.description())
    .bind(filters)
    .bind(requested_by)
    .fetch_one(pool)
    .await
    .context("failed to create report record")?;
    report_from_row(&row)
}

/// Compare-and-set transition to `ready`. Returns false when the report
/// already left the `generating` state, in which case nothing is written.
pub async fn finalize_report_ready(
    pool: &PgPool,
    report_id: Uuid,
    data: &serde_json::Value,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE grid_risk.reports \
         SET status = 'ready', data = $2, generated_at = now(), expires_at = $3 \
         WHERE id = $1 AND status = 'generating'",
    )
    .bind(report_id)
    .bind(data)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("failed to finalize report")?;
    Ok(result.rows_affected() > 0)
}

/// Compare-and-set transition to `failed`. No payload is attached.
pub async fn finalize_report_failed(pool: &PgPool, report_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE grid_risk.reports SET status = 'failed' \
         WHERE id = $1 AND status = 'generating'",
    )
    .bind(report_id)
    .execute(pool)
    .await
    .context("failed to mark report failed")?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_report(pool: &PgPool, report_id: Uuid) -> anyhow::Result<Report> {
    let row = sqlx::query(
        "SELECT id, report_type, title, description, status, filters, data, \
                requested_by, created_at, generated_at, expires_at \
         FROM grid_risk.reports WHERE id = $1",
    )
    .bind(report_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch report")?
    .ok_or_else(|| anyhow::anyhow!("report {report_id} not found"))?;
    report_from_row(&row)
}

pub async fn list_reports(
    pool: &PgPool,
    requested_by: &str,
    limit: i64,
) -> anyhow::Result<Vec<Report>> {
    let rows = sqlx::query(
        "SELECT id, report_type, title, description, status, filters, data, \
                requested_by, created_at, generated_at, expires_at \
         FROM grid_risk.reports WHERE requested_by = $1 \
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(requested_by)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list reports")?;
    rows.iter().map(report_from_row).collect()
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_notification(
    pool: &PgPool,
    user_id: &str,
    report_id: Option<Uuid>,
    urn: Option<&str>,
    notif_type: &str,
    title: &str,
    message: &str,
    severity: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO grid_risk.notifications
        (id, user_id, report_id, urn, notif_type, title, message, severity)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(report_id)
    .bind(urn)
    .bind(notif_type)
    .bind(title)
    .bind(message)
    .bind(severity)
    .execute(pool)
    .await
    .context("failed to insert notification")?;
    Ok(id)
}

pub async fn unread_notifications(
    pool: &PgPool,
    user_id: &str,
) -> anyhow::Result<Vec<Notification>> {
    let rows = sqlx::query(
        "SELECT id, user_id, report_id, urn, notif_type, title, message, severity, \
                created_at, read_at \
         FROM grid_risk.notifications \
         WHERE user_id = $1 AND read_at IS NULL \
         ORDER BY created_at DESC LIMIT 10",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch notifications")?;

    Ok(rows
        .into_iter()
        .map(|row| Notification {
            id: row.get("id"),
            user_id: row.get("user_id"),
            report_id: row.get("report_id"),
            urn: row.get("urn"),
            notif_type: row.get("notif_type"),
            title: row.get("title"),
            message: row.get("message"),
            severity: row.get("severity"),
            created_at: row.get("created_at"),
            read_at: row.get("read_at"),
        })
        .collect())
}

pub async fn mark_notification_read(
    pool: &PgPool,
    notification_id: Uuid,
    user_id: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE grid_risk.notifications SET read_at = now() \
         WHERE id = $1 AND user_id = $2 AND read_at IS NULL",
    )
    .bind(notification_id)
    .bind(user_id)
    .execute(pool)
    .await
    .context("failed to mark notification read")?;
    Ok(result.rows_affected() > 0)
}

pub async fn has_alert_today(pool: &PgPool, user_id: &str, urn: &str) -> anyhow::Result<bool> {
    let row = sqlx::query(
        "SELECT EXISTS( \
            SELECT 1 FROM grid_risk.notifications \
            WHERE user_id = $1 AND urn = $2 AND notif_type = 'risk_alert' \
              AND created_at >= date_trunc('day', now())) AS sent",
    )
    .bind(user_id)
    .bind(urn)
    .fetch_one(pool)
    .await
    .context("failed to check alert dedupe")?;
    Ok(row.get("sent"))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let districts = vec![
        ("Chennai North", 88.5),
        ("Madurai", 93.2),
        ("Salem", 96.1),
    ];
    for (name, sla) in districts {
        sqlx::query(
            r#"
            INSERT INTO grid_risk.district_stats (name, sla_compliance)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET sla_compliance = EXCLUDED.sla_compliance
            "#,
        )
        .bind(name)
        .bind(sla)
        .execute(pool)
        .await?;
    }

    let units = vec![
        (
            "TN-CHN-00412",
            "Sri Lakshmi Mills",
            "Chennai North",
            "04-412-8821",
            86.0,
            "high",
            vec![1840.0, 1790.0, 1712.0, 1650.0, 1498.0, 1355.0],
            184_500.0,
            false,
            94.0,
        ),
        (
            "TN-CHN-00973",
            "Anand Cold Storage",
            "Chennai North",
            "04-973-1144",
            74.5,
            "high",
            vec![960.0, 1010.0, 940.0, 905.0, 860.0, 790.0],
            52_300.0,
            true,
            88.0,
        ),
        (
            "TN-MDU-01518",
            "Meenakshi Traders",
            "Madurai",
            "12-518-6632",
            58.0,
            "medium",
            vec![420.0, 435.0, 410.0, 398.0, 402.0, 415.0],
            9_800.0,
            false,
            61.0,
        ),
        (
            "TN-SLM-02204",
            "Kavitha Residence",
            "Salem",
            "17-204-9913",
            22.0,
            "low",
            vec![210.0, 205.0, 216.0, 208.0, 211.0, 214.0],
            0.0,
            false,
            24.0,
        ),
    ];

    for (urn, name, district, service_no, score, tier, kwh, arrears, disconnect, percentile) in
        units
    {
        sqlx::query(
            r#"
            INSERT INTO grid_risk.units
            (urn, name, district, service_no, risk_score, tier, kwh_consumption,
             arrears, disconnect_flag, peer_percentile, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            ON CONFLICT (urn) DO UPDATE
            SET risk_score = EXCLUDED.risk_score, tier = EXCLUDED.tier,
                kwh_consumption = EXCLUDED.kwh_consumption,
                arrears = EXCLUDED.arrears,
                disconnect_flag = EXCLUDED.disconnect_flag,
                peer_percentile = EXCLUDED.peer_percentile,
                last_updated = now()
            "#,
        )
        .bind(urn)
        .bind(name)
        .bind(district)
        .bind(service_no)
        .bind(score)
        .bind(tier)
        .bind(kwh)
        .bind(arrears)
        .bind(disconnect)
        .bind(percentile)
        .execute(pool)
        .await?;
    }

    let drivers = vec![
        ("TN-CHN-00412", "arrears_growth_rate", 0.34, "3 consecutive billing cycles", 0),
        ("TN-CHN-00412", "consumption_decline", 0.27, "-26% over 6 months", 1),
        ("TN-CHN-00412", "payment_delay_days", 0.18, "avg 41 days", 2),
        ("TN-CHN-00973", "disconnect_history", 0.41, "2 disconnections in 12 months", 0),
        ("TN-CHN-00973", "arrears_growth_rate", 0.22, "2 consecutive billing cycles", 1),
    ];
    for (urn, feature, impact, observed, position) in drivers {
        sqlx::query(
            r#"
            INSERT INTO grid_risk.shap_drivers (id, urn, feature, impact, observed, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (urn, feature) DO UPDATE
            SET impact = EXCLUDED.impact, observed = EXCLUDED.observed,
                position = EXCLUDED.position
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(urn)
        .bind(feature)
        .bind(impact)
        .bind(observed)
        .bind(position)
        .execute(pool)
        .await?;
    }

    let alerts = vec![
        (
            "TN-CHN-00412",
            NaiveDate::from_ymd_opt(2026, 8, 12).context("invalid date")?,
            "payment_overdue",
            "high",
        ),
        (
            "TN-CHN-00412",
            NaiveDate::from_ymd_opt(2026, 8, 25).context("invalid date")?,
            "consumption_drop",
            "medium",
        ),
        (
            "TN-CHN-00973",
            NaiveDate::from_ymd_opt(2026, 8, 20).context("invalid date")?,
            "disconnect_risk",
            "high",
        ),
    ];
    for (urn, occurred_at, alert_type, severity) in alerts {
        sqlx::query(
            r#"
            INSERT INTO grid_risk.alert_history (id, urn, occurred_at, alert_type, severity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(urn)
        .bind(occurred_at)
        .bind(alert_type)
        .bind(severity)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// The consumption series arrives as a pipe-separated list.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        urn: String,
        name: String,
        district: String,
        service_no: String,
        risk_score: f64,
        tier: String,
        kwh_consumption: String,
        arrears: f64,
        disconnect_flag: bool,
        peer_percentile: f64,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        Tier::parse(&row.tier)?;
        let kwh: Vec<f64> = row
            .kwh_consumption
            .split('|')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .with_context(|| format!("bad consumption reading {part:?} for {}", row.urn))
            })
            .collect::<anyhow::Result<_>>()?;

        sqlx::query(
            r#"
            INSERT INTO grid_risk.units
            (urn, name, district, service_no, risk_score, tier, kwh_consumption,
             arrears, disconnect_flag, peer_percentile, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            ON CONFLICT (urn) DO UPDATE
            SET name = EXCLUDED.name, district = EXCLUDED.district,
                service_no = EXCLUDED.service_no, risk_score = EXCLUDED.risk_score,
                tier = EXCLUDED.tier, kwh_consumption = EXCLUDED.kwh_consumption,
                arrears = EXCLUDED.arrears, disconnect_flag = EXCLUDED.disconnect_flag,
                peer_percentile = EXCLUDED.peer_percentile, last_updated = now()
            "#,
        )
        .bind(&row.urn)
        .bind(&row.name)
        .bind(&row.district)
        .bind(&row.service_no)
        .bind(row.risk_score)
        .bind(&row.tier)
        .bind(&kwh)
        .bind(row.arrears)
        .bind(row.disconnect_flag)
        .bind(row.peer_percentile)
        .execute(pool)
        .await?;

        imported += 1;
    }

    Ok(imported)
}
