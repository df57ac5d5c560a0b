use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{DistrictSummary, Tier, Unit};

pub const TOP_RISK_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopRiskUnit {
    pub urn: String,
    pub name: String,
    pub district: String,
    pub risk_score: f64,
    pub tier: Tier,
    pub arrears: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskTrend {
    pub improving: usize,
    pub stable: usize,
    pub deteriorating: usize,
}

/// An empty unit set yields zero counts and an empty top list, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_units: usize,
    pub low_count: usize,
    pub medium_count: usize,
    pub high_count: usize,
    pub avg_risk_score: f64,
    pub total_arrears: f64,
    pub top_risk_units: Vec<TopRiskUnit>,
    pub districts: Vec<DistrictSummary>,
    pub trend: RiskTrend,
}

pub fn summarize(units: &[Unit], sla_by_district: &HashMap<String, f64>) -> ReportSummary {
    flag_tier_mismatches(units);

    let total_units = units.len();
    let low_count = units.iter().filter(|u| u.tier == Tier::Low).count();
    let medium_count = units.iter().filter(|u| u.tier == Tier::Medium).count();
    let high_count = units.iter().filter(|u| u.tier == Tier::High).count();

    let avg_risk_score = if total_units == 0 {
        0.0
    } else {
        units.iter().map(|u| u.risk_score).sum::<f64>() / total_units as f64
    };
    let total_arrears = units.iter().map(|u| u.arrears).sum::<f64>();

    ReportSummary {
        total_units,
        low_count,
        medium_count,
        high_count,
        avg_risk_score,
        total_arrears,
        top_risk_units: top_risk(units, TOP_RISK_LIMIT),
        districts: district_summaries(units, sla_by_district),
        trend: trend_buckets(units),
    }
}

/// Top-N units by risk score descending. The sort is stable, so ties
/// keep their original fetch order.
pub fn top_risk(units: &[Unit], limit: usize) -> Vec<TopRiskUnit> {
    let mut ranked: Vec<&Unit> = units.iter().collect();
    ranked.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|u| TopRiskUnit {
            urn: u.urn.clone(),
            name: u.name.clone(),
            district: u.district.clone(),
            risk_score: u.risk_score,
            tier: u.tier,
            arrears: u.arrears,
        })
        .collect()
}

/// One summary per distinct district, in first-seen order.
pub fn district_summaries(
    units: &[Unit],
    sla_by_district: &HashMap<String, f64>,
) -> Vec<DistrictSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<&Unit>> = HashMap::new();

    for unit in units {
        if !grouped.contains_key(&unit.district) {
            order.push(unit.district.clone());
        }
        grouped.entry(unit.district.clone()).or_default().push(unit);
    }

    order
        .into_iter()
        .map(|district| {
            let members = &grouped[&district];
            let total = members.len();
            let avg = members.iter().map(|u| u.risk_score).sum::<f64>() / total as f64;
            DistrictSummary {
                total_units: total,
                low_count: members.iter().filter(|u| u.tier == Tier::Low).count(),
                medium_count: members.iter().filter(|u| u.tier == Tier::Medium).count(),
                high_count: members.iter().filter(|u| u.tier == Tier::High).count(),
                avg_risk_score: avg,
                sla_compliance: sla_by_district.get(&district).copied().unwrap_or(0.0),
                total_arrears: members.iter().map(|u| u.arrears).sum(),
                name: district,
            }
        })
        .collect()
}

pub fn trend_buckets(units: &[Unit]) -> RiskTrend {
    let mut trend = RiskTrend::default();
    for unit in units {
        if unit.risk_score >= 80.0 {
            trend.deteriorating += 1;
        } else if unit.risk_score >= 50.0 {
            trend.stable += 1;
        } else {
            trend.improving += 1;
        }
    }
    trend
}

pub fn performance_score(district: &DistrictSummary) -> i64 {
    let risk_weight = (100.0 - district.avg_risk_score) * 0.4;
    let compliance_weight = district.sla_compliance * 0.3;
    let alert_weight = (100.0 - district.high_count as f64 * 10.0).max(0.0) * 0.3;
    (risk_weight + compliance_weight + alert_weight).round() as i64
}

pub fn district_recommendations(district: &DistrictSummary) -> Vec<String> {
    let mut recommendations = Vec::new();
    if district.avg_risk_score > 70.0 {
        recommendations
            .push("Increase field team presence for high-risk unit management".to_string());
    }
    if district.high_count > 10 {
        recommendations
            .push("Implement immediate intervention program for critical alerts".to_string());
    }
    if district.sla_compliance < 90.0 {
        recommendations.push("Review and improve service delivery processes".to_string());
    }
    recommendations
}

// Stored tier stays authoritative; a disagreeing score is logged, not rewritten.
fn flag_tier_mismatches(units: &[Unit]) {
    for unit in units {
        let expected = Tier::for_score(unit.risk_score);
        if expected != unit.tier {
            warn!(
                urn = %unit.urn,
                score = unit.risk_score,
                stored = unit.tier.as_str(),
                expected = expected.as_str(),
                "stored tier disagrees with score thresholds"
            );
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use chrono::Utc;

    pub fn sample_unit(urn: &str, district: &str, score: f64, tier: Tier, arrears: f64) -> Unit {
        Unit {
            urn: urn.to_string(),
            name: format!("Consumer {urn}"),
            district: district.to_string(),
            service_no: format!("SVC-{urn}"),
            risk_score: score,
            tier,
            kwh_consumption: vec![120.0, 118.0, 131.0],
            arrears,
            disconnect_flag: false,
            peer_percentile: 50.0,
            last_updated: Utc::now(),
            shap_drivers: Vec::new(),
            alert_history: Vec::new(),
        }
    }

    fn mixed_set() -> Vec<Unit> {
        let mut units = Vec::new();
        for i in 0..20 {
            units.push(sample_unit(
                &format!("H{i:03}"),
                "Chennai",
                75.0 + i as f64,
                Tier::High,
                50_000.0,
            ));
        }
        for i in 0..30 {
            units.push(sample_unit(
                &format!("M{i:03}"),
                "Madurai",
                55.0,
                Tier::Medium,
                12_000.0,
            ));
        }
        for i in 0..50 {
            units.push(sample_unit(
                &format!("L{i:03}"),
                "Salem",
                20.0,
                Tier::Low,
                500.0,
            ));
        }
        units
    }

    #[test]
    fn tier_counts_sum_to_total() {
        let units = mixed_set();
        let summary = summarize(&units, &HashMap::new());
        assert_eq!(summary.total_units, 100);
        assert_eq!(
            summary.low_count + summary.medium_count + summary.high_count,
            summary.total_units
        );
    }

    #[test]
    fn empty_set_yields_zeros_not_errors() {
        let summary = summarize(&[], &HashMap::new());
        assert_eq!(summary.total_units, 0);
        assert_eq!(summary.avg_risk_score, 0.0);
        assert!(summary.top_risk_units.is_empty());
        assert!(summary.districts.is_empty());
    }

    #[test]
    fn top_ten_is_sorted_descending_and_exact() {
        let units = mixed_set();
        let summary = summarize(&units, &HashMap::new());
        assert_eq!(summary.top_risk_units.len(), 10);
        // The 10 highest scores are H019 (94) down to H010 (85).
        assert_eq!(summary.top_risk_units[0].urn, "H019");
        assert_eq!(summary.top_risk_units[9].urn, "H010");
        for pair in summary.top_risk_units.windows(2) {
            assert!(pair[0].risk_score >= pair[1].risk_score);
        }
    }

    #[test]
    fn ties_keep_fetch_order() {
        let units = vec![
            sample_unit("A", "Chennai", 60.0, Tier::Medium, 0.0),
            sample_unit("B", "Chennai", 60.0, Tier::Medium, 0.0),
            sample_unit("C", "Chennai", 60.0, Tier::Medium, 0.0),
        ];
        let top = top_risk(&units, 3);
        let urns: Vec<&str> = top.iter().map(|u| u.urn.as_str()).collect();
        assert_eq!(urns, vec!["A", "B", "C"]);
    }

    #[test]
    fn one_district_summary_per_distinct_district() {
        let units = mixed_set();
        let sla = HashMap::from([("Chennai".to_string(), 92.5)]);
        let districts = district_summaries(&units, &sla);
        assert_eq!(districts.len(), 3);
        let per_district_total: usize = districts.iter().map(|d| d.total_units).sum();
        assert_eq!(per_district_total, units.len());
        assert_eq!(districts[0].name, "Chennai");
        assert_eq!(districts[0].sla_compliance, 92.5);
        assert_eq!(districts[1].sla_compliance, 0.0);
    }

    #[test]
    fn trend_buckets_partition_by_score() {
        let units = mixed_set();
        let trend = trend_buckets(&units);
        // High units run 75..95: five of them sit below 80.
        assert_eq!(trend.deteriorating, 15);
        assert_eq!(trend.stable, 35);
        assert_eq!(trend.improving, 50);
        assert_eq!(
            trend.improving + trend.stable + trend.deteriorating,
            units.len()
        );
    }

    #[test]
    fn performance_score_rewards_low_risk_and_compliance() {
        let healthy = DistrictSummary {
            name: "Salem".to_string(),
            total_units: 50,
            low_count: 48,
            medium_count: 2,
            high_count: 0,
            avg_risk_score: 20.0,
            sla_compliance: 98.0,
            total_arrears: 1_000.0,
        };
        let stressed = DistrictSummary {
            name: "Chennai".to_string(),
            total_units: 50,
            low_count: 5,
            medium_count: 20,
            high_count: 25,
            avg_risk_score: 82.0,
            sla_compliance: 61.0,
            total_arrears: 900_000.0,
        };
        assert!(performance_score(&healthy) > performance_score(&stressed));
        assert_eq!(performance_score(&healthy), 91);
        assert!(district_recommendations(&healthy).is_empty());
        assert_eq!(district_recommendations(&stressed).len(), 3);
    }
}
