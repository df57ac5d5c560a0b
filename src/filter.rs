use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// Closed set of filterable columns; unknown field names fail deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Urn,
    Name,
    District,
    ServiceNo,
    Tier,
    RiskScore,
    Arrears,
    PeerPercentile,
    DisconnectFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Flag,
}

impl FilterField {
    pub fn column(&self) -> &'static str {
        match self {
            FilterField::Urn => "urn",
            FilterField::Name => "name",
            FilterField::District => "district",
            FilterField::ServiceNo => "service_no",
            FilterField::Tier => "tier",
            FilterField::RiskScore => "risk_score",
            FilterField::Arrears => "arrears",
            FilterField::PeerPercentile => "peer_percentile",
            FilterField::DisconnectFlag => "disconnect_flag",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FilterField::Urn
            | FilterField::Name
            | FilterField::District
            | FilterField::ServiceNo
            | FilterField::Tier => FieldKind::Text,
            FilterField::RiskScore | FilterField::Arrears | FilterField::PeerPercentile => {
                FieldKind::Numeric
            }
            FilterField::DisconnectFlag => FieldKind::Flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Flag(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterClause {
    Equals {
        field: FilterField,
        value: Scalar,
    },
    Range {
        field: FilterField,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    InSet {
        field: FilterField,
        values: Vec<String>,
    },
    Pattern {
        field: FilterField,
        pattern: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    pub clauses: Vec<FilterClause>,
}

#[derive(Debug, Clone)]
pub enum Bind {
    Text(String),
    Number(f64),
    Flag(bool),
    TextArray(Vec<String>),
}

impl FilterSpec {
    pub fn from_json(raw: &serde_json::Value) -> anyhow::Result<Self> {
        if raw.is_null() {
            return Ok(FilterSpec::default());
        }
        let spec: FilterSpec = serde_json::from_value(raw.clone())?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Reject operand/field combinations before query construction so a
    /// malformed filter surfaces as an input error, not a store error.
    pub fn validate(&self) -> anyhow::Result<()> {
        for clause in &self.clauses {
            match clause {
                FilterClause::Equals { field, value } => {
                    let compatible = matches!(
                        (field.kind(), value),
                        (FieldKind::Text, Scalar::Text(_))
                            | (FieldKind::Numeric, Scalar::Number(_))
                            | (FieldKind::Flag, Scalar::Flag(_))
                    );
                    if !compatible {
                        anyhow::bail!(
                            "equals operand {value:?} does not match field {}",
                            field.column()
                        );
                    }
                    if *field == FilterField::Tier {
                        if let Scalar::Text(text) = value {
                            Tier::parse(text)?;
                        }
                    }
                }
                FilterClause::Range { field, min, max } => {
                    if field.kind() != FieldKind::Numeric {
                        anyhow::bail!("range filter on non-numeric field {}", field.column());
                    }
                    if min.is_none() && max.is_none() {
                        anyhow::bail!("range filter on {} has no bounds", field.column());
                    }
                    if let (Some(lo), Some(hi)) = (min, max) {
                        if lo > hi {
                            anyhow::bail!(
                                "range filter on {} has min {lo} above max {hi}",
                                field.column()
                            );
                        }
                    }
                }
                FilterClause::InSet { field, values } => {
                    if field.kind() != FieldKind::Text {
                        anyhow::bail!("in-set filter on non-text field {}", field.column());
                    }
                    if values.is_empty() {
                        anyhow::bail!("in-set filter on {} has no values", field.column());
                    }
                    if *field == FilterField::Tier {
                        for value in values {
                            Tier::parse(value)?;
                        }
                    }
                }
                FilterClause::Pattern { field, pattern } => {
                    if field.kind() != FieldKind::Text {
                        anyhow::bail!("pattern filter on non-text field {}", field.column());
                    }
                    if pattern.is_empty() {
                        anyhow::bail!("pattern filter on {} is empty", field.column());
                    }
                }
            }
        }
        Ok(())
    }

    /// Render the clauses as `AND`-joined predicates with `$n`
    /// placeholders, numbering from `first_param`. Callers bind the
    /// returned values in order.
    pub fn to_sql(&self, first_param: usize) -> (String, Vec<Bind>) {
        let mut predicates = Vec::new();
        let mut binds = Vec::new();
        let mut param = first_param;

        for clause in &self.clauses {
            match clause {
                FilterClause::Equals { field, value } => {
                    predicates.push(format!("{} = ${param}", field.column()));
                    param += 1;
                    binds.push(match value {
                        Scalar::Text(text) => Bind::Text(text.clone()),
                        Scalar::Number(number) => Bind::Number(*number),
                        Scalar::Flag(flag) => Bind::Flag(*flag),
                    });
                }
                FilterClause::Range { field, min, max } => {
                    if let Some(lo) = min {
                        predicates.push(format!("{} >= ${param}", field.column()));
                        param += 1;
                        binds.push(Bind::Number(*lo));
                    }
                    if let Some(hi) = max {
                        predicates.push(format!("{} <= ${param}", field.column()));
                        param += 1;
                        binds.push(Bind::Number(*hi));
                    }
                }
                FilterClause::InSet { field, values } => {
                    predicates.push(format!("{} = ANY(${param})", field.column()));
                    param += 1;
                    binds.push(Bind::TextArray(values.clone()));
                }
                FilterClause::Pattern { field, pattern } => {
                    predicates.push(format!("{} ILIKE ${param}", field.column()));
                    param += 1;
                    binds.push(Bind::Text(format!("%{pattern}%")));
                }
            }
        }

        (predicates.join(" AND "), binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_requires_matching_operand_type() {
        let spec = FilterSpec {
            clauses: vec![FilterClause::Equals {
                field: FilterField::RiskScore,
                value: Scalar::Text("eighty".to_string()),
            }],
        };
        assert!(spec.validate().is_err());

        let spec = FilterSpec {
            clauses: vec![FilterClause::Equals {
                field: FilterField::DisconnectFlag,
                value: Scalar::Flag(true),
            }],
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn range_rejected_on_text_fields() {
        let spec = FilterSpec {
            clauses: vec![FilterClause::Range {
                field: FilterField::District,
                min: Some(1.0),
                max: None,
            }],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let spec = FilterSpec {
            clauses: vec![FilterClause::Range {
                field: FilterField::Arrears,
                min: Some(500.0),
                max: Some(100.0),
            }],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn tier_values_must_parse() {
        let spec = FilterSpec {
            clauses: vec![FilterClause::InSet {
                field: FilterField::Tier,
                values: vec!["high".to_string(), "purple".to_string()],
            }],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn to_sql_numbers_placeholders_in_order() {
        let spec = FilterSpec {
            clauses: vec![
                FilterClause::InSet {
                    field: FilterField::District,
                    values: vec!["Chennai".to_string(), "Madurai".to_string()],
                },
                FilterClause::Range {
                    field: FilterField::RiskScore,
                    min: Some(40.0),
                    max: Some(90.0),
                },
                FilterClause::Pattern {
                    field: FilterField::Name,
                    pattern: "mills".to_string(),
                },
            ],
        };
        let (sql, binds) = spec.to_sql(2);
        assert_eq!(
            sql,
            "district = ANY($2) AND risk_score >= $3 AND risk_score <= $4 AND name ILIKE $5"
        );
        assert_eq!(binds.len(), 4);
        assert!(matches!(&binds[3], Bind::Text(p) if p == "%mills%"));
    }

    #[test]
    fn filter_json_round_trip() {
        let raw = serde_json::json!([
            { "op": "equals", "field": "tier", "value": "high" },
            { "op": "range", "field": "arrears", "min": 10000.0 }
        ]);
        let spec = FilterSpec::from_json(&raw).expect("valid filter");
        assert_eq!(spec.clauses.len(), 2);
        let (sql, binds) = spec.to_sql(1);
        assert_eq!(sql, "tier = $1 AND arrears >= $2");
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn null_filter_is_empty_spec() {
        let spec = FilterSpec::from_json(&serde_json::Value::Null).expect("null ok");
        assert!(spec.is_empty());
        let (sql, binds) = spec.to_sql(1);
        assert!(sql.is_empty());
        assert!(binds.is_empty());
    }
}
