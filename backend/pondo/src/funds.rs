//! The funds document: pools, members, and the two summary figures.
//!
//! The whole document is the unit of storage. It is read in full for the
//! public view and replaced in full on every admin write, so validation
//! always runs over a complete document.
//!
//! Two entry points enforce the same rules:
//!
//! * [`parse_document`] walks untyped JSON from a client and names the first
//!   offending field (`funds.ns.members[2].amount`).
//! * [`FundsDocument::validate`] re-checks a typed document right before it
//!   is persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{PondoError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundsDocument {
    pub funds: BTreeMap<String, Fund>,
    pub summary: Summary,
}

/// A named contribution pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    #[serde(default)]
    pub title: String,
    /// Goal per member. Informational only.
    #[serde(default)]
    pub target: f64,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub amount: f64,
}

/// Aggregate figures kept by hand, not derived from `funds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub pman: f64,
    pub hawak: f64,
}

impl FundsDocument {
    /// Check every invariant of a typed document.
    pub fn validate(&self) -> Result<()> {
        for (key, fund) in &self.funds {
            if key.trim().is_empty() {
                return Err(PondoError::invalid("funds", "fund key must not be empty"));
            }
            if !fund.target.is_finite() {
                return Err(PondoError::invalid(
                    format!("funds.{key}.target"),
                    "must be a finite number",
                ));
            }
            for (i, member) in fund.members.iter().enumerate() {
                let at = format!("funds.{key}.members[{i}]");
                if member.name.trim().is_empty() {
                    return Err(PondoError::invalid(
                        format!("{at}.name"),
                        "must be a non-empty string",
                    ));
                }
                if !member.amount.is_finite() || member.amount < 0.0 {
                    return Err(PondoError::invalid(
                        format!("{at}.amount"),
                        "must be a non-negative number",
                    ));
                }
            }
        }
        for (field, value) in [
            ("summary.pman", self.summary.pman),
            ("summary.hawak", self.summary.hawak),
        ] {
            if !value.is_finite() {
                return Err(PondoError::invalid(field, "must be a finite number"));
            }
        }
        Ok(())
    }

    /// The document written on first run.
    pub fn seed() -> Self {
        let fund = |title: &str, target: f64, members: &[(&str, f64)]| Fund {
            title: title.to_string(),
            target,
            members: members
                .iter()
                .map(|(name, amount)| Member {
                    name: name.to_string(),
                    amount: *amount,
                })
                .collect(),
        };

        let mut funds = BTreeMap::new();
        funds.insert(
            "ns".to_string(),
            fund(
                "Pondo NS",
                500.0,
                &[("Ana", 500.0), ("Ben", 250.0), ("Carlo", 100.0)],
            ),
        );
        funds.insert(
            "la".to_string(),
            fund("Pondo LA", 300.0, &[("Ana", 300.0), ("Dina", 150.0)]),
        );
        funds.insert(
            "pintura".to_string(),
            fund(
                "Pintura",
                200.0,
                &[("Ben", 200.0), ("Carlo", 200.0), ("Dina", 0.0)],
            ),
        );

        FundsDocument {
            funds,
            summary: Summary {
                pman: 730.0,
                hawak: 375.0,
            },
        }
    }
}

/// Shape-check a client-submitted JSON value and convert it into a
/// [`FundsDocument`].
pub fn parse_document(value: Value) -> Result<FundsDocument> {
    let root = as_object(&value, "data")?;

    let funds_obj = as_object(require(root, "funds", "data")?, "funds")?;
    let mut funds = BTreeMap::new();
    for (key, raw) in funds_obj {
        let at = format!("funds.{key}");
        if key.trim().is_empty() {
            return Err(PondoError::invalid("funds", "fund key must not be empty"));
        }
        funds.insert(key.clone(), parse_fund(raw, &at)?);
    }

    let summary_obj = as_object(require(root, "summary", "data")?, "summary")?;
    let summary = Summary {
        pman: as_number(require(summary_obj, "pman", "summary")?, "summary.pman")?,
        hawak: as_number(require(summary_obj, "hawak", "summary")?, "summary.hawak")?,
    };

    let document = FundsDocument { funds, summary };
    document.validate()?;
    Ok(document)
}

fn parse_fund(raw: &Value, at: &str) -> Result<Fund> {
    let obj = as_object(raw, at)?;

    let title = match obj.get("title") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(PondoError::invalid(format!("{at}.title"), "must be a string")),
    };
    let target = match obj.get("target") {
        None | Some(Value::Null) => 0.0,
        Some(v) => as_number(v, &format!("{at}.target"))?,
    };

    let members_at = format!("{at}.members");
    let members = match obj.get("members") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_member(item, &format!("{members_at}[{i}]")))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(PondoError::invalid(members_at, "must be an array")),
        None => return Err(PondoError::invalid(members_at, "is required")),
    };

    Ok(Fund {
        title,
        target,
        members,
    })
}

fn parse_member(raw: &Value, at: &str) -> Result<Member> {
    let obj = as_object(raw, at)?;

    let name = match obj.get("name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            return Err(PondoError::invalid(
                format!("{at}.name"),
                "must be a non-empty string",
            ))
        }
    };

    let amount_at = format!("{at}.amount");
    let amount = as_number(require(obj, "amount", at)?, &amount_at)?;
    if amount < 0.0 {
        return Err(PondoError::invalid(amount_at, "must be a non-negative number"));
    }

    Ok(Member { name, amount })
}

fn require<'a>(obj: &'a Map<String, Value>, key: &str, at: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| PondoError::invalid(format!("{at}.{key}"), "is required"))
}

fn as_object<'a>(value: &'a Value, at: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| PondoError::invalid(at, "must be an object"))
}

fn as_number(value: &Value, at: &str) -> Result<f64> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| PondoError::invalid(at, "must be a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: PondoError) -> String {
        match err {
            PondoError::InvalidDocument { field, .. } => field,
            other => panic!("expected InvalidDocument, got {other:?}"),
        }
    }

    fn sample() -> Value {
        json!({
            "funds": {
                "ns": {
                    "title": "Pondo NS",
                    "target": 500,
                    "members": [
                        { "name": "Ana", "amount": 500 },
                        { "name": "Ben", "amount": 12.5 }
                    ]
                }
            },
            "summary": { "pman": 730, "hawak": 375 }
        })
    }

    #[test]
    fn seed_has_three_funds_and_summary() {
        let seed = FundsDocument::seed();
        let keys: Vec<&str> = seed.funds.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["la", "ns", "pintura"]);
        assert_eq!(seed.summary, Summary { pman: 730.0, hawak: 375.0 });
        seed.validate().unwrap();
    }

    #[test]
    fn parses_a_valid_document() {
        let doc = parse_document(sample()).unwrap();
        let ns = &doc.funds["ns"];
        assert_eq!(ns.title, "Pondo NS");
        assert_eq!(ns.target, 500.0);
        assert_eq!(ns.members[1].name, "Ben");
        assert_eq!(ns.members[1].amount, 12.5);
    }

    #[test]
    fn title_and_target_are_optional() {
        let doc = parse_document(json!({
            "funds": { "x": { "members": [] } },
            "summary": { "pman": 0, "hawak": -3 }
        }))
        .unwrap();
        assert_eq!(doc.funds["x"].title, "");
        assert_eq!(doc.funds["x"].target, 0.0);
        assert_eq!(doc.summary.hawak, -3.0);
    }

    #[test]
    fn negative_amount_names_the_member() {
        let mut value = sample();
        value["funds"]["ns"]["members"][1]["amount"] = json!(-1);
        let err = parse_document(value).unwrap_err();
        assert_eq!(field_of(err), "funds.ns.members[1].amount");
    }

    #[test]
    fn string_amount_is_rejected() {
        let mut value = sample();
        value["funds"]["ns"]["members"][0]["amount"] = json!("500");
        let err = parse_document(value).unwrap_err();
        assert_eq!(field_of(err), "funds.ns.members[0].amount");
    }

    #[test]
    fn empty_or_missing_name_is_rejected() {
        let mut value = sample();
        value["funds"]["ns"]["members"][0]["name"] = json!("  ");
        assert_eq!(
            field_of(parse_document(value).unwrap_err()),
            "funds.ns.members[0].name"
        );

        let mut value = sample();
        value["funds"]["ns"]["members"][0] = json!({ "amount": 1 });
        assert_eq!(
            field_of(parse_document(value).unwrap_err()),
            "funds.ns.members[0].name"
        );
    }

    #[test]
    fn missing_or_null_members_is_rejected() {
        let mut value = sample();
        value["funds"]["ns"].as_object_mut().unwrap().remove("members");
        assert_eq!(
            field_of(parse_document(value).unwrap_err()),
            "funds.ns.members"
        );

        let mut value = sample();
        value["funds"]["ns"]["members"] = Value::Null;
        assert_eq!(
            field_of(parse_document(value).unwrap_err()),
            "funds.ns.members"
        );
    }

    #[test]
    fn summary_fields_must_be_numbers() {
        let mut value = sample();
        value["summary"]["hawak"] = json!("375");
        assert_eq!(
            field_of(parse_document(value).unwrap_err()),
            "summary.hawak"
        );

        let mut value = sample();
        value.as_object_mut().unwrap().remove("summary");
        assert_eq!(field_of(parse_document(value).unwrap_err()), "data.summary");
    }

    #[test]
    fn typed_validation_catches_non_finite_amounts() {
        let mut doc = FundsDocument::seed();
        doc.funds.get_mut("la").unwrap().members[0].amount = f64::NAN;
        assert_eq!(
            field_of(doc.validate().unwrap_err()),
            "funds.la.members[0].amount"
        );
    }

    #[test]
    fn serializes_with_stable_field_names() {
        let value = serde_json::to_value(FundsDocument::seed()).unwrap();
        assert!(value["funds"]["ns"]["members"][0]["name"].is_string());
        assert!(value["funds"]["ns"]["members"][0]["amount"].is_number());
        assert!(value["funds"]["pintura"]["title"].is_string());
        assert!(value["funds"]["pintura"]["target"].is_number());
        assert_eq!(value["summary"]["pman"], json!(730.0));
    }
}
