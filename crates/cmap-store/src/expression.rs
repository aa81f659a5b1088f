//! Opaque filter expressions.
//!
//! The real filter language is parsed elsewhere; the content map only needs
//! two things from a filter: its SQL rendering (used verbatim as part of the
//! result cache key) and a way to evaluate it, which the in-memory backend
//! uses in place of a database.

use serde::{Deserialize, Serialize};

use cmap_types::{ContentId, ObjectType};

use crate::row::{AttributeRow, ContentRow, RowValue};

/// A filter over `contentmap` rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// Matches every row.
    All,
    ObjectType(ObjectType),
    ContentIds(Vec<ContentId>),
    /// An optimized column equals the value.
    ColumnEquals { column: String, value: RowValue },
    /// Some generic attribute row of that name equals the value.
    AttributeEquals { name: String, value: RowValue },
    UpdatedAfter(i64),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

/// SQL text plus bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<RowValue>,
}

impl Expression {
    /// Render as a WHERE clause over `contentmap`.
    pub fn to_sql(&self) -> CompiledQuery {
        let mut params = Vec::new();
        let sql = self.render(&mut params);
        CompiledQuery { sql, params }
    }

    fn render(&self, params: &mut Vec<RowValue>) -> String {
        match self {
            Self::All => "1 = 1".to_string(),
            Self::ObjectType(t) => {
                params.push(RowValue::Int(*t));
                "contentmap.obj_type = ?".to_string()
            }
            Self::ContentIds(ids) => {
                if ids.is_empty() {
                    return "1 = 0".to_string();
                }
                let marks = vec!["?"; ids.len()].join(", ");
                params.extend(ids.iter().map(|id| RowValue::Text(id.to_string())));
                format!("contentmap.contentid IN ({marks})")
            }
            Self::ColumnEquals { column, value } => {
                params.push(value.clone());
                format!("contentmap.{column} = ?")
            }
            Self::AttributeEquals { name, value } => {
                let column = value.column();
                params.push(RowValue::Text(name.clone()));
                params.push(value.clone());
                format!(
                    "EXISTS (SELECT 1 FROM contentattribute a WHERE a.map_id = contentmap.id \
                     AND a.name = ? AND a.{column} = ?)"
                )
            }
            Self::UpdatedAfter(ts) => {
                params.push(RowValue::Long(*ts));
                "contentmap.updatetimestamp > ?".to_string()
            }
            Self::And(parts) => join(parts, " AND ", "1 = 1", params),
            Self::Or(parts) => join(parts, " OR ", "1 = 0", params),
            Self::Not(inner) => format!("NOT ({})", inner.render(params)),
        }
    }

    /// Evaluate against a row and its generic attribute rows.
    pub fn matches(&self, row: &ContentRow, attributes: &[AttributeRow]) -> bool {
        match self {
            Self::All => true,
            Self::ObjectType(t) => row.obj_type() == *t,
            Self::ContentIds(ids) => ids.contains(&row.content_id),
            Self::ColumnEquals { column, value } => row.columns.get(column) == Some(value),
            Self::AttributeEquals { name, value } => attributes
                .iter()
                .any(|a| a.map_id == row.id && a.name == *name && a.value == *value),
            Self::UpdatedAfter(ts) => row.update_timestamp > *ts,
            Self::And(parts) => parts.iter().all(|p| p.matches(row, attributes)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(row, attributes)),
            Self::Not(inner) => !inner.matches(row, attributes),
        }
    }
}

fn join(parts: &[Expression], sep: &str, empty: &str, params: &mut Vec<RowValue>) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts.iter().map(|p| p.render(params)).collect();
    format!("({})", rendered.join(sep))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ContentRow {
        let mut row = ContentRow::new(ContentId::new(1, 100), 1, 42)
            .with_column("quick_name", RowValue::Text("home".into()));
        row.id = 7;
        row.update_timestamp = 50;
        row
    }

    fn attr(name: &str, value: RowValue) -> AttributeRow {
        AttributeRow {
            id: 1,
            map_id: 7,
            name: name.into(),
            sort_order: 0,
            value,
            update_timestamp: 0,
        }
    }

    #[test]
    fn sql_rendering_is_stable() {
        let expr = Expression::And(vec![
            Expression::ObjectType(1),
            Expression::ColumnEquals {
                column: "quick_name".into(),
                value: RowValue::Text("home".into()),
            },
        ]);
        let compiled = expr.to_sql();
        assert_eq!(
            compiled.sql,
            "(contentmap.obj_type = ? AND contentmap.quick_name = ?)"
        );
        assert_eq!(compiled.params.len(), 2);
        assert_eq!(compiled, expr.to_sql());
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        assert_eq!(Expression::ContentIds(vec![]).to_sql().sql, "1 = 0");
        assert!(!Expression::ContentIds(vec![]).matches(&row(), &[]));
    }

    #[test]
    fn evaluation() {
        let row = row();
        let attrs = vec![attr("parent", RowValue::Text("1.5".into()))];
        assert!(Expression::All.matches(&row, &attrs));
        assert!(Expression::ObjectType(1).matches(&row, &attrs));
        assert!(!Expression::ObjectType(2).matches(&row, &attrs));
        assert!(Expression::ContentIds(vec![ContentId::new(1, 100)]).matches(&row, &attrs));
        assert!(Expression::AttributeEquals {
            name: "parent".into(),
            value: RowValue::Text("1.5".into()),
        }
        .matches(&row, &attrs));
        assert!(Expression::UpdatedAfter(49).matches(&row, &attrs));
        assert!(!Expression::UpdatedAfter(50).matches(&row, &attrs));
        assert!(Expression::Not(Box::new(Expression::ObjectType(2))).matches(&row, &attrs));
        assert!(Expression::Or(vec![Expression::ObjectType(2), Expression::All]).matches(&row, &attrs));
    }

    #[test]
    fn filters_serialize_as_json() {
        let expr = Expression::And(vec![
            Expression::ContentIds(vec![ContentId::new(1, 100)]),
            Expression::AttributeEquals {
                name: "parent".into(),
                value: RowValue::Text("1.5".into()),
            },
        ]);
        let json = serde_json::to_string(&expr).unwrap();
        assert!(json.contains("\"1.100\""));
        let parsed: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, expr);
        assert_eq!(parsed.to_sql(), expr.to_sql());
    }
}
