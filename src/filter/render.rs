use crate::filter::predicate::Clause;
use crate::storage::Value;

/// SQL text with its ordered bound arguments.
///
/// Dynamic values only ever enter through [`Sql::bind`], which emits a
/// placeholder; literal text comes from fixed strings in this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    text: String,
    args: Vec<Value>,
}

impl Sql {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.text.push_str(value.placeholder());
        self.args.push(value);
        self
    }

    pub fn append(&mut self, other: Self) -> &mut Self {
        self.text.push_str(&other.text);
        self.args.extend(other.args);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Render a conjunction of clauses. An empty list renders as `TRUE`.
pub fn render_clauses(clauses: &[Clause], sql: &mut Sql) {
    if clauses.is_empty() {
        sql.push("TRUE");
        return;
    }
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            sql.push(" AND ");
        }
        render_clause(clause, sql);
    }
}

fn render_clause(clause: &Clause, sql: &mut Sql) {
    match clause {
        Clause::Compare { column, op, value } => {
            sql.push(column.name())
                .push(" ")
                .push(op.as_sql())
                .push(" ")
                .bind(value.clone());
        }
        Clause::Matches {
            column,
            pattern,
            negated,
        } => {
            if *negated {
                sql.push("NOT ");
            }
            sql.push("regexp_matches(")
                .push(column.name())
                .push(", ")
                .bind(pattern.as_str())
                .push(")");
        }
        Clause::Contains { column, value } => {
            sql.push("list_contains(")
                .push(column.name())
                .push(", CAST(")
                .bind(value.as_str())
                .push(" AS VARCHAR))");
        }
        Clause::Any(clauses) => {
            sql.push("(");
            for (i, clause) in clauses.iter().enumerate() {
                if i > 0 {
                    sql.push(" OR ");
                }
                render_clause(clause, sql);
            }
            sql.push(")");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::predicate::{Column, Comparison};

    #[test]
    fn test_render_conjunction_with_args_in_order() {
        let clauses = vec![
            Clause::compare(Column::ClientId, Comparison::Eq, 7_i64),
            Clause::dimension(Column::Os, "!Windows").unwrap(),
            Clause::path_pattern("(?i)^/docs/").unwrap(),
        ];
        let mut sql = Sql::new();
        render_clauses(&clauses, &mut sql);
        assert_eq!(
            sql.text(),
            "client_id = ? AND os <> ? AND regexp_matches(path, ?)"
        );
        assert_eq!(
            sql.args(),
            &[
                Value::Int(7),
                Value::Text("Windows".to_string()),
                Value::Text("(?i)^/docs/".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_any_group_and_negated_match() {
        let mut clauses = Clause::platform("!unknown");
        clauses.push(Clause::path_pattern("!^/admin").unwrap());
        let mut sql = Sql::new();
        render_clauses(&clauses, &mut sql);
        assert_eq!(
            sql.text(),
            "(desktop = ? OR mobile = ?) AND NOT regexp_matches(path, ?)"
        );
        assert_eq!(sql.args().len(), 3);
    }

    #[test]
    fn test_render_contains() {
        let clauses = vec![Clause::Contains {
            column: Column::EventMetaKeys,
            value: "plan".to_string(),
        }];
        let mut sql = Sql::new();
        render_clauses(&clauses, &mut sql);
        assert_eq!(sql.text(), "list_contains(event_meta_keys, CAST(? AS VARCHAR))");
    }

    #[test]
    fn test_render_empty_is_true() {
        let mut sql = Sql::new();
        render_clauses(&[], &mut sql);
        assert_eq!(sql.text(), "TRUE");
    }

    #[test]
    fn test_user_values_never_reach_text() {
        let hostile = "x' OR 1=1 --";
        let clauses = vec![Clause::dimension(Column::Referrer, hostile).unwrap()];
        let mut sql = Sql::new();
        render_clauses(&clauses, &mut sql);
        assert!(!sql.text().contains(hostile));
        assert_eq!(sql.args(), &[Value::Text(hostile.to_string())]);
    }

    #[test]
    fn test_append_keeps_argument_order() {
        let mut head = Sql::new();
        head.push("a = ").bind(1_i64);
        let mut tail = Sql::new();
        tail.push(" AND b = ").bind(2_i64);
        head.append(tail);
        assert_eq!(head.text(), "a = ? AND b = ?");
        assert_eq!(head.args(), &[Value::Int(1), Value::Int(2)]);
    }
}
