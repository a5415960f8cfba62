// ABOUTME: Best-effort column inference for a view definition that cannot be introspected yet
// ABOUTME: Reads the outer select list only; every inferred column is nullable and displayed

use sqlparser::ast::{Expr, Query, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::ServiceError;
use crate::models::FieldVo;

const NAMED_TYPE: &str = "VARCHAR";
const UNKNOWN_TYPE: &str = "UNKNOWN";

fn inferred(name: String, field_type: &str, comment: &str) -> FieldVo {
    FieldVo {
        name,
        field_type: field_type.to_string(),
        nullable: true,
        display: true,
        comment: comment.to_string(),
        ..Default::default()
    }
}

fn select_items(query: &Query) -> Result<&[SelectItem], ServiceError> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(&select.projection),
        SetExpr::Query(inner) => select_items(inner),
        other => Err(ServiceError::ViewSql(format!(
            "cannot infer columns from a compound query: {}",
            other
        ))),
    }
}

/// Infer the columns a SELECT (or CREATE VIEW ... AS SELECT) would produce
pub fn parse_view_sql(sql: &str) -> Result<Vec<FieldVo>, ServiceError> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| ServiceError::ViewSql(format!("Failed to parse SQL: {}", e)))?;

    let query = match statements.first() {
        Some(Statement::Query(query)) => query,
        Some(Statement::CreateView { query, .. }) => query,
        Some(other) => {
            return Err(ServiceError::ViewSql(format!(
                "only SELECT statements can be inferred, got: {}",
                other
            )))
        }
        None => return Err(ServiceError::ViewSql("empty SQL statement".to_string())),
    };

    let fields = select_items(query)?
        .iter()
        .map(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => {
                inferred(alias.value.clone(), NAMED_TYPE, "")
            }
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                inferred(ident.value.clone(), NAMED_TYPE, "")
            }
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
                let name = parts.last().map(|p| p.value.clone()).unwrap_or_default();
                inferred(name, NAMED_TYPE, "")
            }
            SelectItem::UnnamedExpr(expr) => inferred(
                expr.to_string(),
                UNKNOWN_TYPE,
                "unaliased expression; type known after the view is synced",
            ),
            SelectItem::Wildcard(_) => inferred(
                "*".to_string(),
                UNKNOWN_TYPE,
                "star expression; columns known after the view is synced",
            ),
            SelectItem::QualifiedWildcard(prefix, _) => inferred(
                format!("{}.*", prefix),
                UNKNOWN_TYPE,
                "star expression; columns known after the view is synced",
            ),
        })
        .collect();
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(fields: &[FieldVo]) -> Vec<(&str, &str)> {
        fields
            .iter()
            .map(|f| (f.name.as_str(), f.field_type.as_str()))
            .collect()
    }

    #[test]
    fn test_aliases_and_columns() {
        let fields =
            parse_view_sql("SELECT o.id, o.total AS amount, customer_name FROM orders o").unwrap();
        assert_eq!(
            shape(&fields),
            vec![
                ("id", "VARCHAR"),
                ("amount", "VARCHAR"),
                ("customer_name", "VARCHAR")
            ]
        );
        assert!(fields.iter().all(|f| f.nullable && f.display));
    }

    #[test]
    fn test_stars_and_expressions_are_unknown() {
        let fields = parse_view_sql("SELECT *, c.*, COUNT(*) FROM orders o JOIN customers c ON c.id = o.cid").unwrap();
        assert_eq!(fields[0].name, "*");
        assert_eq!(fields[0].field_type, "UNKNOWN");
        assert!(!fields[0].comment.is_empty());
        assert_eq!(fields[1].name, "c.*");
        assert_eq!(fields[2].name, "COUNT(*)");
        assert_eq!(fields[2].field_type, "UNKNOWN");
    }

    #[test]
    fn test_create_view_uses_its_query() {
        let fields = parse_view_sql("CREATE VIEW v_totals AS SELECT id, SUM(x) AS total FROM t GROUP BY id").unwrap();
        assert_eq!(shape(&fields), vec![("id", "VARCHAR"), ("total", "VARCHAR")]);
    }

    #[test]
    fn test_rejects_non_select() {
        assert!(matches!(
            parse_view_sql("DELETE FROM orders"),
            Err(ServiceError::ViewSql(_))
        ));
        assert!(matches!(
            parse_view_sql("SELEC id FROM"),
            Err(ServiceError::ViewSql(_))
        ));
    }
}
