//! Clause-to-SQL translation over the joined contacts/companies families.

use outreach_core::filter::{ClauseList, FilterClause, Namespace, Operator};
use outreach_core::segment::{CandidateMember, CapturedAttributes};
use outreach_core::store::{MemberSource, StoreError, StoreFuture};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// `PostgreSQL`-backed [`MemberSource`].
///
/// Compiles the closed operator union into parameterized SQL predicates —
/// field keys and operands are always bound, never spliced into the query
/// text. Contacts join their company by foreign key; each clause reads from
/// the entity family its namespace selects.
///
/// # Null policy
///
/// Mirrors the reference predicate semantics in `outreach-core`: a missing
/// or JSON-null field never satisfies `eq`/`in`/`gte`/`lte`, and `not_in`
/// retains rows whose field is missing or null. Numeric comparisons apply
/// only where `jsonb_typeof` says `number`, so a stray string value can
/// never abort the query with a cast error.
#[derive(Clone)]
pub struct PgMemberSource {
    pool: PgPool,
}

impl PgMemberSource {
    /// Create a source over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Push `<value>`: the field's jsonb value with JSON null folded into
    /// SQL NULL, so "missing" and "null" behave identically downstream.
    fn push_field_value(qb: &mut QueryBuilder<'_, Postgres>, alias: &str, column: &str) {
        qb.push("(CASE WHEN jsonb_typeof(")
            .push(alias)
            .push(".fields -> ")
            .push_bind(column.to_string())
            .push(") = 'null' THEN NULL ELSE ")
            .push(alias)
            .push(".fields -> ")
            .push_bind(column.to_string())
            .push(" END)");
    }

    fn push_clause(qb: &mut QueryBuilder<'_, Postgres>, clause: &FilterClause) {
        let alias = match clause.field().namespace() {
            Namespace::Contacts => "c",
            Namespace::Companies => "co",
        };
        let column = clause.field().column();

        match clause.operator() {
            Operator::Eq => {
                Self::push_field_value(qb, alias, column);
                qb.push(" = ").push_bind(clause.value().clone());
            }
            Operator::In => {
                qb.push("(");
                Self::push_field_value(qb, alias, column);
                qb.push(" IS NOT NULL AND ")
                    .push_bind(clause.value().clone())
                    .push(" @> jsonb_build_array(");
                Self::push_field_value(qb, alias, column);
                qb.push("))");
            }
            Operator::NotIn => {
                qb.push("(");
                Self::push_field_value(qb, alias, column);
                qb.push(" IS NULL OR NOT (")
                    .push_bind(clause.value().clone())
                    .push(" @> jsonb_build_array(");
                Self::push_field_value(qb, alias, column);
                qb.push(")))");
            }
            Operator::Gte | Operator::Lte => {
                let op = if clause.operator() == Operator::Gte {
                    " >= "
                } else {
                    " <= "
                };
                qb.push("(CASE WHEN jsonb_typeof(")
                    .push(alias)
                    .push(".fields -> ")
                    .push_bind(column.to_string())
                    .push(") = 'number' THEN (")
                    .push(alias)
                    .push(".fields -> ")
                    .push_bind(column.to_string())
                    .push(")::numeric END)")
                    .push(op)
                    .push_bind(clause.value().as_f64().unwrap_or_default());
            }
        }
    }
}

impl MemberSource for PgMemberSource {
    fn find_members(
        &self,
        clauses: ClauseList,
        limit: Option<usize>,
    ) -> StoreFuture<'_, Vec<CandidateMember>> {
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new(
                r"
                SELECT c.id AS contact_id,
                       c.company_id,
                       c.fields AS contact_fields,
                       COALESCE(co.fields, '{}'::jsonb) AS company_fields
                FROM contacts c
                LEFT JOIN companies co ON co.id = c.company_id
                WHERE ",
            );

            let mut first = true;
            for clause in clauses.clauses() {
                if !first {
                    qb.push(" AND ");
                }
                first = false;
                Self::push_clause(&mut qb, clause);
            }

            qb.push(" ORDER BY c.id");
            if let Some(limit) = limit {
                qb.push(" LIMIT ")
                    .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
            }

            let rows = qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            Ok(rows
                .iter()
                .map(|row| {
                    let contact_fields: serde_json::Value = row.get("contact_fields");
                    let company_fields: serde_json::Value = row.get("company_fields");
                    let text = |value: &serde_json::Value, key: &str| {
                        value.get(key).and_then(|v| v.as_str()).map(str::to_string)
                    };
                    CandidateMember {
                        contact_id: row.get("contact_id"),
                        company_id: row.get("company_id"),
                        captured: CapturedAttributes {
                            name: text(&contact_fields, "name"),
                            email: text(&contact_fields, "email"),
                            position: text(&contact_fields, "position"),
                            company_summary: text(&company_fields, "summary"),
                        },
                    }
                })
                .collect())
        })
    }
}
