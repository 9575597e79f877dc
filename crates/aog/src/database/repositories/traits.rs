//! The persistence port shared by all repositories
//!
//! Every aggregate exposes the same seven operations. `put` upserts with
//! partial-field semantics: empty string fields never overwrite existing
//! non-empty values, and `updated_at` is always refreshed.

use sea_orm::sea_query::Condition;
use sea_orm::{ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect, Select};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AogResult;

/// Sort direction for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One filter clause applied to `list`/`count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterClause {
    /// Exact equality on a column
    Eq { field: String, value: String },
    /// Substring match (`LIKE %value%`)
    Like { field: String, value: String },
    /// Membership in a value set
    In { field: String, values: Vec<String> },
    /// Column is SQL NULL
    IsNull { field: String },
}

impl FilterClause {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. }
            | Self::Like { field, .. }
            | Self::In { field, .. }
            | Self::IsNull { field } => field,
        }
    }
}

/// Pagination, sorting and filtering for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// 1-based page; `None` disables pagination
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub sort_by: Option<String>,
    pub order: SortOrder,
    pub filters: Vec<FilterClause>,
}

impl ListParams {
    pub fn filtered(filters: Vec<FilterClause>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn eq<F: Into<String>, V: Into<String>>(field: F, value: V) -> FilterClause {
        FilterClause::Eq {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Uniform CRUD surface every repository implements.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    type Domain;
    type Key: ?Sized;
    type Create;

    async fn add(&self, create: Self::Create) -> AogResult<Self::Domain>;
    /// Upsert with partial-field semantics (see module docs).
    async fn put(&self, record: Self::Domain) -> AogResult<Self::Domain>;
    async fn get(&self, key: &Self::Key) -> AogResult<Option<Self::Domain>>;
    async fn delete(&self, key: &Self::Key) -> AogResult<()>;
    async fn list(&self, params: &ListParams) -> AogResult<Vec<Self::Domain>>;
    async fn count(&self, filters: &[FilterClause]) -> AogResult<u64>;
    async fn is_exist(&self, key: &Self::Key) -> AogResult<bool>;
}

/// Build a filtered/sorted/paginated select from `params`.
///
/// `column_for` maps wire field names to entity columns; unknown fields are
/// ignored rather than failing the whole query.
pub fn apply_list_params<E: EntityTrait>(
    mut query: Select<E>,
    params: &ListParams,
    column_for: impl Fn(&str) -> Option<E::Column>,
) -> Select<E> {
    query = query.filter(build_condition(&params.filters, &column_for));

    if let Some(sort_by) = &params.sort_by
        && let Some(column) = column_for(sort_by)
    {
        let order = match params.order {
            SortOrder::Asc => Order::Asc,
            SortOrder::Desc => Order::Desc,
        };
        query = query.order_by(column, order);
    }

    if let (Some(page), Some(page_size)) = (params.page, params.page_size) {
        let page = page.max(1);
        query = query.limit(page_size).offset((page - 1) * page_size);
    }

    query
}

/// Translate filter clauses into a SeaORM condition tree.
pub fn build_condition<C: ColumnTrait>(
    filters: &[FilterClause],
    column_for: impl Fn(&str) -> Option<C>,
) -> Condition {
    let mut condition = Condition::all();
    for clause in filters {
        let Some(column) = column_for(clause.field()) else {
            continue;
        };
        condition = match clause {
            FilterClause::Eq { value, .. } => condition.add(column.eq(value.clone())),
            FilterClause::Like { value, .. } => condition.add(column.contains(value.clone())),
            FilterClause::In { values, .. } => condition.add(column.is_in(values.clone())),
            FilterClause::IsNull { .. } => condition.add(column.is_null()),
        };
    }
    condition
}

/// Keep `current` unless the incoming `candidate` is non-empty.
///
/// This is the single place the partial-field upsert rule lives.
pub fn keep_if_empty(candidate: &str, current: &str) -> String {
    if candidate.trim().is_empty() {
        current.to_string()
    } else {
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_candidate_keeps_current_value() {
        assert_eq!(keep_if_empty("", "kept"), "kept");
        assert_eq!(keep_if_empty("  ", "kept"), "kept");
        assert_eq!(keep_if_empty("new", "old"), "new");
    }
}
