use serde::Serialize;

use crate::{
    dialect::Dialect,
    schema::{MigrationPlan, SchemaSnapshot},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub sql_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunSummary {
    pub table_name: String,
    /// Whether the table existed before this run.
    pub table_exists: bool,
    pub new_columns: Vec<ColumnSummary>,
    pub new_indexes: Vec<String>,
    pub rows_to_sync: usize,
    pub rows_to_delete: u64,
}

impl DryRunSummary {
    pub fn new(
        dialect: &dyn Dialect,
        snapshot: &SchemaSnapshot,
        plan: &MigrationPlan,
        rows_to_sync: usize,
        rows_to_delete: u64,
    ) -> Self {
        Self {
            table_name: plan.table.clone(),
            table_exists: snapshot.exists,
            new_columns: plan
                .columns_to_add
                .iter()
                .map(|column| ColumnSummary {
                    name: column.name.clone(),
                    sql_type: dialect.sql_type(column.data_type),
                })
                .collect(),
            new_indexes: plan
                .indexes_to_add
                .iter()
                .map(|index| index.name.clone())
                .collect(),
            rows_to_sync,
            rows_to_delete,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.table_exists
            || !self.new_columns.is_empty()
            || !self.new_indexes.is_empty()
            || self.rows_to_sync > 0
            || self.rows_to_delete > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::DataType,
        dialect::PostgresDialect,
        job::IndexDefinition,
        schema::PlannedColumn,
    };

    #[test]
    fn summary_reports_plan_contents_as_json() {
        let plan = MigrationPlan {
            table: "readings".to_string(),
            create_table: false,
            columns_to_add: vec![PlannedColumn {
                name: "reading".to_string(),
                data_type: DataType::Float,
                key: false,
                not_null: false,
            }],
            key_columns: vec!["id".to_string()],
            indexes_to_add: vec![IndexDefinition::new("idx_reading")],
        };
        let mut snapshot = SchemaSnapshot::absent("readings");
        snapshot.exists = true;
        let summary = DryRunSummary::new(&PostgresDialect, &snapshot, &plan, 4, 1);
        assert!(summary.has_changes());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["table_name"], "readings");
        assert_eq!(json["new_columns"][0]["sql_type"], "DOUBLE PRECISION");
        assert_eq!(json["new_indexes"][0], "idx_reading");
        assert_eq!(json["rows_to_delete"], 1);
    }
}
