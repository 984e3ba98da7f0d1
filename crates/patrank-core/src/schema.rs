/// Arrow schema for patent publication rows.
///
/// Both the local Parquet snapshot and the rows returned by a corpus query
/// share these six columns.
pub mod publications {
    use arrow::datatypes::{DataType, Field, Schema};

    pub const PUBLICATION_NUMBER: &str = "publication_number";
    pub const TITLE: &str = "title";
    pub const ABSTRACT: &str = "abstract";
    pub const ASSIGNEE: &str = "assignee";
    pub const PUBLICATION_DATE: &str = "publication_date";
    pub const IPC_CODES: &str = "ipc_codes";

    /// Column names in query-output order.
    pub const COLUMNS: [&str; 6] = [
        PUBLICATION_NUMBER,
        TITLE,
        ABSTRACT,
        ASSIGNEE,
        PUBLICATION_DATE,
        IPC_CODES,
    ];

    /// `publication_date` is `YYYYMMDD` as an integer, `0` when unknown.
    /// `ipc_codes` is a comma-separated list.
    pub fn publications_schema() -> Schema {
        Schema::new(vec![
            Field::new(PUBLICATION_NUMBER, DataType::Utf8, false),
            Field::new(TITLE, DataType::Utf8, true),
            Field::new(ABSTRACT, DataType::Utf8, true),
            Field::new(ASSIGNEE, DataType::Utf8, true),
            Field::new(PUBLICATION_DATE, DataType::Int64, true),
            Field::new(IPC_CODES, DataType::Utf8, true),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::publications;

    #[test]
    fn publications_schema_has_expected_fields() {
        let schema = publications::publications_schema();
        assert_eq!(schema.fields().len(), 6);
        for (field, name) in schema.fields().iter().zip(publications::COLUMNS) {
            assert_eq!(field.name(), name);
        }
        assert!(!schema.field_with_name("publication_number").unwrap().is_nullable());
    }
}
