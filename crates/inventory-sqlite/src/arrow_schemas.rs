use crate::Table;
use arrow::datatypes::{DataType, Field, Schema};

pub(crate) fn schema_for(table: Table) -> Schema {
    match table {
        Table::Services => Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("port", DataType::Int64, false),
            Field::new("proto", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("first_seen", DataType::Utf8, false),
            Field::new("last_seen", DataType::Utf8, false),
        ]),
        Table::Addresses => Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("ip_address", DataType::Utf8, false),
            Field::new("first_seen", DataType::Utf8, false),
            Field::new("last_seen", DataType::Utf8, false),
            Field::new("whois_record", DataType::Utf8, true),
        ]),
        Table::Calls => Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("address_id", DataType::Int64, false),
            Field::new("service_id", DataType::Int64, false),
            Field::new("count", DataType::Int64, false),
        ]),
    }
}
