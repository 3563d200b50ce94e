use anyhow::{bail, Result};
use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use rusqlite::Row;
use std::sync::Arc;

use crate::arrow_schemas::schema_for;
use crate::{Db, Table};

const CHUNK: usize = 10_000;

impl Db {
    /// Write every row of `table` to a ZSTD-compressed Parquet file.
    /// Returns the number of rows written.
    pub fn export_table_to_parquet(&self, table: Table, out: &std::path::Path) -> Result<usize> {
        let schema = Arc::new(schema_for(table));
        let columns: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        let sql = format!("SELECT {} FROM {} ORDER BY id", columns.join(", "), table.name());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let file = std::fs::File::create(out)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        let mut total = 0;
        loop {
            let mut batch = RowBatch::new(&schema)?;
            let mut count = 0;
            while count < CHUNK {
                let Some(row) = rows.next()? else { break; };
                batch.push(row)?;
                count += 1;
            }
            if count == 0 { break; }
            let rb = RecordBatch::try_new(schema.clone(), batch.finish())?;
            writer.write(&rb)?;
            total += count;
        }

        writer.close()?;
        Ok(total)
    }
}

enum Column {
    Int(Int64Builder),
    Text(StringBuilder),
}

struct RowBatch {
    columns: Vec<Column>,
}

impl RowBatch {
    fn new(schema: &Schema) -> Result<Self> {
        let mut columns = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            columns.push(match field.data_type() {
                DataType::Int64 => Column::Int(Int64Builder::with_capacity(CHUNK)),
                DataType::Utf8 => Column::Text(StringBuilder::new()),
                other => bail!("no column builder for {other}"),
            });
        }
        Ok(RowBatch { columns })
    }

    fn push(&mut self, row: &Row<'_>) -> Result<()> {
        for (idx, col) in self.columns.iter_mut().enumerate() {
            match col {
                Column::Int(b) => b.append_option(row.get::<_, Option<i64>>(idx)?),
                Column::Text(b) => b.append_option(row.get::<_, Option<String>>(idx)?),
            }
        }
        Ok(())
    }

    fn finish(self) -> Vec<ArrayRef> {
        self.columns
            .into_iter()
            .map(|col| -> ArrayRef {
                match col {
                    Column::Int(mut b) => Arc::new(b.finish()),
                    Column::Text(mut b) => Arc::new(b.finish()),
                }
            })
            .collect()
    }
}
