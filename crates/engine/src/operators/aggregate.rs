//! Grouped aggregation merged across batches

use std::collections::BTreeMap;

use arrow::array::{Array, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use colbench_common::error::{Error, Result};
use colbench_common::BatchStream;
use futures::TryStreamExt;
use tracing::debug;

/// Sum and count of non-null values for one group key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSum {
    pub key: String,
    pub sum: f64,
    pub count: u64,
}

fn typed_column(batch: &RecordBatch, column: &str, to: &DataType) -> Result<arrow::array::ArrayRef> {
    let array = batch
        .column_by_name(column)
        .ok_or_else(|| Error::SchemaMismatch(format!("column `{column}` not in batch")))?;
    Ok(cast(array, to)?)
}

/// Sums `value` per distinct `group_by` key, ordered by key.
///
/// Keys of any type are compared as text. Rows with a null key or value are
/// skipped.
pub async fn grouped_sum(mut stream: BatchStream, group_by: &str, value: &str) -> Result<Vec<GroupSum>> {
    let mut groups: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    while let Some(batch) = stream.try_next().await? {
        let source = batch
            .column_by_name(value)
            .ok_or_else(|| Error::SchemaMismatch(format!("column `{value}` not in batch")))?;
        if !source.data_type().is_numeric() {
            return Err(Error::SchemaMismatch(format!("column `{value}` is {}, not numeric", source.data_type())));
        }
        let keys = typed_column(&batch, group_by, &DataType::Utf8)?;
        let values = typed_column(&batch, value, &DataType::Float64)?;
        let keys = keys
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::Internal("group key cast produced another type".to_string()))?;
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Internal("value cast produced another type".to_string()))?;

        for (key, value) in keys.iter().zip(values.iter()) {
            if let (Some(key), Some(value)) = (key, value) {
                let entry = groups.entry(key.to_string()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }
    debug!(group_by, value, groups = groups.len(), "grouped sum finished");
    Ok(groups.into_iter().map(|(key, (sum, count))| GroupSum { key, sum, count }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{Field, Schema};
    use futures::stream;
    use std::sync::Arc;

    fn batch(flags: Vec<Option<&str>>, qty: Vec<Option<i64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("l_returnflag", DataType::Utf8, true),
            Field::new("l_quantity", DataType::Int64, true),
        ]));
        RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(flags)), Arc::new(Int64Array::from(qty))]).unwrap()
    }

    #[tokio::test]
    async fn merges_groups_across_batches() {
        let input: BatchStream = Box::pin(stream::iter(vec![
            Ok(batch(vec![Some("R"), Some("A"), Some("N")], vec![Some(10), Some(1), Some(5)])),
            Ok(batch(vec![Some("A"), None, Some("R")], vec![Some(2), Some(100), None])),
        ]));
        let groups = grouped_sum(input, "l_returnflag", "l_quantity").await.unwrap();

        assert_eq!(
            groups,
            vec![
                GroupSum { key: "A".to_string(), sum: 3.0, count: 2 },
                GroupSum { key: "N".to_string(), sum: 5.0, count: 1 },
                GroupSum { key: "R".to_string(), sum: 10.0, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn numeric_keys_are_grouped_as_text() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Int64, false),
        ]));
        let b = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![2, 1, 2])), Arc::new(Int64Array::from(vec![5, 6, 7]))],
        )
        .unwrap();
        let input: BatchStream = Box::pin(stream::iter(vec![Ok(b)]));
        let groups = grouped_sum(input, "k", "v").await.unwrap();
        assert_eq!(groups.iter().map(|g| (g.key.as_str(), g.sum)).collect::<Vec<_>>(), vec![("1", 6.0), ("2", 12.0)]);
    }

    #[tokio::test]
    async fn text_value_column_is_rejected() {
        let input: BatchStream = Box::pin(stream::iter(vec![Ok(batch(vec![Some("R")], vec![Some(1)]))]));
        let err = grouped_sum(input, "l_quantity", "l_returnflag").await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }
}
