//! Common test fixtures for pipeline stage tests.
//!
//! Raw inputs are built the way the CSV source delivers them: every column is
//! nullable text. Result helpers cast back to plain Rust values so assertions
//! do not depend on the engine's physical string or integer representation.

use crate::core::EtlContext;
use arrow::array::{Array, AsArray, RecordBatch, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use datafusion::dataframe::DataFrame;
use std::sync::Arc;

/// Raw sales headers in source order.
pub const SALES_HEADERS: [&str; 8] = [
    "Order_ID",
    "Product_ID",
    "Region",
    "Order_Date",
    "Quantity",
    "Unit_Price",
    "Discount",
    "Total_Sales",
];

/// Raw shipment headers.
pub const SHIPMENT_HEADERS: [&str; 2] = ["Order_ID", "Delay_Days"];

/// Builds a text-only DataFrame with the given headers and rows.
pub fn text_frame(ctx: &EtlContext, headers: &[&str], rows: &[Vec<Option<&str>>]) -> DataFrame {
    let schema = Arc::new(Schema::new(
        headers
            .iter()
            .map(|h| Field::new(*h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));

    let columns = (0..headers.len())
        .map(|i| {
            Arc::new(StringArray::from(
                rows.iter().map(|row| row[i]).collect::<Vec<_>>(),
            )) as Arc<dyn Array>
        })
        .collect::<Vec<_>>();

    let batch = RecordBatch::try_new(schema, columns).unwrap();
    ctx.inner().read_batch(batch).unwrap()
}

/// A raw sales row with every field present.
pub fn sales_row<'a>(
    order_id: &'a str,
    product_id: &'a str,
    region: &'a str,
    order_date: &'a str,
    quantity: &'a str,
    unit_price: &'a str,
    total_sales: &'a str,
) -> Vec<Option<&'a str>> {
    vec![
        Some(order_id),
        Some(product_id),
        Some(region),
        Some(order_date),
        Some(quantity),
        Some(unit_price),
        None,
        Some(total_sales),
    ]
}

/// Collects a DataFrame into a single batch.
pub async fn collect_one(df: DataFrame) -> RecordBatch {
    let schema = df.schema().inner().clone();
    let batches = df.collect().await.unwrap();
    concat_batches(&schema, &batches).unwrap()
}

/// Reads a column as optional strings.
pub fn strings(batch: &RecordBatch, column: &str) -> Vec<Option<String>> {
    let array = cast(batch.column_by_name(column).unwrap(), &DataType::Utf8).unwrap();
    array
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect()
}

/// Reads a column as optional 64-bit integers.
pub fn ints(batch: &RecordBatch, column: &str) -> Vec<Option<i64>> {
    let array = cast(batch.column_by_name(column).unwrap(), &DataType::Int64).unwrap();
    array.as_primitive::<Int64Type>().iter().collect()
}

/// Reads a column as optional doubles.
pub fn floats(batch: &RecordBatch, column: &str) -> Vec<Option<f64>> {
    let array = cast(batch.column_by_name(column).unwrap(), &DataType::Float64).unwrap();
    array.as_primitive::<Float64Type>().iter().collect()
}
