#![allow(dead_code)]

use arrow2::array::{Array, PrimitiveArray, Utf8Array};
use arrow2::datatypes::{DataType, Field};

use ecom_aggregates::records::TIMESTAMP_TYPE;
use ecom_aggregates::temporal::{parse_timestamp, to_millis};
use ecom_aggregates::{MemorySource, PipelineConfig, Table};

fn utf8(values: &[&str]) -> Box<dyn Array> {
    Utf8Array::<i32>::from_slice(values).boxed()
}

fn millis(text: &str) -> i64 {
    to_millis(&parse_timestamp(text).expect("valid timestamp"))
}

/// c1 (20, F, Yes, 50), c2 (20, M, No, 30), c3 (30, F, Yes, 20)
pub fn customers() -> Table {
    Table::try_new(
        vec![
            Field::new("customer_id", DataType::Utf8, true),
            Field::new("age", DataType::Int64, true),
            Field::new("gender", DataType::Utf8, true),
            Field::new("subscription_status", DataType::Utf8, true),
            Field::new("purchase_amount", DataType::Float64, true),
        ],
        vec![
            utf8(&["c1", "c2", "c3"]),
            PrimitiveArray::<i64>::from_slice([20, 20, 30]).boxed(),
            utf8(&["F", "M", "F"]),
            utf8(&["Yes", "No", "Yes"]),
            PrimitiveArray::<f64>::from_slice([50.0, 30.0, 20.0]).boxed(),
        ],
    )
    .expect("customers")
}

/// Three sales by known customers and one by an unknown user (c9).
pub fn sales() -> Table {
    Table::try_new(
        vec![
            Field::new("user_id", DataType::Utf8, true),
            Field::new("product_id", DataType::Utf8, true),
            Field::new("interaction_type", DataType::Utf8, true),
            Field::new("timestamp", TIMESTAMP_TYPE, true),
            Field::new("item_purchased", DataType::Utf8, true),
            Field::new("purchase_amount", DataType::Float64, true),
        ],
        vec![
            utf8(&["c1", "c1", "c2", "c9"]),
            utf8(&["p1", "p2", "p1", "p3"]),
            utf8(&["purchase", "view", "purchase", "like"]),
            PrimitiveArray::<i64>::from_slice([
                millis("2024-03-15T10:00:00"),
                millis("2024-04-01T09:00:00"),
                millis("2024-03-15T10:00:00"),
                millis("2023-12-31T00:00:00"),
            ])
            .to(TIMESTAMP_TYPE)
            .boxed(),
            utf8(&["Shirt", "Shoes", "Shirt", "Hat"]),
            PrimitiveArray::<f64>::from_slice([10.0, 20.0, 5.0, 7.0]).boxed(),
        ],
    )
    .expect("sales")
}

/// p1 Shirt, p2 Shoes, p4 Belt; p3 is never listed.
pub fn products() -> Table {
    Table::try_new(
        vec![
            Field::new("unique_id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("category", DataType::Utf8, true),
            Field::new("selling_price", DataType::Float64, true),
        ],
        vec![
            utf8(&["p1", "p2", "p4"]),
            utf8(&["Shirt", "Shoes", "Belt"]),
            utf8(&["Cotton", "Leather", "Leather"]),
            PrimitiveArray::<f64>::from_slice([15.0, 40.0, 25.0]).boxed(),
        ],
    )
    .expect("products")
}

pub fn empty_products() -> Table {
    Table::try_new(
        vec![
            Field::new("unique_id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("category", DataType::Utf8, true),
            Field::new("selling_price", DataType::Float64, true),
        ],
        vec![
            utf8(&[]),
            utf8(&[]),
            utf8(&[]),
            PrimitiveArray::<f64>::from_vec(Vec::new()).boxed(),
        ],
    )
    .expect("empty products")
}

pub fn source() -> MemorySource {
    MemorySource::new()
        .with_table("customers", customers())
        .with_table("sales", sales())
        .with_table("products", products())
}

pub fn config(output: &str) -> PipelineConfig {
    let mut config = PipelineConfig::new("memory", output);
    config.num_threads = Some(2);
    config
}

/// Header and rows of the raw catalog exports, as written by the upstream tooling.
pub const CUSTOMER_CSV: &str = "\
Customer ID,Age,Gender,Item Purchased,Subscription Status,Purchase Amount (USD)
c1,20,F,Shirt,Yes,50
c2,20,M,Shoes,No,30
c3,30,F,Hat,Yes,20
";

pub const SALES_CSV: &str = "\
user id,product id,Interaction type,Time stamp,Item Purchased,Purchase Amount (USD)
c1,p1,purchase,2024-03-15 10:00:00,Shirt,10
c1,p2,view,2024-04-01 09:00:00,Shoes,20
c2,p1,purchase,2024-03-15 10:00:00,Shirt,5
c9,p3,like,2023-12-31 00:00:00,Hat,7
";

pub const PRODUCT_CSV: &str = "\
Uniqe Id,Product Name,Category,Selling Price
p1,Shirt,Cotton,$15.00
p2,Shoes,Leather,$40.00
p4,Belt,Leather,$25.00
";
