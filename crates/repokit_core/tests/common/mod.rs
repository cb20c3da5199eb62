#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use repokit_core::{
    open_db_in_memory, AuditStamp, Column, Entity, EntityDescriptor, ManualClock, Migration,
    Navigation, StoreOptions, Tombstone, UnitOfWork,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SCHEMA: &[Migration] = &[Migration::new(
    1,
    "CREATE TABLE categories (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL
     );
     CREATE TABLE products (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        category_id INTEGER NULL REFERENCES categories(id),
        created_at TEXT NULL,
        created_by TEXT NULL,
        modified_at TEXT NULL,
        modified_by TEXT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at TEXT NULL,
        deleted_by TEXT NULL,
        row_version INTEGER NOT NULL DEFAULT 0
     );
     CREATE TABLE customers (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL
     );
     CREATE TABLE orders (
        id INTEGER PRIMARY KEY NOT NULL,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        status TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at TEXT NULL
     );
     CREATE TABLE order_lines (
        id INTEGER PRIMARY KEY NOT NULL,
        order_id INTEGER NOT NULL REFERENCES orders(id),
        sku TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at TEXT NULL
     );",
)];

pub static CATEGORY: EntityDescriptor =
    EntityDescriptor::new("Category", "categories", Column::integer("id"))
        .with_columns(&[Column::text("name")]);

pub static PRODUCT: EntityDescriptor =
    EntityDescriptor::new("Product", "products", Column::integer("id"))
        .with_columns(&[
            Column::text("name"),
            Column::real("price"),
            Column::integer("category_id"),
        ])
        .with_navigations(&[Navigation::reference("category", category, "category_id")])
        .auditable()
        .soft_deletable_by_user()
        .concurrency_checked();

pub static CUSTOMER: EntityDescriptor =
    EntityDescriptor::new("Customer", "customers", Column::integer("id"))
        .with_columns(&[Column::text("name")])
        .with_navigations(&[Navigation::collection("orders", order, "customer_id")]);

pub static ORDER: EntityDescriptor = EntityDescriptor::new("Order", "orders", Column::integer("id"))
    .with_columns(&[Column::integer("customer_id"), Column::text("status")])
    .with_navigations(&[
        Navigation::collection("lines", order_line, "order_id"),
        Navigation::reference("customer", customer, "customer_id"),
    ])
    .soft_deletable();

pub static ORDER_LINE: EntityDescriptor =
    EntityDescriptor::new("OrderLine", "order_lines", Column::integer("id"))
        .with_columns(&[
            Column::integer("order_id"),
            Column::text("sku"),
            Column::integer("quantity"),
        ])
        .soft_deletable();

fn category() -> &'static EntityDescriptor {
    &CATEGORY
}

fn customer() -> &'static EntityDescriptor {
    &CUSTOMER
}

fn order() -> &'static EntityDescriptor {
    &ORDER
}

fn order_line() -> &'static EntityDescriptor {
    &ORDER_LINE
}

pub const CUSTOMER_ORDERS: Navigation = Navigation::collection("orders", order, "customer_id");
pub const LINES: Navigation = Navigation::collection("lines", order_line, "order_id");
pub const ORDER_CUSTOMER: Navigation = Navigation::reference("customer", customer, "customer_id");
pub const PRODUCT_CATEGORY: Navigation = Navigation::reference("category", category, "category_id");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

impl Entity for Category {
    type Key = i64;

    fn descriptor() -> &'static EntityDescriptor {
        &CATEGORY
    }

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(flatten)]
    pub audit: AuditStamp,
    #[serde(flatten)]
    pub tombstone: Tombstone,
    #[serde(default)]
    pub row_version: i64,
}

impl Product {
    pub fn new(id: i64, name: &str, price: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            price,
            category_id: None,
            category: None,
            audit: AuditStamp::default(),
            tombstone: Tombstone::default(),
            row_version: 0,
        }
    }

    pub fn in_category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }
}

impl Entity for Product {
    type Key = i64;

    fn descriptor() -> &'static EntityDescriptor {
        &PRODUCT
    }

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<Order>,
}

impl Customer {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            orders: Vec::new(),
        }
    }
}

impl Entity for Customer {
    type Key = i64;

    fn descriptor() -> &'static EntityDescriptor {
        &CUSTOMER
    }

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<OrderLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<Customer>,
    #[serde(flatten)]
    pub tombstone: Tombstone,
}

impl Order {
    pub fn new(id: i64, customer_id: i64, status: &str) -> Self {
        Self {
            id,
            customer_id,
            status: status.to_string(),
            lines: Vec::new(),
            customer: None,
            tombstone: Tombstone::default(),
        }
    }
}

impl Entity for Order {
    type Key = i64;

    fn descriptor() -> &'static EntityDescriptor {
        &ORDER
    }

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    pub quantity: i64,
    #[serde(flatten)]
    pub tombstone: Tombstone,
}

impl OrderLine {
    pub fn new(id: i64, order_id: i64, sku: &str, quantity: i64) -> Self {
        Self {
            id,
            order_id,
            sku: sku.to_string(),
            quantity,
            tombstone: Tombstone::default(),
        }
    }
}

impl Entity for OrderLine {
    type Key = i64;

    fn descriptor() -> &'static EntityDescriptor {
        &ORDER_LINE
    }

    fn key(&self) -> i64 {
        self.id
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

/// Unit of work over a fresh in-memory database.
pub fn memory_uow() -> UnitOfWork {
    let conn = open_db_in_memory(SCHEMA, &StoreOptions::default()).unwrap();
    UnitOfWork::new(conn)
}

/// Unit of work over a fresh in-memory database with a controllable clock.
pub fn clocked_uow() -> (UnitOfWork, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let conn = open_db_in_memory(SCHEMA, &StoreOptions::default()).unwrap();
    let uow = UnitOfWork::builder(conn).clock(clock.clone()).build();
    (uow, clock)
}

/// Saves `products` in one checkpoint.
pub async fn seed_products(uow: &UnitOfWork, products: &[Product]) {
    use repokit_core::Repository;

    uow.repository::<Product>()
        .unwrap()
        .add_range(products)
        .unwrap();
    uow.save().await.unwrap();
}
