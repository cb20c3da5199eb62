mod common;

use common::{
    memory_uow, seed_products, Customer, Order, OrderLine, Product, CUSTOMER_ORDERS, LINES,
    ORDER_CUSTOMER,
};
use repokit_core::{field, Filter, ReadRepository, RepoError, Repository, Specification, UnitOfWork};
use std::collections::BTreeSet;

async fn ids(uow: &UnitOfWork, spec: &Specification<Product>) -> BTreeSet<i64> {
    uow.repository::<Product>()
        .unwrap()
        .get_by_specification(spec)
        .await
        .unwrap()
        .into_iter()
        .map(|product| product.id)
        .collect()
}

async fn seed_orders(uow: &UnitOfWork) {
    uow.repository::<Customer>()
        .unwrap()
        .add(&Customer::new(1, "Ada"))
        .unwrap();
    uow.repository::<Order>()
        .unwrap()
        .add_range(&[Order::new(10, 1, "open"), Order::new(11, 1, "shipped")])
        .unwrap();
    uow.repository::<OrderLine>()
        .unwrap()
        .add_range(&[
            OrderLine::new(100, 10, "nail", 40),
            OrderLine::new(101, 10, "glue", 1),
            OrderLine::new(102, 11, "tape", 2),
        ])
        .unwrap();
    uow.save().await.unwrap();
}

#[tokio::test]
async fn composed_specification_matches_the_intersection() {
    let uow = memory_uow();
    let products: Vec<_> = (1..=10)
        .map(|id| Product::new(id, &format!("P{id}"), (id * 10) as f64))
        .collect();
    seed_products(&uow, &products).await;

    let cheap = Specification::matching(field("price").lt(75));
    let named = Specification::matching(Filter::any([
        field("name").like("P1%"),
        field("name").eq("P5"),
    ]));

    let left = ids(&uow, &cheap).await;
    let right = ids(&uow, &named).await;
    let composed = ids(&uow, &cheap.clone().compose(named.clone())).await;

    let expected: BTreeSet<_> = left.intersection(&right).copied().collect();
    assert_eq!(composed, expected);
    assert_eq!(composed, BTreeSet::from([1, 5]));
    assert_eq!(ids(&uow, &cheap.and(named)).await, expected);
}

#[tokio::test]
async fn negated_and_null_filters() {
    let uow = memory_uow();
    seed_products(
        &uow,
        &[
            Product::new(1, "A", 10.0),
            Product::new(2, "B", 60.0),
            Product::new(3, "C", 90.0),
        ],
    )
    .await;

    let not_b = Specification::matching(!field("name").eq("B"));
    assert_eq!(ids(&uow, &not_b).await, BTreeSet::from([1, 3]));

    let uncategorised = Specification::matching(field("category_id").is_null());
    assert_eq!(ids(&uow, &uncategorised).await.len(), 3);

    let listed = Specification::matching(field("id").is_in([3, 1, 42]));
    assert_eq!(ids(&uow, &listed).await, BTreeSet::from([1, 3]));

    let none = Specification::matching(field("id").is_in(Vec::<i64>::new()));
    assert!(ids(&uow, &none).await.is_empty());
}

#[tokio::test]
async fn includes_load_live_children_and_references() {
    let uow = memory_uow();
    seed_orders(&uow).await;
    let lines = uow.repository::<OrderLine>().unwrap();
    let glue = lines.get_by_id_or_throw(&101).await.unwrap();
    lines.delete(&glue).unwrap();
    uow.save().await.unwrap();

    let orders = uow.repository::<Order>().unwrap();
    let spec = Specification::all()
        .add_include(LINES)
        .add_include(ORDER_CUSTOMER)
        .apply_order_by("id");
    let loaded = orders.get_by_specification(&spec).await.unwrap();

    assert_eq!(loaded.len(), 2);
    let skus: Vec<_> = loaded[0].lines.iter().map(|line| line.sku.as_str()).collect();
    assert_eq!(skus, ["nail"]);
    assert_eq!(loaded[1].lines.len(), 1);
    assert!(loaded
        .iter()
        .all(|order| order.customer.as_ref().map(|c| c.name.as_str()) == Some("Ada")));

    let everything = orders
        .get_by_specification(&spec.including_deleted())
        .await
        .unwrap();
    assert_eq!(everything[0].lines.len(), 2);
}

#[tokio::test]
async fn nested_includes_load_lines_under_live_orders() {
    let uow = memory_uow();
    seed_orders(&uow).await;
    let orders = uow.repository::<Order>().unwrap();
    let shipped = orders.get_by_id_or_throw(&11).await.unwrap();
    orders.delete(&shipped).unwrap();
    uow.save().await.unwrap();

    let customers = uow.repository::<Customer>().unwrap();
    let grouped = Specification::all().add_grouped_include(CUSTOMER_ORDERS, "lines");
    let dotted = Specification::all().add_include_path("orders.lines");

    for spec in [grouped, dotted] {
        let customer = customers.get_single_or_throw(&spec).await.unwrap();
        let order_ids: Vec<_> = customer.orders.iter().map(|order| order.id).collect();
        assert_eq!(order_ids, [10]);
        let skus: Vec<_> = customer.orders[0]
            .lines
            .iter()
            .map(|line| line.sku.as_str())
            .collect();
        assert_eq!(skus, ["nail", "glue"]);

        let everything = customers
            .get_single_or_throw(&spec.including_deleted())
            .await
            .unwrap();
        let order_ids: Vec<_> = everything.orders.iter().map(|order| order.id).collect();
        assert_eq!(order_ids, [10, 11]);
        assert!(everything.orders[1].tombstone.is_deleted);
        assert_eq!(everything.orders[1].lines[0].sku, "tape");
    }
}

#[tokio::test]
async fn repeated_include_paths_load_once() {
    let uow = memory_uow();
    seed_orders(&uow).await;
    let orders = uow.repository::<Order>().unwrap();

    let spec = Specification::matching(field("id").eq(10))
        .add_include(LINES)
        .add_include_path("lines")
        .compose(Specification::all().add_include(LINES));
    assert_eq!(spec.include_paths().len() + spec.includes().len(), 2);

    let order = orders.get_single_or_throw(&spec).await.unwrap();
    assert_eq!(order.lines.len(), 2);
}

#[tokio::test]
async fn unresolvable_include_paths_fail_before_reading() {
    let uow = memory_uow();
    let orders = uow.repository::<Order>().unwrap();

    for path in ["invoices", "lines.product", "lines..sku"] {
        let spec = Specification::all().add_include_path(path);
        assert!(
            matches!(
                orders.get_by_specification(&spec).await.unwrap_err(),
                RepoError::Mapping(_)
            ),
            "path `{path}`"
        );
    }
}

#[tokio::test]
async fn composed_paging_and_ordering_take_the_right_operand() {
    let uow = memory_uow();
    let products: Vec<_> = (1..=5)
        .map(|id| Product::new(id, &format!("P{id}"), id as f64))
        .collect();
    seed_products(&uow, &products).await;

    let left = Specification::all()
        .apply_order_by("price")
        .apply_paging(0, 4)
        .unwrap();
    let right = Specification::all()
        .apply_order_by_descending("price")
        .apply_paging(1, 2)
        .unwrap();

    let picked: Vec<_> = uow
        .repository::<Product>()
        .unwrap()
        .get_by_specification(&left.compose(right))
        .await
        .unwrap()
        .into_iter()
        .map(|product| product.id)
        .collect();
    assert_eq!(picked, [4, 3]);
}
