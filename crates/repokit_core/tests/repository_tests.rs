mod common;

use common::{memory_uow, seed_products, Category, Product};
use repokit_core::{field, ReadRepository, RepoError, Repository, Specification};

fn names(products: &[Product]) -> Vec<&str> {
    products.iter().map(|product| product.name.as_str()).collect()
}

#[tokio::test]
async fn paged_read_orders_before_paging() {
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
    let repo = uow.repository::<Product>().unwrap();

    let spec = Specification::matching(field("price").gt(50)).apply_order_by_descending("price");
    let page = repo.get_paged(1, 1, Some(&spec)).await.unwrap();

    assert_eq!(names(&page.items), ["C"]);
    assert_eq!(page.total_items, 2);
    assert_eq!(page.total_pages(), 2);
    assert!(page.has_next());
    assert!(!page.has_previous());
}

#[tokio::test]
async fn page_sizes_follow_the_remaining_rows() {
    let uow = memory_uow();
    let products: Vec<_> = (1..=7)
        .map(|id| Product::new(id, &format!("P{id}"), id as f64))
        .collect();
    seed_products(&uow, &products).await;
    let repo = uow.repository::<Product>().unwrap();

    let total = products.len() as u64;
    let page_size = 3u32;
    for page_number in 1..=4u32 {
        let page = repo.get_paged(page_number, page_size, None).await.unwrap();
        let already_seen = u64::from(page_number - 1) * u64::from(page_size);
        let expected = u64::from(page_size).min(total.saturating_sub(already_seen));
        assert_eq!(page.items.len() as u64, expected, "page {page_number}");
        assert_eq!(page.total_items, total);
    }

    let second = repo.get_paged(2, page_size, None).await.unwrap();
    let ids: Vec<_> = second.items.iter().map(|product| product.id).collect();
    assert_eq!(ids, [4, 5, 6]);
}

#[tokio::test]
async fn invalid_page_arguments_fail_before_reading() {
    let uow = memory_uow();
    let repo = uow.repository::<Product>().unwrap();

    assert!(matches!(
        repo.get_paged(0, 10, None).await.unwrap_err(),
        RepoError::Validation(_)
    ));
    assert!(matches!(
        repo.get_paged(1, 0, None).await.unwrap_err(),
        RepoError::Validation(_)
    ));
}

#[tokio::test]
async fn single_first_count_and_exists() {
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
    let repo = uow.repository::<Product>().unwrap();

    let expensive = Specification::matching(field("price").gt(50));
    assert!(matches!(
        repo.get_single_by_specification(&expensive).await.unwrap_err(),
        RepoError::MultipleMatches { count: 2, .. }
    ));

    let first = repo
        .get_first_by_specification(&expensive.clone().apply_order_by_descending("price"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "C");

    let only_b = Specification::matching(field("name").eq("B"));
    assert_eq!(repo.get_single_or_throw(&only_b).await.unwrap().id, 2);

    let nobody = Specification::matching(field("name").eq("Z"));
    assert!(repo.get_single_by_specification(&nobody).await.unwrap().is_none());
    assert!(matches!(
        repo.get_single_or_throw(&nobody).await.unwrap_err(),
        RepoError::NotFound { entity: "Product", .. }
    ));

    assert_eq!(repo.count(None).await.unwrap(), 3);
    assert_eq!(repo.count(Some(&expensive)).await.unwrap(), 2);
    assert!(repo.exists(&field("name").like("B%")).await.unwrap());
    assert!(!repo.exists(&field("price").gt(100)).await.unwrap());
}

#[tokio::test]
async fn multiple_matches_count_stays_within_the_page() {
    let uow = memory_uow();
    let products: Vec<_> = (1..=5)
        .map(|id| Product::new(id, &format!("P{id}"), id as f64))
        .collect();
    seed_products(&uow, &products).await;
    let repo = uow.repository::<Product>().unwrap();

    let window = Specification::all().apply_paging(1, 3).unwrap();
    assert!(matches!(
        repo.get_single_by_specification(&window).await.unwrap_err(),
        RepoError::MultipleMatches { count: 3, .. }
    ));

    let tail = Specification::all().apply_paging(3, 10).unwrap();
    assert!(matches!(
        repo.get_single_by_specification(&tail).await.unwrap_err(),
        RepoError::MultipleMatches { count: 2, .. }
    ));

    let last = Specification::all().apply_paging(4, 10).unwrap();
    assert_eq!(repo.get_single_or_throw(&last).await.unwrap().id, 5);
}

#[tokio::test]
async fn unknown_fields_are_mapping_errors() {
    let uow = memory_uow();
    let repo = uow.repository::<Product>().unwrap();

    let spec = Specification::matching(field("colour").eq("red"));
    assert!(matches!(
        repo.get_by_specification(&spec).await.unwrap_err(),
        RepoError::Mapping(_)
    ));
    assert!(matches!(
        repo.get_by_specification(&Specification::all().apply_order_by("colour"))
            .await
            .unwrap_err(),
        RepoError::Mapping(_)
    ));
}

#[tokio::test]
async fn grouped_read_keeps_first_appearance_order() {
    let uow = memory_uow();
    let categories = uow.repository::<Category>().unwrap();
    categories
        .add_range(&[
            Category {
                id: 1,
                name: "tools".to_string(),
            },
            Category {
                id: 2,
                name: "toys".to_string(),
            },
        ])
        .unwrap();
    seed_products(
        &uow,
        &[
            Product::new(1, "hammer", 12.0).in_category(1),
            Product::new(2, "kite", 20.0).in_category(2),
            Product::new(3, "saw", 30.0).in_category(1),
            Product::new(4, "loose", 5.0),
        ],
    )
    .await;
    let repo = uow.repository::<Product>().unwrap();

    let groups = repo
        .get_grouped_by_specification(&Specification::all().apply_group_by("category_id"))
        .await
        .unwrap();
    let layout: Vec<_> = groups
        .iter()
        .map(|group| (group.key.clone(), names(&group.items)))
        .collect();
    assert_eq!(
        layout,
        vec![
            (serde_json::json!(1), vec!["hammer", "saw"]),
            (serde_json::json!(2), vec!["kite"]),
            (serde_json::Value::Null, vec!["loose"]),
        ]
    );

    assert!(matches!(
        repo.get_grouped_by_specification(&Specification::all())
            .await
            .unwrap_err(),
        RepoError::Validation(_)
    ));
}

#[tokio::test]
async fn references_are_loaded_on_request() {
    let uow = memory_uow();
    uow.repository::<Category>()
        .unwrap()
        .add(&Category {
            id: 7,
            name: "garden".to_string(),
        })
        .unwrap();
    seed_products(
        &uow,
        &[
            Product::new(1, "rake", 15.0).in_category(7),
            Product::new(2, "misc", 1.0),
        ],
    )
    .await;
    let repo = uow.repository::<Product>().unwrap();

    let plain = repo.get_all().await.unwrap();
    assert!(plain.iter().all(|product| product.category.is_none()));

    let loaded = repo
        .get_by_specification(&Specification::all().add_include_path("category"))
        .await
        .unwrap();
    assert_eq!(loaded[0].category.as_ref().unwrap().name, "garden");
    assert!(loaded[1].category.is_none());
}

#[tokio::test]
async fn tracked_update_writes_changed_columns_and_bumps_version() {
    let uow = memory_uow();
    seed_products(&uow, &[Product::new(1, "A", 10.0)]).await;
    let repo = uow.repository::<Product>().unwrap();

    let mut product = repo.get_by_id(&1).await.unwrap().unwrap();
    repo.update(&product).unwrap();
    assert!(!uow.has_changes(), "unchanged tracked entity stages nothing");

    product.price = 12.5;
    repo.update(&product).unwrap();
    assert_eq!(uow.save().await.unwrap(), 1);

    let stored = repo.get_by_id_or_throw(&1).await.unwrap();
    assert_eq!(stored.price, 12.5);
    assert_eq!(stored.row_version, 1);
}

#[tokio::test]
async fn stale_row_version_fails_the_checkpoint() {
    let uow = memory_uow();
    seed_products(&uow, &[Product::new(1, "A", 10.0)]).await;
    let repo = uow.repository::<Product>().unwrap();

    let mut stale = repo.get_by_id(&1).await.unwrap().unwrap();
    let mut fresh = stale.clone();
    fresh.name = "first writer".to_string();
    repo.update(&fresh).unwrap();
    uow.save().await.unwrap();

    stale.name = "second writer".to_string();
    repo.update(&stale).unwrap();
    let err = uow.save().await.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(uow.pending_changes(), 1, "failed checkpoint keeps its changes");

    assert_eq!(uow.discard_changes(), 1);
    let stored = repo.get_by_id_or_throw(&1).await.unwrap();
    assert_eq!(stored.name, "first writer");
}

#[tokio::test]
async fn delete_by_id_requires_a_live_entity() {
    let uow = memory_uow();
    seed_products(&uow, &[Product::new(1, "A", 10.0)]).await;
    let repo = uow.repository::<Product>().unwrap();

    assert!(matches!(
        repo.delete_by_id(&99).await.unwrap_err(),
        RepoError::NotFound { entity: "Product", .. }
    ));

    repo.delete_by_id(&1).await.unwrap();
    uow.save().await.unwrap();
    assert!(matches!(
        repo.delete_by_id(&1).await.unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[tokio::test]
async fn hard_delete_removes_rows_without_tombstones() {
    let uow = memory_uow();
    let repo = uow.repository::<Category>().unwrap();
    let category = Category {
        id: 1,
        name: "tools".to_string(),
    };
    repo.add(&category).unwrap();
    uow.save().await.unwrap();

    repo.delete(&category).unwrap();
    assert_eq!(uow.save().await.unwrap(), 1);
    assert!(repo.get_by_id(&1).await.unwrap().is_none());

    repo.delete(&category).unwrap();
    assert!(matches!(
        uow.save().await.unwrap_err(),
        RepoError::NotFound { entity: "Category", .. }
    ));
}
