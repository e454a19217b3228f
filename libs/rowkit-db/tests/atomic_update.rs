#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use common::{Product, setup};
use rowkit_db::{AtomicOp, RepoError};

#[tokio::test]
async fn increments_compose() {
    let db = setup().await;
    let ctx = db.ctx();
    let product = db
        .shop
        .products
        .create(&ctx, Product::new("beans", 9.0, 10))
        .await
        .unwrap();

    let repo = &db.shop.products;
    assert_eq!(
        repo.atomic_update(&ctx, product.id, &[AtomicOp::increment("count", 5)])
            .await
            .unwrap(),
        1
    );
    repo.atomic_update(&ctx, product.id, &[AtomicOp::new("count", -2)])
        .await
        .unwrap();

    let stored = repo.find_by_id(&ctx, product.id).await.unwrap();
    assert_eq!(stored.count, 13);
}

#[tokio::test]
async fn several_ops_apply_in_one_statement() {
    let db = setup().await;
    let ctx = db.ctx();
    let product = db
        .shop
        .products
        .create(&ctx, Product::new("grinder", 40.0, 2))
        .await
        .unwrap();

    db.shop
        .products
        .atomic_update(
            &ctx,
            product.id,
            &[
                AtomicOp::decrement("count", 1),
                AtomicOp::new("price", -2.5),
            ],
        )
        .await
        .unwrap();

    let stored = db.shop.products.find_by_id(&ctx, product.id).await.unwrap();
    assert_eq!(stored.count, 1);
    assert_eq!(stored.price, 37.5);
}

#[tokio::test]
async fn unknown_field_is_rejected_and_row_untouched() {
    let db = setup().await;
    let ctx = db.ctx();
    let product = db
        .shop
        .products
        .create(&ctx, Product::new("kettle", 30.0, 4))
        .await
        .unwrap();

    let err = db
        .shop
        .products
        .atomic_update(
            &ctx,
            product.id,
            &[
                AtomicOp::increment("count", 1),
                AtomicOp::increment("not_a_real_field", 1),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepoError::UnknownField { ref field, .. } if field == "not_a_real_field"
    ));
    let stored = db.shop.products.find_by_id(&ctx, product.id).await.unwrap();
    assert_eq!(stored, product);
}

#[tokio::test]
async fn identifier_column_cannot_be_incremented() {
    let db = setup().await;
    let err = db
        .shop
        .products
        .atomic_update(&db.ctx(), 1, &[AtomicOp::increment("id", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownField { .. }));
}

#[tokio::test]
async fn no_ops_issue_no_sql() {
    let db = setup().await;
    let ctx = common::RecordingConn::wrap(&db.ctx(), db.shop.journal.clone());

    let affected = db.shop.products.atomic_update(&ctx, 1, &[]).await.unwrap();

    assert_eq!(affected, 0);
    assert!(db.shop.journal().is_empty());
}

#[tokio::test]
async fn missing_row_reports_zero_affected() {
    let db = setup().await;
    let affected = db
        .shop
        .products
        .atomic_update(&db.ctx(), 12345, &[AtomicOp::increment("count", 1)])
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn repeated_field_is_rejected_before_sql() {
    let db = setup().await;
    let product = db
        .shop
        .products
        .create(&db.ctx(), Product::new("scale", 12.0, 10))
        .await
        .unwrap();
    let ctx = common::RecordingConn::wrap(&db.ctx(), db.shop.journal.clone());

    let err = db
        .shop
        .products
        .atomic_update(
            &ctx,
            product.id,
            &[
                AtomicOp::increment("count", 5),
                AtomicOp::increment("count", 3),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepoError::DuplicateField {
            table: "products",
            field: "count"
        }
    ));
    assert!(db.shop.journal().is_empty());
    let stored = db.shop.products.find_by_id(&db.ctx(), product.id).await.unwrap();
    assert_eq!(stored.count, 10);
}
