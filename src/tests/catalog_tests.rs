#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use futures::future::join_all;

    use crate::error::AppError;
    use crate::index::filter::{SearchFilter, SearchRequest};
    use crate::store::matches;
    use crate::tests::support::{draft, invalid_fields, test_app};
    use crate::types::{ItemDraft, ItemKind, ItemPatch, ItemStatus, Location, StatusChangeRequest};

    fn to(status: &str) -> StatusChangeRequest {
        StatusChangeRequest { target_status: status.to_string(), counterpart_id: None }
    }

    #[tokio::test]
    async fn created_item_is_searchable() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let item = app
            .create(&owner, draft("found", "wallets", "Brown wallet", "Leather wallet near the bakery", Location::named("Marktplatz")))
            .await;

        assert_eq!(item.status, ItemStatus::Open);
        assert_eq!(item.version, 1);

        let page = app.state.catalog.search(&SearchRequest::new(vec![SearchFilter::Kind(ItemKind::Found)])).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, item.id);

        // prefix match on indexed terms
        let by_text = SearchRequest::new(vec![SearchFilter::Text(vec!["leath".to_string()])]);
        let page = app.state.catalog.search(&by_text).await.unwrap();
        assert_eq!(page.items.len(), 1);

        let stored = app.state.catalog.get_item(item.id).await.unwrap();
        assert_eq!(stored, item);
    }

    #[tokio::test]
    async fn validation_reports_every_offending_field() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let bad = ItemDraft {
            kind: None,
            category: Some("spaceships".to_string()),
            title: "   ".to_string(),
            description: "x".repeat(6000),
            location: Some(Location { latitude: Some(95.0), longitude: None, place: None }),
            contact: None,
            images: Vec::new(),
        };
        let err = app.state.catalog.create_item(&owner, bad).await.unwrap_err();
        let fields = invalid_fields(err);
        for expected in ["kind", "category", "title", "description", "location"] {
            assert!(fields.iter().any(|f| f == expected), "missing {} in {:?}", expected, fields);
        }

        let page = app.state.catalog.search(&SearchRequest::new(vec![])).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn unknown_image_keys_are_rejected() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let mut d = draft("lost", "keys", "Keys", "Three keys on a red ring", Location::at(52.52, 13.40));
        d.images.push(crate::types::ImageUpload {
            storage_key: "0123456789abcdef0123456789abcdef".to_string(),
            content_hash: "a".repeat(64),
        });
        let fields = invalid_fields(app.state.catalog.create_item(&owner, d).await.unwrap_err());
        assert_eq!(fields, vec!["images[0].storage_key".to_string()]);
    }

    #[tokio::test]
    async fn lifecycle_follows_the_allowed_transitions() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let found = app.create(&owner, draft("found", "keys", "Keys", "Bunch of keys", Location::named("Station"))).await;
        let lost = app.create(&owner, draft("lost", "keys", "My keys", "Bunch of keys", Location::named("Station"))).await;
        let catalog = &app.state.catalog;

        let err = catalog.transition_status(&owner, found.id, to("claimed")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { from: ItemStatus::Open, to: ItemStatus::Claimed }));

        // matched needs a counterpart of the opposite kind
        let err = catalog.transition_status(&owner, found.id, to("matched")).await.unwrap_err();
        assert_eq!(invalid_fields(err), vec!["counterpart_id".to_string()]);
        let same_kind = StatusChangeRequest { target_status: "matched".into(), counterpart_id: Some(found.id) };
        assert!(catalog.transition_status(&owner, found.id, same_kind).await.is_err());

        let matched = StatusChangeRequest { target_status: "matched".into(), counterpart_id: Some(lost.id) };
        let item = catalog.transition_status(&owner, found.id, matched).await.unwrap();
        assert_eq!(item.status, ItemStatus::Matched);
        assert_eq!(item.matched_with, Some(lost.id));
        assert_eq!(item.version, 2);

        let item = catalog.transition_status(&owner, found.id, to("claimed")).await.unwrap();
        assert_eq!(item.status, ItemStatus::Claimed);
        let item = catalog.transition_status(&owner, found.id, to("closed")).await.unwrap();
        assert_eq!(item.status, ItemStatus::Closed);
        assert_eq!(item.matched_with, Some(lost.id));

        let err = catalog.transition_status(&owner, found.id, to("open")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let err = catalog.transition_status(&owner, lost.id, to("archived")).await.unwrap_err();
        assert_eq!(invalid_fields(err), vec!["target_status".to_string()]);
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_modify() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let (stranger, _) = app.user("Jon").await;
        let (admin, _) = app.admin().await;
        let item = app.create(&owner, draft("lost", "pets", "Cat", "Grey tabby cat", Location::named("Park"))).await;

        let err = app.state.catalog.transition_status(&stranger, item.id, to("closed")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = app.state.catalog.delete_item(&stranger, item.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let closed = app.state.catalog.transition_status(&admin, item.id, to("closed")).await.unwrap();
        assert_eq!(closed.status, ItemStatus::Closed);
    }

    #[tokio::test]
    async fn concurrent_transitions_apply_exactly_once() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let item = app.create(&owner, draft("found", "bags", "Backpack", "Black backpack", Location::named("Library"))).await;

        let attempts = (0..6).map(|_| app.state.catalog.transition_status(&owner, item.id, to("closed")));
        let results = join_all(attempts).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        for r in results.into_iter().filter_map(Result::err) {
            assert!(matches!(r, AppError::InvalidTransition { from: ItemStatus::Closed, .. } | AppError::Conflict(_)));
        }
        let stored = app.state.catalog.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Closed);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn edits_reindex_and_closed_items_are_frozen() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let item = app.create(&owner, draft("lost", "other", "Umbrella", "Red umbrella", Location::named("Tram 4"))).await;

        let patch = ItemPatch { title: Some("Umbrella with duck handle".into()), ..Default::default() };
        let updated = app.state.catalog.update_item(&owner, item.id, patch).await.unwrap();
        assert_eq!(updated.version, 2);
        let page = app
            .state
            .catalog
            .search(&SearchRequest::new(vec![SearchFilter::Text(vec!["duck".into()])]))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);

        app.state.catalog.transition_status(&owner, item.id, to("closed")).await.unwrap();
        let patch = ItemPatch { title: Some("Too late".into()), ..Default::default() };
        let err = app.state.catalog.update_item(&owner, item.id, patch).await.unwrap_err();
        assert_eq!(invalid_fields(err), vec!["status".to_string()]);
    }

    #[tokio::test]
    async fn slow_image_store_rejects_without_partial_state() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let upload = app.state.catalog.upload_image(b"png bytes", Some("image/png")).await.unwrap();

        // timeout is 200ms in the test config
        app.images.set_delay(Duration::from_millis(400));
        let mut d = draft("found", "electronics", "Phone", "Phone with cracked screen", Location::named("Cafe"));
        d.images.push(upload);
        let err = app.state.catalog.create_item(&owner, d).await.unwrap_err();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
        assert!(err.is_transient());

        let mut conn = app.state.db.acquire().await.unwrap();
        assert_eq!(app.state.catalog.index().count(&mut conn).await.unwrap(), 0);
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items").fetch_one(&mut *conn).await.unwrap();
        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_images").fetch_one(&mut *conn).await.unwrap();
        assert_eq!((items, images), (0, 0));
    }

    #[tokio::test]
    async fn delete_removes_images_and_stales_candidates() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let upload = app.state.catalog.upload_image(b"jpeg bytes", None).await.unwrap();
        let mut d = draft("found", "wallets", "Wallet", "Brown leather wallet", Location::at(48.137, 11.575));
        d.images.push(upload.clone());
        let found = app.create(&owner, d).await;
        let lost =
            app.create(&owner, draft("lost", "wallets", "Wallet", "Brown leather wallet", Location::at(48.138, 11.576))).await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!(outcome.written, 1);

        app.state.catalog.delete_item(&owner, found.id).await.unwrap();
        assert!(!app.images.contains(&upload.storage_key));
        assert!(matches!(app.state.catalog.get_item(found.id).await, Err(AppError::NotFound(_))));

        let mut conn = app.state.db.acquire().await.unwrap();
        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_images WHERE item_id = ?1")
            .bind(found.id.to_string())
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(images, 0);
        let candidates = matches::candidates_for(&mut conn, lost.id).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].stale);
    }

    #[tokio::test]
    async fn an_image_belongs_to_one_item() {
        let app = test_app().await;
        let (mara, _) = app.user("Mara").await;
        let (jon, _) = app.user("Jon").await;
        let upload = app.state.catalog.upload_image(b"png bytes", Some("image/png")).await.unwrap();
        assert!(upload.storage_key.ends_with(".png"));

        let mut d = draft("found", "keys", "Keys", "Bunch of keys", Location::named("Station"));
        d.images.push(upload.clone());
        let owned = app.create(&mara, d.clone()).await;

        let err = app.state.catalog.create_item(&jon, d).await.unwrap_err();
        assert_eq!(invalid_fields(err), vec!["images[0].storage_key".to_string()]);

        // deleting some other item must leave the shared-looking blob alone
        let other = app.create(&jon, draft("lost", "keys", "Keys", "Lost my keys", Location::named("Station"))).await;
        app.state.catalog.delete_item(&jon, other.id).await.unwrap();
        assert!(app.images.contains(&upload.storage_key));

        let stored = app.state.catalog.get_item(owned.id).await.unwrap();
        assert_eq!(stored.images[0].storage_key, upload.storage_key);
        let (bytes, content_type) = app.state.catalog.fetch_image(&upload.storage_key).await.unwrap();
        assert_eq!(bytes, b"png bytes");
        assert_eq!(content_type, "image/png");

        let mut conn = app.state.db.acquire().await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_images WHERE storage_key = ?1")
            .bind(&upload.storage_key)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn image_hash_must_match_the_stored_bytes() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let mut upload = app.state.catalog.upload_image(b"jpeg bytes", Some("image/jpeg")).await.unwrap();
        upload.content_hash = "0".repeat(64);

        let mut d = draft("found", "keys", "Keys", "Bunch of keys", Location::named("Station"));
        d.images.push(upload);
        let err = app.state.catalog.create_item(&owner, d).await.unwrap_err();
        assert_eq!(invalid_fields(err), vec!["images[0].content_hash".to_string()]);
    }

    #[tokio::test]
    async fn fetching_unknown_images_is_not_found() {
        let app = test_app().await;
        for key in ["0123456789abcdef0123456789abcdef.png", "../escape", "a.b.c"] {
            assert!(matches!(app.state.catalog.fetch_image(key).await, Err(AppError::NotFound(_))), "{}", key);
        }
    }

    #[tokio::test]
    async fn paging_survives_concurrent_inserts() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let mut originals = HashSet::new();
        for i in 0..7 {
            let item = app
                .create(&owner, draft("found", "clothing", &format!("Scarf {}", i), "Wool scarf", Location::named("Gym")))
                .await;
            originals.insert(item.id);
        }

        let mut seen = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let req = SearchRequest::new(vec![SearchFilter::Kind(ItemKind::Found)]).with_page(token.clone(), Some(3));
            let page = app.state.catalog.search(&req).await.unwrap();
            seen.extend(page.items.iter().map(|s| s.id));
            pages += 1;
            if pages == 1 {
                // newer reports land ahead of the cursor and must not disturb it
                for i in 0..2 {
                    app.create(&owner, draft("found", "clothing", &format!("Glove {}", i), "Glove", Location::named("Gym")))
                        .await;
                }
            }
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "an item was returned twice");
        assert!(originals.is_subset(&unique), "an item was skipped");
    }
}
