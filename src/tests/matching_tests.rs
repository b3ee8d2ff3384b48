#[cfg(test)]
mod tests {
    use crate::store::matches;
    use crate::tests::support::{draft, test_app};
    use crate::types::{ItemPatch, ItemStatus, Location, StatusChangeRequest};

    const HOUR_MS: i64 = 3_600_000;

    async fn backdate(app: &crate::tests::support::TestApp, id: uuid::Uuid, hours: i64) {
        sqlx::query("UPDATE items SET reported_at = reported_at - ?1 WHERE id = ?2")
            .bind(hours * HOUR_MS)
            .bind(id.to_string())
            .execute(&app.state.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nearby_documents_become_a_candidate_that_goes_stale_on_claim() {
        let app = test_app().await;
        let (finder, _) = app.user("Finder").await;
        let (loser, _) = app.user("Owner").await;

        let found = app
            .create(&finder, draft("found", "documents", "Passport", "Blue passport in a leather cover", Location::at(40.0, -73.0)))
            .await;
        let lost = app
            .create(&loser, draft("lost", "documents", "Lost passport", "Blue passport, leather cover", Location::at(40.001, -73.001)))
            .await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!(outcome.considered, 1);
        assert_eq!(outcome.written, 1);

        let ranked = app.state.catalog.matches_for(found.id).await.unwrap();
        assert_eq!(ranked.len(), 1);
        let m = &ranked[0];
        assert_eq!((m.lost_id, m.found_id, m.counterpart_id), (lost.id, found.id, lost.id));
        assert!(m.score >= app.state.config.matching.min_score, "score {} below threshold", m.score);
        assert!(m.score <= 1.0);
        assert!(!m.stale);
        assert_eq!(m.counterpart.as_ref().map(|c| c.id), Some(lost.id));

        let catalog = &app.state.catalog;
        let to_matched = StatusChangeRequest { target_status: "matched".into(), counterpart_id: Some(lost.id) };
        catalog.transition_status(&finder, found.id, to_matched).await.unwrap();
        let to_claimed = StatusChangeRequest { target_status: "claimed".into(), counterpart_id: None };
        let claimed = catalog.transition_status(&finder, found.id, to_claimed).await.unwrap();
        assert_eq!(claimed.status, ItemStatus::Claimed);

        let ranked = catalog.matches_for(lost.id).await.unwrap();
        assert_eq!(ranked.len(), 1, "stale candidates stay visible");
        assert!(ranked[0].stale);

        // a claimed item drops out of further passes
        let outcome = app.worker.run_pass(found.id).await.unwrap();
        assert!(outcome.skipped_item);
        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!(outcome.considered, 0);
    }

    #[tokio::test]
    async fn rerunning_a_pass_writes_no_duplicates() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let found = app.create(&owner, draft("found", "keys", "Keys", "Keys with a green tag", Location::named("Hauptbahnhof"))).await;
        let lost = app.create(&owner, draft("lost", "keys", "Keys", "Keys with a green tag", Location::named("hauptbahnhof"))).await;

        let first = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((first.written, first.unchanged), (1, 0));
        let second = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((second.written, second.unchanged), (0, 1));
        // the pair is the same from the other side
        let third = app.worker.run_pass(found.id).await.unwrap();
        assert_eq!((third.written, third.unchanged), (0, 1));

        let mut conn = app.state.db.acquire().await.unwrap();
        let rows = matches::candidates_for(&mut conn, lost.id).await.unwrap();
        assert_eq!(rows.iter().filter(|c| (c.lost_id, c.found_id) == (lost.id, found.id)).count(), 1);
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn reports_far_apart_in_time_are_not_considered() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let found = app.create(&owner, draft("found", "keys", "Keys", "Keys with a green tag", Location::named("Park"))).await;
        let lost = app.create(&owner, draft("lost", "keys", "Keys", "Keys with a green tag", Location::named("Park"))).await;
        // the default window is 720 hours either side
        backdate(&app, found.id, 800).await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((outcome.considered, outcome.written), (0, 0));
        let outcome = app.worker.run_pass(found.id).await.unwrap();
        assert_eq!(outcome.considered, 0);
        assert!(app.state.catalog.matches_for(lost.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn equal_scores_rank_the_newer_counterpart_first() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let older = app.create(&owner, draft("found", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;
        let newer = app.create(&owner, draft("found", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;
        let lost = app.create(&owner, draft("lost", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;
        backdate(&app, older.id, 48).await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((outcome.considered, outcome.written), (2, 2));

        let ranked = app.state.catalog.matches_for(lost.id).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].counterpart_id, newer.id);
        assert_eq!(ranked[1].counterpart_id, older.id);
    }

    #[tokio::test]
    async fn pairs_that_stop_qualifying_are_retired() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let found = app.create(&owner, draft("found", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;
        let lost = app.create(&owner, draft("lost", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((outcome.written, outcome.retired), (1, 0));

        let patch = ItemPatch { category: Some("pets".into()), ..Default::default() };
        app.state.catalog.update_item(&owner, found.id, patch).await.unwrap();
        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!((outcome.considered, outcome.written, outcome.retired), (0, 0, 1));

        let ranked = app.state.catalog.matches_for(lost.id).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].counterpart_id, found.id);
        assert!(ranked[0].stale);

        // nothing left to retire on a second pass
        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!(outcome.retired, 0);
    }

    #[tokio::test]
    async fn distant_or_other_category_items_are_not_paired() {
        let app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let lost = app.create(&owner, draft("lost", "bags", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;
        // ~110 km north, beyond the matching radius
        app.create(&owner, draft("found", "bags", "Red bag", "Red canvas bag", Location::at(53.52, 13.405))).await;
        app.create(&owner, draft("found", "pets", "Red bag", "Red canvas bag", Location::at(52.52, 13.405))).await;

        let outcome = app.worker.run_pass(lost.id).await.unwrap();
        assert_eq!(outcome.considered, 1);
        assert_eq!(outcome.written, 0);
        assert!(app.state.catalog.matches_for(lost.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_requeues_only_pending_items() {
        let mut app = test_app().await;
        let (owner, _) = app.user("Mara").await;
        let item = app.create(&owner, draft("lost", "jewelry", "Ring", "Silver ring", Location::named("Pool"))).await;

        // creation queued a task; lose it as if the process had restarted
        assert_eq!(app.drain_queue(), vec![item.id]);
        assert_eq!(app.worker.sweep().await.unwrap(), 1);
        assert_eq!(app.drain_queue(), vec![item.id]);

        app.worker.run_pass(item.id).await.unwrap();
        assert_eq!(app.worker.sweep().await.unwrap(), 0);

        let queued = app.state.catalog.refresh_matches(&owner, item.id).await.unwrap();
        assert!(queued);
        assert_eq!(app.drain_queue(), vec![item.id]);
    }

    #[tokio::test]
    async fn matches_for_unknown_item_is_not_found() {
        let app = test_app().await;
        let err = app.state.catalog.matches_for(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, crate::error::AppError::NotFound(_)));
    }
}
