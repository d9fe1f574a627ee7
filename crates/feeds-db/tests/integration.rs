use std::sync::Arc;
use std::thread;

use feeds_db::{
    Condition, Database, DbConfig, ErrorKind, ExternalId, Feed, Location, MergeOptions,
    RelationshipOptions, Select, Value,
};
use feeds_types::{DataType, SortDirection};

fn file_database(close_after_use: bool) -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("feeds.db").display());
    let db = Database::new(DbConfig::new(url).close_after_use(close_after_use));
    (dir, db)
}

fn feed(id: &str, provider: &str) -> Feed {
    Feed {
        id: id.to_string(),
        stable_id: format!("mdb-{id}"),
        provider: Some(provider.to_string()),
        ..Feed::default()
    }
}

fn by_id(id: &str) -> Select<Feed> {
    Select::new().filter(Condition::eq("id", id))
}

#[test]
fn merged_feed_is_retrievable_after_commit() {
    let (_dir, db) = file_database(false);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.commit().expect("commit should succeed");

    let found = db.select(&by_id("1")).expect("select should succeed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].provider.as_deref(), Some("Metro"));
    assert_eq!(found[0].data_type, DataType::Gtfs);
}

#[test]
fn uncommitted_work_is_discarded_when_the_session_closes() {
    let (_dir, db) = file_database(true);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.flush().expect("flush should succeed");
    db.close_session();

    let found = db.select(&by_id("1")).expect("select should succeed");
    assert!(found.is_empty());
}

#[test]
fn concurrent_starts_share_one_session() {
    let (_dir, db) = file_database(false);
    let db = Arc::new(db);

    let sessions: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.start_session().expect("start should succeed"))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("thread should not panic"))
        .collect();

    assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn active_session_listing_only_returns_requested_new_type() {
    let (_dir, db) = file_database(false);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.merge(
        Location {
            id: "l-ca".to_string(),
            country_code: Some("CA".to_string()),
            ..Location::default()
        },
        MergeOptions::default().update_session(true),
    )
    .expect("merge should succeed");

    let feeds: Vec<Feed> = db
        .select_from_active_session(&[], None)
        .expect("listing should succeed");
    let locations: Vec<Location> = db
        .select_from_active_session(&[], None)
        .expect("listing should succeed");
    assert_eq!(feeds.len(), 1);
    assert_eq!(locations.len(), 1);

    db.commit().expect("commit should succeed");
    db.start_session().expect("start should succeed");
    let feeds: Vec<Feed> = db
        .select_from_active_session(&[], None)
        .expect("listing should succeed");
    assert!(feeds.is_empty());
}

#[test]
fn relationship_on_stored_parent_is_merged_back() {
    let (_dir, db) = file_database(false);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.commit().expect("commit should succeed");

    db.merge_relationship(
        &[Value::Text("1".to_string())],
        Location {
            id: "l-fr".to_string(),
            country_code: Some("FR".to_string()),
            ..Location::default()
        },
        &Feed::locations(),
        RelationshipOptions {
            update_session: true,
            auto_commit: true,
            uncommitted: false,
        },
    )
    .expect("relationship merge should succeed");
    db.close_session();

    let stored = db.select(&by_id("1")).expect("select should succeed");
    assert_eq!(stored[0].locations.len(), 1);
    assert_eq!(stored[0].locations[0].country_code.as_deref(), Some("FR"));
}

#[test]
fn relationship_on_pending_parent_needs_no_merge() {
    let (_dir, db) = file_database(false);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");

    db.merge_relationship(
        &[Value::Text("1".to_string())],
        ExternalId {
            associated_id: "42".to_string(),
            source: "mdb".to_string(),
            ..ExternalId::default()
        },
        &Feed::external_ids(),
        RelationshipOptions {
            uncommitted: true,
            ..RelationshipOptions::default()
        },
    )
    .expect("relationship merge should succeed");

    let pending: Vec<Feed> = db
        .select_from_active_session(&[Condition::eq("id", "1")], None)
        .expect("listing should succeed");
    assert_eq!(pending[0].external_ids[0].feed_id, "1");

    db.commit().expect("commit should succeed");
    let stored = db.select(&by_id("1")).expect("select should succeed");
    assert_eq!(stored[0].external_ids[0].associated_id, "42");
}

#[test]
fn grouped_select_by_provider() {
    let (_dir, db) = file_database(false);
    for (id, provider) in [("1", "Metro"), ("2", "Bus Co"), ("3", "Metro")] {
        db.merge(feed(id, provider), MergeOptions::default().update_session(true))
            .expect("merge should succeed");
    }
    db.commit().expect("commit should succeed");

    let query = Select::<Feed>::new()
        .attributes(&["provider"])
        .order_by("provider", SortDirection::Ascending);
    let groups = db
        .select_grouped(&query, |f| f.provider.clone())
        .expect("grouped select should succeed");

    let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1, 2]);
    assert!(groups[1].iter().all(|f| f.stable_id.is_empty()));
}

#[test]
fn unset_connection_string_leaves_manager_disconnected() {
    let db = Database::new(DbConfig::default());
    let err = db
        .merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect_err("merge should fail");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!db.is_connected());
    assert!(!db.close_session());
}

#[test]
fn merging_a_projected_feed_keeps_its_other_columns() {
    let (_dir, db) = file_database(false);
    let stored = Feed {
        data_type: DataType::GtfsRt,
        feed_name: Some("Name".to_string()),
        ..feed("1", "Metro")
    };
    db.merge(stored, MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.commit().expect("commit should succeed");

    let mut projected = db
        .select(&by_id("1").attributes(&["provider"]))
        .expect("select should succeed")
        .remove(0);
    projected.provider = Some("Metro Transit".to_string());
    db.merge(projected, MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.commit().expect("commit should succeed");

    let found = db.select(&by_id("1")).expect("select should succeed");
    assert_eq!(found[0].provider.as_deref(), Some("Metro Transit"));
    assert_eq!(found[0].data_type, DataType::GtfsRt);
    assert_eq!(found[0].stable_id, "mdb-1");
    assert_eq!(found[0].feed_name.as_deref(), Some("Name"));
}

#[test]
fn auto_commit_leaves_nothing_tracked() {
    let (_dir, db) = file_database(false);
    let options = MergeOptions::default().update_session(true).auto_commit(true);
    for n in 0..200 {
        db.merge(feed(&n.to_string(), "Metro"), options)
            .expect("merge should succeed");
    }

    let session = db.active_session().expect("session stays open");
    assert_eq!(session.tracked_count(), 0);
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn concurrent_selects_survive_the_close_policy() {
    let (_dir, db) = file_database(true);
    db.merge(feed("1", "Metro"), MergeOptions::default().update_session(true))
        .expect("merge should succeed");
    db.commit().expect("commit should succeed");
    let db = Arc::new(db);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..200 {
                    let found = db
                        .select(&Select::<Feed>::new())
                        .expect("select should keep its session");
                    assert_eq!(found.len(), 1);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("thread should not panic");
    }

    assert!(db.active_session().is_none());
}
