//! Subscribe/refresh/dedup lifecycle tests against an in-memory store
//! and a mock feed server.

use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use readly::feed::{
    build_client, fetch_and_parse_feed, import_outlines, parse_opml, refresh_all, refresh_feed,
    RefreshGuard,
};
use readly::storage::{Database, StorageError};

fn client() -> reqwest::Client {
    build_client(Duration::from_secs(5)).unwrap()
}

fn rss_body(items: &[(&str, &str, &str)]) -> String {
    let items_xml: String = items
        .iter()
        .map(|(title, link, body)| {
            format!(
                "<item><title>{}</title><link>{}</link><description>{}</description></item>",
                title, link, body
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel>
           <title>Lifecycle Feed</title><link>https://example.com/</link>
           <description>d</description>{}</channel></rss>"#,
        items_xml
    )
}

/// Serves `body` at /feed, replacing any previous mock.
async fn set_feed(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Fetches the mock feed and persists it as a new subscription. Returns
/// the persisted feed (with its authoritative id).
async fn subscribe(db: &Database, client: &reqwest::Client, url: &str) -> readly::storage::Feed {
    let parsed = fetch_and_parse_feed(client, url).await.unwrap();
    db.add_feed(&parsed).await.unwrap();
    db.get_feed_by_url(url).await.unwrap().unwrap()
}

#[tokio::test]
async fn subscribing_persists_feed_and_items() {
    let server = MockServer::start().await;
    set_feed(
        &server,
        rss_body(&[("A", "https://example.com/a", "body a"), ("B", "https://example.com/b", "body b")]),
    )
    .await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();

    let feed = subscribe(&db, &client(), &url).await;

    assert_eq!(feed.title, "Lifecycle Feed");
    let items = db.get_items(&feed.id).await.unwrap();
    assert_eq!(items.len(), 2);
    // Persisted ids are minted by the store, not carried from ingestion.
    assert!(items.iter().all(|i| !i.id.is_empty()));
}

#[tokio::test]
async fn duplicate_subscription_is_rejected() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();

    subscribe(&db, &client, &url).await;
    let parsed = fetch_and_parse_feed(&client, &url).await.unwrap();
    let err = db.add_feed(&parsed).await.unwrap_err();

    assert!(matches!(err, StorageError::DuplicateSubscription(_)));
}

#[tokio::test]
async fn second_identical_refresh_inserts_nothing() {
    let server = MockServer::start().await;
    set_feed(
        &server,
        rss_body(&[("A", "https://example.com/a", "x"), ("B", "https://example.com/b", "y")]),
    )
    .await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();

    let feed = subscribe(&db, &client, &url).await;
    let inserted = refresh_feed(&db, &client, &feed).await.unwrap();

    assert_eq!(inserted, 0);
    assert_eq!(db.get_items(&feed.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn only_unseen_links_are_inserted() {
    let server = MockServer::start().await;
    set_feed(
        &server,
        rss_body(&[("A", "https://example.com/a", "x"), ("B", "https://example.com/b", "y")]),
    )
    .await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();
    let feed = subscribe(&db, &client, &url).await;

    // Next fetch: two known links (one with a changed title) and one new.
    set_feed(
        &server,
        rss_body(&[
            ("A renamed", "https://example.com/a", "x"),
            ("B", "https://example.com/b", "y"),
            ("C", "https://example.com/c", "z"),
        ]),
    )
    .await;
    let inserted = refresh_feed(&db, &client, &feed).await.unwrap();

    assert_eq!(inserted, 1);
    let items = db.get_items(&feed.id).await.unwrap();
    assert_eq!(items.len(), 3);
    // Link identity: the renamed item did not replace the original.
    let a = items
        .iter()
        .find(|i| i.link == "https://example.com/a")
        .unwrap();
    assert_eq!(a.title, "A");
}

#[tokio::test]
async fn intra_batch_duplicate_links_persist_then_dedup_on_refresh() {
    let server = MockServer::start().await;
    // Malformed feed: two items share a link.
    let body = rss_body(&[
        ("A", "https://example.com/same", "x"),
        ("B", "https://example.com/same", "y"),
        ("C", "https://example.com/other", "z"),
    ]);
    set_feed(&server, body.clone()).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();

    // Initial ingestion stores everything the normalizer returned; the
    // duplicate pair is only collapsed against persisted links.
    let feed = subscribe(&db, &client, &url).await;
    assert_eq!(db.get_items(&feed.id).await.unwrap().len(), 3);

    // Both link values are now persisted, so an identical fetch is fully
    // deduplicated.
    let inserted = refresh_feed(&db, &client, &feed).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(db.get_items(&feed.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn read_star_and_summary_survive_refresh() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();
    let feed = subscribe(&db, &client, &url).await;

    let item_id = db.get_items(&feed.id).await.unwrap()[0].id.clone();
    db.mark_read(&item_id, true).await.unwrap();
    assert!(db.toggle_star(&item_id).await.unwrap());
    db.save_summary(&item_id, "a summary").await.unwrap();

    refresh_feed(&db, &client, &feed).await.unwrap();

    let item = db.get_item(&item_id).await.unwrap();
    assert!(item.is_read);
    assert!(item.is_starred);
    assert_eq!(item.summary.as_deref(), Some("a summary"));
}

#[tokio::test]
async fn refresh_stamps_last_fetched_even_with_no_new_items() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();
    let feed = subscribe(&db, &client, &url).await;

    let before = db.get_feed(&feed.id).await.unwrap().last_fetched;
    tokio::time::sleep(Duration::from_millis(5)).await;
    refresh_feed(&db, &client, &feed).await.unwrap();
    let after = db.get_feed(&feed.id).await.unwrap().last_fetched;

    assert!(after.is_some());
    assert_ne!(before, after);
}

#[tokio::test]
async fn batch_refresh_continues_past_a_failing_feed() {
    let good = MockServer::start().await;
    set_feed(&good, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&bad)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let client = client();
    let good_feed = subscribe(&db, &client, &format!("{}/feed", good.uri())).await;

    // Register the failing feed without fetching it.
    let bad_url = format!("{}/feed", bad.uri());
    let bad_feed = readly::storage::Feed {
        id: String::new(),
        title: "Broken".into(),
        url: bad_url.clone(),
        link: String::new(),
        description: String::new(),
        image_url: None,
        folder_id: None,
        last_fetched: None,
        items: Vec::new(),
    };
    db.add_feed_metadata(&bad_feed).await.unwrap();
    let bad_feed = db.get_feed_by_url(&bad_url).await.unwrap().unwrap();

    let guard = RefreshGuard::new();
    let outcomes = refresh_all(
        &db,
        &client,
        &[bad_feed, good_feed.clone()],
        &guard,
        Duration::from_millis(1),
    )
    .await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_err());
    assert!(outcomes[1].result.is_ok());
    // The good feed still got its refresh.
    assert_eq!(db.get_items(&good_feed.id).await.unwrap().len(), 1);
    // The guard is released once the batch completes.
    assert!(!guard.is_refreshing());
}

#[tokio::test]
async fn opml_import_ingests_initial_items() {
    let server = MockServer::start().await;
    set_feed(
        &server,
        rss_body(&[("A", "https://example.com/a", "x"), ("B", "https://example.com/b", "y")]),
    )
    .await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();

    let opml = format!(
        r#"<?xml version="1.0"?><opml version="2.0"><body>
           <outline text="Tech"><outline type="rss" text="Imported" xmlUrl="{}"/></outline>
           </body></opml>"#,
        url
    );
    let outlines = parse_opml(&opml).unwrap();
    let summary = import_outlines(&db, &client(), outlines).await.unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.failed, 0);

    // Import is full ingestion: the initial item batch lands and the
    // fetch is stamped, same as a direct subscribe.
    let feed = db.get_feed_by_url(&url).await.unwrap().unwrap();
    assert_eq!(db.get_items(&feed.id).await.unwrap().len(), 2);
    assert!(feed.last_fetched.is_some());

    let folder = db.find_folder_by_name("Tech").await.unwrap().unwrap();
    assert_eq!(feed.folder_id.as_deref(), Some(folder.id.as_str()));
}

#[tokio::test]
async fn opml_import_continues_past_unreachable_feeds() {
    let good = MockServer::start().await;
    set_feed(&good, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&bad)
        .await;

    let db = Database::open_in_memory().await.unwrap();
    let good_url = format!("{}/feed", good.uri());
    let opml = format!(
        r#"<?xml version="1.0"?><opml version="2.0"><body>
           <outline type="rss" text="Broken" xmlUrl="{}/feed"/>
           <outline type="rss" text="Working" xmlUrl="{}"/>
           </body></opml>"#,
        bad.uri(),
        good_url
    );
    let outlines = parse_opml(&opml).unwrap();
    let summary = import_outlines(&db, &client(), outlines).await.unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.failed, 1);

    // The failing outline did not block the one after it.
    let feed = db.get_feed_by_url(&good_url).await.unwrap().unwrap();
    assert_eq!(db.get_items(&feed.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn opml_import_skips_existing_subscriptions() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let client = client();
    subscribe(&db, &client, &url).await;

    let opml = format!(
        r#"<?xml version="1.0"?><opml version="2.0"><body>
           <outline type="rss" text="Dup" xmlUrl="{}"/>
           </body></opml>"#,
        url
    );
    let summary = import_outlines(&db, &client, parse_opml(&opml).unwrap())
        .await
        .unwrap();

    assert_eq!(summary.imported, 0);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn folder_names_match_case_insensitively() {
    let db = Database::open_in_memory().await.unwrap();

    let first = db.find_or_create_folder("Tech").await.unwrap();
    let second = db.find_or_create_folder("tech").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(db.get_folders().await.unwrap().len(), 1);
}

#[tokio::test]
async fn toggling_a_folder_flips_expanded_state() {
    let db = Database::open_in_memory().await.unwrap();
    let folder = db.add_folder("Tech").await.unwrap();
    assert!(folder.is_expanded);

    assert!(!db.toggle_folder(&folder.id).await.unwrap());
    assert!(db.toggle_folder(&folder.id).await.unwrap());

    assert!(matches!(
        db.toggle_folder("missing").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn removing_a_feed_removes_its_items() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let feed = subscribe(&db, &client(), &url).await;

    let item_id = db.get_items(&feed.id).await.unwrap()[0].id.clone();
    db.remove_feed(&feed.id).await.unwrap();

    assert!(matches!(
        db.get_item(&item_id).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(db.get_items(&feed.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn removing_a_folder_leaves_feeds_uncategorized() {
    let server = MockServer::start().await;
    set_feed(&server, rss_body(&[("A", "https://example.com/a", "x")])).await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let feed = subscribe(&db, &client(), &url).await;

    let folder = db.add_folder("Tech").await.unwrap();
    db.move_feed_to_folder(&feed.id, Some(&folder.id))
        .await
        .unwrap();
    assert_eq!(
        db.get_feed(&feed.id).await.unwrap().folder_id.as_deref(),
        Some(folder.id.as_str())
    );

    db.remove_folder(&folder.id).await.unwrap();

    let feed = db.get_feed(&feed.id).await.unwrap();
    assert_eq!(feed.folder_id, None);
}

#[tokio::test]
async fn unread_count_tracks_read_state() {
    let server = MockServer::start().await;
    set_feed(
        &server,
        rss_body(&[("A", "https://example.com/a", "x"), ("B", "https://example.com/b", "y")]),
    )
    .await;
    let url = format!("{}/feed", server.uri());
    let db = Database::open_in_memory().await.unwrap();
    let feed = subscribe(&db, &client(), &url).await;

    assert_eq!(db.unread_count(&feed.id).await.unwrap(), 2);
    let item_id = db.get_items(&feed.id).await.unwrap()[0].id.clone();
    db.mark_read(&item_id, true).await.unwrap();
    assert_eq!(db.unread_count(&feed.id).await.unwrap(), 1);
    db.mark_read(&item_id, false).await.unwrap();
    assert_eq!(db.unread_count(&feed.id).await.unwrap(), 2);
}
