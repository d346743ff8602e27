//! End-to-end runs against an in-process NNTP server
//!
//! Each test starts a [`MockServer`] on a loopback port, writes a catalog into
//! a temp directory and drives [`Kumo::get`] over real TCP sessions.

mod common;

use common::{
    MockServer, NzbFile, payload, single_article, split_articles, test_config, write_nzb,
};
use kumo::{Error, Event, Kumo, Pass, Stage, run_with_shutdown};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn single_fragment_file_is_fetched_and_joined() {
    let data = b"hello world".to_vec();
    let server = MockServer::builder()
        .article("1@foo.com", single_article(&data, "hello.txt"))
        .start()
        .await;
    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "greeting",
        &[NzbFile::new("hello.txt", vec![("1@foo.com".to_string(), 11)])],
    );

    let kumo = Kumo::new(test_config(server.port(), 1, root.path()))
        .await
        .unwrap();
    let mut events = kumo.subscribe();
    let summary = kumo.get(&nzb).await.unwrap();

    assert_eq!(summary.job, "greeting");
    assert_eq!(summary.passes, vec![Pass::Primary]);
    assert_eq!(summary.total, 1);
    assert!(summary.is_clean());

    let output = root.path().join("downloads/greeting/hello.txt");
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert!(!root.path().join("temp/greeting").exists());
    assert_eq!(server.requested(), vec!["1@foo.com".to_string()]);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::FileJoined { name, parts_written: 1, parts_missing: 0, .. } if name == "hello.txt"
    )));
    assert!(matches!(
        events.last(),
        Some(Event::PassComplete { pass: Pass::Primary, broken: 0, total: 1 })
    ));

    kumo.close().await;
}

#[tokio::test]
async fn multi_part_file_is_joined_in_index_order() {
    let data = payload(5000);
    let articles = split_articles(&data, "movie.mkv", 5, "movie");
    let mut builder = MockServer::builder();
    for (id, body) in &articles {
        builder = builder.article(id, body.clone());
    }
    let server = builder.start().await;

    let root = TempDir::new().unwrap();
    // Catalog lists the segments backwards; output order comes from the yEnc part numbers.
    let segments = articles
        .iter()
        .rev()
        .map(|(id, body)| (id.clone(), body.len() as u64))
        .collect();
    let nzb = write_nzb(root.path(), "movie", &[NzbFile::new("movie.mkv", segments)]);

    let kumo = Kumo::new(test_config(server.port(), 3, root.path()))
        .await
        .unwrap();
    let summary = kumo.get(&nzb).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.total, 5);
    let joined = std::fs::read(root.path().join("downloads/movie/movie.mkv")).unwrap();
    assert_eq!(joined, data);
    assert_eq!(server.body_commands(), 5);

    kumo.close().await;
}

#[tokio::test]
async fn missing_article_breaks_the_run_and_fetches_repair_data() {
    let data = payload(2000);
    let articles = split_articles(&data, "show.bin", 2, "show");
    let repair = b"repair block".to_vec();

    // Only the first part of show.bin is on the server.
    let server = MockServer::builder()
        .article(&articles[0].0, articles[0].1.clone())
        .article("par@test.local", single_article(&repair, "show.par2"))
        .start()
        .await;

    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "show",
        &[
            NzbFile::new(
                "show.bin",
                articles
                    .iter()
                    .map(|(id, body)| (id.clone(), body.len() as u64))
                    .collect(),
            ),
            NzbFile::new("show.par2", vec![("par@test.local".to_string(), 40)]),
        ],
    );

    let kumo = Kumo::new(test_config(server.port(), 2, root.path()))
        .await
        .unwrap();
    let mut events = kumo.subscribe();
    let summary = kumo.get(&nzb).await.unwrap();

    assert_eq!(summary.passes, vec![Pass::Primary, Pass::Repair]);
    // The repair pass itself is clean.
    assert_eq!(summary.broken, 0);
    assert_eq!(summary.total, 1);

    let out = root.path().join("downloads/show");
    assert_eq!(std::fs::read(out.join("show.par2")).unwrap(), repair);
    assert_eq!(std::fs::read(out.join("show.bin")).unwrap(), &data[..1000]);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::FragmentFailed { fragment_id, stage: Stage::Download, .. }
            if fragment_id == "show.2@test.local"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PassComplete { pass: Pass::Primary, broken: 1, total: 2 }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PassStarted { pass: Pass::Repair, files: 1, fragments: 1, .. }
    )));

    kumo.close().await;
}

#[tokio::test]
async fn broken_run_without_repair_data_stays_single_pass() {
    let server = MockServer::builder().start().await;
    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "gone",
        &[NzbFile::new("gone.bin", vec![("gone@test.local".to_string(), 100)])],
    );

    let kumo = Kumo::new(test_config(server.port(), 1, root.path()))
        .await
        .unwrap();
    let summary = kumo.get(&nzb).await.unwrap();

    assert_eq!(summary.passes, vec![Pass::Primary]);
    assert_eq!(summary.broken, 1);
    assert_eq!(summary.total, 1);
    assert!(!root.path().join("downloads/gone/gone.bin").exists());
    assert_eq!(kumo.progress().snapshot().broken_bytes, 100);

    kumo.close().await;
}

#[tokio::test]
async fn repair_data_is_skipped_when_primary_pass_is_clean() {
    let server = MockServer::builder()
        .article("a@test.local", single_article(b"abc", "a.bin"))
        .article("p@test.local", single_article(b"parity", "a.par2"))
        .start()
        .await;
    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "clean",
        &[
            NzbFile::new("a.bin", vec![("a@test.local".to_string(), 3)]),
            NzbFile::new("a.PAR2", vec![("p@test.local".to_string(), 6)]),
        ],
    );

    let kumo = Kumo::new(test_config(server.port(), 1, root.path()))
        .await
        .unwrap();
    let summary = kumo.get(&nzb).await.unwrap();

    assert_eq!(summary.passes, vec![Pass::Primary]);
    assert!(summary.is_clean());
    assert_eq!(server.requested(), vec!["a@test.local".to_string()]);
    assert!(!root.path().join("downloads/clean/a.par2").exists());

    kumo.close().await;
}

#[tokio::test]
async fn filtered_entries_are_never_requested() {
    let server = MockServer::builder()
        .article("keep@test.local", single_article(b"keep", "keep.bin"))
        .article("drop@test.local", single_article(b"drop", "sample.bin"))
        .start()
        .await;
    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "filtered",
        &[
            NzbFile::new("keep.bin", vec![("keep@test.local".to_string(), 4)]),
            NzbFile::new("sample.bin", vec![("drop@test.local".to_string(), 4)]),
        ],
    );

    let mut config = test_config(server.port(), 1, root.path());
    config.download.filters = vec!["(?i)sample".to_string()];
    let kumo = Kumo::new(config).await.unwrap();
    let summary = kumo.get(&nzb).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.total, 1);
    assert_eq!(server.requested(), vec!["keep@test.local".to_string()]);

    kumo.close().await;
}

#[tokio::test]
async fn session_count_never_exceeds_the_pool_size() {
    let data = payload(12 * 300);
    let articles = split_articles(&data, "big.bin", 12, "big");
    let mut builder = MockServer::builder().body_delay(Duration::from_millis(20));
    for (id, body) in &articles {
        builder = builder.article(id, body.clone());
    }
    let server = builder.start().await;

    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "big",
        &[NzbFile::new(
            "big.bin",
            articles
                .iter()
                .map(|(id, body)| (id.clone(), body.len() as u64))
                .collect(),
        )],
    );

    let kumo = Kumo::new(test_config(server.port(), 2, root.path()))
        .await
        .unwrap();
    let summary = kumo.get(&nzb).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(server.connections(), 2);
    assert!(server.peak_connections() <= 2);
    assert!(kumo.pool().peak_checked_out() <= 2);
    assert_eq!(kumo.pool().checked_out(), 0);
    // Each session selects the group once and keeps it.
    assert!(server.group_commands() <= 2);
    assert_eq!(
        std::fs::read(root.path().join("downloads/big/big.bin")).unwrap(),
        data
    );

    kumo.close().await;
}

#[tokio::test]
async fn rejected_group_is_tolerated_unless_strict() {
    let server = MockServer::builder()
        .article("g@test.local", single_article(b"grouped", "g.bin"))
        .reject_groups()
        .start()
        .await;
    let files = [NzbFile::new("g.bin", vec![("g@test.local".to_string(), 7)])];

    let lenient_root = TempDir::new().unwrap();
    let nzb = write_nzb(lenient_root.path(), "lenient", &files);
    let kumo = Kumo::new(test_config(server.port(), 1, lenient_root.path()))
        .await
        .unwrap();
    let summary = kumo.get(&nzb).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(
        std::fs::read(lenient_root.path().join("downloads/lenient/g.bin")).unwrap(),
        b"grouped"
    );
    kumo.close().await;

    let strict_root = TempDir::new().unwrap();
    let nzb = write_nzb(strict_root.path(), "strict", &files);
    let mut config = test_config(server.port(), 1, strict_root.path());
    config.download.strict_group_selection = true;
    let kumo = Kumo::new(config).await.unwrap();
    let summary = kumo.get(&nzb).await.unwrap();
    assert_eq!(summary.broken, 1);
    assert!(!strict_root.path().join("downloads/strict/g.bin").exists());
    kumo.close().await;
}

#[tokio::test]
async fn wrong_credentials_leave_no_sessions() {
    let server = MockServer::builder()
        .credentials("user", "secret")
        .start()
        .await;
    let root = TempDir::new().unwrap();
    let mut config = test_config(server.port(), 2, root.path());
    config.server.username = Some("user".to_string());
    config.server.password = Some("wrong".to_string());

    let result = Kumo::new(config).await;
    match result {
        Err(Error::NoSessions { attempted, .. }) => assert_eq!(attempted, 2),
        Err(other) => panic!("expected NoSessions, got {:?}", other),
        Ok(_) => panic!("expected NoSessions, got a running instance"),
    }
}

#[tokio::test]
async fn correct_credentials_are_accepted() {
    let server = MockServer::builder()
        .credentials("user", "secret")
        .article("auth@test.local", single_article(b"private", "auth.bin"))
        .start()
        .await;
    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "auth",
        &[NzbFile::new("auth.bin", vec![("auth@test.local".to_string(), 7)])],
    );
    let mut config = test_config(server.port(), 1, root.path());
    config.server.username = Some("user".to_string());
    config.server.password = Some("secret".to_string());

    let kumo = Kumo::new(config).await.unwrap();
    let summary = kumo.get(&nzb).await.unwrap();
    assert!(summary.is_clean());
    kumo.close().await;
}

#[tokio::test]
async fn shutdown_cancels_the_pass_and_cleans_up() {
    let data = payload(4 * 100);
    let articles = split_articles(&data, "slow.bin", 4, "slow");
    let mut builder = MockServer::builder().body_delay(Duration::from_secs(5));
    for (id, body) in &articles {
        builder = builder.article(id, body.clone());
    }
    let server = builder.start().await;

    let root = TempDir::new().unwrap();
    let nzb = write_nzb(
        root.path(),
        "slow",
        &[NzbFile::new(
            "slow.bin",
            articles
                .iter()
                .map(|(id, body)| (id.clone(), body.len() as u64))
                .collect(),
        )],
    );

    let kumo = Kumo::new(test_config(server.port(), 2, root.path()))
        .await
        .unwrap();
    let stopper = kumo.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.shutdown();
    });

    let started = std::time::Instant::now();
    let result = kumo.get(&nzb).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!root.path().join("temp/slow").exists());
}

#[tokio::test]
async fn signal_watcher_returns_once_shutdown_is_requested() {
    let server = MockServer::builder().start().await;
    let root = TempDir::new().unwrap();
    let kumo = Kumo::new(test_config(server.port(), 1, root.path()))
        .await
        .unwrap();

    let watcher = tokio::spawn(run_with_shutdown(kumo.clone()));
    kumo.shutdown();

    tokio::time::timeout(Duration::from_secs(2), watcher)
        .await
        .expect("watcher should observe the shutdown token")
        .unwrap();
    kumo.close().await;
}
