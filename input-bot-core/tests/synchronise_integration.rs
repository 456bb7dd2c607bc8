use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use input_bot_core::batch::{BranchCleanup, SubmissionOutcome};
use input_bot_core::config::{PipelineConfig, SourceConfig, SourceKind};
use input_bot_core::contract::{
    BranchHandle, ChangeRequest, CollaboratorError, FetchError, FetchedSource, MockRepository,
    MockSourceAdapter, RawItem, Repository,
};
use input_bot_core::normalize::{ItemLayout, SlugRule, TimestampFallback};
use input_bot_core::synchronise::{synchronise, AdapterSet, SyncError};

fn run_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 6, 0, 0).unwrap()
}

fn feed_layout() -> ItemLayout {
    ItemLayout {
        title_field: "title",
        timestamp_fields: vec!["published", "pubDate", "updated"],
        timestamp_fallback: TimestampFallback::Fail,
        identifier_field: "link",
        slug_rule: SlugRule::LastSegment,
        link_field: Some("link"),
    }
}

fn source(kind: SourceKind, identifier: &str) -> Arc<SourceConfig> {
    Arc::new(SourceConfig {
        kind,
        identifier: identifier.into(),
        format: "{title}\n{summary}\n\nRead more: {link}".into(),
        media: vec!["mastodon-galaxy".into()],
        mentions: vec![],
        hashtags: vec![],
        tag: None,
        max_age_days: None,
        missing_placeholder: None,
    })
}

fn config(sources: Vec<Arc<SourceConfig>>) -> PipelineConfig {
    PipelineConfig {
        content_root: "posts/feed_bot".into(),
        bot_name: "feed bot".into(),
        branch_prefix: "feed-update".into(),
        sources,
        ..Default::default()
    }
}

fn item(title: &str, link: &str, published: &str) -> RawItem {
    RawItem::new()
        .with("title", title)
        .with("link", link)
        .with("published", published)
        .with("summary", format!("<p>About {title}</p>"))
}

fn adapter_returning(name: &'static str, items: Vec<RawItem>) -> MockSourceAdapter {
    let mut adapter = MockSourceAdapter::new();
    adapter.expect_fetch().returning(move |_| {
        Ok(FetchedSource {
            name: name.to_string(),
            items: items.clone(),
        })
    });
    adapter.expect_layout().returning(feed_layout);
    adapter
}

/// Repository kept in memory: a main branch, live branches and open pull requests.
#[derive(Default)]
struct InMemoryRepo {
    state: Mutex<RepoState>,
    fail_open: bool,
}

#[derive(Default)]
struct RepoState {
    main: Vec<String>,
    branches: HashMap<String, Vec<(String, String)>>,
    open: Vec<String>,
    next_number: u64,
}

impl InMemoryRepo {
    fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    fn branch_names(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.keys().cloned().collect()
    }

    fn staged_paths(&self, branch: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.branches[branch].iter().map(|(p, _)| p.clone()).collect()
    }

    /// Merges every open pull request into main.
    fn merge_all(&self) {
        let mut state = self.state.lock().unwrap();
        let open = std::mem::take(&mut state.open);
        for branch in open {
            if let Some(files) = state.branches.remove(&branch) {
                let paths: Vec<String> = files.into_iter().map(|(p, _)| p).collect();
                state.main.extend(paths);
            }
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepo {
    async fn list_tree(&self, root: &str) -> Result<Vec<String>, CollaboratorError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .main
            .iter()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }

    async fn list_open_change_request_paths(
        &self,
        root: &str,
    ) -> Result<Vec<String>, CollaboratorError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .open
            .iter()
            .flat_map(|b| state.branches[b].iter().map(|(p, _)| p.clone()))
            .filter(|p| p.starts_with(root))
            .collect())
    }

    async fn create_branch(&self, name: &str) -> Result<BranchHandle, CollaboratorError> {
        let mut state = self.state.lock().unwrap();
        if state.branches.contains_key(name) {
            return Err(format!("branch {name} exists").into());
        }
        state.branches.insert(name.to_string(), Vec::new());
        Ok(BranchHandle {
            name: name.to_string(),
        })
    }

    async fn stage_file(
        &self,
        branch: &BranchHandle,
        path: &str,
        content: &str,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock().unwrap();
        let files = state
            .branches
            .get_mut(&branch.name)
            .ok_or("no such branch")?;
        files.push((path.to_string(), content.to_string()));
        Ok(())
    }

    async fn open_change_request(
        &self,
        branch: &BranchHandle,
        _title: &str,
        _body: &str,
    ) -> Result<ChangeRequest, CollaboratorError> {
        if self.fail_open {
            return Err("Validation Failed".into());
        }
        let mut state = self.state.lock().unwrap();
        state.next_number += 1;
        state.open.push(branch.name.clone());
        Ok(ChangeRequest {
            number: state.next_number,
            url: format!("https://github.com/o/r/pull/{}", state.next_number),
        })
    }

    async fn delete_branch(&self, branch: &BranchHandle) -> Result<(), CollaboratorError> {
        self.state.lock().unwrap().branches.remove(&branch.name);
        Ok(())
    }
}

#[tokio::test]
async fn mixed_items_submit_only_the_new_one() {
    let feed = source(SourceKind::Feed, "https://galaxyproject.org/news/feed.xml");
    let adapters = AdapterSet::new().with(
        SourceKind::Feed,
        Box::new(adapter_returning(
            "Galaxy News",
            vec![
                item("Old post", "https://galaxyproject.org/news/old-post/", "2024-05-01T10:00:00Z"),
                item("Broken date", "https://galaxyproject.org/news/broken/", "sometime"),
                item("New post", "https://galaxyproject.org/news/new-post/", "2024-05-19T10:00:00Z"),
            ],
        )),
    );

    let body_seen = Arc::new(Mutex::new(String::new()));
    let body_capture = Arc::clone(&body_seen);
    let mut repo = MockRepository::new();
    repo.expect_list_tree()
        .returning(|_| Ok(vec!["posts/feed_bot/galaxy_news/old-post.md".to_string()]));
    repo.expect_list_open_change_request_paths()
        .returning(|_| Ok(vec![]));
    repo.expect_create_branch()
        .times(1)
        .returning(|name| Ok(BranchHandle { name: name.to_string() }));
    repo.expect_stage_file()
        .withf(|_, path, content| {
            path.to_string() == "posts/feed_bot/galaxy_news/new-post.md"
                && content.starts_with(
                    "---\nmedia:\n- mastodon-galaxy\n---\nNew post\nAbout New post",
                )
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    repo.expect_open_change_request()
        .times(1)
        .returning(move |_, title, body| {
            assert_eq!(title, "Update from feed bot since 2024-05-20");
            *body_capture.lock().unwrap() = body.to_string();
            Ok(ChangeRequest {
                number: 12,
                url: "https://github.com/o/r/pull/12".into(),
            })
        });
    repo.expect_delete_branch().never();

    let report = synchronise(&config(vec![feed]), &adapters, &repo, run_start())
        .await
        .expect("run should complete");

    assert_eq!(report.accepted(), 1);
    assert_eq!(report.sources[0].duplicates, 1);
    assert_eq!(report.sources[0].skipped, 1);
    match &report.outcome {
        SubmissionOutcome::Submitted { titles, branch, .. } => {
            assert_eq!(titles, &vec!["New post".to_string()]);
            assert_eq!(branch, "feed-update-20240520060000");
        }
        other => panic!("expected Submitted, got {other:?}"),
    }
    let body = body_seen.lock().unwrap().clone();
    assert!(body.contains("- [New post](https://galaxyproject.org/news/new-post/)"));
    assert!(!body.contains("Old post"));
    assert!(!body.contains("Broken date"));
}

#[tokio::test]
async fn same_path_from_two_sources_is_staged_once() {
    let first = source(SourceKind::Feed, "https://a.example.org/feed");
    let second = source(SourceKind::Video, "UCsame");
    let shared = |title: &str| item(title, "https://example.org/posts/shared/", "2024-05-19");
    let adapters = AdapterSet::new()
        .with(
            SourceKind::Feed,
            Box::new(adapter_returning("Shared", vec![shared("From feed")])),
        )
        .with(
            SourceKind::Video,
            Box::new(adapter_returning("Shared", vec![shared("From video")])),
        );

    let repo = InMemoryRepo::default();
    let report = synchronise(&config(vec![first, second]), &adapters, &repo, run_start())
        .await
        .unwrap();

    assert_eq!(report.sources[0].accepted, 1);
    assert_eq!(report.sources[1].duplicates, 1);
    let SubmissionOutcome::Submitted { branch, titles, .. } = &report.outcome else {
        panic!("expected Submitted, got {:?}", report.outcome);
    };
    assert_eq!(titles, &vec!["From feed".to_string()]);
    assert_eq!(
        repo.staged_paths(branch),
        vec!["posts/feed_bot/shared/shared.md".to_string()]
    );
}

#[tokio::test]
async fn nothing_new_is_a_noop_without_branch() {
    let feed = source(SourceKind::Feed, "https://a.example.org/feed");
    let adapters = AdapterSet::new().with(
        SourceKind::Feed,
        Box::new(adapter_returning("Empty", vec![])),
    );
    let mut repo = MockRepository::new();
    repo.expect_list_tree().returning(|_| Ok(vec![]));
    repo.expect_list_open_change_request_paths()
        .returning(|_| Ok(vec![]));
    repo.expect_create_branch().never();

    let report = synchronise(&config(vec![feed]), &adapters, &repo, run_start())
        .await
        .unwrap();
    assert_eq!(report.outcome, SubmissionOutcome::NoOp);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_run() {
    let broken = source(SourceKind::Citation, "999");
    let feed = source(SourceKind::Feed, "https://a.example.org/feed");

    let mut citation = MockSourceAdapter::new();
    citation
        .expect_fetch()
        .returning(|_| Err(FetchError::Invalid("group not found".into())));
    citation.expect_layout().never();

    let adapters = AdapterSet::new()
        .with(SourceKind::Citation, Box::new(citation))
        .with(
            SourceKind::Feed,
            Box::new(adapter_returning(
                "News",
                vec![item("Fresh", "https://a.example.org/fresh", "2024-05-19")],
            )),
        );

    let repo = InMemoryRepo::default();
    let report = synchronise(&config(vec![broken, feed]), &adapters, &repo, run_start())
        .await
        .unwrap();

    assert!(report.sources[0].error.is_some());
    assert_eq!(report.sources[1].accepted, 1);
    assert!(matches!(report.outcome, SubmissionOutcome::Submitted { .. }));
}

#[tokio::test]
async fn second_run_is_noop_while_pending_and_after_merge() {
    let feed = source(SourceKind::Feed, "https://a.example.org/feed");
    let items = vec![
        item("One", "https://a.example.org/one", "2024-05-19"),
        item("Two", "https://a.example.org/two", "2024-05-19"),
    ];
    let adapters = AdapterSet::new().with(
        SourceKind::Feed,
        Box::new(adapter_returning("News", items)),
    );
    let cfg = config(vec![feed]);
    let repo = InMemoryRepo::default();

    let first = synchronise(&cfg, &adapters, &repo, run_start()).await.unwrap();
    assert!(matches!(first.outcome, SubmissionOutcome::Submitted { .. }));
    assert_eq!(first.index_size_after, first.index_size_before + 2);

    let later = run_start() + chrono::Duration::hours(1);
    let pending = synchronise(&cfg, &adapters, &repo, later).await.unwrap();
    assert_eq!(pending.outcome, SubmissionOutcome::NoOp);
    assert_eq!(pending.index_size_before, 2);

    repo.merge_all();
    let merged = synchronise(&cfg, &adapters, &repo, later).await.unwrap();
    assert_eq!(merged.outcome, SubmissionOutcome::NoOp);
    assert_eq!(merged.index_size_after, merged.index_size_before);
}

#[tokio::test]
async fn failed_submission_leaves_no_branch_behind() {
    let feed = source(SourceKind::Feed, "https://a.example.org/feed");
    let adapters = AdapterSet::new().with(
        SourceKind::Feed,
        Box::new(adapter_returning(
            "News",
            vec![item("One", "https://a.example.org/one", "2024-05-19")],
        )),
    );
    let repo = InMemoryRepo::failing();

    let report = synchronise(&config(vec![feed]), &adapters, &repo, run_start())
        .await
        .unwrap();

    assert!(report.outcome.is_failure());
    assert!(matches!(
        report.outcome,
        SubmissionOutcome::SubmissionFailed {
            cleanup: BranchCleanup::Deleted,
            ..
        }
    ));
    assert!(repo.branch_names().is_empty());
}

#[tokio::test]
async fn invalid_config_fails_before_touching_the_repository() {
    let mut incomplete = (*source(SourceKind::Feed, "https://a.example.org/feed")).clone();
    incomplete.format = String::new();

    let mut repo = MockRepository::new();
    repo.expect_list_tree().never();
    repo.expect_list_open_change_request_paths().never();

    let err = synchronise(
        &config(vec![Arc::new(incomplete)]),
        &AdapterSet::new(),
        &repo,
        run_start(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[tokio::test]
async fn unreadable_repository_aborts_the_run() {
    let feed = source(SourceKind::Feed, "https://a.example.org/feed");
    let mut repo = MockRepository::new();
    repo.expect_list_tree()
        .returning(|_| Err("401 Bad credentials".into()));

    let err = synchronise(&config(vec![feed]), &AdapterSet::new(), &repo, run_start())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Repository(msg) if msg.contains("Bad credentials")));
}
