//! End-to-end job execution against in-memory collaborators.
//!
//! Jobs run through `run_job`, the `JobRunner` and the `QueueExecutor`
//! with a `MemoryJobStore`, `MockFetcher` and `MockLlm`.

mod common;

use common::{request, test_config, TestWorker};
use discovery::testing::{MockFetcher, MockLlm};
use discovery::FetchError;
use scrape_core::kernel::jobs::{
    JobRunner, JobStatus, JobStore, JobType, QueueExecutor, RetentionSweeper, PRIORITY_SYNC,
};
use scrape_core::{ErrorCode, RetentionConfig, WorkerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SEED: &str = "https://site.test/";

fn error_code(job: &scrape_core::kernel::jobs::Job) -> ErrorCode {
    job.job_error().expect("failed job carries an error").code
}

async fn wait_until_terminal(worker: &TestWorker, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let jobs = worker.store.jobs().await;
            let done = jobs.iter().filter(|j| j.status.is_terminal()).count();
            if done >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs finished in time");
}

// =============================================================================
// Scrape
// =============================================================================

#[tokio::test]
async fn test_scrape_completes_with_markdown() {
    let fetcher = MockFetcher::new().with_html(
        "https://site.test/page",
        "<html><head><title>Welcome</title></head><body><h1>Hello</h1><p>World</p></body></html>",
    );
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(JobType::Scrape, json!({"url": "https://site.test/page"})))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
    assert!(job.completed_at.is_some());

    let output = job.output.expect("completed job has output");
    assert!(output["markdown"].as_str().unwrap().contains("Hello"));
    assert_eq!(output["metadata"]["title"], "Welcome");
    assert!(output.get("html").is_none(), "only requested formats are kept");
}

#[tokio::test]
async fn test_invalid_input_fails_without_running() {
    let worker = TestWorker::new(MockFetcher::new());
    let job = worker
        .enqueue_raw(JobType::Scrape, json!({"not_a_url": true}))
        .await;

    let job = worker.run_existing(job, CancellationToken::new()).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::InvalidJobInput);
    assert!(job.output.is_none());
    assert!(worker.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_browser_engine_rejected_when_disabled() {
    let fetcher = MockFetcher::new().with_html("https://site.test/page", "<p>hi</p>");
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(
            JobType::Scrape,
            json!({"url": "https://site.test/page", "formats": ["markdown", "screenshot"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::BrowserDisabled);
    assert!(worker.fetcher.fetched_urls().is_empty());
}

#[tokio::test]
async fn test_llm_format_without_llm_fails_upfront() {
    let fetcher = MockFetcher::new().with_html("https://site.test/page", "<p>hi</p>");
    let worker = TestWorker::without_llm(fetcher);

    let job = worker
        .run(&request(
            JobType::Scrape,
            json!({"url": "https://site.test/page", "formats": ["markdown", "summary"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::LlmUnavailable);
    assert!(worker.fetcher.fetched_urls().is_empty());
}

#[tokio::test]
async fn test_scrape_summary_comes_from_llm() {
    let fetcher = MockFetcher::new().with_html("https://site.test/page", "<p>Long article</p>");
    let llm = MockLlm::new().with_response("https://site.test/page", json!({"summary": "Short"}));
    let worker = TestWorker::build(fetcher, Some(llm), test_config());

    let job = worker
        .run(&request(
            JobType::Scrape,
            json!({"url": "https://site.test/page", "formats": ["markdown", "summary"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.unwrap()["summary"], "Short");
}

#[tokio::test]
async fn test_scrape_enrichment_failure_fails_job() {
    let fetcher = MockFetcher::new().with_html("https://site.test/page", "<p>hi</p>");
    let llm = MockLlm::new().failing("model overloaded");
    let worker = TestWorker::build(fetcher, Some(llm), test_config());

    let job = worker
        .run(&request(
            JobType::Scrape,
            json!({"url": "https://site.test/page", "formats": ["summary"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::EnrichmentFailed);
}

#[tokio::test]
async fn test_work_timeout_fails_job() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/slow", "<p>slow</p>")
        .with_delay(Duration::from_secs(2));
    let config = WorkerConfig {
        job_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let worker = TestWorker::build(fetcher, None, config);

    let job = worker
        .run(&request(JobType::Scrape, json!({"url": "https://site.test/slow"})))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::JobTimeout);
    assert!(job.output.is_none());
}

#[tokio::test]
async fn test_cancellation_fails_job() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/slow", "<p>slow</p>")
        .with_delay(Duration::from_secs(2));
    let worker = TestWorker::new(fetcher);
    let job = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/slow"})))
        .await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let job = worker.run_existing(job, cancel).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::JobCancelled);
}

// =============================================================================
// Map
// =============================================================================

#[tokio::test]
async fn test_map_lists_discovered_links() {
    let fetcher = MockFetcher::new()
        .with_links(SEED, &["https://site.test/a", "https://site.test/b"])
        .with_links("https://site.test/a", &[])
        .with_links("https://site.test/b", &[]);
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(JobType::Map, json!({"url": SEED, "limit": 10})))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let output = job.output.unwrap();
    let urls: Vec<&str> = output["links"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|l| l["url"].as_str())
        .collect();
    assert!(urls.contains(&"https://site.test/a"));
    assert!(urls.contains(&"https://site.test/b"));
    assert!(urls.len() <= 10);

    let documents = worker.store.list_documents(job.id).await.unwrap();
    assert!(documents.is_empty(), "map does not persist pages");
}

#[tokio::test]
async fn test_map_unreachable_seed_fails() {
    let worker = TestWorker::new(MockFetcher::new());

    let job = worker
        .run(&request(JobType::Map, json!({"url": SEED})))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::MapFailed);
}

// =============================================================================
// Crawl
// =============================================================================

#[tokio::test]
async fn test_crawl_completes_with_partial_failures() {
    let fetcher = MockFetcher::new()
        .with_links(
            SEED,
            &["https://site.test/a", "https://site.test/b", "https://site.test/c"],
        )
        .with_links("https://site.test/a", &[]);
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(JobType::Crawl, json!({"url": SEED, "limit": 10})))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let output = job.output.unwrap();
    assert_eq!(output["documents"], 2);
    assert_eq!(output["failed"], 2);
    assert_eq!(output["attempted"], 4);

    let documents = worker.store.list_documents(job.id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|d| d.job_id == job.id));
    assert!(documents.iter().any(|d| d.url.ends_with("/a")));
}

#[tokio::test]
async fn test_crawl_fetches_seed_with_query_string() {
    let seed = "https://site.test/index.php?page=docs";
    let fetcher = MockFetcher::new()
        .with_links(seed, &["https://site.test/index.php?page=about"])
        .with_links("https://site.test/index.php?page=about", &[]);

    for ignore_query in [false, true] {
        let worker = TestWorker::new(fetcher.clone());
        let job = worker
            .run(&request(
                JobType::Crawl,
                json!({"url": seed, "ignoreQueryParameters": ignore_query}),
            ))
            .await;

        assert_eq!(job.status, JobStatus::Completed, "ignore_query={ignore_query}");
        let documents = worker.store.list_documents(job.id).await.unwrap();
        let stored: Vec<_> = documents.iter().map(|d| d.url.as_str()).collect();
        assert!(stored.contains(&seed));

        if ignore_query {
            assert_eq!(stored, vec![seed]);
        } else {
            assert_eq!(documents.len(), 2);
            assert!(stored.contains(&"https://site.test/index.php?page=about"));
        }
    }
    assert!(!fetcher
        .fetched_urls()
        .iter()
        .any(|u| u == "https://site.test/index.php"));
}

#[tokio::test]
async fn test_crawl_with_no_fetchable_pages_fails() {
    let sitemap = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://site.test/gone</loc></url>
</urlset>"#;
    let fetcher = MockFetcher::new()
        .with_text("https://site.test/sitemap.xml", sitemap)
        .with_failure(
            SEED,
            FetchError::Status {
                url: SEED.into(),
                status: 500,
            },
        );
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(JobType::Crawl, json!({"url": SEED})))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::CrawlEmptyResult);
    assert!(worker.store.list_documents(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crawl_unreachable_seed_fails_discovery() {
    let worker = TestWorker::new(MockFetcher::new());

    let job = worker
        .run(&request(JobType::Crawl, json!({"url": SEED})))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::CrawlDiscoveryFailed);
}

// =============================================================================
// Batch scrape
// =============================================================================

#[tokio::test]
async fn test_batch_scrape_keeps_successful_pages() {
    let fetcher = MockFetcher::new().with_html("https://site.test/ok", "<p>ok</p>");
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(
            JobType::BatchScrape,
            json!({"urls": ["https://site.test/ok", "https://site.test/missing", "https://site.test/gone"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let output = job.output.unwrap();
    assert_eq!(output["documents"], 1);
    assert_eq!(output["failed"], 2);

    let documents = worker.store.list_documents(job.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].markdown.as_deref().unwrap().contains("ok"));
}

#[tokio::test]
async fn test_batch_scrape_all_failed() {
    let worker = TestWorker::new(MockFetcher::new());

    let job = worker
        .run(&request(
            JobType::BatchScrape,
            json!({"urls": ["https://site.test/missing", "https://site.test/gone"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::BatchScrapeEmptyResult);
}

#[tokio::test]
async fn test_batch_scrape_respects_concurrency_ceiling() {
    let urls: Vec<String> = (0..6).map(|i| format!("https://site.test/p{i}")).collect();
    let fetcher = urls
        .iter()
        .fold(MockFetcher::new(), |f, url| f.with_html(url, "<p>page</p>"))
        .with_delay(Duration::from_millis(40));
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(
            JobType::BatchScrape,
            json!({"urls": urls, "maxConcurrency": 2}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.unwrap()["documents"], 6);
    assert!(worker.fetcher.peak_concurrency() <= 2);
}

#[tokio::test]
async fn test_worker_url_cap_bounds_wall_clock() {
    let urls: Vec<String> = (0..10).map(|i| format!("https://site.test/w{i}")).collect();
    let fetcher = urls
        .iter()
        .fold(MockFetcher::new(), |f, url| f.with_html(url, "<p>page</p>"))
        .with_delay(Duration::from_millis(100));
    let config = WorkerConfig {
        max_concurrent_urls_per_job: 2,
        ..test_config()
    };
    let worker = TestWorker::build(fetcher, None, config);

    let started = std::time::Instant::now();
    let job = worker
        .run(&request(JobType::BatchScrape, json!({ "urls": urls })))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(worker.fetcher.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_batch_scrape_enrichment_failure_keeps_page() {
    let fetcher = MockFetcher::new().with_html("https://site.test/ok", "<p>ok</p>");
    let llm = MockLlm::new().failing("model overloaded");
    let worker = TestWorker::build(fetcher, Some(llm), test_config());

    let job = worker
        .run(&request(
            JobType::BatchScrape,
            json!({"urls": ["https://site.test/ok"], "formats": ["markdown", "summary"]}),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let documents = worker.store.list_documents(job.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].summary.is_none());
    assert!(documents[0].markdown.is_some());
}

// =============================================================================
// Extract
// =============================================================================

fn extract_input(ignore_invalid: bool, urls: &[&str]) -> Value {
    json!({
        "urls": urls,
        "schema": {"type": "object", "properties": {"title": {"type": "string"}}},
        "ignoreInvalidURLs": ignore_invalid,
        "showSources": true,
    })
}

#[tokio::test]
async fn test_extract_fails_fast_by_default() {
    let fetcher = MockFetcher::new().with_html("https://site.test/a", "<p>a</p>");
    let worker = TestWorker::new(fetcher);

    let job = worker
        .run(&request(
            JobType::Extract,
            extract_input(false, &["https://site.test/a", "https://site.test/missing"]),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::ScrapeFailed);
}

#[tokio::test]
async fn test_extract_lenient_records_failures() {
    let fetcher = MockFetcher::new().with_html("https://site.test/a", "<p>a</p>");
    let llm = MockLlm::new().with_response("https://site.test/a", json!({"title": "Page A"}));
    let worker = TestWorker::build(fetcher, Some(llm), test_config());

    let job = worker
        .run(&request(
            JobType::Extract,
            extract_input(true, &["https://site.test/a", "https://site.test/missing"]),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let output = job.output.unwrap();

    assert_eq!(output["results"][0]["success"], true);
    assert_eq!(output["results"][0]["data"]["title"], "Page A");
    assert_eq!(output["results"][1]["success"], false);
    assert!(output["results"][1]["error"]
        .as_str()
        .unwrap()
        .starts_with("SCRAPE_FAILED:"));

    assert_eq!(output["summary"]["total"], 2);
    assert_eq!(output["summary"]["success"], 1);
    assert_eq!(output["summary"]["failed"], 1);
    assert_eq!(output["summary"]["failedByCode"]["SCRAPE_FAILED"], 1);
    assert_eq!(output["sources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_extract_lenient_with_nothing_extracted_fails() {
    let fetcher = MockFetcher::new().with_html("https://site.test/a", "<p>a</p>");
    let llm = MockLlm::new().with_empty("https://site.test/a");
    let worker = TestWorker::build(fetcher, Some(llm), test_config());

    let job = worker
        .run(&request(
            JobType::Extract,
            extract_input(true, &["https://site.test/a", "https://site.test/missing"]),
        ))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::ExtractEmptyResult);
}

#[tokio::test]
async fn test_extract_requires_llm() {
    let fetcher = MockFetcher::new().with_html("https://site.test/a", "<p>a</p>");
    let worker = TestWorker::without_llm(fetcher);

    let job = worker
        .run(&request(JobType::Extract, extract_input(true, &["https://site.test/a"])))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::LlmUnavailable);
}

// =============================================================================
// Runner
// =============================================================================

#[tokio::test]
async fn test_runner_caps_concurrent_jobs() {
    let urls: Vec<String> = (0..5).map(|i| format!("https://site.test/j{i}")).collect();
    let fetcher = urls
        .iter()
        .fold(MockFetcher::new(), |f, url| f.with_html(url, "<p>job</p>"))
        .with_delay(Duration::from_millis(50));
    let config = WorkerConfig {
        max_concurrent_jobs: 2,
        ..test_config()
    };
    let worker = TestWorker::build(fetcher, None, config);

    for url in &urls {
        worker
            .enqueue(&request(JobType::Scrape, json!({ "url": url })))
            .await;
    }

    let runner = Arc::new(JobRunner::new(worker.deps.clone()));
    let shutdown = CancellationToken::new();
    let handle = {
        let runner = runner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    wait_until_terminal(&worker, urls.len()).await;
    shutdown.cancel();
    handle.await.unwrap();

    let jobs = worker.store.jobs().await;
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert!(worker.fetcher.peak_concurrency() <= 2);
    assert_eq!(runner.running_count(), 0);
}

#[tokio::test]
async fn test_runner_claims_sync_jobs_first() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/normal", "<p>n</p>")
        .with_html("https://site.test/sync", "<p>s</p>")
        .with_delay(Duration::from_millis(200));
    let config = WorkerConfig {
        max_concurrent_jobs: 1,
        ..test_config()
    };
    let worker = TestWorker::build(fetcher, None, config.clone());

    for _ in 0..3 {
        worker
            .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/normal"})))
            .await;
    }
    let queue = QueueExecutor::new(worker.store.clone(), &config);
    let sync_id = queue
        .submit(
            &request(JobType::Scrape, json!({"url": "https://site.test/sync"})),
            None,
            true,
        )
        .await
        .unwrap();

    let runner = JobRunner::new(worker.deps.clone()).with_worker_id("runner-test");
    let dispatched = runner.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(dispatched, 1);

    let sync_job = worker.store.get_job(sync_id).await.unwrap();
    assert_eq!(sync_job.priority, PRIORITY_SYNC);
    assert_eq!(sync_job.worker_id.as_deref(), Some("runner-test"));

    let others = worker.store.jobs().await;
    assert!(others
        .iter()
        .filter(|j| j.id != sync_id)
        .all(|j| j.worker_id.is_none()));
}

#[tokio::test]
async fn test_runner_shutdown_cancels_in_flight_jobs() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/slow", "<p>slow</p>")
        .with_delay(Duration::from_secs(5));
    let worker = TestWorker::new(fetcher);
    let job = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/slow"})))
        .await;

    let runner = Arc::new(JobRunner::new(worker.deps.clone()));
    let shutdown = CancellationToken::new();
    let handle = {
        let runner = runner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    tokio::time::timeout(Duration::from_secs(2), async {
        while worker.store.get_job(job.id).await.unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job started");

    shutdown.cancel();
    handle.await.unwrap();

    let job = worker.store.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(error_code(&job), ErrorCode::JobCancelled);
}

#[tokio::test]
async fn test_runner_cancel_single_job() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/slow", "<p>slow</p>")
        .with_delay(Duration::from_secs(5));
    let worker = TestWorker::new(fetcher);
    let job = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/slow"})))
        .await;

    let runner = JobRunner::new(worker.deps.clone());
    let shutdown = CancellationToken::new();
    assert_eq!(runner.tick(&shutdown).await.unwrap(), 1);
    assert!(runner.cancel_job(job.id).await);

    wait_until_terminal(&worker, 1).await;
    let job = worker.store.get_job(job.id).await.unwrap();
    assert_eq!(error_code(&job), ErrorCode::JobCancelled);
    assert!(!shutdown.is_cancelled());
}

#[tokio::test]
async fn test_runner_fails_jobs_whose_worker_died() {
    let fetcher = MockFetcher::new()
        .with_html("https://site.test/slow", "<p>slow</p>")
        .with_delay(Duration::from_millis(300));
    let config = WorkerConfig {
        claim_lease: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(20),
        ..test_config()
    };
    let worker = TestWorker::build(fetcher, None, config);

    // started by a worker that then disappeared
    let orphan = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/orphan"})))
        .await;
    worker
        .store
        .update_status(orphan.id, JobStatus::Running, None)
        .await
        .unwrap();

    // outlives the lease, but heartbeats while it runs
    let slow = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/slow"})))
        .await;

    let runner = Arc::new(JobRunner::new(worker.deps.clone()));
    let shutdown = CancellationToken::new();
    let handle = {
        let runner = runner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    wait_until_terminal(&worker, 2).await;
    shutdown.cancel();
    handle.await.unwrap();

    let orphan = worker.store.get_job(orphan.id).await.unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(error_code(&orphan), ErrorCode::JobLeaseExpired);

    let slow = worker.store.get_job(slow.id).await.unwrap();
    assert_eq!(slow.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_recovery_leaves_fresh_running_jobs_alone() {
    let worker = TestWorker::new(MockFetcher::new());
    let job = worker
        .enqueue(&request(JobType::Scrape, json!({"url": "https://site.test/page"})))
        .await;
    worker
        .store
        .update_status(job.id, JobStatus::Running, None)
        .await
        .unwrap();

    let runner = JobRunner::new(worker.deps.clone());
    assert_eq!(runner.recover_expired_jobs().await.unwrap(), 0);
    assert_eq!(
        worker.store.get_job(job.id).await.unwrap().status,
        JobStatus::Running
    );
}

#[tokio::test]
async fn test_sweeper_runs_at_most_once_per_interval() {
    let worker = TestWorker::new(MockFetcher::new());
    let sweeper = RetentionSweeper::new(worker.store.clone(), RetentionConfig::default());
    let runner = JobRunner::new(worker.deps.clone()).with_sweeper(sweeper);

    assert!(runner.maybe_sweep().await.is_some());
    assert!(runner.maybe_sweep().await.is_none());
}

// =============================================================================
// Synchronous façade
// =============================================================================

#[tokio::test]
async fn test_queue_executor_returns_output() {
    let fetcher = MockFetcher::new().with_html("https://site.test/page", "<p>Sync page</p>");
    let worker = TestWorker::new(fetcher);

    let runner = Arc::new(JobRunner::new(worker.deps.clone()));
    let shutdown = CancellationToken::new();
    let handle = {
        let runner = runner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    let queue = QueueExecutor::new(worker.store.clone(), &test_config());
    let output: Value = queue
        .execute(
            &request(JobType::Scrape, json!({"url": "https://site.test/page"})),
            Some("tenant-a".into()),
        )
        .await
        .unwrap();

    shutdown.cancel();
    handle.await.unwrap();

    assert!(output["markdown"].as_str().unwrap().contains("Sync page"));
}

#[tokio::test]
async fn test_queue_executor_surfaces_job_error() {
    let worker = TestWorker::new(MockFetcher::new());

    let runner = Arc::new(JobRunner::new(worker.deps.clone()));
    let shutdown = CancellationToken::new();
    let handle = {
        let runner = runner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    let queue = QueueExecutor::new(worker.store.clone(), &test_config());
    let err = queue
        .execute::<Value>(
            &request(JobType::Scrape, json!({"url": "https://site.test/missing"})),
            None,
        )
        .await
        .unwrap_err();

    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(err.code, ErrorCode::ScrapeFailed);
    assert!(err.message.contains("404"));
}

#[tokio::test]
async fn test_queue_executor_without_runner_reports_not_started() {
    let worker = TestWorker::new(MockFetcher::new());
    let queue = QueueExecutor::new(worker.store.clone(), &test_config())
        .with_wait_timeout(Duration::from_millis(50));

    let err = queue
        .execute::<Value>(
            &request(JobType::Scrape, json!({"url": "https://site.test/page"})),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::JobNotStarted);
}
