// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Engine Integration Tests
 * End-to-end scenarios against a local mock HTTP server
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tutka_scanner::engine::ScanEngine;
use tutka_scanner::executor::TemplateExecutor;
use tutka_scanner::host_errors::HostErrorCache;
use tutka_scanner::input::MetaInput;
use tutka_scanner::interactsh::{EventSink, InteractshClient, WireInteraction};
use tutka_scanner::options::ScanOptions;
use tutka_scanner::output::{MemorySink, Sink};
use tutka_scanner::protocols::ProtocolRuntime;
use tutka_scanner::rate_limiter::RateLimiter;
use tutka_scanner::template::{compile, parse, TemplateStore};
use tutka_scanner::types::{ResultEvent, ScanStats};
use tutka_scanner::workflow::WorkflowOrchestrator;

/// Minimal canned-response HTTP server for driver tests
struct MockServer {
    base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    async fn start(routes: Vec<(&str, u16, &str)>) -> MockServer {
        let routes: HashMap<String, (u16, String)> = routes
            .into_iter()
            .map(|(path, status, body)| (path.to_string(), (status, body.to_string())))
            .collect();
        let routes = Arc::new(routes);
        let hits = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_hits = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&accept_hits);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) => break,
                            Ok(n) => {
                                read += n;
                                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                                if read == buf.len() {
                                    break;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    hits.lock().unwrap().push(path.clone());

                    let (status, body) = routes
                        .get(&path)
                        .cloned()
                        .unwrap_or((404, "not found".to_string()));
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        MockServer {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    fn hits_for(&self, path: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }
}

fn options() -> ScanOptions {
    ScanOptions {
        rate_limit: 0,
        retries: 0,
        ..Default::default()
    }
}

fn runtime_with(options: ScanOptions) -> Arc<ProtocolRuntime> {
    let host_errors = Arc::new(HostErrorCache::new(
        options.max_host_errors,
        1000,
        std::time::Duration::from_secs(300),
    ));
    Arc::new(
        ProtocolRuntime::new(
            options,
            RateLimiter::unlimited(),
            host_errors,
            Arc::new(ScanStats::default()),
        )
        .unwrap(),
    )
}

async fn run_scan(
    store: TemplateStore,
    targets: Vec<MetaInput>,
    options: ScanOptions,
) -> (Vec<ResultEvent>, Arc<ScanStats>) {
    let sink = Arc::new(MemorySink::new());
    let stats = Arc::new(ScanStats::default());
    let engine = ScanEngine::new(options, Arc::clone(&sink) as Arc<dyn Sink>, Arc::clone(&stats))
        .await
        .unwrap();
    engine
        .execute_scan(Arc::new(store), Arc::new(targets))
        .await
        .unwrap();
    engine.close().await;
    (sink.take(), stats)
}

// Scenario 1: a status matcher against a 200 response emits exactly one
// event with matched-at equal to the request URL.
#[tokio::test]
async fn basic_http_match() {
    let server = MockServer::start(vec![("/", 200, "<html>welcome</html>")]).await;
    let template = compile(
        parse(
            r#"
id: status-check
info:
  name: Status check
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/"]
    matchers:
      - type: status
        status: [200]
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let store = TemplateStore {
        templates: vec![template],
        workflows: vec![],
    };
    let (events, _) = run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template_id, "status-check");
    assert_eq!(events[0].matched_at, format!("{}/", server.base_url));
}

// Scenario 2: matchers-condition and, with the word missing from the
// body, emits zero events.
#[tokio::test]
async fn and_matcher_group_rejects() {
    let server = MockServer::start(vec![("/", 200, "plain page")]).await;
    let template = compile(
        parse(
            r#"
id: and-check
info:
  name: And check
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/"]
    matchers-condition: and
    matchers:
      - type: status
        status: [200]
      - type: word
        words: ["admin"]
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let store = TemplateStore {
        templates: vec![template],
        workflows: vec![],
    };
    let (events, _) = run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
    assert!(events.is_empty());
}

// Scenario 3: clustering two templates over one base request emits the
// same events as running each template separately.
#[tokio::test]
async fn clustering_equivalence() {
    fn templates() -> TemplateStore {
        let a = compile(
            parse(
                r#"
id: cluster-a
info:
  name: A
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/index"]
    matchers:
      - type: word
        words: ["welcome"]
"#,
            )
            .unwrap(),
        )
        .unwrap();
        let b = compile(
            parse(
                r#"
id: cluster-b
info:
  name: B
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/index"]
    matchers:
      - type: word
        words: ["absent-marker"]
"#,
            )
            .unwrap(),
        )
        .unwrap();
        TemplateStore {
            templates: vec![a, b],
            workflows: vec![],
        }
    }

    fn summarize(events: &[ResultEvent]) -> Vec<(String, String)> {
        let mut out: Vec<_> = events
            .iter()
            .map(|e| (e.template_id.clone(), e.matched_at.clone()))
            .collect();
        out.sort();
        out
    }

    // clustered run: one physical request
    let clustered_server = MockServer::start(vec![("/index", 200, "welcome page")]).await;
    let (clustered_events, _) = run_scan(
        templates(),
        vec![MetaInput::new(&clustered_server.base_url)],
        options(),
    )
    .await;
    assert_eq!(clustered_server.hits_for("/index"), 1);

    // unclustered runs: each template alone
    let mut separate_events = Vec::new();
    for template in templates().templates {
        let server = MockServer::start(vec![("/index", 200, "welcome page")]).await;
        let store = TemplateStore {
            templates: vec![template],
            workflows: vec![],
        };
        let (events, _) =
            run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
        separate_events.extend(events);
    }

    // equivalence modulo host (ports differ per server)
    assert_eq!(
        summarize(&clustered_events)
            .iter()
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>(),
        summarize(&separate_events)
            .iter()
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>(),
    );
    assert_eq!(clustered_events.len(), 1);
    assert_eq!(clustered_events[0].template_id, "cluster-a");
}

// Cluster members see the same scan globals an unclustered run would:
// a DSL matcher referencing a -var value fires inside a cluster too.
#[tokio::test]
async fn cluster_members_see_scan_vars() {
    let server = MockServer::start(vec![("/index", 200, "welcome page")]).await;
    let a = compile(
        parse(
            r#"
id: vars-a
info:
  name: A
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/index"]
    matchers:
      - type: status
        status: [200]
"#,
        )
        .unwrap(),
    )
    .unwrap();
    let b = compile(
        parse(
            r#"
id: vars-b
info:
  name: B
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/index"]
    matchers:
      - type: dsl
        dsl:
          - "contains(body, injected)"
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let mut opts = options();
    opts.vars
        .insert("injected".to_string(), "welcome".to_string());
    let store = TemplateStore {
        templates: vec![a, b],
        workflows: vec![],
    };
    let (events, _) = run_scan(store, vec![MetaInput::new(&server.base_url)], opts).await;
    // one physical request, both members matched
    assert_eq!(server.hits_for("/index"), 1);
    let mut ids: Vec<&str> = events.iter().map(|e| e.template_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["vars-a", "vars-b"]);
}

// Scenario 4: once a host crosses the error threshold, the next task is
// skipped without a driver call.
#[tokio::test]
async fn host_error_threshold_skips_driver() {
    let mut opts = options();
    opts.max_host_errors = 3;
    let runtime = runtime_with(opts);
    let executor = TemplateExecutor::new(Arc::clone(&runtime), None);

    // a closed port refuses connections immediately
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    };
    let template = compile(
        parse(
            r#"
id: refused
info:
  name: Refused
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/"]
    matchers:
      - type: status
        status: [200]
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let target = MetaInput::new(&closed);
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let outcome = executor
            .execute(&template, &target, cancel.clone(), None)
            .await
            .unwrap();
        assert!(!outcome.matched);
    }
    let issued_before = runtime.stats.requests_issued.load(Ordering::Relaxed);
    assert_eq!(issued_before, 3);

    // threshold reached: the fourth execution is skipped up front
    let result = executor.execute(&template, &target, cancel, None).await;
    assert!(matches!(
        result,
        Err(tutka_scanner::errors::ScanError::HostSkipped { .. })
    ));
    assert_eq!(
        runtime.stats.requests_issued.load(Ordering::Relaxed),
        issued_before
    );
}

// Scenario 5: a probe carrying an OOB placeholder completes
// asynchronously when the simulated interaction arrives.
#[tokio::test]
async fn interactsh_correlation_completes_async() {
    let server = MockServer::start(vec![("/fetch", 200, "queued")]).await;
    let captured = Arc::new(MemorySink::new());
    let sink_clone = Arc::clone(&captured);
    let sink: EventSink = Arc::new(move |event| sink_clone.write_event(&event));
    let interactsh = Arc::new(InteractshClient::new(
        "https://oast.example",
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(300),
        reqwest::Client::new(),
        sink,
    ));

    let runtime = runtime_with(options());
    let executor = TemplateExecutor::new(runtime, Some(Arc::clone(&interactsh)));

    let template = compile(
        parse(
            r#"
id: blind-probe
info:
  name: Blind probe
  severity: high
http:
  - method: GET
    path: ["{{BaseURL}}/fetch?cb={{interactsh-url}}"]
    matchers:
      - type: dsl
        name: oob-dns
        dsl:
          - "interactsh_protocol == 'dns'"
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let target = MetaInput::new(&server.base_url);
    let cancel = CancellationToken::new();
    let outcome = executor
        .execute(&template, &target, cancel, None)
        .await
        .unwrap();
    // deferred matchers: nothing fires at stage time
    assert!(!outcome.matched);
    assert_eq!(interactsh.pending_count().await, 1);

    // the interaction arrives 2s later, after the execution finished
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let url = server.hits.lock().unwrap().last().cloned().unwrap();
    let correlation = url
        .split("cb=")
        .nth(1)
        .and_then(|s| s.split('.').next())
        .unwrap()
        .to_string();
    interactsh
        .deliver(WireInteraction {
            protocol: "dns".into(),
            unique_id: correlation.clone(),
            full_id: format!("{correlation}.oast.example"),
            raw_request: "A? probe".into(),
            raw_response: "NOERROR".into(),
            remote_address: "192.0.2.7".into(),
        })
        .await;

    let events = captured.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template_id, "blind-probe");
    assert_eq!(events[0].matcher_name.as_deref(), Some("oob-dns"));
    let interaction = events[0].interaction.as_ref().unwrap();
    assert_eq!(interaction.protocol, "dns");
    interactsh.close().await;
}

// Scenario 6: workflow child runs only when the parent matched, and sees
// the parent's extracted variables.
#[tokio::test]
async fn workflow_gating() {
    let workflow_yaml = r#"
id: detect-then-verify
info:
  name: Detect then verify
  severity: info
workflows:
  - template: detect
    subtemplates:
      - template: verify
"#;
    let detect_yaml = r#"
id: detect
info:
  name: Detect
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/app"]
    matchers:
      - type: word
        words: ["powered-by-acme"]
    extractors:
      - type: regex
        name: build
        regex: ["build-([a-z]+)"]
        group: 1
"#;
    let verify_yaml = r#"
id: verify
info:
  name: Verify
  severity: medium
http:
  - method: GET
    path: ["{{BaseURL}}/version"]
    matchers-condition: and
    matchers:
      - type: status
        status: [200]
      - type: dsl
        dsl:
          - "build == 'main'"
"#;

    let store = Arc::new(TemplateStore {
        templates: vec![
            compile(parse(detect_yaml).unwrap()).unwrap(),
            compile(parse(verify_yaml).unwrap()).unwrap(),
        ],
        workflows: vec![tutka_scanner::template::Workflow {
            id: "detect-then-verify".into(),
            info: Default::default(),
            nodes: parse(workflow_yaml).unwrap().workflows,
        }],
    });

    let runtime = runtime_with(options());
    let executor = TemplateExecutor::new(runtime, None);
    let orchestrator = WorkflowOrchestrator::new(&executor, &store);

    // parent does not match: child never runs
    let cold_server = MockServer::start(vec![("/app", 200, "nothing here")]).await;
    let events = orchestrator
        .execute(
            &store.workflows[0],
            &MetaInput::new(&cold_server.base_url),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(cold_server.hits_for("/version"), 0);

    // parent matches: child runs exactly once with the extracted value
    let hot_server = MockServer::start(vec![
        ("/app", 200, "powered-by-acme build-main"),
        ("/version", 200, "ok"),
    ])
    .await;
    let events = orchestrator
        .execute(
            &store.workflows[0],
            &MetaInput::new(&hot_server.base_url),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(hot_server.hits_for("/version"), 1);
    let ids: Vec<&str> = events.iter().map(|e| e.template_id.as_str()).collect();
    assert!(ids.contains(&"detect"));
    assert!(ids.contains(&"verify"));
}

// Idempotence: the same template against the same mock target twice
// produces identical events modulo timestamps.
#[tokio::test]
async fn idempotent_runs() {
    let server = MockServer::start(vec![("/", 200, "<title>Console</title>")]).await;
    let yaml = r#"
id: console-title
info:
  name: Console title
  severity: low
http:
  - method: GET
    path: ["{{BaseURL}}/"]
    matchers:
      - type: word
        words: ["Console"]
    extractors:
      - type: xpath
        xpath: ["//title"]
"#;

    let mut summaries = Vec::new();
    for _ in 0..2 {
        let store = TemplateStore {
            templates: vec![compile(parse(yaml).unwrap()).unwrap()],
            workflows: vec![],
        };
        let (events, _) =
            run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
        summaries.push(
            events
                .iter()
                .map(|e| {
                    (
                        e.template_id.clone(),
                        e.matched_at.clone(),
                        e.extracted_results.clone(),
                    )
                })
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(summaries[0], summaries[1]);
    assert_eq!(summaries[0].len(), 1);
    assert_eq!(summaries[0][0].2, vec!["Console".to_string()]);
}

// Multi-stage templates reach earlier responses through numbered
// variables.
#[tokio::test]
async fn multi_stage_numbered_variables() {
    let server = MockServer::start(vec![("/one", 201, "first"), ("/two", 200, "second")]).await;
    let yaml = r#"
id: two-step
info:
  name: Two step
  severity: info
http:
  - method: GET
    path: ["{{BaseURL}}/one"]
  - method: GET
    path: ["{{BaseURL}}/two"]
    matchers:
      - type: dsl
        dsl:
          - "status_code_1 == 201 && status_code == 200"
"#;
    let store = TemplateStore {
        templates: vec![compile(parse(yaml).unwrap()).unwrap()],
        workflows: vec![],
    };
    let (events, _) = run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].matched_at.ends_with("/two"));
}

// Payload expansion drives one request per tuple.
#[tokio::test]
async fn payload_expansion_requests() {
    let server = MockServer::start(vec![
        ("/user/admin", 200, "found"),
        ("/user/guest", 404, "nope"),
    ])
    .await;
    let yaml = r#"
id: user-enum
info:
  name: User enumeration
  severity: low
http:
  - method: GET
    path: ["{{BaseURL}}/user/{{name}}"]
    payloads:
      name:
        - admin
        - guest
    matchers:
      - type: status
        status: [200]
"#;
    let store = TemplateStore {
        templates: vec![compile(parse(yaml).unwrap()).unwrap()],
        workflows: vec![],
    };
    let (events, stats) =
        run_scan(store, vec![MetaInput::new(&server.base_url)], options()).await;
    assert_eq!(stats.requests_issued.load(Ordering::Relaxed), 2);
    assert_eq!(events.len(), 1);
    assert!(events[0].matched_at.ends_with("/user/admin"));
}
