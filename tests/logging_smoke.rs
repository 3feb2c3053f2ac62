use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use jobdash::{
    dashboard_router, log_app_bind, log_app_start, log_app_stop, log_source_selected,
    DashboardHandle, DataOrchestrator, Endpoint, FixedClock, InMemoryMockFetcher,
    LifecycleConfig, LoggingConfig, RefreshOutcome,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("single-thread runtime should build")
        .block_on(future)
}

fn orchestrator_at_ist_1600(fetcher: InMemoryMockFetcher) -> DataOrchestrator<InMemoryMockFetcher> {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2023, 6, 1, 10, 30, 0).unwrap(),
    ));
    DataOrchestrator::with_clock(fetcher, clock)
}

#[test]
fn full_refresh_logs_start_and_complete() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let orchestrator = orchestrator_at_ist_1600(InMemoryMockFetcher::demo());
            let outcome = orchestrator.full_refresh().await;
            assert_eq!(outcome, Ok(RefreshOutcome::Completed));
        });
    });

    assert!(logs.contains("\"event\":\"refresh.full.start\""));
    assert!(logs.contains("\"event\":\"refresh.full.complete\""));
    assert!(logs.contains("\"work_type\":\"All\""));
}

#[test]
fn failed_refresh_logs_error_with_cause() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let fetcher = InMemoryMockFetcher::demo();
            fetcher.set_failure(Endpoint::ExperienceLevels, "simulated analytics outage");
            let orchestrator = orchestrator_at_ist_1600(fetcher);
            assert!(orchestrator.full_refresh().await.is_err());
        });
    });

    assert!(logs.contains("\"event\":\"refresh.full.error\""));
    assert!(logs.contains("simulated analytics outage"));
    assert!(!logs.contains("\"event\":\"refresh.full.complete\""));
}

#[test]
fn gated_failure_logs_warning_and_ticks_log_at_debug() {
    let logs = capture_logs(Level::DEBUG, || {
        block_on(async {
            let fetcher = InMemoryMockFetcher::demo();
            fetcher.set_failure(Endpoint::CompanySizeVsName, "connection reset");
            let orchestrator = orchestrator_at_ist_1600(fetcher);
            let tick = orchestrator.gated_refresh().await;
            assert!(tick.gate_open);
        });
    });

    assert!(logs.contains("\"event\":\"gated.tick\""));
    assert!(logs.contains("\"event\":\"gated.fetch.error\""));
    assert!(logs.contains("\"endpoint\":\"/company_size_vs_name\""));
}

#[test]
fn filter_change_logs_new_selection() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let orchestrator = orchestrator_at_ist_1600(InMemoryMockFetcher::demo());
            orchestrator
                .set_filter(jobdash::FilterField::Experience, "2 to 5 Years")
                .await;
        });
    });

    assert!(logs.contains("\"event\":\"filters.changed\""));
    assert!(logs.contains("\"experience\":\"2 to 5 Years\""));
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(&cfg);
        log_source_selected("demo", None, 1_000);
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));
        log_app_stop("signal");
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"source.selected\""));
    assert!(logs.contains("\"event\":\"app.bind\""));
    assert!(logs.contains("\"event\":\"app.stop\""));
}

#[test]
fn snapshot_route_emits_http_snapshot_event() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let orchestrator = Arc::new(orchestrator_at_ist_1600(InMemoryMockFetcher::demo()));
            let handle = Arc::new(DashboardHandle::mount(
                orchestrator,
                LifecycleConfig::default(),
            ));
            let app = dashboard_router(handle);

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/dashboard/snapshot")
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("snapshot request should succeed");

            assert_eq!(response.status(), StatusCode::OK);
        });
    });

    assert!(logs.contains("\"event\":\"dashboard.mount\""));
    assert!(logs.contains("\"event\":\"http.snapshot.request\""));
}

#[test]
fn busy_manual_refresh_is_logged_once_by_the_orchestrator() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let orchestrator = Arc::new(orchestrator_at_ist_1600(InMemoryMockFetcher::demo()));
            let handle = DashboardHandle::mount(orchestrator, LifecycleConfig::default());
            assert!(!jobdash::DashboardSource::request_refresh(&handle));
        });
    });

    assert_eq!(logs.matches("\"event\":\"refresh.manual.busy\"").count(), 1);
    let busy_line = logs
        .lines()
        .find(|line| line.contains("refresh.manual.busy"))
        .expect("busy event should be logged");
    assert!(busy_line.contains("\"component\":\"orchestrator\""));
}
