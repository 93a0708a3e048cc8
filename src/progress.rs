use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{
    HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle,
};
use reqwest::Method;
use url::Url;

#[derive(Debug, Default)]
struct MethodCounters {
    get: AtomicU64,
    post: AtomicU64,
    patch: AtomicU64,
    delete: AtomicU64,
    other: AtomicU64,
}

impl MethodCounters {
    fn inc(&self, method: &Method) {
        let counter = match method.as_str() {
            "GET" => &self.get,
            "POST" => &self.post,
            "PATCH" => &self.patch,
            "DELETE" => &self.delete,
            _ => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.get.load(Ordering::Relaxed),
            self.post.load(Ordering::Relaxed),
            self.patch.load(Ordering::Relaxed),
            self.delete.load(Ordering::Relaxed),
            self.other.load(Ordering::Relaxed),
        )
    }
}

/// Request activity indicator on stderr. When disabled, counters are still
/// kept but nothing is drawn.
pub struct Progress {
    enabled: bool,
    start: Instant,
    max_concurrency: usize,

    mp: Option<MultiProgress>,
    stage: ProgressBar,
    requests: ProgressBar,

    http_in_flight: AtomicU64,
    http_done: AtomicU64,
    http_failed: AtomicU64,
    http_bytes: AtomicU64,

    done_by_method: MethodCounters,
    last_http_label: Mutex<String>,
}

impl Progress {
    pub fn new(enabled: bool, max_concurrency: usize) -> Arc<Self> {
        let start = Instant::now();
        let max_concurrency = max_concurrency.max(1);

        let (mp, stage, requests) = if enabled {
            let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());

            let stage = mp.add(ProgressBar::new_spinner());
            stage.set_style(spinner_style("{spinner} {msg}  [{elapsed_precise}]"));
            stage.enable_steady_tick(Duration::from_millis(80));
            stage.set_message("starting");

            let requests = mp.add(ProgressBar::new_spinner());
            requests.set_style(spinner_style("{spinner} {msg}"));
            requests.enable_steady_tick(Duration::from_millis(120));
            requests.set_message("no requests yet");

            (Some(mp), stage, requests)
        } else {
            (None, ProgressBar::hidden(), ProgressBar::hidden())
        };

        Arc::new(Self {
            enabled,
            start,
            max_concurrency,
            mp,
            stage,
            requests,
            http_in_flight: AtomicU64::new(0),
            http_done: AtomicU64::new(0),
            http_failed: AtomicU64::new(0),
            http_bytes: AtomicU64::new(0),
            done_by_method: MethodCounters::default(),
            last_http_label: Mutex::new(String::new()),
        })
    }

    pub fn disabled() -> Arc<Self> {
        Self::new(false, 1)
    }

    pub fn set_stage(&self, msg: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.stage.set_message(msg.into());
    }

    /// Prints command output to stdout without tearing the bars.
    pub fn println(&self, msg: impl AsRef<str>) {
        match &self.mp {
            Some(mp) => mp.suspend(|| println!("{}", msg.as_ref())),
            None => println!("{}", msg.as_ref()),
        }
    }

    pub fn http_start(&self, method: &Method, url: &Url) {
        self.http_in_flight.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            self.set_label(format!("{method} {}", url.path()));
            self.refresh_requests();
        }
    }

    pub fn http_ok(&self, method: &Method, url: &Url, status: u16, bytes: usize) {
        self.http_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.http_done.fetch_add(1, Ordering::Relaxed);
        self.http_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.done_by_method.inc(method);

        if self.enabled {
            self.set_label(format!("{method} {} {status} {bytes}B", url.path()));
            self.refresh_requests();
        }
    }

    pub fn http_err(&self, method: &Method, url: &Url, status: Option<u16>) {
        self.http_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.http_failed.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            let outcome = status.map_or_else(|| "unreachable".to_string(), |s| s.to_string());
            self.set_label(format!("{method} {} failed: {outcome}", url.path()));
            self.refresh_requests();
        }
    }

    pub fn requests_failed(&self) -> u64 {
        self.http_failed.load(Ordering::Relaxed)
    }

    pub fn requests_done(&self) -> u64 {
        self.http_done.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        if !self.enabled {
            return;
        }
        self.refresh_requests();
        self.stage.finish_and_clear();
        self.requests.finish_and_clear();
        if let Some(mp) = &self.mp {
            let _ = mp.println(format!("Done in {}", HumanDuration(self.start.elapsed())));
        }
    }

    fn set_label(&self, label: String) {
        if let Ok(mut last) = self.last_http_label.lock() {
            *last = label;
        }
    }

    fn refresh_requests(&self) {
        if !self.enabled {
            return;
        }

        let in_flight = self.http_in_flight.load(Ordering::Relaxed);
        let done = self.http_done.load(Ordering::Relaxed);
        let failed = self.http_failed.load(Ordering::Relaxed);
        let bytes = self.http_bytes.load(Ordering::Relaxed);
        let (get, post, patch, delete, other) = self.done_by_method.snapshot();

        let last = self
            .last_http_label
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        self.requests.set_message(format!(
            "HTTP: done {done} | failed {failed} | in-flight {in_flight}/{max} | {bytes} | GET {get} POST {post} PATCH {patch} DELETE {delete} other {other} | {last}",
            max = self.max_concurrency,
            bytes = HumanBytes(bytes),
        ));
    }
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}
