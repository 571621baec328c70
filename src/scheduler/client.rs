use super::error::ApiError;
use super::wire::{
    Envelope, JobCommand, JobSummary, LogEnd, LogStream, NewTask, SchedulerJob, TaskField,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The scheduler's HTTP contract. Everything the console persists goes
/// through here.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    async fn fetch_job(&self, job_name: &str) -> ApiResult<SchedulerJob>;
    async fn list_jobs(&self) -> ApiResult<Vec<JobSummary>>;
    async fn add_task(&self, job_name: &str, task: &NewTask) -> ApiResult<()>;
    async fn delete_task(&self, job_name: &str, task_name: &str) -> ApiResult<()>;
    async fn add_dependency(&self, job_name: &str, from: &str, to: &str) -> ApiResult<()>;
    async fn delete_dependency(&self, job_name: &str, from: &str, to: &str) -> ApiResult<()>;
    async fn edit_task(&self, job_name: &str, task_name: &str, field: &TaskField)
        -> ApiResult<()>;
    async fn edit_job(&self, job_name: &str, new_name: &str) -> ApiResult<()>;
    async fn schedule_job(&self, job_name: &str, cron_schedule: &str) -> ApiResult<()>;
    async fn run_command(&self, job_name: &str, command: JobCommand) -> ApiResult<()>;
    async fn task_log(
        &self,
        job_name: &str,
        task_name: &str,
        end: LogEnd,
        stream: LogStream,
        num_lines: u32,
    ) -> ApiResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct HttpSchedulerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpSchedulerClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(HttpSchedulerClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Reads are idempotent, so a transport failure earns exactly one retry.
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        match self.get_once(path, query).await {
            Err(e) if e.is_transient() => {
                warn!(path, ?e, "read failed, retrying once");
                self.get_once(path, query).await
            }
            res => res,
        }
    }

    async fn get_once<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        debug!(path, "GET scheduler");
        let resp = self
            .http_client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::from_reqwest(path, e))?;

        let envelope = resp
            .json::<Envelope<T>>()
            .await
            .map_err(|e| ApiError::from_reqwest(path, e))?;
        Ok(envelope.result)
    }

    /// Mutations are never retried; the user re-triggers them.
    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> ApiResult<()> {
        debug!(path, "POST scheduler");
        let resp = self
            .http_client
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::from_reqwest(path, e))?;

        resp.json::<Envelope<serde_json::Value>>()
            .await
            .map_err(|e| ApiError::from_reqwest(path, e))?;
        Ok(())
    }
}

#[async_trait]
impl SchedulerApi for HttpSchedulerClient {
    async fn fetch_job(&self, job_name: &str) -> ApiResult<SchedulerJob> {
        self.get_json("job", &[("job_name", job_name.to_string())])
            .await
    }

    async fn list_jobs(&self) -> ApiResult<Vec<JobSummary>> {
        let no_query: [(&str, String); 0] = [];
        self.get_json("jobs", &no_query).await
    }

    async fn add_task(&self, job_name: &str, task: &NewTask) -> ApiResult<()> {
        let mut form = vec![
            ("job_name", job_name.to_string()),
            ("task_name", task.name.clone()),
            ("task_command", task.command.clone()),
        ];
        if let Some(target) = &task.target {
            form.push(("task_target", target.hostname.clone()));
            if let Some(key) = &target.key {
                form.push(("task_target_key", key.clone()));
            }
            if let Some(password) = &target.password {
                form.push(("task_target_password", password.clone()));
            }
        }
        self.post_form("add_task_to_job", &form).await
    }

    async fn delete_task(&self, job_name: &str, task_name: &str) -> ApiResult<()> {
        self.post_form(
            "delete_task",
            &[
                ("job_name", job_name.to_string()),
                ("task_name", task_name.to_string()),
            ],
        )
        .await
    }

    async fn add_dependency(&self, job_name: &str, from: &str, to: &str) -> ApiResult<()> {
        self.post_form("add_dependency", &dependency_form(job_name, from, to))
            .await
    }

    async fn delete_dependency(&self, job_name: &str, from: &str, to: &str) -> ApiResult<()> {
        self.post_form("delete_dependency", &dependency_form(job_name, from, to))
            .await
    }

    async fn edit_task(
        &self,
        job_name: &str,
        task_name: &str,
        field: &TaskField,
    ) -> ApiResult<()> {
        let (key, value) = field.form_pair();
        self.post_form(
            "edit_task",
            &[
                ("job_name", job_name.to_string()),
                ("task_name", task_name.to_string()),
                (key, value),
            ],
        )
        .await
    }

    async fn edit_job(&self, job_name: &str, new_name: &str) -> ApiResult<()> {
        self.post_form(
            "edit_job",
            &[
                ("job_name", job_name.to_string()),
                ("name", new_name.to_string()),
            ],
        )
        .await
    }

    async fn schedule_job(&self, job_name: &str, cron_schedule: &str) -> ApiResult<()> {
        self.post_form(
            "schedule_job",
            &[
                ("job_name", job_name.to_string()),
                ("cron_schedule", cron_schedule.to_string()),
            ],
        )
        .await
    }

    async fn run_command(&self, job_name: &str, command: JobCommand) -> ApiResult<()> {
        self.post_form(command.path(), &[("job_name", job_name.to_string())])
            .await
    }

    async fn task_log(
        &self,
        job_name: &str,
        task_name: &str,
        end: LogEnd,
        stream: LogStream,
        num_lines: u32,
    ) -> ApiResult<Vec<String>> {
        let path = match end {
            LogEnd::Head => "head",
            LogEnd::Tail => "tail",
        };
        self.get_json(
            path,
            &[
                ("job_name", job_name.to_string()),
                ("task_name", task_name.to_string()),
                ("stream", stream.as_str().to_string()),
                ("num_lines", num_lines.to_string()),
            ],
        )
        .await
    }
}

fn dependency_form(job_name: &str, from: &str, to: &str) -> [(&'static str, String); 3] {
    [
        ("job_name", job_name.to_string()),
        ("from_task_name", from.to_string()),
        ("to_task_name", to.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::wire::{RemoteTarget, RunStatus};
    use axum::{
        extract::{Form, Query, State},
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[derive(Default)]
    struct Seen {
        job: AtomicUsize,
        jobs: AtomicUsize,
        start: AtomicUsize,
        forms: Mutex<Vec<HashMap<String, String>>>,
        queries: Mutex<Vec<HashMap<String, String>>>,
    }

    async fn failing_job(State(seen): State<Arc<Seen>>) -> (StatusCode, &'static str) {
        seen.job.fetch_add(1, Ordering::SeqCst);
        (StatusCode::INTERNAL_SERVER_ERROR, "boom")
    }

    async fn slow_once_jobs(State(seen): State<Arc<Seen>>) -> Json<Value> {
        if seen.jobs.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(TIMEOUT * 3).await;
        }
        Json(json!({ "result": [{ "name": "nightly", "status": "running" }] }))
    }

    async fn slow_start(State(seen): State<Arc<Seen>>) -> Json<Value> {
        seen.start.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(TIMEOUT * 3).await;
        Json(json!({ "result": null }))
    }

    async fn record_form(
        State(seen): State<Arc<Seen>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<Value> {
        seen.forms.lock().unwrap().push(form);
        Json(json!({ "result": null }))
    }

    async fn rejected() -> (StatusCode, Json<Value>) {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "no such task" })))
    }

    async fn not_json() -> &'static str {
        "<html>maintenance</html>"
    }

    async fn tail(
        State(seen): State<Arc<Seen>>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        seen.queries.lock().unwrap().push(query);
        Json(json!({ "result": ["one", "two"] }))
    }

    async fn scheduler() -> (HttpSchedulerClient, Arc<Seen>) {
        let seen = Arc::new(Seen::default());
        let app = Router::new()
            .route("/api/job", get(failing_job))
            .route("/api/jobs", get(slow_once_jobs))
            .route("/api/start_job", post(slow_start))
            .route("/api/add_dependency", post(record_form))
            .route("/api/add_task_to_job", post(record_form))
            .route("/api/edit_task", post(record_form))
            .route("/api/delete_task", post(rejected))
            .route("/api/edit_job", post(not_json))
            .route("/api/tail", get(tail))
            .with_state(seen.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));

        let client = HttpSchedulerClient::new(&format!("http://{}/", addr), TIMEOUT).unwrap();
        (client, seen)
    }

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn mutations_send_form_fields_and_accept_null_result() {
        let (client, seen) = scheduler().await;

        client.add_dependency("nightly", "A", "B").await.unwrap();
        let task = NewTask {
            name: "C".to_string(),
            command: "make".to_string(),
            target: Some(RemoteTarget {
                hostname: "build01".to_string(),
                key: None,
                password: Some("hunter2".to_string()),
            }),
        };
        client.add_task("nightly", &task).await.unwrap();
        client
            .edit_task("nightly", "C", &TaskField::SoftTimeout(30))
            .await
            .unwrap();

        let forms = seen.forms.lock().unwrap().clone();
        assert_eq!(
            forms,
            vec![
                form(&[
                    ("job_name", "nightly"),
                    ("from_task_name", "A"),
                    ("to_task_name", "B"),
                ]),
                form(&[
                    ("job_name", "nightly"),
                    ("task_name", "C"),
                    ("task_command", "make"),
                    ("task_target", "build01"),
                    ("task_target_password", "hunter2"),
                ]),
                form(&[
                    ("job_name", "nightly"),
                    ("task_name", "C"),
                    ("soft_timeout", "30"),
                ]),
            ]
        );
    }

    #[tokio::test]
    async fn error_status_and_bad_payloads_fail() {
        let (client, _seen) = scheduler().await;

        assert!(matches!(
            client.delete_task("nightly", "A").await,
            Err(ApiError::Status { status: 400, .. })
        ));
        assert!(matches!(
            client.edit_job("nightly", "weekly").await,
            Err(ApiError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn status_errors_are_not_retried() {
        let (client, seen) = scheduler().await;

        assert!(matches!(
            client.fetch_job("nightly").await,
            Err(ApiError::Status { status: 500, .. })
        ));
        assert_eq!(seen.job.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reads_retry_once_after_a_timeout() {
        let (client, seen) = scheduler().await;

        let jobs = client.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, RunStatus::Running);
        assert_eq!(seen.jobs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mutations_are_never_retried() {
        let (client, seen) = scheduler().await;

        let res = client.run_command("nightly", JobCommand::Start).await;
        assert!(matches!(res, Err(ApiError::Timeout(_))));
        assert!(res.unwrap_err().is_transient());
        assert_eq!(seen.start.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn log_reads_pass_their_selectors() {
        let (client, seen) = scheduler().await;

        let lines = client
            .task_log("nightly", "A", LogEnd::Tail, LogStream::Stderr, 5)
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(
            seen.queries.lock().unwrap()[0],
            form(&[
                ("job_name", "nightly"),
                ("task_name", "A"),
                ("stream", "stderr"),
                ("num_lines", "5"),
            ])
        );
    }
}
