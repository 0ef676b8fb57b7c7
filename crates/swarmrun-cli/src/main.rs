//! SwarmRun CLI - Command line interface for the SwarmRun control plane.

use clap::{Parser, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("{status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// SwarmRun CLI - Control plane management tool
#[derive(Parser)]
#[command(name = "swarmrun")]
#[command(about = "CLI for the SwarmRun control plane", long_about = None)]
struct Cli {
    /// Control plane address
    #[arg(short, long, default_value = "http://127.0.0.1:7070")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new task
    Enqueue {
        /// Task payload as JSON
        #[arg(short, long)]
        payload: String,

        /// Per-attempt deadline in milliseconds
        #[arg(short, long)]
        deadline_ms: u64,

        /// Retry budget (queen default if omitted)
        #[arg(short, long)]
        max_retries: Option<u32>,
    },

    /// Get task status
    Status {
        /// Task ID
        id: String,
    },

    /// List the worker roster
    Workers,

    /// Dump the colony snapshot and counters
    Snapshot,

    /// Cancel a task
    Cancel {
        /// Task ID to cancel
        id: String,
    },

    /// Remove a worker, requeueing its task
    Deregister {
        /// Worker ID
        id: String,
    },
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: addr.trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut request = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Rejected { status, body: text });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new(&cli.addr);

    match cli.command {
        Commands::Enqueue {
            payload,
            deadline_ms,
            max_retries,
        } => {
            let payload: Value = serde_json::from_str(&payload).map_err(ClientError::from)?;
            let mut spec = json!({ "payload": payload, "deadline_ms": deadline_ms });
            if let Some(max_retries) = max_retries {
                spec["max_retries"] = json!(max_retries);
            }
            let response = client.call(Method::POST, "/v1/tasks", Some(spec)).await?;
            println!("Task enqueued: {}", field(&response, "task_id"));
        }
        Commands::Status { id } => {
            let task = client
                .call(Method::GET, &format!("/v1/tasks/{}", id), None)
                .await?;
            print_task(&task);
        }
        Commands::Workers => {
            let workers = client.call(Method::GET, "/v1/workers", None).await?;
            print_workers(&workers);
        }
        Commands::Snapshot => {
            let snapshot = client.call(Method::GET, "/v1/colony", None).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Cancel { id } => {
            let response = client
                .call(Method::POST, &format!("/v1/tasks/{}/cancel", id), None)
                .await?;
            println!("Task {} is now {}", id, field(&response, "task_status"));
        }
        Commands::Deregister { id } => {
            let response = client
                .call(Method::DELETE, &format!("/v1/workers/{}", id), None)
                .await?;
            match response.get("task_id").and_then(Value::as_str) {
                Some(task_id) => println!("Worker {} removed, task {} requeued", id, task_id),
                None => println!("Worker {} removed", id),
            }
        }
    }

    Ok(())
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn print_task(task: &Value) {
    println!("  ID:         {}", field(task, "task_id"));
    println!("  Status:     {}", field(task, "status"));
    println!("  Worker:     {}", field(task, "assigned_worker"));
    println!(
        "  Attempts:   {}/{}",
        task["attempt_count"],
        task["max_retries"].as_u64().map(|m| m + 1).unwrap_or(0)
    );
    println!("  Deadline:   {}ms", task["deadline_ms"]);
    println!("  Created:    {}", field(task, "created_at"));

    if let Some(error) = task.get("last_error").and_then(Value::as_str) {
        println!("  Last error: {} ({})", error, field(task, "last_failure"));
    }
    if let Some(output) = task.get("output").filter(|o| !o.is_null()) {
        println!("  Output:     {}", output);
    }
}

fn print_workers(workers: &Value) {
    let workers = workers.as_array().map(Vec::as_slice).unwrap_or_default();
    println!("Workers ({}):", workers.len());
    println!("{:<36}  {:<10}  {:<36}  {}", "ID", "STATUS", "TASK", "DONE");
    println!("{}", "-".repeat(96));

    for worker in workers {
        println!(
            "{:<36}  {:<10}  {:<36}  {}",
            field(worker, "worker_id"),
            field(worker, "status"),
            field(worker, "current_task"),
            worker["completed_tasks"],
        );
    }
}
