//! Scheduling tools exposed to the model.
//!
//! An in-process adapter, one instance per (user, role), that lets the
//! model create, list, and cancel scheduled jobs for its own principal.
//! Recurring schedules are validated here, at creation, and stored as cron
//! expressions.

use chrono::Utc;
use serde_json::{Value, json};

use tandem_adapters::{InProcessAdapter, ToolDescriptor};
use tandem_store::JobStore;

use crate::schedule::next_run_timestamp;

fn tool(name: &str, description: &str, schema: Value) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: description.into(),
        input_schema: schema,
        provider_key: "scheduler".into(),
        requires_detailed_schema: false,
    }
}

/// Build the scheduler adapter for one (user, role) principal.
pub fn scheduler_adapter(
    jobs: JobStore,
    user_id: String,
    role_id: Option<String>,
) -> InProcessAdapter {
    let schedule_jobs = jobs.clone();
    let schedule_user = user_id.clone();
    let schedule_role = role_id.clone();

    let list_jobs = jobs.clone();
    let list_user = user_id.clone();

    let cancel_jobs = jobs;
    let cancel_user = user_id;

    InProcessAdapter::builder("scheduler")
        .tool(
            tool(
                "schedule_task",
                "Schedule a task to run later: once at a unix timestamp, or \
                 recurring on a cron expression",
                json!({
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "What to do when the task runs, as a prompt"
                        },
                        "run_at": {
                            "type": "integer",
                            "description": "Unix timestamp for a one-shot task"
                        },
                        "schedule": {
                            "type": "string",
                            "description": "Cron expression (5 or 6 fields) for a recurring task"
                        }
                    },
                    "required": ["description"]
                }),
            ),
            Box::new(move |args| {
                let jobs = schedule_jobs.clone();
                let user_id = schedule_user.clone();
                let role_id = schedule_role.clone();
                Box::pin(async move {
                    let description = args
                        .get("description")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "missing `description`".to_string())?;

                    if let Some(expr) = args.get("schedule").and_then(Value::as_str) {
                        let first_run = next_run_timestamp(expr, Utc::now().timestamp())
                            .map_err(|e| e.to_string())?;
                        let job = jobs
                            .create_recurring(
                                &user_id,
                                role_id.as_deref(),
                                description,
                                expr,
                                first_run,
                            )
                            .await
                            .map_err(|e| e.to_string())?;
                        return Ok(json!({
                            "type": "text",
                            "text": format!(
                                "Scheduled recurring task {} ({}), next run at {}",
                                job.id, expr, first_run
                            )
                        }));
                    }

                    let run_at = args
                        .get("run_at")
                        .and_then(Value::as_i64)
                        .unwrap_or_else(|| Utc::now().timestamp());
                    let job = jobs
                        .create_once(&user_id, role_id.as_deref(), description, run_at)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(json!({
                        "type": "text",
                        "text": format!("Scheduled one-shot task {} for {}", job.id, run_at)
                    }))
                })
            }),
        )
        .tool(
            tool(
                "list_scheduled_tasks",
                "List this user's scheduled tasks and their status",
                json!({"type": "object", "properties": {}}),
            ),
            Box::new(move |_args| {
                let jobs = list_jobs.clone();
                let user_id = list_user.clone();
                Box::pin(async move {
                    let all = jobs
                        .list_for_user(&user_id)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(json!({ "type": "text", "text": json!(all).to_string() }))
                })
            }),
        )
        .tool(
            tool(
                "cancel_scheduled_task",
                "Cancel a pending or failed scheduled task by id",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "required": ["id"]
                }),
            ),
            Box::new(move |args| {
                let jobs = cancel_jobs.clone();
                let user_id = cancel_user.clone();
                Box::pin(async move {
                    let id = args
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "missing `id`".to_string())?;
                    jobs.cancel(id, &user_id)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(json!({ "type": "text", "text": format!("Cancelled task {id}") }))
                })
            }),
        )
        .build()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
