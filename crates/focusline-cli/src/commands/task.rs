//! Task management commands for CLI.

use std::error::Error;

use chrono::NaiveDate;
use clap::Subcommand;
use focusline_core::{
    CoreError, Entity, OptimisticMutationEngine, Priority, RecordId, Task, TaskPatch,
};

use super::{print_json, settle};
use crate::app::App;

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Add {
        /// Task title
        title: String,
        /// Task description
        #[arg(long)]
        description: Option<String>,
        /// Free-form category
        #[arg(long)]
        category: Option<String>,
        /// Priority: low, medium or high
        #[arg(long)]
        priority: Option<Priority>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// List tasks, newest first
    List {
        /// Only tasks not yet completed
        #[arg(long)]
        open: bool,
        /// Skip refreshing from the remote store
        #[arg(long)]
        offline: bool,
    },
    /// Update a task
    Update {
        /// Task ID (local_… or remote)
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New description
        #[arg(long)]
        description: Option<String>,
        /// New category
        #[arg(long)]
        category: Option<String>,
        /// New priority
        #[arg(long)]
        priority: Option<Priority>,
        /// New due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Raw JSON patch, e.g. '{"description": null}'
        #[arg(long, conflicts_with_all = ["title", "description", "category", "priority", "due"])]
        patch: Option<String>,
    },
    /// Mark a task completed
    Done {
        /// Task ID
        id: String,
    },
    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },
    /// Push local-only tasks to the remote store
    Sync,
}

pub async fn run(action: TaskAction, app: &App) -> Result<(), Box<dyn Error>> {
    let tasks = app.collection::<Task>()?;
    match action {
        TaskAction::Add {
            title,
            description,
            category,
            priority,
            due,
        } => {
            let task = Task {
                title,
                description,
                category,
                priority,
                completed: false,
                due_date: due,
            };
            let record = tasks.create(task).await?;
            print_json(&record)?;
        }
        TaskAction::List { open, offline } => {
            if !offline {
                tasks.refresh(false).await;
            }
            let mut view = tasks.view();
            if open {
                view.records.retain(|record| !record.fields.completed);
            }
            print_json(&view)?;
        }
        TaskAction::Update {
            id,
            title,
            description,
            category,
            priority,
            due,
            patch,
        } => {
            let patch = match patch {
                Some(raw) => Task::parse_patch(serde_json::from_str(&raw)?)?,
                None => TaskPatch {
                    title,
                    description: description.map(Some),
                    category: category.map(Some),
                    priority: priority.map(Some),
                    completed: None,
                    due_date: due.map(Some),
                },
            };
            apply(&tasks, &id, patch).await?;
        }
        TaskAction::Done { id } => {
            let patch = TaskPatch {
                completed: Some(true),
                ..Default::default()
            };
            apply(&tasks, &id, patch).await?;
        }
        TaskAction::Delete { id } => {
            let id = RecordId::parse(&id);
            if !id.is_local() {
                tasks.refresh(false).await;
            }
            settle(tasks.delete(&id)?).await;
            println!("deleted {id}");
        }
        TaskAction::Sync => {
            let report = tasks.sync_local_only().await;
            print_json(&report)?;
        }
    }
    Ok(())
}

async fn apply(
    tasks: &OptimisticMutationEngine<Task>,
    id: &str,
    patch: TaskPatch,
) -> Result<(), Box<dyn Error>> {
    let id = RecordId::parse(id);
    if !id.is_local() {
        // Fill the remote shadow so the edit is validated and echoed.
        tasks.refresh(false).await;
    }
    settle(tasks.update(&id, patch)?).await;
    let record = tasks
        .get(&id)
        .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))?;
    print_json(&record)?;
    Ok(())
}
