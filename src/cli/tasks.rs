//! `hearth tasks list|add|cancel` — a thin operator view over the Task
//! Store that doesn't require the HTTP server to be running; it opens its
//! own connection to the same database file.

use std::collections::HashMap;

use anyhow::Result;
use clap::Subcommand;
use hearth_core::config::ConfigManager;
use hearth_core::store::{Priority, TaskStatus, TaskStore, TaskType};

#[derive(Subcommand)]
pub enum TasksCommands {
    /// List tasks, optionally filtered by status.
    List {
        /// Filter by status: pending, running, done, failed, cancelled.
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Add a new task to the queue.
    Add {
        title: String,
        description: String,
        #[arg(long, default_value = "custom")]
        task_type: String,
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// Cancel a queued or running task.
    Cancel { id: i64 },
}

pub async fn run(command: TasksCommands) -> Result<()> {
    let config = ConfigManager::new().await?;
    let store = TaskStore::open(&ConfigManager::db_path()?).await?;

    match command {
        TasksCommands::List { status, limit } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose().map_err(anyhow::Error::msg)?;
            let tasks = store.get_all(status, limit).await?;
            if tasks.is_empty() {
                println!("no tasks.");
            }
            for task in tasks {
                println!(
                    "#{:<5} [{:<9}] {:<8} {}",
                    task.id,
                    task.status.to_string(),
                    task.priority.to_string(),
                    task.title
                );
            }
        }
        TasksCommands::Add { title, description, task_type, priority } => {
            let task_type = task_type.parse::<TaskType>().map_err(anyhow::Error::msg)?;
            let priority = priority.parse::<Priority>().map_err(anyhow::Error::msg)?;
            let max_retries = config.get_config().await.task_default_max_retries;
            let id = store
                .add(&title, &description, task_type, priority, None, Vec::new(), HashMap::new(), None, max_retries)
                .await?;
            println!("added task #{id}");
        }
        TasksCommands::Cancel { id } => {
            store.cancel(id, "cancelled via CLI").await?;
            println!("cancelled task #{id}");
        }
    }

    Ok(())
}
