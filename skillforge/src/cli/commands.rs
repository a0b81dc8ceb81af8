//! CLI command execution.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::config::Config;
use crate::history::{HistoryCache, HistoryEntry};
use crate::session::{Phase, SessionController, SessionOutcome};
use crate::stream::{Assessment, SessionUpdate};

use super::args::{Cli, Commands, HistoryAction};

pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_overrides(cli.api_base.as_deref(), cli.history.clone())
        .context("Invalid command-line override")?;

    match cli.command {
        Commands::Generate {
            template,
            no_history,
            description,
        } => {
            let description = description.join(" ");
            if description.trim().is_empty() {
                bail!("Description is required for generate command");
            }
            generate(&config, &description, template.as_deref(), !no_history).await
        }
        Commands::History { action } => run_history(&config, action),
        Commands::Scan { file } => scan_file(&config, &file).await,
        Commands::Health => health(&config).await,
    }
}

async fn generate(
    config: &Config,
    description: &str,
    template: Option<&str>,
    record: bool,
) -> Result<()> {
    let api = ApiClient::new(config)?;
    let mut controller = SessionController::new(api);
    if record {
        controller = controller.with_history(HistoryCache::load(&config.history_path));
    }

    let updates = controller.subscribe();
    let render = tokio::spawn(render_updates(updates));

    let canceller = controller.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let outcome = controller.start(description, template).await;
    interrupt.abort();

    let session = controller.session().clone();
    let committed = controller
        .committed_entry()
        .map(|e| (e.id.clone(), e.skill_name.clone()));
    // Dropping the controller closes the update channel so rendering can finish.
    drop(controller);
    render.await.context("Output task failed")?;
    println!();

    match outcome {
        SessionOutcome::Rejected => bail!("Description is required for generate command"),
        SessionOutcome::Cancelled => {
            eprintln!("Generation canceled.");
            return Ok(());
        }
        SessionOutcome::Finished => {}
    }

    if let Some(error) = session.last_error() {
        bail!("{error}");
    }

    if session.phase() != Phase::Done {
        bail!(
            "Stream ended before generation completed (last phase: {})",
            session.phase()
        );
    }

    let text = session.display_text();
    if text != session.accumulated_text() {
        println!("--- Final SKILL.md ---");
        println!("{text}");
    }

    if let Some(assessment) = session.assessment() {
        print_assessment(assessment);
    }

    if let Some((id, name)) = committed {
        println!("\nSaved {name} to history ({id})");
    }

    Ok(())
}

/// Stream tokens to stdout and phase changes to stderr.
async fn render_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    let mut stdout = std::io::stdout();
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Token(text) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            SessionUpdate::Phase(phase) if phase != Phase::Generating => {
                eprintln!("\n[{phase}]");
            }
            SessionUpdate::Validation {
                valid: false,
                retrying: true,
                error,
            } => {
                eprintln!(
                    "\n[validation failed, retrying: {}]",
                    error.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }
}

fn print_assessment(assessment: &Assessment) {
    println!();
    println!(
        "Risk: {} (score {}/100)",
        assessment.risk_level.as_str().to_uppercase(),
        assessment.score
    );

    if assessment.issues.is_empty() {
        println!("No issues found.");
    } else {
        println!("{:<10} {:<6} {}", "SEVERITY", "LINE", "MESSAGE");
        println!("{}", "-".repeat(60));
        for issue in &assessment.issues {
            let line = issue
                .line
                .map_or_else(|| "-".to_string(), |l| l.to_string());
            println!("{:<10} {:<6} {}", issue.severity.as_str(), line, issue.message);
        }
    }

    if !assessment.disclaimer.is_empty() {
        println!("\n{}", assessment.disclaimer);
    }
}

fn run_history(config: &Config, action: HistoryAction) -> Result<()> {
    let mut history = HistoryCache::load(&config.history_path);

    match action {
        HistoryAction::List => list_history(&history),
        HistoryAction::Show { id } => {
            let entry = resolve(&history, &id)?;
            show_entry(entry);
        }
        HistoryAction::Remove { id } => {
            let full_id = resolve(&history, &id)?.id.clone();
            history.remove(&full_id)?;
            println!("Removed {full_id}");
        }
        HistoryAction::Clear => {
            let count = history.len();
            history.clear()?;
            println!("Cleared {count} history entries.");
        }
    }
    Ok(())
}

fn resolve<'a>(history: &'a HistoryCache, id: &str) -> Result<&'a HistoryEntry> {
    history
        .find(id)
        .with_context(|| format!("No history entry matches '{id}'"))
}

fn list_history(history: &HistoryCache) {
    if history.is_empty() {
        println!("No history yet.");
        return;
    }

    println!(
        "{:<36} {:<24} {:<9} {:<5} {:<16} {}",
        "ID", "NAME", "RISK", "SCORE", "CREATED", "DESCRIPTION"
    );
    println!("{}", "-".repeat(120));

    for entry in history.entries() {
        println!(
            "{:<36} {:<24} {:<9} {:<5} {:<16} {}",
            entry.id,
            truncate(&entry.skill_name, 24),
            entry.risk_level.as_str(),
            entry.scan_score,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            truncate(&entry.description, 40),
        );
    }
}

fn show_entry(entry: &HistoryEntry) {
    println!("ID:          {}", entry.id);
    println!("Name:        {}", entry.skill_name);
    println!("Description: {}", entry.description);
    println!(
        "Created:     {}",
        entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("{}", entry.skill_md);

    if let Some(assessment) = &entry.scan_result {
        print_assessment(assessment);
    } else {
        println!("\nRisk: {} (score {}/100)", entry.risk_level, entry.scan_score);
    }
}

fn truncate(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() > max {
        let cut: String = single_line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        single_line
    }
}

async fn scan_file(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if content.trim().is_empty() {
        bail!("{} is empty", file.display());
    }

    let api = ApiClient::new(config)?;
    let assessment = api.scan(&content).await?;
    print_assessment(&assessment);
    Ok(())
}

async fn health(config: &Config) -> Result<()> {
    let api = ApiClient::new(config)?;
    let status = api.health().await?;
    println!("{}: {}", api.base(), status.status);
    Ok(())
}
