use std::io::Write;

use colored::Colorize;
use events::{Event, EventEnvelope, OutputStream};
use launcher_core::{PhaseStatus, ToolCheck};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Echo the event channel to the terminal until the bus closes.
pub fn spawn_printer(mut rx: broadcast::Receiver<EventEnvelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => print_event(&envelope.event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{}", format!("... {} events skipped", n).dimmed());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &Event) {
    match event {
        Event::Log { stream, chunk, .. } => {
            match stream {
                OutputStream::Stdout => print!("{}", chunk),
                OutputStream::Stderr => eprint!("{}", chunk),
                OutputStream::System => print!("{}", chunk.cyan()),
            }
            let _ = std::io::stdout().flush();
        }
        Event::PhaseStatusChanged {
            phase_id, to_status, ..
        } => println!("{} phase {} is {}", "●".bold(), phase_id, status_label(*to_status)),
        Event::DependencyCheck { checks } => print_checks(checks),
        Event::Advice {
            analysis,
            suggested_command,
            ..
        } => {
            println!("\n{}\n{}", "Advisor:".bold().magenta(), analysis);
            if let Some(command) = suggested_command {
                println!("{} {}", "Suggested command:".bold(), command.yellow());
            }
        }
        Event::Error { message, context } => match context {
            Some(context) => eprintln!("{} [{}] {}", "error:".red().bold(), context, message),
            None => eprintln!("{} {}", "error:".red().bold(), message),
        },
        Event::PhaseComplete { .. }
        | Event::PipelineStarted { .. }
        | Event::PipelineFinished { .. }
        | Event::LifecycleFinished { .. } => {}
    }
}

pub fn status_label(status: PhaseStatus) -> colored::ColoredString {
    match status {
        PhaseStatus::Pending => "pending".dimmed(),
        PhaseStatus::Running => "running".blue(),
        PhaseStatus::Success => "success".green(),
        PhaseStatus::Error => "error".red(),
    }
}

pub fn print_checks(checks: &[ToolCheck]) {
    for check in checks {
        if check.is_installed() {
            println!(
                "  {} {:<10} {}",
                "✓".green(),
                check.name,
                check.version.as_deref().unwrap_or("").dimmed()
            );
        } else {
            println!("  {} {:<10} {}", "✗".red(), check.name, "missing".red());
        }
    }
}
