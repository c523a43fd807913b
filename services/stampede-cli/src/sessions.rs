use anyhow::{Context, Result};
use stampede_core::StampedeConfig;
use stampede_engine::{ReportFormat, ResultWriter};
use stampede_storage::{FieldDifference, SessionStore};

use crate::SessionCommand;

pub async fn handle(settings: &StampedeConfig, command: SessionCommand) -> Result<()> {
    let mut store = SessionStore::open_local(&settings.sessions)
        .await
        .with_context(|| {
            format!(
                "failed to open session store at {}",
                settings.sessions.directory.display()
            )
        })?;

    match command {
        SessionCommand::List => {
            let sessions = store.list_sessions();
            if sessions.is_empty() {
                println!("No sessions stored in {}", settings.sessions.directory.display());
            }
            for s in sessions {
                let verdict = match (s.overall, s.score) {
                    (Some(overall), Some(score)) => format!("{overall} {score:.1}"),
                    _ => "no results".to_string(),
                };
                println!(
                    "{}  {:<30} {:<12} {:<16} {}",
                    s.id,
                    s.name,
                    s.environment,
                    verdict,
                    s.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        SessionCommand::Show { id } => {
            let session = store.load_session(id).await?;
            println!("Session {}", session.id);
            println!("  Name: {}", session.name);
            if !session.description.is_empty() {
                println!("  Description: {}", session.description);
            }
            println!("  Environment: {}", session.config.environment);
            println!("  Created: {}", session.created_at);
            println!("  Config hash: {}", session.metadata.config_hash);
            match &session.results {
                Some(results) => {
                    println!();
                    println!("{}", ResultWriter::new(results).render(ReportFormat::Markdown)?);
                }
                None => println!("  No results recorded"),
            }
        }

        SessionCommand::Delete { id } => {
            store.delete_session(id).await?;
            println!("🗑️  Deleted session {id}");
        }

        SessionCommand::Duplicate { id, name } => {
            let copy = store.duplicate_session(id, name.as_deref()).await?;
            println!("✅ Duplicated {id} as {copy}");
        }

        SessionCommand::Compare { a, b } => {
            let comparison = store.compare_sessions(a, b).await?;
            println!("{}", comparison.summary);
            print_differences("Configuration", &comparison.config_differences);
            print_differences("Results", &comparison.results_differences);
        }

        SessionCommand::Search { query } => {
            let hits = store.search_sessions(&query);
            if hits.is_empty() {
                println!("No sessions match '{query}'");
            }
            for hit in hits {
                println!(
                    "{:>3}  {}  {} ({})",
                    hit.relevance, hit.session.id, hit.session.name, hit.session.environment
                );
            }
        }

        SessionCommand::Export { id, format, output } => {
            let exported = store.export_session(id, format).await?;
            crate::emit(&exported, output.as_deref())?;
        }

        SessionCommand::Import { file, format } => {
            let data = crate::read(&file)?;
            let id = store.import_session(&data, format).await?;
            println!("📥 Imported {} as session {}", file.display(), id);
        }

        SessionCommand::Stats => {
            let stats = store.stats();
            println!("Sessions: {} ({} with results)", stats.total_sessions, stats.sessions_with_results);
            println!(
                "Size: {} bytes total, {} bytes average",
                stats.total_size_bytes, stats.average_size_bytes
            );
            if let (Some(oldest), Some(newest)) = (stats.oldest_session, stats.newest_session) {
                println!("Created: {oldest} .. {newest}");
            }
            for (environment, count) in &stats.by_environment {
                println!("  {environment}: {count}");
            }
        }
    }

    Ok(())
}

fn print_differences(title: &str, differences: &[FieldDifference]) {
    if differences.is_empty() {
        return;
    }
    println!("\n{title}:");
    for d in differences {
        println!("  {}: {} -> {}", d.path, d.a, d.b);
    }
}
