mod cli;
mod ui;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command, ProjectCommand, ResultKind};
use console::Style;
use projeval::app::App;
use projeval::config::{CONFIG_TEMPLATE, Config, DEFAULT_CONFIG_FILE};
use projeval::error::EvalError;
use projeval::logging;
use projeval::state_machine::{Project, ProjectId};
use ui::PipelineProgress;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let red = Style::new().red().bold();
            match e.downcast_ref::<EvalError>() {
                Some(eval) => eprintln!("{} [{}] {e:#}", red.apply_to("error:"), eval.kind()),
                None => eprintln!("{} {e:#}", red.apply_to("error:")),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Init { force } = &cli.command {
        let path = cli.config.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        write_template(path, *force)?;
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".into();
    }
    logging::init(&config.logging);

    let app = App::new(&config).await?;
    match cli.command {
        Command::Init { .. } => {
            println!(
                "database at {}, objects under {}",
                config.database.path.display(),
                config.storage.root.display()
            );
        }
        Command::Project { action } => project_command(&app, action).await?,
        Command::Upload {
            id,
            path,
            file_type,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("path has no file name")?;

            app.start()?;
            let failed_before = app.service().task_stats().failed;
            let outcome = async {
                let receipt = app
                    .service()
                    .upload_project_file(id, file_type.file_type().as_str(), &name, bytes)
                    .await?;
                println!(
                    "stored {} as file #{} ({} bytes)",
                    receipt.file.original_name, receipt.file.id, receipt.file.file_size
                );
                if receipt.processing {
                    wait_for_ready(&app, id, failed_before).await?;
                }
                Ok::<_, anyhow::Error>(())
            }
            .await;
            app.shutdown().await;
            outcome?;
        }
        Command::Checklist { id } => {
            app.start()?;
            let failed_before = app.service().task_stats().failed;
            let outcome = async {
                app.service().generate_checklist(id).await?;
                wait_for_ready(&app, id, failed_before).await?;
                let report = app.service().get_checklist(id).await?;
                ui::print_checklist(&report);
                Ok::<_, anyhow::Error>(())
            }
            .await;
            app.shutdown().await;
            outcome?;
        }
        Command::FinalReport { id } => {
            app.start()?;
            let failed_before = app.service().task_stats().failed;
            let outcome = async {
                app.service().generate_final_report(id).await?;
                wait_for_ready(&app, id, failed_before).await?;
                let artifact = app.service().get_final_report(id).await?;
                println!("final report: {}", artifact.url);
                Ok::<_, anyhow::Error>(())
            }
            .await;
            app.shutdown().await;
            outcome?;
        }
        Command::Result { id, kind } => match kind {
            ResultKind::Checklist => ui::print_checklist(&app.service().get_checklist(id).await?),
            ResultKind::Remarks => {
                let artifact = app.service().get_remarks_clustered(id).await?;
                println!("{}: {}", artifact.file.original_name, artifact.url);
            }
            ResultKind::FinalReport => {
                let artifact = app.service().get_final_report(id).await?;
                println!("{}: {}", artifact.file.original_name, artifact.url);
            }
        },
        Command::Recover => {
            app.start()?;
            let outcome = recover(&app).await;
            app.shutdown().await;
            outcome?;
        }
    }
    Ok(())
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("{} already exists, keeping it", path.display());
        return Ok(());
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("cannot write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn project_command(app: &App, action: ProjectCommand) -> Result<()> {
    match action {
        ProjectCommand::Create { name } => {
            let project = app.service().create_project(&name).await?;
            ui::print_project(&project);
        }
        ProjectCommand::List => {
            for project in app.service().list_projects().await? {
                ui::print_project(&project);
            }
        }
        ProjectCommand::Show { id } => {
            let project = app.service().get_project(id).await?;
            ui::print_project(&project);
            ui::print_files(&app.service().list_files(id, None).await?);
        }
    }
    Ok(())
}

/// Waits for one submitted pipeline. A task failure shows up as the failed
/// counter rising above `failed_before`, taken before submission.
async fn wait_for_ready(app: &App, id: ProjectId, failed_before: u64) -> Result<Project> {
    let progress = PipelineProgress::start(&app.service().get_project(id).await?);
    let project = app.wait_idle(id, POLL_INTERVAL, |p| progress.update(p)).await?;
    if app.service().task_stats().failed > failed_before {
        progress.complete(&project, Some("see the log for details"));
        bail!("processing of project {id} failed");
    }
    progress.complete(&project, None);
    Ok(project)
}

async fn recover(app: &App) -> Result<()> {
    let progress = PipelineProgress::waiting("recovering stuck projects");
    let summary = app.recover(POLL_INTERVAL, |p| progress.update(p)).await?;
    progress.finish(&format!("{} project(s) resubmitted", summary.queued));
    if summary.failed > 0 {
        bail!("{} recovered project(s) failed", summary.failed);
    }
    Ok(())
}
