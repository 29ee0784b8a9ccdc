//! Interface de terminal do projeval: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner de progresso e `console` para cores.
//! O [`PipelineProgress`] acompanha um processamento em segundo plano até
//! o projeto voltar ao estado `ready`.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use projeval::rag::{ChecklistReport, ChecklistStatus};
use projeval::state_machine::{Project, ProjectFile, ProjectStatus};

/// Indicador visual de um processamento em andamento.
pub struct PipelineProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl PipelineProgress {
    /// Inicia o spinner para o projeto informado.
    pub fn start(project: &Project) -> Self {
        Self::waiting(&format!("{}: {}", project.name, project.status))
    }

    /// Inicia o spinner com uma mensagem livre.
    pub fn waiting(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn update(&self, project: &Project) {
        self.pb
            .set_message(format!("{}: {}", project.name, project.status));
    }

    /// Finaliza o spinner com uma mensagem de sucesso.
    pub fn finish(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    /// Finaliza o spinner. `error` traz a falha da última tarefa, se houver.
    pub fn complete(&self, project: &Project, error: Option<&str>) {
        self.pb.finish_and_clear();
        match error {
            None => println!(
                "  {} Project {} is {}",
                self.green.apply_to("✓"),
                project.id,
                project.status
            ),
            Some(reason) => println!(
                "  {} Processing of project {} failed: {reason}",
                self.red.apply_to("✗"),
                project.id
            ),
        }
    }
}

fn status_style(status: ProjectStatus) -> Style {
    if status.is_busy() {
        Style::new().yellow()
    } else {
        Style::new().green()
    }
}

pub fn print_project(project: &Project) {
    println!(
        "{:>5}  {:<40}  {}  {}",
        project.id,
        project.name,
        status_style(project.status).apply_to(project.status),
        project.created_at.format("%Y-%m-%d %H:%M")
    );
}

pub fn print_files(files: &[ProjectFile]) {
    if files.is_empty() {
        println!("  (no files)");
        return;
    }
    for file in files {
        println!(
            "  #{:<4} {:<18} {:>10} B  {}",
            file.id, file.file_type.as_str(), file.file_size, file.original_name
        );
    }
}

/// Imprime o resultado do checklist com o status de cada critério colorido.
pub fn print_checklist(report: &ChecklistReport) {
    let bold = Style::new().bold();
    println!(
        "{}",
        bold.apply_to(format!(
            "─── Checklist: {} ({}) ───",
            report.project_name,
            report.generated_at.format("%Y-%m-%d %H:%M")
        ))
    );
    for item in &report.results {
        let style = match item.status {
            ChecklistStatus::Confirmed => Style::new().green(),
            ChecklistStatus::NotFound => Style::new().red(),
            _ => Style::new().yellow(),
        };
        println!("{} {}", style.apply_to(format!("[{}]", item.status.as_str())), item.criterion);
        println!("    {}", item.answer);
        for source in &item.sources {
            println!("    ↳ {} #{}: {}", source.filename, source.page, source.snippet);
        }
    }
}
