//! Interface de linha de comando do projeval baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] e as flags globais
//! `--config` e `--verbose`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use projeval::state_machine::{FileType, PipelineKind, ProjectId};

/// Avaliação de projetos: agrupamento de observações, verificação por
/// checklist e relatório final.
#[derive(Debug, Parser)]
#[command(name = "projeval", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `projeval.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (nível `debug`).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Grava um `projeval.toml` inicial e cria o banco e o diretório de objetos.
    Init {
        /// Sobrescreve um arquivo de configuração existente.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Operações sobre projetos.
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },

    /// Envia um arquivo ao projeto. Observações (`remarks`) disparam o
    /// processamento e a CLI aguarda a conclusão.
    Upload {
        id: ProjectId,
        path: PathBuf,

        #[arg(long = "type", value_enum)]
        file_type: UploadType,
    },

    /// Gera o relatório de verificação por checklist.
    Checklist { id: ProjectId },

    /// Gera o relatório final.
    FinalReport { id: ProjectId },

    /// Mostra o resultado mais recente de um processamento.
    Result { id: ProjectId, kind: ResultKind },

    /// Retoma projetos que ficaram presos em estado de processamento.
    Recover,
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    /// Cria um projeto.
    Create { name: String },
    /// Lista todos os projetos.
    List,
    /// Mostra um projeto e seus arquivos.
    Show { id: ProjectId },
}

/// Tipos de arquivo que o usuário pode enviar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UploadType {
    Documentation,
    Remarks,
    Checklist,
}

impl UploadType {
    pub fn file_type(self) -> FileType {
        match self {
            UploadType::Documentation => FileType::Documentation,
            UploadType::Remarks => FileType::Remarks,
            UploadType::Checklist => FileType::Checklist,
        }
    }
}

/// Resultado consultado por `result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResultKind {
    Checklist,
    Remarks,
    FinalReport,
}

impl ResultKind {
    pub fn pipeline(self) -> PipelineKind {
        match self {
            ResultKind::Checklist => PipelineKind::Checklist,
            ResultKind::Remarks => PipelineKind::Remarks,
            ResultKind::FinalReport => PipelineKind::FinalReport,
        }
    }
}
