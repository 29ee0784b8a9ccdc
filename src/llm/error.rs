//! Tipos de erro para o cliente do modelo de linguagem.
//!
//! Define [`LlmError`] com variantes para rate limiting, erros HTTP,
//! respostas vazias e erros de rede. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o endpoint de chat.
#[derive(Debug, Error)]
pub enum LlmError {
    /// O servidor retornou HTTP 429.
    /// O campo `retry_after_ms` indica quanto esperar antes de retentar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status HTTP fora da faixa 2xx.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A resposta chegou sem `message.content`.
    #[error("empty response from model")]
    EmptyResponse,

    /// Falha de rede subjacente (DNS, conexão recusada, timeout) ou corpo inválido.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl LlmError {
    /// Falhas transitórias: 429, 5xx e erros de transporte.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::EmptyResponse => false,
            LlmError::NetworkError(e) => !e.is_decode() && !e.is_builder(),
        }
    }
}
