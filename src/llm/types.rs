//! Tipos de dados para o endpoint de chat no estilo Ollama (`/api/chat`).

use serde::{Deserialize, Serialize};

/// Corpo da requisição de chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Sempre `false`: a resposta chega inteira em um único JSON.
    pub stream: bool,
    /// `"json"` força o modelo a responder com um objeto JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub options: ChatOptions,
}

/// Parâmetros de amostragem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            repetition_penalty: 1.05,
        }
    }
}

/// Uma mensagem da conversa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" ou "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Resposta do endpoint. Campos extras (`created_at`, contadores) são ignorados.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatResponse {
    /// Texto gerado, se houver.
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_ollama_shape() {
        let req = ChatRequest {
            model: "qwen3-8b:latest".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            stream: false,
            format: Some("json".into()),
            options: ChatOptions::default(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json["options"]["repetition_penalty"].as_f64().unwrap() > 1.0);
    }

    #[test]
    fn format_is_omitted_when_unset() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![],
            stream: false,
            format: None,
            options: ChatOptions::default(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("format").is_none());
    }

    #[test]
    fn response_tolerates_extra_fields() {
        let body = r#"{
            "model": "qwen3-8b:latest",
            "created_at": "2025-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "{\"status\":\"confirmed\"}"},
            "done": true,
            "eval_count": 12
        }"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(resp.done);
        assert_eq!(resp.content(), Some(r#"{"status":"confirmed"}"#));
    }

    #[test]
    fn blank_content_is_none() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": "  "}}"#)
                .unwrap();
        assert_eq!(resp.content(), None);
    }
}
