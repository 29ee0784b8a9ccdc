use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::checklist::{ChecklistItem, ChecklistStatus, Source};
use super::chunk::DocumentChunk;
use crate::llm::{ChatCompleter, ChatMessage};

pub const NOT_FOUND_ANSWER: &str = "Не найдено релевантных документов.";

const SYSTEM_PROMPT: &str = "Ты помощник-эксперт по проверке проектной документации. \
Отвечай только на русском языке и только JSON-объектом.";

/// Tokens at least this long also match through their stem.
const STEM_MIN_TOKEN_CHARS: usize = 6;
const STEM_DROP_CHARS: usize = 3;
const STEM_MIN_CHARS: usize = 4;

struct QueryToken {
    word: String,
    stem: Option<String>,
}

impl QueryToken {
    fn matches(&self, haystack: &str) -> bool {
        haystack.contains(&self.word)
            || self
                .stem
                .as_deref()
                .is_some_and(|stem| haystack.contains(stem))
    }
}

/// Lowercased whitespace tokens with surrounding punctuation trimmed.
fn query_tokens(criterion: &str) -> Vec<QueryToken> {
    criterion
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(|word| {
            let len = word.chars().count();
            let stem = (len >= STEM_MIN_TOKEN_CHARS).then(|| {
                let keep = (len - STEM_DROP_CHARS).max(STEM_MIN_CHARS);
                word.chars().take(keep).collect()
            });
            QueryToken {
                word: word.to_string(),
                stem,
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    status: String,
    #[serde(default)]
    answer: serde_json::Value,
}

/// Reads `{status, answer}` from a reply that is either bare JSON or has
/// one JSON object embedded in surrounding text.
fn parse_verdict(reply: &str) -> Result<(ChecklistStatus, String), serde_json::Error> {
    let verdict: Verdict = match serde_json::from_str(reply.trim()) {
        Ok(v) => v,
        Err(e) => match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&reply[start..=end])?,
            _ => return Err(e),
        },
    };
    let status = ChecklistStatus::parse_lenient(&verdict.status)
        .unwrap_or(ChecklistStatus::RequiresConfirmation);
    let answer = match verdict.answer {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    Ok((status, answer))
}

/// Keyword retrieval plus one model call per criterion.
pub struct AnswerEngine {
    completer: Arc<dyn ChatCompleter>,
    top_k: usize,
    request_delay: Duration,
}

impl AnswerEngine {
    pub fn new(completer: Arc<dyn ChatCompleter>, top_k: usize, request_delay: Duration) -> Self {
        Self {
            completer,
            top_k,
            request_delay,
        }
    }

    /// Chunks sharing at least one token with `criterion`, best first,
    /// at most `top_k`. Ties keep corpus order.
    pub fn rank<'a>(&self, criterion: &str, corpus: &'a [DocumentChunk]) -> Vec<&'a DocumentChunk> {
        let tokens = query_tokens(criterion);
        let mut scored: Vec<(usize, &DocumentChunk)> = corpus
            .iter()
            .map(|chunk| {
                let haystack = chunk.content.to_lowercase();
                let score = tokens.iter().filter(|t| t.matches(&haystack)).count();
                (score, chunk)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(self.top_k).map(|(_, c)| c).collect()
    }

    fn build_prompt(criterion: &str, chunks: &[&DocumentChunk]) -> String {
        let mut context = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let _ = writeln!(context, "[ИСТОЧНИК {}: {}]", i + 1, chunk.filename());
            let _ = writeln!(context, "{}\n", chunk.content);
        }
        format!(
            "Проанализируй КОНТЕКСТ и ответь на ВОПРОС.\n\n\
             КОНТЕКСТ:\n---\n{context}---\n\n\
             ВОПРОС: \"{criterion}\"\n\n\
             Верни только JSON-объект вида:\n\
             {{\n  \"status\": \"confirmed | not_found | partial | indirect | requires_confirmation\",\n  \
             \"answer\": \"развёрнутый ответ по контексту со ссылками вида [ИСТОЧНИК N]\"\n}}"
        )
    }

    /// Answers one criterion. Never fails: transport and parse problems
    /// become `requires_confirmation` with the reason in the answer.
    pub async fn answer(&self, criterion: &str, corpus: &[DocumentChunk]) -> ChecklistItem {
        let selected = self.rank(criterion, corpus);
        if selected.is_empty() {
            debug!(criterion, "no matching chunks");
            return ChecklistItem {
                criterion: criterion.to_string(),
                status: ChecklistStatus::NotFound,
                answer: NOT_FOUND_ANSWER.to_string(),
                sources: Vec::new(),
            };
        }

        let sources = selected
            .iter()
            .map(|chunk| Source {
                filename: chunk.filename().to_string(),
                page: chunk.page().unwrap_or(chunk.chunk_id()).to_string(),
                snippet: chunk.content.clone(),
            })
            .collect();

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::build_prompt(criterion, &selected)),
        ];

        let (status, answer) = match self.completer.complete(messages).await {
            Ok(reply) => match parse_verdict(&reply) {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(criterion, error = %e, "unparseable model reply");
                    (
                        ChecklistStatus::RequiresConfirmation,
                        format!("Ошибка разбора ответа модели: {e}. Ответ: {reply}"),
                    )
                }
            },
            Err(e) => {
                warn!(criterion, error = %e, "model call failed");
                (
                    ChecklistStatus::RequiresConfirmation,
                    format!("Ошибка при обращении к модели: {e}"),
                )
            }
        };

        ChecklistItem {
            criterion: criterion.to_string(),
            status,
            answer,
            sources,
        }
    }

    /// Answers every criterion in order, pausing between model calls.
    ///
    /// Returns `None` if `cancel` fires before all criteria are answered.
    pub async fn answer_all(
        &self,
        criteria: &[String],
        corpus: &[DocumentChunk],
        cancel: &CancellationToken,
    ) -> Option<Vec<ChecklistItem>> {
        let mut items = Vec::with_capacity(criteria.len());
        for (i, criterion) in criteria.iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }
            if i > 0 && !self.request_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.request_delay) => {}
                }
            }
            items.push(self.answer(criterion, corpus).await);
        }
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::split_into_chunks;
    use crate::test_support::ScriptedModel;

    fn engine(model: &Arc<ScriptedModel>, top_k: usize) -> AnswerEngine {
        AnswerEngine::new(model.clone(), top_k, Duration::ZERO)
    }

    #[test]
    fn tokens_trim_punctuation_and_stem() {
        let tokens = query_tokens("Наличие «технического» задания, ок?");
        let words: Vec<&str> = tokens.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, vec!["наличие", "технического", "задания", "ок"]);
        assert_eq!(tokens[1].stem.as_deref(), Some("техническ"));
        assert_eq!(tokens[2].stem.as_deref(), Some("зада"));
        assert!(tokens[3].stem.is_none());
    }

    #[test]
    fn ranking_prefers_more_overlap() {
        let model = Arc::new(ScriptedModel::always("{}"));
        let corpus = vec![
            DocumentChunk::new("Проектная документация передана заказчику", "a.txt", 0),
            DocumentChunk::new("Документация по безопасности и требованиям", "b.txt", 0),
            DocumentChunk::new("Погода была хорошей весь день", "c.txt", 0),
        ];
        let ranked = engine(&model, 5).rank("Соответствие требованиям безопасности", &corpus);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].filename(), "b.txt");

        let ranked = engine(&model, 1).rank("документация безопасности", &corpus);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].filename(), "b.txt");
    }

    #[tokio::test]
    async fn zero_overlap_short_circuits() {
        let model = Arc::new(ScriptedModel::always(r#"{"status":"confirmed","answer":"x"}"#));
        let corpus = split_into_chunks("Погода была хорошей весь день.", "weather.txt");
        let item = engine(&model, 5)
            .answer("Наличие технического задания", &corpus)
            .await;
        assert_eq!(item.status, ChecklistStatus::NotFound);
        assert_eq!(item.answer, NOT_FOUND_ANSWER);
        assert!(item.sources.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn inflected_forms_reach_the_model() {
        let model = Arc::new(ScriptedModel::always(
            r#"{"status":"partial","answer":"ТЗ согласовано [ИСТОЧНИК 1]"}"#,
        ));
        let corpus = split_into_chunks("Техническое задание согласовано.", "tz.txt");
        let item = engine(&model, 5)
            .answer("Наличие технического задания", &corpus)
            .await;
        assert_eq!(item.status, ChecklistStatus::Partial);
        assert_eq!(item.answer, "ТЗ согласовано [ИСТОЧНИК 1]");
        assert_eq!(item.sources.len(), 1);
        assert_eq!(item.sources[0].filename, "tz.txt");
        assert_eq!(item.sources[0].page, "0");
        assert_eq!(model.calls(), 1);

        let prompt = model.last_prompt().unwrap();
        assert!(prompt.contains("[ИСТОЧНИК 1: tz.txt]"));
        assert!(prompt.contains("Техническое задание согласовано"));
    }

    #[tokio::test]
    async fn paged_chunks_cite_their_page() {
        let model = Arc::new(ScriptedModel::always(
            r#"{"status":"confirmed","answer":"ТЗ согласовано [ИСТОЧНИК 1]"}"#,
        ));
        let corpus: Vec<DocumentChunk> =
            split_into_chunks("Техническое задание согласовано.", "tz.pdf")
                .into_iter()
                .map(|c| c.with_page(3))
                .collect();
        let item = engine(&model, 5)
            .answer("Наличие технического задания", &corpus)
            .await;
        assert_eq!(item.sources[0].page, "3");
    }

    #[tokio::test]
    async fn model_failure_requires_confirmation() {
        let model = Arc::new(ScriptedModel::failing());
        let corpus = split_into_chunks("Проектная документация представлена.", "p.txt");
        let item = engine(&model, 5)
            .answer("Наличие проектной документации", &corpus)
            .await;
        assert_eq!(item.status, ChecklistStatus::RequiresConfirmation);
        assert!(item.answer.starts_with("Ошибка при обращении к модели"));
        assert_eq!(item.sources.len(), 1);
    }

    #[tokio::test]
    async fn garbage_reply_requires_confirmation() {
        let model = Arc::new(ScriptedModel::always("не JSON вовсе"));
        let corpus = split_into_chunks("Проектная документация представлена.", "p.txt");
        let item = engine(&model, 5)
            .answer("Наличие проектной документации", &corpus)
            .await;
        assert_eq!(item.status, ChecklistStatus::RequiresConfirmation);
        assert!(item.answer.contains("не JSON вовсе"));
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!(
            parse_verdict(r#"{"status":"confirmed","answer":"да"}"#).unwrap(),
            (ChecklistStatus::Confirmed, "да".to_string())
        );
        assert_eq!(
            parse_verdict("Ответ:\n```json\n{\"status\": \"indirect\", \"answer\": \"косвенно\"}\n```")
                .unwrap(),
            (ChecklistStatus::Indirect, "косвенно".to_string())
        );
        assert_eq!(
            parse_verdict(r#"{"status":"probably","answer":["a"]}"#).unwrap(),
            (ChecklistStatus::RequiresConfirmation, r#"["a"]"#.to_string())
        );
        assert!(parse_verdict("no braces").is_err());
    }

    #[tokio::test]
    async fn answer_all_stops_when_cancelled() {
        let model = Arc::new(ScriptedModel::always(r#"{"status":"confirmed","answer":""}"#));
        let corpus = split_into_chunks("Техническое задание согласовано.", "tz.txt");
        let criteria = vec!["техническое".to_string(), "задание".to_string()];

        let cancel = CancellationToken::new();
        let all = engine(&model, 5)
            .answer_all(&criteria, &corpus, &cancel)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        cancel.cancel();
        assert!(
            engine(&model, 5)
                .answer_all(&criteria, &corpus, &cancel)
                .await
                .is_none()
        );
    }
}
