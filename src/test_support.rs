//! Fixtures shared by unit tests: an XLSX builder, scripted model and
//! clustering doubles that can be held mid-call, and in-memory wiring.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::escape;
use tokio::sync::Semaphore;
use zip::write::SimpleFileOptions;

use crate::clustering::{
    ClusteredRemarks, ClusteringError, RemarkClusterer, RemarkGroup, RemarkPayload,
};
use crate::llm::{ChatCompleter, ChatMessage, LlmError};
use crate::pipeline::PipelineContext;
use crate::rag::AnswerEngine;
use crate::repository::{MemoryRepository, Repository};
use crate::service::ProjectService;
use crate::state_machine::{FileType, NewProjectFile, Project, ProjectFile, ProjectId, ProjectStatus};
use crate::storage::{
    MemoryStorage, ObjectStorage, StorageError, content_type_for, file_extension,
};
use crate::tasks::TaskManager;

fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap()
}

/// Minimal workbook with one worksheet of inline strings. Empty cells are
/// left out, as spreadsheet applications do.
pub(crate) fn xlsx(rows: &[Vec<&str>]) -> Vec<u8> {
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                column_letters(c),
                r + 1,
                escape(*value)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("[Content_Types].xml", options).unwrap();
    zip.write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .unwrap();
    zip.start_file("xl/workbook.xml", options).unwrap();
    zip.write_all(br#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="Sheet1" sheetId="1"/></sheets></workbook>"#)
        .unwrap();
    zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
    zip.write_all(sheet.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// Presentation with one text box per slide.
pub(crate) fn pptx(slides: &[&str]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    // stored out of order on purpose
    for (i, text) in slides.iter().enumerate().rev() {
        zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), options)
            .unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
            escape(*text)
        )
        .unwrap();
    }
    zip.start_file("ppt/slides/_rels/slide1.xml.rels", options)
        .unwrap();
    zip.write_all(b"<Relationships/>").unwrap();
    zip.finish().unwrap().into_inner()
}

/// Remarks register with a header row; each entry is `(section, text)`.
pub(crate) fn remarks_sheet(remarks: &[(&str, &str)]) -> Vec<u8> {
    let numbers: Vec<String> = (1..=remarks.len()).map(|n| n.to_string()).collect();
    let mut rows = vec![vec!["№", "Проект", "Направление", "Раздел", "Замечание", "Срочность"]];
    for ((section, text), n) in remarks.iter().zip(&numbers) {
        rows.push(vec![n.as_str(), "Well 8306", "Экспертиза", *section, *text, "Средняя"]);
    }
    xlsx(&rows)
}

/// Lets a test park a double mid-call and let it go later.
struct Gate {
    held: AtomicBool,
    permits: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            held: AtomicBool::new(false),
            permits: Semaphore::new(0),
        }
    }
}

impl Gate {
    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.permits.add_permits(1 << 20);
    }

    async fn pass(&self) {
        if self.held.load(Ordering::SeqCst) {
            let _ = self.permits.acquire().await;
        }
    }
}

/// Chat model double: fixed reply or fixed failure, with call accounting.
pub(crate) struct ScriptedModel {
    reply: Mutex<Option<String>>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    gate: Gate,
}

impl ScriptedModel {
    pub(crate) fn always(reply: &str) -> Self {
        Self {
            reply: Mutex::new(Some(reply.to_string())),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            gate: Gate::default(),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: Mutex::new(None),
            ..Self::always("")
        }
    }

    pub(crate) fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Some(reply.to_string());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User message of the most recent call.
    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    pub(crate) fn hold(&self) {
        self.gate.hold();
    }

    pub(crate) fn release(&self) {
        self.gate.release();
    }
}

#[async_trait]
impl ChatCompleter for ScriptedModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().rev().find(|m| m.role == "user") {
            *self.last_prompt.lock().unwrap() = Some(user.content.clone());
        }
        self.gate.pass().await;
        let reply = self.reply.lock().unwrap().clone();
        reply.ok_or(LlmError::ApiError {
            status: 503,
            message: "model unavailable".into(),
        })
    }
}

/// Clustering service double. Without a scripted response every category
/// comes back as one group holding all of its remarks.
#[derive(Default)]
pub(crate) struct MockClusterer {
    response: Mutex<Option<Result<ClusteredRemarks, String>>>,
    calls: AtomicUsize,
    last_payload: Mutex<Option<RemarkPayload>>,
    gate: Gate,
    panics: AtomicBool,
}

impl MockClusterer {
    pub(crate) fn respond_with(&self, clustered: ClusteredRemarks) {
        *self.response.lock().unwrap() = Some(Ok(clustered));
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.response.lock().unwrap() = Some(Err(message.to_string()));
    }

    pub(crate) fn panic_on_call(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_payload(&self) -> Option<RemarkPayload> {
        self.last_payload.lock().unwrap().clone()
    }

    pub(crate) fn hold(&self) {
        self.gate.hold();
    }

    pub(crate) fn release(&self) {
        self.gate.release();
    }
}

#[async_trait]
impl RemarkClusterer for MockClusterer {
    async fn cluster(&self, payload: &RemarkPayload) -> Result<ClusteredRemarks, ClusteringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        self.gate.pass().await;
        if self.panics.load(Ordering::SeqCst) {
            panic!("clustering double asked to panic");
        }

        let response = self.response.lock().unwrap().clone();
        match response {
            Some(Ok(clustered)) => Ok(clustered),
            Some(Err(message)) => Err(ClusteringError::Unsuccessful(message)),
            None => Ok(payload
                .iter()
                .map(|(key, texts)| {
                    let group = RemarkGroup {
                        group_name: key.clone(),
                        synthesized_remark: texts.first().cloned().unwrap_or_default(),
                        original_duplicates: texts.clone(),
                    };
                    (key.clone(), vec![group])
                })
                .collect()),
        }
    }
}

/// Storage that refuses uploads whose name ends with `suffix` and passes
/// everything else to the wrapped store.
pub(crate) struct RejectingStorage {
    pub inner: Arc<MemoryStorage>,
    pub suffix: &'static str,
}

#[async_trait]
impl ObjectStorage for RejectingStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if name.ends_with(self.suffix) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.upload(bytes, name, content_type).await
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    fn url_for(&self, key: &str) -> String {
        self.inner.url_for(key)
    }
}

/// In-memory wiring of every capability a pipeline or service needs.
pub(crate) struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub storage: Arc<MemoryStorage>,
    pub clusterer: Arc<MockClusterer>,
    pub model: Arc<ScriptedModel>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            repo: Arc::new(MemoryRepository::new()),
            storage: Arc::new(MemoryStorage::new()),
            clusterer: Arc::new(MockClusterer::default()),
            model: Arc::new(ScriptedModel::always(
                r#"{"status": "requires_confirmation", "answer": "Требуется ручная проверка"}"#,
            )),
        }
    }

    pub(crate) fn ctx(&self) -> PipelineContext {
        PipelineContext {
            repo: self.repo.clone(),
            storage: self.storage.clone(),
            clusterer: self.clusterer.clone(),
            engine: Arc::new(AnswerEngine::new(self.model.clone(), 5, Duration::ZERO)),
        }
    }

    pub(crate) fn service(&self, tasks: Arc<TaskManager>) -> ProjectService {
        ProjectService::new(self.ctx(), tasks)
    }

    /// Stores a file directly, bypassing the service's status checks.
    pub(crate) async fn upload(
        &self,
        project_id: ProjectId,
        file_type: FileType,
        name: &str,
        bytes: Vec<u8>,
    ) -> ProjectFile {
        let extension = file_extension(name).unwrap_or_default();
        let file_size = bytes.len() as i64;
        let key = self
            .storage
            .upload(bytes, name, content_type_for(&extension))
            .await
            .unwrap();
        self.repo
            .create_project_file(NewProjectFile {
                project_id,
                filename: key.clone(),
                original_name: name.to_string(),
                file_path: key,
                file_size,
                extension,
                file_type,
            })
            .await
            .unwrap()
    }

    pub(crate) async fn wait_until_ready(&self, project_id: ProjectId) -> Project {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let project = self.repo.get_project(project_id).await.unwrap();
                if project.status == ProjectStatus::Ready {
                    return project;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("project did not return to ready")
    }
}
