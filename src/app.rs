//! Wiring from [`Config`] to a running service: stores, external clients,
//! answer engine and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clustering::ClusteringClient;
use crate::config::Config;
use crate::error::Result;
use crate::llm::ChatClient;
use crate::pipeline::{PipelineContext, ProjectProcessorTask};
use crate::rag::AnswerEngine;
use crate::repository::SqliteRepository;
use crate::service::ProjectService;
use crate::state_machine::{Project, ProjectId};
use crate::storage::FsStorage;
use crate::tasks::TaskManager;

/// Outcome of [`App::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverySummary {
    pub queued: usize,
    /// Tasks that failed while recovery was running.
    pub failed: u64,
}

pub struct App {
    ctx: PipelineContext,
    tasks: Arc<TaskManager>,
    service: ProjectService,
    shutdown_timeout: Duration,
}

impl App {
    /// Opens the database and object root and builds the HTTP clients.
    /// The worker pool is created stopped; see [`App::start`].
    pub async fn new(config: &Config) -> Result<Self> {
        let repo = SqliteRepository::connect(&config.database.path).await?;
        let storage =
            FsStorage::open(&config.storage.root, config.storage.public_base_url.clone()).await?;
        let chat = ChatClient::new(&config.llm)?;
        let clusterer = ClusteringClient::new(&config.clustering)?;
        info!(
            database = %config.database.path.display(),
            storage = %storage.root().display(),
            model = chat.model(),
            "application wired"
        );

        let ctx = PipelineContext {
            repo: Arc::new(repo),
            storage: Arc::new(storage),
            clusterer: Arc::new(clusterer),
            engine: Arc::new(AnswerEngine::new(
                Arc::new(chat),
                config.llm.top_k,
                Duration::from_millis(config.llm.request_delay_ms),
            )),
        };
        let tasks = Arc::new(TaskManager::new(
            config.tasks.workers,
            config.tasks.queue_capacity,
            config.tasks.results_capacity,
        ));
        Ok(Self::from_parts(ctx, tasks, config.tasks.shutdown_timeout()))
    }

    pub fn from_parts(ctx: PipelineContext, tasks: Arc<TaskManager>, shutdown_timeout: Duration) -> Self {
        let service = ProjectService::new(ctx.clone(), tasks.clone());
        Self {
            ctx,
            tasks,
            service,
            shutdown_timeout,
        }
    }

    pub fn service(&self) -> &ProjectService {
        &self.service
    }

    pub fn start(&self) -> Result<()> {
        self.tasks.start()?;
        Ok(())
    }

    /// Stops the pool, waiting at most the configured shutdown timeout.
    pub async fn shutdown(&self) {
        self.tasks.stop(self.shutdown_timeout).await;
    }

    /// Resubmits a recovery task for every project left in a busy state,
    /// e.g. after a crash lost the in-memory queue. Returns how many were
    /// queued. The manager must be running.
    pub async fn recover_stuck_projects(&self) -> Result<usize> {
        let mut queued = 0;
        for project in self.ctx.repo.list_projects().await? {
            if project.status.pipeline().is_none() {
                continue;
            }
            let task = ProjectProcessorTask::recover(project.id, self.ctx.clone());
            match self.tasks.submit(Arc::new(task)) {
                Ok(task_id) => {
                    info!(project_id = project.id, status = %project.status, %task_id, "recovery task queued");
                    queued += 1;
                }
                Err(e) => {
                    warn!(project_id = project.id, status = %project.status, error = %e, "recovery task not queued");
                    return Err(e.into());
                }
            }
        }
        Ok(queued)
    }

    fn unfinished_tasks(&self) -> u64 {
        let stats = self.tasks.stats();
        stats
            .total_submitted
            .saturating_sub(stats.completed + stats.failed)
    }

    /// Polls until the project is out of its busy state and every queued
    /// task has reported. `on_poll` sees each fresh read.
    pub async fn wait_idle(
        &self,
        id: ProjectId,
        poll: Duration,
        mut on_poll: impl FnMut(&Project),
    ) -> Result<Project> {
        let mut project = self.ctx.repo.get_project(id).await?;
        while project.status.is_busy() || self.unfinished_tasks() > 0 {
            tokio::time::sleep(poll).await;
            project = self.ctx.repo.get_project(id).await?;
            on_poll(&project);
        }
        Ok(project)
    }

    /// Resubmits every stuck project and waits for all of them. Failures
    /// are counted against one snapshot taken before anything is queued.
    pub async fn recover(
        &self,
        poll: Duration,
        mut on_poll: impl FnMut(&Project),
    ) -> Result<RecoverySummary> {
        let stuck: Vec<ProjectId> = self
            .ctx
            .repo
            .list_projects()
            .await?
            .into_iter()
            .filter(|p| p.status.is_busy())
            .map(|p| p.id)
            .collect();
        let failed_before = self.tasks.stats().failed;

        let queued = self.recover_stuck_projects().await?;
        for id in stuck {
            self.wait_idle(id, poll, &mut on_poll).await?;
        }

        let failed = self.tasks.stats().failed.saturating_sub(failed_before);
        if failed > 0 {
            warn!(queued, failed, "recovery finished with failures");
        } else {
            info!(queued, "recovery finished");
        }
        Ok(RecoverySummary { queued, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, StorageConfig};
    use crate::repository::Repository;
    use crate::state_machine::{PipelineKind, ProjectStatus};
    use crate::test_support::{Harness, remarks_sheet};
    use crate::state_machine::FileType;

    #[tokio::test]
    async fn recovery_resumes_busy_projects_only() {
        let h = Harness::new();
        let idle = h.repo.create_project("Idle").await.unwrap();
        let stuck = h.repo.create_project("Well 8306").await.unwrap();
        h.upload(
            stuck.id,
            FileType::Remarks,
            "remarks.xlsx",
            remarks_sheet(&[("Геологическая модель", "Нет карты по кровле")]),
        )
        .await;
        h.repo.try_begin(stuck.id, PipelineKind::Remarks).await.unwrap();

        let app = App::from_parts(h.ctx(), Arc::new(TaskManager::new(1, 10, 10)), Duration::from_secs(5));
        app.start().unwrap();
        assert_eq!(app.recover_stuck_projects().await.unwrap(), 1);

        h.wait_until_ready(stuck.id).await;
        assert_eq!(h.clusterer.calls(), 1);
        assert_eq!(h.repo.list_remarks(stuck.id).await.unwrap().len(), 1);
        assert_eq!(h.repo.get_project(idle.id).await.unwrap().status, ProjectStatus::Ready);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn recovery_needs_running_manager() {
        let h = Harness::new();
        let project = h.repo.create_project("Well 8306").await.unwrap();
        h.repo
            .try_begin(project.id, PipelineKind::FinalReport)
            .await
            .unwrap();

        let app = App::from_parts(h.ctx(), Arc::new(TaskManager::new(1, 10, 10)), Duration::from_secs(5));
        assert!(app.recover_stuck_projects().await.is_err());
        assert_eq!(
            h.repo.get_project(project.id).await.unwrap().status,
            ProjectStatus::GeneratingFinalReport
        );
    }

    #[tokio::test]
    async fn recovery_counts_only_its_own_failures() {
        let h = Harness::new();
        let tasks = Arc::new(TaskManager::new(2, 10, 10));
        let app = App::from_parts(h.ctx(), tasks.clone(), Duration::from_secs(5));
        app.start().unwrap();

        // an unrelated failure before recovery starts
        let idle = h.repo.create_project("Idle").await.unwrap();
        tasks
            .submit(Arc::new(ProjectProcessorTask::new(idle.id, PipelineKind::Checklist, h.ctx())))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while tasks.stats().failed == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let healthy = h.repo.create_project("Well 8306").await.unwrap();
        h.upload(
            healthy.id,
            FileType::Remarks,
            "remarks.xlsx",
            remarks_sheet(&[("Геологическая модель", "Нет карты по кровле")]),
        )
        .await;
        h.repo.try_begin(healthy.id, PipelineKind::Remarks).await.unwrap();
        // nothing to aggregate, fails
        let broken = h.repo.create_project("Well 8307").await.unwrap();
        h.repo.try_begin(broken.id, PipelineKind::FinalReport).await.unwrap();

        let summary = app.recover(Duration::from_millis(5), |_| {}).await.unwrap();
        assert_eq!(summary, RecoverySummary { queued: 2, failed: 1 });
        for id in [healthy.id, broken.id] {
            assert_eq!(h.repo.get_project(id).await.unwrap().status, ProjectStatus::Ready);
        }
        assert_eq!(tasks.stats().failed, 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn wires_sqlite_and_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database: DatabaseConfig {
                path: dir.path().join("db/projeval.db"),
            },
            storage: StorageConfig {
                root: dir.path().join("objects"),
                public_base_url: Some("https://files.example".into()),
            },
            ..Config::default()
        };

        let app = App::new(&config).await.unwrap();
        app.start().unwrap();
        let project = app.service().create_project("Well 8306").await.unwrap();
        let listed = app.service().list_projects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, project.id);
        assert_eq!(app.recover_stuck_projects().await.unwrap(), 0);
        assert!(dir.path().join("objects").is_dir());
        app.shutdown().await;
        assert!(!app.service().task_stats().is_running);
    }
}
