//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - recovery scan で queue を埋めてから pump を作る

use std::sync::Arc;

use crate::app::commands::CommandExecutor;
use crate::app::context::EngineContext;
use crate::app::coordinator::JobCoordinator;
use crate::app::dispatcher::Dispatcher;
use crate::app::pump::JobPump;
use crate::app::recovery;
use crate::app::scheduler::Scheduler;
use crate::app::status_changer::StatusChanger;
use crate::config::EngineConfig;
use crate::domain::{EngineError, JobType, StoreError};
use crate::impls::TracingEventSink;
use crate::ports::{Clock, DependencyResolver, EventSink, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// EngineBuilder は Scheduler を構築
///
/// # 使用例
/// ```ignore
/// let scheduler = EngineBuilder::new(config)
///     .store(store)
///     .resolver(registry)
///     .build()
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - 設定ファイルの検証
/// - 設定された activity type 全てに handler があるかチェック
/// - 不足があれば BuildError を返す
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn JobStore>>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Arc<dyn EventSink>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing handlers for activity types: {0:?}. These types are configured but not registered.")]
    MissingHandlers(Vec<JobType>),

    #[error("no job store configured")]
    MissingStore,

    #[error("no dependency resolver configured")]
    MissingResolver,

    #[error("recovery scan failed: {0}")]
    Recovery(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl EngineBuilder {
    /// 新しい EngineBuilder を作成
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            resolver: None,
            clock: Arc::new(SystemClock),
            ids: None,
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 省略時は clock を使う ULID generator
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 省略時は TracingEventSink
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// 検証 → recovery scan → queue seeding → wiring
    ///
    /// # 検証
    /// - EngineConfig::validate()
    /// - 設定された activity type が全て resolver で解決できるか
    pub async fn build(self) -> Result<Scheduler, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let resolver = self.resolver.ok_or(BuildError::MissingResolver)?;

        let missing: Vec<JobType> = self
            .config
            .activity_types()
            .into_iter()
            .filter(|job_type| !resolver.can_resolve(job_type))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(self.clock.clone())));
        let ctx = EngineContext::assemble(self.config, store, self.clock, ids, self.events);

        let mut recovered = recovery::scan(ctx.store.as_ref(), ctx.clock.now()).await?;
        for (job_type, queue) in ctx.router.queues() {
            let jobs = match &job_type {
                Some(job_type) => recovered.take(job_type),
                None => recovered.take_rest(),
            };
            let suspended = ctx.store.count_suspended(queue.filter()).await?;
            queue.seed(jobs, suspended).await?;
        }
        let now = ctx.clock.now();
        for job in &recovered.awaiting_retry {
            ctx.failed_queue.add(job, now);
        }

        let coordinator = Arc::new(JobCoordinator::new(ctx.recoverable.clone()));
        let changer = Arc::new(StatusChanger::new(ctx.clone()));
        let commands = Arc::new(CommandExecutor::new(ctx.clone(), coordinator, changer.clone()));
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), resolver, commands.clone()));

        let pumps = ctx
            .router
            .queues()
            .into_iter()
            .map(|(job_type, queue)| {
                let max_workers = match &job_type {
                    Some(job_type) => ctx.config.queue_for(job_type).max_workers,
                    None => ctx.config.default_queue.max_workers,
                };
                JobPump::new(queue, dispatcher.clone(), ctx.events.clone(), max_workers)
            })
            .collect();

        Ok(Scheduler::new(ctx, changer, commands, pumps))
    }
}
