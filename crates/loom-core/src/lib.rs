//! loom-core
//!
//! Durable job orchestration: activity trees in, jobs out, run to completion
//! across restarts.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job_type, status, job, activity, continuation, events, errors）
//! - **config**: queue ごとの設定と engine 設定
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator, EventSink, DependencyResolver）
//! - **app**: アプリケーションロジック（builder, scheduler, queue, coordinator, dispatcher, など）
//! - **impls**: 実装（InMemoryJobStore, HandlerRegistry, event sinks など開発用）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod testing;

pub use app::{BuildError, EngineBuilder, QueueStats, Scheduler};
pub use config::{EngineConfig, QueueConfiguration};
pub use domain::{
    Activity, ActivityError, EngineError, EngineEvent, ExceptionFilter, FilterArgument, Job, JobId,
    JobStatus, JobType,
};
