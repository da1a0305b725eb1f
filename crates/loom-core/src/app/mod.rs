//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてエンジンを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: 検証・recovery scan・ワイヤリング
//! - **Scheduler**: activity の投入と pump / timer の起動
//! - **JobQueue / JobRouter / JobPump**: type ごとのキューと実行
//! - **Dispatcher / ErrorHandlingPolicy**: 1 job の実行と失敗時の判断
//! - **StatusChanger / transitions / ContinuationDispatcher**: status 遷移と子の解放
//! - **JobCoordinator / RecoverableAction / FailedJobQueue**: tree 単位の直列化と再試行

pub mod builder;
pub mod commands;
pub mod context;
pub mod continuation_dispatcher;
pub mod converter;
pub mod coordinator;
pub mod dispatcher;
pub mod error_policy;
pub mod failed_queue;
pub mod job_queue;
pub mod pump;
pub mod recoverable;
pub mod recovery;
pub mod router;
pub mod scheduler;
pub mod status_changer;
pub mod timers;
pub mod transitions;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::commands::{Command, CommandExecutor, CommandKind};
pub use self::context::EngineContext;
pub use self::converter::{ActivityConverter, ConvertedActivity};
pub use self::coordinator::JobCoordinator;
pub use self::job_queue::{JobQueue, QueueStats};
pub use self::router::JobRouter;
pub use self::scheduler::Scheduler;
