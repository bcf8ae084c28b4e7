//! App - アプリケーション層
//!
//! ports を組み合わせて進捗トラッキングのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **ProgressCounter**: キャッシュでまとめて flush するカウンタ
//! - **TrackerLifecycle**: enqueue / start / success / failure の状態遷移
//! - **JobRunner**: ジョブ本体を lifecycle hooks に通して実行
//! - **TrackerBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod counter;
pub mod lifecycle;
pub mod runner;

pub use self::builder::{BuildError, JobTracker, TrackerBuilder};
pub use self::counter::ProgressCounter;
pub use self::lifecycle::{JobContext, LifecycleHooks, TrackerLifecycle};
pub use self::runner::{BoxError, JobProgress, JobRunner, RunError, TrackedJob};
