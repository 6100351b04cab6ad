//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - Workflow オブジェクトを受け取り、START から END までノードを1つずつ実行
//! - 実行コンテキストによるノード間のデータ受け渡し
//! - 外部スクリプト（ステップ）の起動とタイムアウト・キャンセルの制御
//! - 条件式による分岐と LOOP ノードの繰り返し
//! - 実行ログと Run Report の作成
//!
//! # モジュール構成
//!
//! - [`executor`][]: ワークフロー実行エンジン本体（状態機械）
//! - [`context`][]: 実行コンテキスト（ワークフロー変数）
//! - [`condition`][]: DECISION ノードの条件式評価
//! - [`runner`][]: 外部スクリプトを実行するステップランナー
//! - [`database`][]: DATABASE ノードの外部ストア
//! - [`run_log`][]: 実行ログ
//! - [`result`][]: 実行結果型（Run Report と実行エラー）
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rpa_flow::config::Workflow;
//! use rpa_flow::engine::WorkflowExecutor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Workflowを読み込む
//!     let workflow = Arc::new(Workflow::from_file("workflows/example.json")?);
//!
//!     // 2. Executorを生成して実行
//!     let report = WorkflowExecutor::new(workflow).execute().await;
//!
//!     // 3. 結果を出力
//!     println!("Workflow: {}", report.workflow);
//!     println!("Status: {:?}", report.status);
//!     for entry in &report.logs {
//!         println!("  {}", entry);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod condition;
pub mod context;
pub mod database;
pub mod executor;
pub mod result;
pub mod run_log;
pub mod runner;

// 公開APIの再エクスポート
pub use context::ExecutionContext;
pub use database::{DatabaseClient, MySqlClient};
pub use executor::WorkflowExecutor;
pub use result::{ErrorKind, ExecutionError, RunReport, RunStatus};
pub use run_log::RunLog;
pub use runner::{ProcessStepRunner, StepOutcome, StepRunner};
