//! ワークフロー実行結果の型定義
//!
//! # 責務
//!
//! - 実行結果 [`RunReport`] の型定義
//! - 実行ステータス [`RunStatus`] の型定義
//! - 実行エラー [`ExecutionError`] と、その機械可読な分類 [`ErrorKind`] の型定義
//!
//! # 使用例
//!
//! ```rust,no_run
//! use rpa_flow::engine::result::RunReport;
//!
//! fn handle_report(report: RunReport) {
//!     if report.is_success() {
//!         println!("ワークフロー成功: {}", report.workflow);
//!         println!("訪問ノード数: {}", report.nodes_visited);
//!     } else {
//!         println!("ワークフロー失敗: {:?} ({:?})", report.error, report.error_kind);
//!     }
//!
//!     // JSON形式で出力
//!     if let Ok(json) = report.to_json() {
//!         println!("{}", json);
//!     }
//! }
//! ```

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{ConfigError, DatabaseError, EvaluationError, StepError};

/// ワークフロー実行結果（Run Report）
///
/// 呼び出し側に返され、CLI では `--report` で JSON として保存されます。
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// ワークフロー名
    pub workflow: String,

    /// 実行ステータス
    pub status: RunStatus,

    /// 終了時点の実行コンテキスト
    pub context: Map<String, Value>,

    /// 時系列の実行ログ
    pub logs: Vec<String>,

    /// エラーメッセージ（失敗時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// エラー種別（失敗時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// 実行開始時刻
    pub started_at: DateTime<Local>,

    /// 実行終了時刻
    pub finished_at: DateTime<Local>,

    /// ディスパッチしたノード数
    pub nodes_visited: usize,
}

impl RunReport {
    /// 結果をJSON形式でシリアライズ
    ///
    /// # 戻り値
    ///
    /// - `Ok(String)`: JSON文字列
    /// - `Err(serde_json::Error)`: シリアライズ失敗
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 成功したかどうか
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// ワークフロー実行ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// END ノードに到達した（またはフローが後続なしで終了した）
    Success,
    /// 致命的なエラーで停止した
    Failed,
}

/// エラー種別
///
/// Run Report の `error_kind` に書き込まれる安定したタグです。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    ValidationError,
    NotFound,
    ConfigError,
    StepFailure,
    StepTimeout,
    StepOutputError,
    StepSpawnError,
    EvaluationError,
    DatabaseError,
    InfiniteLoopGuard,
    LoopBudget,
    InvalidIterations,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::StepFailure => "step_failure",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::StepOutputError => "step_output_error",
            ErrorKind::StepSpawnError => "step_spawn_error",
            ErrorKind::EvaluationError => "evaluation_error",
            ErrorKind::DatabaseError => "database_error",
            ErrorKind::InfiniteLoopGuard => "infinite_loop_guard",
            ErrorKind::LoopBudget => "loop_budget",
            ErrorKind::InvalidIterations => "invalid_iterations",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// 実行エラー
///
/// ワークフロー実行を `Failed` で終了させるエラーです。
/// `on_error = continue` で吸収されたステップエラーはここには現れず、ログにのみ残ります。
///
/// # エラー種別
///
/// - [`ExecutionError::Config`] - 定義の不備（存在しないノードへの遷移等）
/// - [`ExecutionError::Step`] - `on_error = stop` のノードでのステップ失敗
/// - [`ExecutionError::Evaluation`] - 条件式の構文エラー（常に致命的）
/// - [`ExecutionError::Database`] - データベースエラー（常に致命的）
/// - [`ExecutionError::InfiniteLoopGuard`] - ノード訪問数の上限超過
/// - [`ExecutionError::LoopBudget`] - LOOP ノードの繰り返し回数の上限超過
/// - [`ExecutionError::InvalidIterations`] - 繰り返し回数を決められない
/// - [`ExecutionError::Cancelled`] - 呼び出し側からのキャンセル
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// 設定エラー
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    /// ステップエラー
    #[error("ノード '{node_id}' のステップが失敗しました: {source}")]
    Step {
        node_id: String,
        #[source]
        source: StepError,
    },

    /// 条件式エラー
    #[error("ノード '{node_id}' の条件式エラー: {source}")]
    Evaluation {
        node_id: String,
        #[source]
        source: EvaluationError,
    },

    /// データベースエラー
    #[error("ノード '{node_id}' のデータベースエラー: {source}")]
    Database {
        node_id: String,
        #[source]
        source: DatabaseError,
    },

    /// ノード訪問数の上限超過
    #[error("ノード訪問数が上限（{limit}）を超えました。グラフが循環している可能性があります")]
    InfiniteLoopGuard { limit: usize },

    /// LOOP の繰り返し回数の上限超過
    #[error("ノード '{node_id}' の繰り返し回数 {requested} が上限（{limit}）を超えています")]
    LoopBudget {
        node_id: String,
        requested: u64,
        limit: u64,
    },

    /// 繰り返し回数を決められない
    #[error("ノード '{node_id}' の繰り返し回数を決定できません: {detail}")]
    InvalidIterations { node_id: String, detail: String },

    /// キャンセル
    #[error("実行がキャンセルされました")]
    Cancelled,
}

impl ExecutionError {
    /// Run Report に書き込むエラー種別
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Config(e) => match e {
                ConfigError::Parse(_) => ErrorKind::ParseError,
                ConfigError::Validation(_) => ErrorKind::ValidationError,
                ConfigError::NotFound(_) => ErrorKind::NotFound,
                _ => ErrorKind::ConfigError,
            },
            ExecutionError::Step { source, .. } => match source {
                StepError::Failure { .. } => ErrorKind::StepFailure,
                StepError::Timeout { .. } => ErrorKind::StepTimeout,
                StepError::Output { .. } => ErrorKind::StepOutputError,
                StepError::Spawn(_) => ErrorKind::StepSpawnError,
                StepError::Cancelled => ErrorKind::Cancelled,
            },
            ExecutionError::Evaluation { .. } => ErrorKind::EvaluationError,
            ExecutionError::Database { .. } => ErrorKind::DatabaseError,
            ExecutionError::InfiniteLoopGuard { .. } => ErrorKind::InfiniteLoopGuard,
            ExecutionError::LoopBudget { .. } => ErrorKind::LoopBudget,
            ExecutionError::InvalidIterations { .. } => ErrorKind::InvalidIterations,
            ExecutionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// 失敗したノード（特定できる場合）
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ExecutionError::Step { node_id, .. }
            | ExecutionError::Evaluation { node_id, .. }
            | ExecutionError::Database { node_id, .. }
            | ExecutionError::LoopBudget { node_id, .. }
            | ExecutionError::InvalidIterations { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: RunStatus) -> RunReport {
        let now = Local::now();
        let mut context = Map::new();
        context.insert("x".to_string(), Value::from(1));
        RunReport {
            workflow: "wf".to_string(),
            status,
            context,
            logs: vec!["[2026-01-01 00:00:00] [INFO] [s] START".to_string()],
            error: None,
            error_kind: None,
            started_at: now,
            finished_at: now,
            nodes_visited: 1,
        }
    }

    #[test]
    fn test_success_report_serialization() {
        let report = report(RunStatus::Success);
        assert!(report.is_success());

        let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["context"]["x"], 1);
        assert_eq!(json["logs"].as_array().unwrap().len(), 1);
        assert!(json.get("error").is_none());
        assert!(json.get("error_kind").is_none());
    }

    #[test]
    fn test_failed_report_serialization() {
        let mut report = report(RunStatus::Failed);
        let err = ExecutionError::InfiniteLoopGuard { limit: 10 };
        report.error = Some(err.to_string());
        report.error_kind = Some(err.kind());

        assert!(!report.is_success());

        let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_kind"], "infinite_loop_guard");
        assert!(json["error"].as_str().unwrap().contains("10"));
    }

    #[test]
    fn test_error_kind_mapping() {
        let step = ExecutionError::Step {
            node_id: "a".to_string(),
            source: StepError::Timeout { timeout_secs: 5 },
        };
        assert_eq!(step.kind(), ErrorKind::StepTimeout);
        assert_eq!(step.node_id(), Some("a"));

        let config = ExecutionError::from(ConfigError::NotFound("z".to_string()));
        assert_eq!(config.kind(), ErrorKind::NotFound);
        assert_eq!(config.node_id(), None);

        let cancelled_step = ExecutionError::Step {
            node_id: "a".to_string(),
            source: StepError::Cancelled,
        };
        assert_eq!(cancelled_step.kind(), ErrorKind::Cancelled);
        assert_eq!(ExecutionError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_kind_as_str_matches_serde() {
        for kind in [
            ErrorKind::ParseError,
            ErrorKind::StepOutputError,
            ErrorKind::InfiniteLoopGuard,
            ErrorKind::Cancelled,
        ] {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, kind.as_str());
        }
    }
}
