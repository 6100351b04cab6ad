//! エラー型の定義
//!
//! このモジュールは、RPA Flow 全体で使用されるエラー型を定義します。
//! 実行時のエラー（[`ExecutionError`](crate::engine::ExecutionError)）は
//! 実行結果と一緒に `engine::result` に置いています。

use thiserror::Error;

/// 設定関連のエラー
///
/// ワークフロー定義・エンジン設定の読み込み時に発生します。
/// このエラーが返った場合、ワークフローの実行は開始されません。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// ワークフロー定義（JSON）のパースに失敗
    #[error("ワークフロー定義のパースに失敗しました: {0}")]
    Parse(#[source] serde_json::Error),

    /// ワークフロー定義のシリアライズに失敗
    #[error("ワークフロー定義のシリアライズに失敗しました: {0}")]
    Serialize(#[source] serde_json::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),

    /// 指定された ID のノードが存在しない
    #[error("ノードが見つかりません: {0}")]
    NotFound(String),
}

/// ステップ（外部スクリプト）実行のエラー
///
/// `Cancelled` 以外はノードの `on_error` ポリシーで吸収できます。
#[derive(Debug, Error)]
pub enum StepError {
    /// 非0の終了コード
    #[error("スクリプトが終了コード {exit_code} で失敗しました: {stderr}")]
    Failure {
        /// 終了コード（シグナルで終了した場合は -1）
        exit_code: i32,
        /// 標準エラー出力
        stderr: String,
        /// 標準出力全体（ログ用）
        raw_stdout: String,
    },

    /// タイムアウト（プロセスは kill 済み）
    #[error("スクリプトが {timeout_secs}秒以内に完了しませんでした")]
    Timeout {
        /// タイムアウト時間（秒）
        timeout_secs: u64,
    },

    /// 最終行が JSON オブジェクトではない
    #[error("スクリプト出力の最終行を解釈できません: {reason}")]
    Output {
        /// 失敗理由
        reason: String,
        /// 標準出力全体（ログ用）
        raw_stdout: String,
    },

    /// プロセスの起動に失敗
    #[error("スクリプトの起動に失敗しました: {0}")]
    Spawn(#[from] std::io::Error),

    /// 呼び出し側からのキャンセル
    #[error("スクリプトの実行がキャンセルされました")]
    Cancelled,
}

impl StepError {
    /// `on_error = continue` で吸収できるかどうか
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StepError::Cancelled)
    }
}

/// 条件式の評価エラー
///
/// 構文が不正な場合のみ発生します。未定義変数はエラーになりません。
#[derive(Debug, Error)]
#[error("条件式 '{condition}' を評価できません: {message}")]
pub struct EvaluationError {
    /// 評価しようとした条件式
    pub condition: String,
    /// パーサーからのメッセージ
    pub message: String,
}

/// データベース操作のエラー
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// 接続に失敗
    #[error("データベースへの接続に失敗しました ({host}:{port}): {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },

    /// クエリの実行に失敗
    #[error("クエリの実行に失敗しました: {0}")]
    Query(#[source] sqlx::Error),

    /// 結果の変換に失敗
    #[error("クエリ結果を変換できません: {0}")]
    Decode(String),
}

/// 通知送信のエラー
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP リクエストに失敗
    #[error("通知の送信に失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    /// API がエラーを返した
    #[error("通知 API がエラーを返しました (status {status}): {body}")]
    Api { status: u16, body: String },
}
