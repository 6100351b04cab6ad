//! JSON デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、ワークフロー定義ファイル（JSON）の読み書き専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 設計思想
//!
//! - **単一責務**: JSON のシリアライズ/デシリアライズのみを担当
//! - **互換性**: ワークフローデザイナーが書き出す旧形式のフィールド名
//!   （`from`/`to`, `truePath` など）もエイリアスで受け入れる
//! - **バリデーション前の状態**: 不正なデータも一旦受け入れる
//! - **カプセル化**: config モジュール内部のみで使用（外部非公開）
//!
//! ## 変換フロー
//!
//! ```text
//! JSON ファイル
//!   ↓ (デシリアライズ)
//! WorkflowDto
//!   ↓ (TryFrom でバリデーション)
//! Workflow (ドメインモデル)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::node::{DbOperation, ErrorPolicy, Position};

/// ワークフロー DTO
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`Workflow`](super::workflow::Workflow) を使用してください。
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) id: Option<String>,
    pub(super) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
    #[serde(default)]
    pub(super) nodes: Vec<NodeDto>,
    #[serde(default)]
    pub(super) edges: Vec<EdgeDto>,
    #[serde(default)]
    pub(super) variables: Map<String, Value>,
}

/// ノード DTO
///
/// 共通フィールドと、`type` タグで判別される種類固有フィールドを持ちます。
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct NodeDto {
    pub(super) id: String,
    #[serde(default)]
    pub(super) label: String,
    #[serde(default)]
    pub(super) position: Position,
    #[serde(default = "default_enabled")]
    pub(super) enabled: bool,
    #[serde(flatten)]
    pub(super) kind: NodeKindDto,
}

fn default_enabled() -> bool {
    true
}

/// ノード種別ごとのフィールド
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub(super) enum NodeKindDto {
    #[serde(rename = "START", alias = "start")]
    Start {},

    #[serde(rename = "END", alias = "end")]
    End {},

    #[serde(rename = "ACTION", alias = "action")]
    Action {
        #[serde(default)]
        script: String,
        #[serde(default)]
        on_error: ErrorPolicy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable: Option<String>,
    },

    #[serde(rename = "DECISION", alias = "decision")]
    Decision {
        #[serde(default)]
        condition: String,
        #[serde(default, alias = "truePath", skip_serializing_if = "Option::is_none")]
        true_path: Option<String>,
        #[serde(default, alias = "falsePath", skip_serializing_if = "Option::is_none")]
        false_path: Option<String>,
    },

    #[serde(rename = "LOOP", alias = "loop")]
    Loop {
        #[serde(default)]
        script: String,
        /// 整数リテラル、数値文字列、または変数名
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iterations: Option<Value>,
        #[serde(default)]
        on_error: ErrorPolicy,
        #[serde(default, alias = "loopVar", skip_serializing_if = "Option::is_none")]
        loop_var: Option<String>,
    },

    #[serde(rename = "DATABASE", alias = "database")]
    Database {
        #[serde(default = "default_db_host")]
        host: String,
        #[serde(default = "default_db_port")]
        port: u16,
        #[serde(default)]
        user: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        database: String,
        #[serde(default)]
        query: String,
        #[serde(default)]
        operation: DbOperation,
        #[serde(default = "default_result_var", alias = "resultVar")]
        result_var: String,
    },

    #[serde(rename = "ANNOTATION", alias = "annotation")]
    Annotation {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "DELAY", alias = "delay")]
    Delay {
        #[serde(default = "default_delay_seconds")]
        delay_seconds: u64,
    },
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_result_var() -> String {
    "db_result".to_string()
}

fn default_delay_seconds() -> u64 {
    5
}

/// エッジ DTO
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct EdgeDto {
    #[serde(alias = "from")]
    pub(super) from_node: String,
    #[serde(alias = "to")]
    pub(super) to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) label: Option<String>,
}
