//! ワークフローノードの定義
//!
//! # 責務
//!
//! ワークフローを構成するノードの型を提供するモジュール。
//! ノードの種類は閉じた列挙型 [`NodeKind`] で表現し、各バリアントは
//! その種類に必要なフィールドだけを持ちます。
//!
//! ## DTO との違い
//!
//! - `NodeDto`: JSON デシリアライズ専用、エイリアスや省略値を受け入れる
//! - [`Node`]: バリデーション済み、実行エンジンが直接扱う

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dto::{NodeDto, NodeKindDto};
use crate::error::ConfigError;

/// ワークフローノード（ドメインモデル）
///
/// 共通属性（`id`, `label`, `position`, `enabled`）と、
/// 種類ごとの属性を持つ [`NodeKind`] から構成されます。
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// ノードID（ワークフロー内で一意）
    pub id: String,
    /// 表示名（実行には影響しない）
    pub label: String,
    /// レイアウト用の座標（実行には影響しない）
    pub position: Position,
    /// 無効化されたノードは実行されずスキップされる
    pub enabled: bool,
    /// ノードの種類と種類固有の属性
    pub kind: NodeKind,
}

impl Node {
    /// ノード種別名（ログ・エラーメッセージ用）
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// ノードの種類
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// 開始ノード
    Start,
    /// 終了ノード
    End,
    /// 外部スクリプトを1回実行する
    Action(ActionNode),
    /// 条件式で分岐する
    Decision(DecisionNode),
    /// 外部スクリプトを繰り返し実行する
    Loop(LoopNode),
    /// データベースに1文を発行する
    Database(DatabaseNode),
    /// ドキュメント用。実行されない
    Annotation(AnnotationNode),
    /// 指定秒数待機する
    Delay(DelayNode),
}

impl NodeKind {
    /// 定義ファイル上の種別名
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Start => "START",
            NodeKind::End => "END",
            NodeKind::Action(_) => "ACTION",
            NodeKind::Decision(_) => "DECISION",
            NodeKind::Loop(_) => "LOOP",
            NodeKind::Database(_) => "DATABASE",
            NodeKind::Annotation(_) => "ANNOTATION",
            NodeKind::Delay(_) => "DELAY",
        }
    }
}

/// レイアウト座標
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// ステップ失敗時のポリシー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// ワークフローを失敗として終了する
    #[default]
    Stop,
    /// ログに記録し、コンテキストを変更せず次のノードへ進む
    Continue,
}

/// ACTION ノード
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
    /// 実行するスクリプトのパス（またはシェルコマンド）
    pub script: String,
    pub on_error: ErrorPolicy,
    /// 設定されている場合、診断出力をこの変数に格納する
    pub output_variable: Option<String>,
}

/// DECISION ノード
///
/// 分岐先は汎用エッジではなく `true_path` / `false_path` で決まります。
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionNode {
    pub condition: String,
    pub true_path: Option<String>,
    pub false_path: Option<String>,
}

/// LOOP ノード
#[derive(Debug, Clone, PartialEq)]
pub struct LoopNode {
    pub script: String,
    pub iterations: Iterations,
    pub on_error: ErrorPolicy,
    /// `current_item`（または `current_index`）を別名でも公開する
    pub loop_var: Option<String>,
}

/// ループ回数の指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iterations {
    /// リテラルの回数
    Count(u64),
    /// 整数またはリストを保持するコンテキスト変数名
    Variable(String),
}

impl Iterations {
    /// 定義ファイル上の表記から解釈する
    ///
    /// 数値として読める文字列はリテラル、それ以外は変数名として扱います。
    /// 空文字列は `None` を返します。
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<u64>() {
            Ok(count) => Some(Iterations::Count(count)),
            Err(_) => Some(Iterations::Variable(raw.to_string())),
        }
    }
}

/// DATABASE ノード
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseNode {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub query: String,
    pub operation: DbOperation,
    /// 結果（行リストまたは影響行数）を格納する変数名
    pub result_var: String,
}

/// DATABASE ノードの操作種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbOperation {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl DbOperation {
    /// 行を返す操作かどうか
    pub fn returns_rows(self) -> bool {
        matches!(self, DbOperation::Select)
    }
}

/// ANNOTATION ノード
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationNode {
    pub text: String,
}

/// DELAY ノード
#[derive(Debug, Clone, PartialEq)]
pub struct DelayNode {
    pub delay_seconds: u64,
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// ノード単体で判断できるバリデーションのみ行います。
/// ノード間の参照整合性は [`Workflow`](super::workflow::Workflow) 側で検証します。
impl TryFrom<NodeDto> for Node {
    type Error = ConfigError;

    fn try_from(dto: NodeDto) -> Result<Self, Self::Error> {
        if dto.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ノードIDが空です".to_string(),
            ));
        }

        let kind = match dto.kind {
            NodeKindDto::Start {} => NodeKind::Start,
            NodeKindDto::End {} => NodeKind::End,
            NodeKindDto::Action {
                script,
                on_error,
                output_variable,
            } => NodeKind::Action(ActionNode {
                script,
                on_error,
                output_variable: non_empty(output_variable),
            }),
            NodeKindDto::Decision {
                condition,
                true_path,
                false_path,
            } => NodeKind::Decision(DecisionNode {
                condition,
                true_path: non_empty(true_path),
                false_path: non_empty(false_path),
            }),
            NodeKindDto::Loop {
                script,
                iterations,
                on_error,
                loop_var,
            } => NodeKind::Loop(LoopNode {
                script,
                iterations: parse_iterations(&dto.id, iterations)?,
                on_error,
                loop_var: non_empty(loop_var),
            }),
            NodeKindDto::Database {
                host,
                port,
                user,
                password,
                database,
                query,
                operation,
                result_var,
            } => NodeKind::Database(DatabaseNode {
                host,
                port,
                user,
                password,
                database,
                query,
                operation,
                result_var,
            }),
            NodeKindDto::Annotation { text } => NodeKind::Annotation(AnnotationNode { text }),
            NodeKindDto::Delay { delay_seconds } => NodeKind::Delay(DelayNode { delay_seconds }),
        };

        Ok(Node {
            id: dto.id,
            label: dto.label,
            position: dto.position,
            enabled: dto.enabled,
            kind,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
impl From<Node> for NodeDto {
    fn from(node: Node) -> Self {
        let kind = match node.kind {
            NodeKind::Start => NodeKindDto::Start {},
            NodeKind::End => NodeKindDto::End {},
            NodeKind::Action(action) => NodeKindDto::Action {
                script: action.script,
                on_error: action.on_error,
                output_variable: action.output_variable,
            },
            NodeKind::Decision(decision) => NodeKindDto::Decision {
                condition: decision.condition,
                true_path: decision.true_path,
                false_path: decision.false_path,
            },
            NodeKind::Loop(lp) => NodeKindDto::Loop {
                script: lp.script,
                iterations: Some(match lp.iterations {
                    Iterations::Count(count) => Value::from(count),
                    Iterations::Variable(name) => Value::String(name),
                }),
                on_error: lp.on_error,
                loop_var: lp.loop_var,
            },
            NodeKind::Database(db) => NodeKindDto::Database {
                host: db.host,
                port: db.port,
                user: db.user,
                password: db.password,
                database: db.database,
                query: db.query,
                operation: db.operation,
                result_var: db.result_var,
            },
            NodeKind::Annotation(annotation) => NodeKindDto::Annotation {
                text: annotation.text,
            },
            NodeKind::Delay(delay) => NodeKindDto::Delay {
                delay_seconds: delay.delay_seconds,
            },
        };

        NodeDto {
            id: node.id,
            label: node.label,
            position: node.position,
            enabled: node.enabled,
            kind,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// 未指定のループ回数は 0 回として扱い、lint で警告する
fn parse_iterations(node_id: &str, raw: Option<Value>) -> Result<Iterations, ConfigError> {
    match raw {
        None | Some(Value::Null) => Ok(Iterations::Count(0)),
        Some(Value::Number(n)) => n.as_u64().map(Iterations::Count).ok_or_else(|| {
            ConfigError::Validation(format!(
                "ノード '{}' の iterations は0以上の整数である必要があります: {}",
                node_id, n
            ))
        }),
        Some(Value::String(s)) => Ok(Iterations::parse(&s).unwrap_or(Iterations::Count(0))),
        Some(other) => Err(ConfigError::Validation(format!(
            "ノード '{}' の iterations が不正です: {}",
            node_id, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterations_parse_literal() {
        assert_eq!(Iterations::parse("3"), Some(Iterations::Count(3)));
        assert_eq!(Iterations::parse(" 12 "), Some(Iterations::Count(12)));
    }

    #[test]
    fn test_iterations_parse_variable() {
        assert_eq!(
            Iterations::parse("patients"),
            Some(Iterations::Variable("patients".to_string()))
        );
        assert_eq!(Iterations::parse("   "), None);
    }

    #[test]
    fn test_db_operation_returns_rows() {
        assert!(DbOperation::Select.returns_rows());
        assert!(!DbOperation::Delete.returns_rows());
    }

    #[test]
    fn test_error_policy_default_is_stop() {
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Stop);
    }
}
