//! 設定・ワークフロー定義
//!
//! # 責務
//!
//! - ワークフロー定義（JSON）の読み込み・バリデーション・保存
//! - ノードの型定義（閉じた列挙型として表現）
//! - エンジン設定（TOML）の読み込み
//!
//! # モジュール構成
//!
//! - [`workflow`][]: ワークフロー（ドメインモデル）とグラフ操作
//! - [`node`][]: ノードの種類ごとの型
//! - [`settings`][]: エンジン設定
//! - `dto`: JSON デシリアライズ専用の DTO（非公開）

mod dto;
pub mod node;
pub mod settings;
pub mod workflow;

pub use node::{
    ActionNode, AnnotationNode, DatabaseNode, DbOperation, DecisionNode, DelayNode, ErrorPolicy,
    Iterations, LoopNode, Node, NodeKind, Position,
};
pub use settings::EngineSettings;
pub use workflow::{Edge, LintIssue, Severity, Workflow};
