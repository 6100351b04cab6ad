//! Workflow 定義の読み込みと管理を行うモジュール
//!
//! # 責務
//!
//! このモジュールは、ノードとエッジからなるワークフローグラフを JSON 形式で定義し、
//! それを Rust の型として扱うための機能を提供します。
//!
//! ## 主な機能
//!
//! - **JSON パース**: ワークフロー定義を読み込み、[`Workflow`] 構造体に変換
//! - **バリデーション**: ノードIDの一意性、エッジ参照の整合性、START ノードの存在を検証
//! - **グラフ操作**: ID によるノード参照、後続ノードの解決
//! - **lint**: 実行は可能だが疑わしい定義（スクリプト未設定、到達不能ノード等）を報告
//!
//! ## 設計思想
//!
//! - **読み込み後は不変**: 実行中に定義が変わることはない。編集したら再読み込みする
//! - **共有可能**: 同じ定義の並行実行では `Arc<Workflow>` を読み取り専用で共有する
//!
//! ## 使用例
//!
//! ```json
//! {
//!   "name": "verifica-inicio",
//!   "nodes": [
//!     {"id": "start", "type": "START", "label": "Inicio"},
//!     {"id": "check", "type": "ACTION", "label": "Check", "script": "scripts/check.py"},
//!     {"id": "end", "type": "END", "label": "Fin"}
//!   ],
//!   "edges": [
//!     {"from_node": "start", "to_node": "check"},
//!     {"from_node": "check", "to_node": "end"}
//!   ],
//!   "variables": {"retries": 3}
//! }
//! ```
//!
//! ## 関連モジュール
//!
//! - [`crate::config::node`]: 各ノードの定義
//! - [`crate::engine::executor`]: ワークフローの実行エンジン

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::{Map, Value};

use super::dto::{EdgeDto, NodeDto, WorkflowDto};
use super::node::{Iterations, Node, NodeKind};
use crate::error::ConfigError;

/// ワークフロー定義（ドメインモデル）
///
/// バリデーション済みの状態を保証します。
///
/// ## DTO との違い
///
/// - `WorkflowDto`: JSON デシリアライズ専用、バリデーション前の生データ
/// - [`Workflow`]: バリデーション済み、グラフ操作を持つ
#[derive(Debug, Clone)]
pub struct Workflow {
    id: Option<String>,
    name: String,
    description: Option<String>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    variables: Map<String, Value>,
}

/// ノード間の有向エッジ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
    pub label: Option<String>,
}

/// lint の深刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// lint で検出された問題
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    /// 問題のあるノード（ワークフロー全体の問題なら `None`）
    pub node_id: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl LintIssue {
    fn error(node_id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    fn warning(node_id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

impl Workflow {
    /// JSON ファイルからワークフローを読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. JSON デシリアライズ → `WorkflowDto`
    /// 3. バリデーション & 変換 → [`Workflow`]
    ///
    /// # 戻り値
    ///
    /// * `Ok(Workflow)` - 読み込みに成功した場合
    /// * `Err(ConfigError)` - 読み込み・パース・バリデーションに失敗した場合
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load(&content)
    }

    /// JSON 文字列からワークフローを読み込む
    ///
    /// # エラー
    ///
    /// - [`ConfigError::Parse`] - JSON として不正、または必須フィールドの欠落
    /// - [`ConfigError::Validation`] - 未知のノードを参照するエッジ、START ノードの欠落など
    ///
    /// # 例
    ///
    /// ```rust
    /// use rpa_flow::config::Workflow;
    ///
    /// let workflow = Workflow::load(r#"{
    ///     "name": "minimal",
    ///     "nodes": [
    ///         {"id": "s", "type": "START"},
    ///         {"id": "e", "type": "END"}
    ///     ],
    ///     "edges": [{"from_node": "s", "to_node": "e"}]
    /// }"#).unwrap();
    ///
    /// assert_eq!(workflow.successor_of("s"), Some("e"));
    /// assert_eq!(workflow.successor_of("e"), None);
    /// ```
    pub fn load(source: &str) -> Result<Self, ConfigError> {
        let dto: WorkflowDto = serde_json::from_str(source).map_err(ConfigError::Parse)?;
        Self::try_from(dto)
    }

    /// ワークフローを JSON 文字列に変換
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let dto = WorkflowDto::from(self.clone());
        serde_json::to_string_pretty(&dto).map_err(ConfigError::Serialize)
    }

    /// ワークフローを JSON ファイルに保存
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// ワークフロー名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// ワークフローID（定義ファイルに含まれている場合）
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 説明
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// 定義順のノード一覧
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// 定義順のエッジ一覧
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// 実行開始時のコンテキストになる初期変数
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// ID でノードを取得する
    ///
    /// # エラー
    ///
    /// - [`ConfigError::NotFound`] - 該当するノードが存在しない
    pub fn get_node(&self, id: &str) -> Result<&Node, ConfigError> {
        self.index
            .get(id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| ConfigError::NotFound(id.to_string()))
    }

    /// START ノード
    ///
    /// バリデーションで存在が保証されています。
    pub fn start_node(&self) -> &Node {
        self.nodes
            .iter()
            .find(|node| matches!(node.kind, NodeKind::Start))
            .unwrap_or(&self.nodes[0])
    }

    /// 汎用エッジによる後続ノードを解決する
    ///
    /// DECISION ノードは `true_path`/`false_path` で分岐するため常に `None`。
    /// END ノードや出力エッジのないノードも `None` を返します。
    pub fn successor_of(&self, node_id: &str) -> Option<&str> {
        match self.get_node(node_id).map(|node| &node.kind) {
            Ok(NodeKind::Decision(_)) | Ok(NodeKind::End) | Err(_) => None,
            Ok(_) => self
                .edges
                .iter()
                .find(|edge| edge.from_node == node_id)
                .map(|edge| edge.to_node.as_str()),
        }
    }

    /// 実行は可能だが疑わしい定義を検出する
    ///
    /// 読み込み時のバリデーションとは異なり、ここで見つかった問題は
    /// ワークフローの読み込みを妨げません。
    pub fn lint(&self) -> Vec<LintIssue> {
        let mut issues = Vec::new();
        let has_incoming: HashSet<&str> = self
            .edges
            .iter()
            .map(|edge| edge.to_node.as_str())
            .chain(self.nodes.iter().filter_map(|node| match &node.kind {
                NodeKind::Decision(d) => Some([d.true_path.as_deref(), d.false_path.as_deref()]),
                _ => None,
            }).flatten().flatten())
            .collect();

        for node in &self.nodes {
            match &node.kind {
                NodeKind::Action(action) if action.script.trim().is_empty() => {
                    issues.push(LintIssue::error(&node.id, "スクリプトが設定されていません"));
                }
                NodeKind::Loop(lp) => {
                    if lp.script.trim().is_empty() {
                        issues.push(LintIssue::error(&node.id, "スクリプトが設定されていません"));
                    }
                    if lp.iterations == Iterations::Count(0) {
                        issues.push(LintIssue::warning(
                            &node.id,
                            "繰り返し回数（または変数）が設定されていません",
                        ));
                    }
                }
                NodeKind::Decision(decision) => {
                    if decision.condition.trim().is_empty() {
                        issues.push(LintIssue::error(&node.id, "条件式が空です"));
                    }
                    if !node.enabled {
                        issues.push(LintIssue::error(
                            &node.id,
                            "無効化された DECISION ノードは実行時に失敗します",
                        ));
                    }
                    if decision.true_path.is_none() && decision.false_path.is_none() {
                        issues.push(LintIssue::warning(
                            &node.id,
                            "分岐先（true_path / false_path）が1つもありません",
                        ));
                    }
                    if self.edges.iter().any(|edge| edge.from_node == node.id) {
                        issues.push(LintIssue::warning(
                            &node.id,
                            "DECISION ノードの汎用エッジは実行時に無視されます",
                        ));
                    }
                }
                _ => {}
            }

            let documentary = matches!(node.kind, NodeKind::Annotation(_));
            if !documentary
                && !matches!(node.kind, NodeKind::Start)
                && !has_incoming.contains(node.id.as_str())
            {
                issues.push(LintIssue::warning(
                    &node.id,
                    "到達不能なノードです（入力エッジがありません）",
                ));
            }
            if !documentary
                && !matches!(node.kind, NodeKind::End | NodeKind::Decision(_))
                && self.successor_of(&node.id).is_none()
            {
                issues.push(LintIssue::warning(
                    &node.id,
                    "出力エッジがありません（フローはここで終了します）",
                ));
            }
        }

        issues
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// バリデーションを実施し、不正なデータの場合は [`ConfigError::Validation`] を返します。
///
/// # 処理フロー
///
/// 1. ノードの変換（`NodeDto` → [`Node`]）と ID の一意性チェック
/// 2. START ノードがちょうど1つあることの確認
/// 3. エッジと分岐先の参照整合性チェック
/// 4. 非 DECISION ノードの出力エッジが高々1本であることの確認
impl TryFrom<WorkflowDto> for Workflow {
    type Error = ConfigError;

    fn try_from(dto: WorkflowDto) -> Result<Self, Self::Error> {
        let mut nodes = Vec::with_capacity(dto.nodes.len());
        let mut index = HashMap::with_capacity(dto.nodes.len());

        for node_dto in dto.nodes {
            let node = Node::try_from(node_dto)?;
            if index.insert(node.id.clone(), nodes.len()).is_some() {
                return Err(ConfigError::Validation(format!(
                    "ノードID '{}' が重複しています",
                    node.id
                )));
            }
            nodes.push(node);
        }

        let starts = nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::Start))
            .count();
        match starts {
            0 => {
                return Err(ConfigError::Validation(
                    "START ノードがありません".to_string(),
                ));
            }
            1 => {}
            n => {
                return Err(ConfigError::Validation(format!(
                    "START ノードは1つだけ定義できます（{}個あります）",
                    n
                )));
            }
        }

        let edges: Vec<Edge> = dto
            .edges
            .into_iter()
            .map(|e| Edge {
                from_node: e.from_node,
                to_node: e.to_node,
                label: e.label,
            })
            .collect();

        for edge in &edges {
            for endpoint in [&edge.from_node, &edge.to_node] {
                if !index.contains_key(endpoint) {
                    return Err(ConfigError::Validation(format!(
                        "エッジ {} -> {} が未知のノード '{}' を参照しています",
                        edge.from_node, edge.to_node, endpoint
                    )));
                }
            }
        }

        let mut out_degree: HashMap<&str, usize> = HashMap::new();
        for edge in &edges {
            *out_degree.entry(edge.from_node.as_str()).or_insert(0) += 1;
        }

        for node in &nodes {
            if let NodeKind::Decision(decision) = &node.kind {
                for path in [&decision.true_path, &decision.false_path].into_iter().flatten() {
                    if !index.contains_key(path) {
                        return Err(ConfigError::Validation(format!(
                            "DECISION ノード '{}' の分岐先 '{}' が存在しません",
                            node.id, path
                        )));
                    }
                }
                continue;
            }
            let degree = out_degree.get(node.id.as_str()).copied().unwrap_or(0);
            if degree > 1 {
                return Err(ConfigError::Validation(format!(
                    "ノード '{}' に出力エッジが{}本あります（分岐は DECISION ノードで行ってください）",
                    node.id, degree
                )));
            }
        }

        Ok(Workflow {
            id: dto.id,
            name: dto.name,
            description: dto.description,
            nodes,
            index,
            edges,
            variables: dto.variables,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<Workflow> for WorkflowDto {
    fn from(workflow: Workflow) -> Self {
        WorkflowDto {
            id: workflow.id,
            name: workflow.name,
            description: workflow.description,
            nodes: workflow.nodes.into_iter().map(NodeDto::from).collect(),
            edges: workflow
                .edges
                .into_iter()
                .map(|e| EdgeDto {
                    from_node: e.from_node,
                    to_node: e.to_node,
                    label: e.label,
                })
                .collect(),
            variables: workflow.variables,
        }
    }
}
