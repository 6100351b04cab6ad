//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! このモジュールは、ワークフローの実行を制御する `WorkflowExecutor` を提供します。
//! START ノードから1ノードずつグラフを辿り、ノードの種類ごとの契約に従って実行し、
//! 実行コンテキストをすべてのノードに受け渡します。
//!
//! # 主要な型
//!
//! - [`WorkflowExecutor`][]: ワークフロー実行の中核となる構造体
//!
//! # 実行フロー
//!
//! 1. ワークフロー定義の初期変数（と呼び出し側の上書き）からコンテキストを生成
//! 2. START ノードから、現在のノードを解決してディスパッチ
//!    - START / ANNOTATION / 無効ノード: ログに記録して後続へ
//!    - ACTION: ステップを1回実行し、出力をマージ
//!    - DECISION: 条件式を評価し `true_path` / `false_path` へ
//!    - LOOP: 繰り返し回数を決定し、ステップを繰り返し実行
//!    - DATABASE: 1文を発行し、結果を `result_var` に格納
//!    - DELAY: 指定秒数待機
//!    - END: 成功として終了
//! 3. 成功・失敗・ノード訪問数の上限超過・キャンセルのいずれかで停止
//! 4. Run Report を返す
//!
//! 実行は1本のタスク上で逐次的に進みます（分岐の並列実行はありません）。
//! 同じ定義を複数同時に実行する場合は、`Arc<Workflow>` を共有して
//! 実行ごとにエグゼキューターを生成してください。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rpa_flow::config::Workflow;
//! use rpa_flow::engine::executor::WorkflowExecutor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Arc::new(Workflow::from_file("workflows/example.json")?);
//!     let report = WorkflowExecutor::new(workflow).execute().await;
//!
//!     if report.is_success() {
//!         println!("ワークフロー成功! {:?}", report.context);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use chrono::Local;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::node::{
    ActionNode, DatabaseNode, DecisionNode, DelayNode, ErrorPolicy, Iterations, LoopNode, Node,
    NodeKind,
};
use crate::config::settings::EngineSettings;
use crate::config::workflow::Workflow;
use crate::engine::condition;
use crate::engine::context::ExecutionContext;
use crate::engine::database::{DatabaseClient, MySqlClient};
use crate::engine::result::{ExecutionError, RunReport, RunStatus};
use crate::engine::run_log::RunLog;
use crate::engine::runner::{ProcessStepRunner, StepOutcome, StepRunner};
use crate::error::{ConfigError, StepError};

/// LOOP ノードが公開する変数
const CURRENT_INDEX: &str = "current_index";
const CURRENT_ITEM: &str = "current_item";

/// ワークフロー実行エンジン
///
/// # フィールド
///
/// - `workflow`: 実行するワークフロー定義（読み取り専用で共有）
/// - `settings`: 実行上限とステップ設定
/// - `runner`: ステップランナー（未設定なら `settings.step` から [`ProcessStepRunner`] を生成）
/// - `database`: DATABASE ノードの接続先
/// - `cancel`: 協調的キャンセル用トークン
/// - `variables`: 定義の `variables` を上書きする初期変数
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    settings: EngineSettings,
    runner: Option<Arc<dyn StepRunner>>,
    database: Arc<dyn DatabaseClient>,
    cancel: CancellationToken,
    variables: Map<String, Value>,
}

/// 1回の実行の可変状態
struct RunState {
    context: ExecutionContext,
    log: RunLog,
    visits: usize,
}

/// LOOP ノードの繰り返し対象
enum LoopPlan {
    Counted(u64),
    Items(Vec<Value>),
}

impl LoopPlan {
    fn len(&self) -> u64 {
        match self {
            LoopPlan::Counted(count) => *count,
            LoopPlan::Items(items) => items.len() as u64,
        }
    }
}

impl WorkflowExecutor {
    /// 新しいエグゼキューターを生成
    ///
    /// # 引数
    ///
    /// - `workflow`: 実行するワークフロー定義
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            settings: EngineSettings::default(),
            runner: None,
            database: Arc::new(MySqlClient::new()),
            cancel: CancellationToken::new(),
            variables: Map::new(),
        }
    }

    /// エンジン設定を指定
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// ステップランナーを差し替える
    pub fn with_step_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// データベースクライアントを差し替える
    pub fn with_database(mut self, database: Arc<dyn DatabaseClient>) -> Self {
        self.database = database;
        self
    }

    /// キャンセル用トークンを指定
    ///
    /// トークンはノードのディスパッチ間で確認され、実行中の子プロセスと
    /// DELAY の待機にも伝播します。
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 初期変数を上書きする
    ///
    /// 定義の `variables` にマージされます（こちらが優先）。
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// ワークフローを実行
    ///
    /// 毎回新しいコンテキストで実行します。失敗もエラーではなく
    /// `status == failed` の [`RunReport`] として返ります。
    ///
    /// # 例
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use rpa_flow::config::Workflow;
    /// # use rpa_flow::engine::executor::WorkflowExecutor;
    /// # async fn example() {
    /// let workflow = Arc::new(Workflow::from_file("workflow.json").unwrap());
    /// let report = WorkflowExecutor::new(workflow).execute().await;
    ///
    /// println!("{}", report.to_json().unwrap());
    /// # }
    /// ```
    pub async fn execute(&self) -> RunReport {
        let started_at = Local::now();

        let mut initial = self.workflow.variables().clone();
        initial.extend(self.variables.clone());

        let mut state = RunState {
            context: ExecutionContext::with_variables(initial),
            log: RunLog::new(self.workflow.name()),
            visits: 0,
        };
        state
            .log
            .info(format!("workflow '{}' started", self.workflow.name()));

        let runner = self.runner.clone().unwrap_or_else(|| {
            Arc::new(ProcessStepRunner::new(self.settings.step.clone())) as Arc<dyn StepRunner>
        });

        let outcome = self.drive(&mut state, runner.as_ref()).await;

        let (status, error, error_kind) = match outcome {
            Ok(()) => {
                state
                    .log
                    .info(format!("workflow '{}' succeeded", self.workflow.name()));
                (RunStatus::Success, None, None)
            }
            Err(e) => {
                state.log.error(format!(
                    "workflow '{}' failed: {}",
                    self.workflow.name(),
                    e
                ));
                (RunStatus::Failed, Some(e.to_string()), Some(e.kind()))
            }
        };

        RunReport {
            workflow: self.workflow.name().to_string(),
            status,
            context: state.context.snapshot(),
            logs: state.log.into_entries(),
            error,
            error_kind,
            started_at,
            finished_at: Local::now(),
            nodes_visited: state.visits,
        }
    }

    /// 状態機械のメインループ
    async fn drive(
        &self,
        state: &mut RunState,
        runner: &dyn StepRunner,
    ) -> Result<(), ExecutionError> {
        let limit = self.settings.engine.max_node_visits;
        let mut current = Some(self.workflow.start_node().id.clone());

        while let Some(node_id) = current {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if state.visits >= limit {
                return Err(ExecutionError::InfiniteLoopGuard { limit });
            }
            state.visits += 1;

            let node = self.workflow.get_node(&node_id)?;
            current = self.dispatch(node, state, runner).await?;
        }

        Ok(())
    }

    /// ノードを1つ実行し、次のノードIDを返す（`None` なら成功として終了）
    async fn dispatch(
        &self,
        node: &Node,
        state: &mut RunState,
        runner: &dyn StepRunner,
    ) -> Result<Option<String>, ExecutionError> {
        if !node.enabled && !matches!(node.kind, NodeKind::Start | NodeKind::End) {
            // 分岐先は DECISION 自身の true_path / false_path にしかない
            if matches!(node.kind, NodeKind::Decision(_)) {
                state
                    .log
                    .error(format!("[{}] DECISION is disabled, no branch can be taken", node.id));
                return Err(ConfigError::Validation(format!(
                    "DECISION ノード '{}' が無効化されているため分岐先を決定できません",
                    node.id
                ))
                .into());
            }
            state
                .log
                .info(format!("[{}] {} skipped (disabled)", node.id, node.type_name()));
            return Ok(self.advance(node, state));
        }

        match &node.kind {
            NodeKind::Start => {
                state.log.info(format!("[{}] START", node.id));
                Ok(self.advance(node, state))
            }
            NodeKind::End => {
                state.log.info(format!("[{}] END", node.id));
                Ok(None)
            }
            NodeKind::Annotation(_) => {
                state.log.info(format!("[{}] annotation skipped", node.id));
                Ok(self.advance(node, state))
            }
            NodeKind::Action(action) => self.run_action(node, action, state, runner).await,
            NodeKind::Decision(decision) => self.run_decision(node, decision, state),
            NodeKind::Loop(lp) => self.run_loop(node, lp, state, runner).await,
            NodeKind::Database(db) => self.run_database(node, db, state).await,
            NodeKind::Delay(delay) => self.run_delay(node, delay, state).await,
        }
    }

    /// 汎用エッジの後続ノード。なければ警告を残して終了
    fn advance(&self, node: &Node, state: &mut RunState) -> Option<String> {
        match self.workflow.successor_of(&node.id) {
            Some(next) => Some(next.to_string()),
            None => {
                state
                    .log
                    .warning(format!("[{}] has no successor, flow ends here", node.id));
                None
            }
        }
    }

    async fn run_action(
        &self,
        node: &Node,
        action: &ActionNode,
        state: &mut RunState,
        runner: &dyn StepRunner,
    ) -> Result<Option<String>, ExecutionError> {
        match runner.run(&action.script, &state.context, &self.cancel).await {
            Ok(outcome) => {
                let diagnostics = record_outcome(&node.id, outcome, state);
                if let Some(var) = &action.output_variable {
                    state.context.set(var.clone(), Value::String(diagnostics));
                }
                state.log.info(format!("[{}] OK", node.id));
            }
            Err(e) => {
                self.absorb_step_error(&node.id, action.on_error, e, state)?;
            }
        }
        Ok(self.advance(node, state))
    }

    /// `on_error` に従ってステップエラーを処理する
    ///
    /// 吸収できた場合は `Ok(())`、実行を止める場合は `Err` を返します。
    fn absorb_step_error(
        &self,
        node_id: &str,
        policy: ErrorPolicy,
        error: StepError,
        state: &mut RunState,
    ) -> Result<(), ExecutionError> {
        if let StepError::Output { raw_stdout, .. } | StepError::Failure { raw_stdout, .. } = &error
        {
            let raw = raw_stdout.trim();
            if !raw.is_empty() {
                state.log.info(format!("[{}] output: {}", node_id, raw));
            }
        }

        if matches!(error, StepError::Cancelled) {
            return Err(ExecutionError::Cancelled);
        }

        match policy {
            ErrorPolicy::Continue if error.is_recoverable() => {
                state
                    .log
                    .warning(format!("[{}] failed, continuing: {}", node_id, error));
                Ok(())
            }
            _ => {
                state.log.error(format!("[{}] FAILED: {}", node_id, error));
                Err(ExecutionError::Step {
                    node_id: node_id.to_string(),
                    source: error,
                })
            }
        }
    }

    fn run_decision(
        &self,
        node: &Node,
        decision: &DecisionNode,
        state: &mut RunState,
    ) -> Result<Option<String>, ExecutionError> {
        let result = condition::evaluate(&decision.condition, &state.context).map_err(|source| {
            state.log.error(format!("[{}] FAILED: {}", node.id, source));
            ExecutionError::Evaluation {
                node_id: node.id.clone(),
                source,
            }
        })?;

        let branch = if result {
            &decision.true_path
        } else {
            &decision.false_path
        };
        state.log.info(format!(
            "[{}] condition '{}' is {}",
            node.id, decision.condition, result
        ));

        match branch {
            Some(next) => Ok(Some(next.clone())),
            None => {
                state.log.warning(format!(
                    "[{}] no path for {} branch, flow ends here",
                    node.id, result
                ));
                Ok(None)
            }
        }
    }

    async fn run_loop(
        &self,
        node: &Node,
        lp: &LoopNode,
        state: &mut RunState,
        runner: &dyn StepRunner,
    ) -> Result<Option<String>, ExecutionError> {
        let plan = loop_plan(&node.id, &lp.iterations, &state.context)?;
        let count = plan.len();
        let limit = self.settings.engine.max_loop_iterations;
        if count > limit {
            return Err(ExecutionError::LoopBudget {
                node_id: node.id.clone(),
                requested: count,
                limit,
            });
        }

        state
            .log
            .info(format!("[{}] LOOP starting {} iterations", node.id, count));

        // ループ変数を公開する前の値。ループ後に元に戻す
        let mut bound: Vec<&str> = vec![CURRENT_INDEX];
        if matches!(plan, LoopPlan::Items(_)) {
            bound.push(CURRENT_ITEM);
        }
        if let Some(var) = lp.loop_var.as_deref() {
            bound.push(var);
        }
        let saved: Vec<(String, Option<Value>)> = bound
            .iter()
            .map(|key| (key.to_string(), state.context.get(key).cloned()))
            .collect();

        let result = self.run_iterations(node, lp, &plan, state, runner).await;

        for (key, previous) in saved {
            match previous {
                Some(value) => state.context.set(key, value),
                None => {
                    state.context.remove(&key);
                }
            }
        }
        result?;

        state.log.info(format!("[{}] LOOP finished", node.id));
        Ok(self.advance(node, state))
    }

    async fn run_iterations(
        &self,
        node: &Node,
        lp: &LoopNode,
        plan: &LoopPlan,
        state: &mut RunState,
        runner: &dyn StepRunner,
    ) -> Result<(), ExecutionError> {
        for index in 0..plan.len() {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            state.context.set(CURRENT_INDEX, Value::from(index));
            let alias_value = match plan {
                LoopPlan::Items(items) => {
                    let item = items[index as usize].clone();
                    state.context.set(CURRENT_ITEM, item.clone());
                    item
                }
                LoopPlan::Counted(_) => Value::from(index),
            };
            if let Some(var) = &lp.loop_var {
                state.context.set(var.clone(), alias_value);
            }

            let iteration_id = format!("{}#{}", node.id, index);
            match runner.run(&lp.script, &state.context, &self.cancel).await {
                Ok(outcome) => {
                    record_outcome(&iteration_id, outcome, state);
                    state.log.info(format!("[{}] OK", iteration_id));
                }
                Err(e) => {
                    self.absorb_step_error(&iteration_id, lp.on_error, e, state)
                        .map_err(|err| match err {
                            ExecutionError::Step { source, .. } => ExecutionError::Step {
                                node_id: node.id.clone(),
                                source,
                            },
                            other => other,
                        })?;
                }
            }
        }
        Ok(())
    }

    async fn run_database(
        &self,
        node: &Node,
        db: &DatabaseNode,
        state: &mut RunState,
    ) -> Result<Option<String>, ExecutionError> {
        state.log.info(format!(
            "[{}] DATABASE {:?} on {}:{}",
            node.id, db.operation, db.host, db.port
        ));

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ExecutionError::Cancelled),
            result = self.database.execute(db) => result,
        };

        let value = result.map_err(|source| {
            state.log.error(format!("[{}] FAILED: {}", node.id, source));
            ExecutionError::Database {
                node_id: node.id.clone(),
                source,
            }
        })?;

        let summary = match &value {
            Value::Array(rows) => format!("{} rows", rows.len()),
            other => format!("{} rows affected", other),
        };
        state.context.set(db.result_var.clone(), value);
        state.log.info(format!(
            "[{}] OK ({}, stored in '{}')",
            node.id, summary, db.result_var
        ));
        Ok(self.advance(node, state))
    }

    async fn run_delay(
        &self,
        node: &Node,
        delay: &DelayNode,
        state: &mut RunState,
    ) -> Result<Option<String>, ExecutionError> {
        state
            .log
            .info(format!("[{}] DELAY {}s", node.id, delay.delay_seconds));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(std::time::Duration::from_secs(delay.delay_seconds)) => {}
        }

        Ok(self.advance(node, state))
    }
}

/// ステップ結果をコンテキストとログに反映し、診断出力を返す
fn record_outcome(node_id: &str, outcome: StepOutcome, state: &mut RunState) -> String {
    let diagnostics = outcome.diagnostics();
    if !diagnostics.is_empty() {
        state
            .log
            .info(format!("[{}] output: {}", node_id, diagnostics));
    }
    state.context.merge(outcome.parsed_update);
    diagnostics
}

/// LOOP ノードの繰り返し対象を決定する
fn loop_plan(
    node_id: &str,
    iterations: &Iterations,
    context: &ExecutionContext,
) -> Result<LoopPlan, ExecutionError> {
    let invalid = |detail: String| ExecutionError::InvalidIterations {
        node_id: node_id.to_string(),
        detail,
    };

    match iterations {
        Iterations::Count(count) => Ok(LoopPlan::Counted(*count)),
        Iterations::Variable(name) => match context.get(name) {
            None => Err(invalid(format!("変数 '{}' が定義されていません", name))),
            Some(Value::Array(items)) => Ok(LoopPlan::Items(items.clone())),
            Some(Value::Number(n)) => n.as_u64().map(LoopPlan::Counted).ok_or_else(|| {
                invalid(format!("変数 '{}' の値 {} は0以上の整数ではありません", name, n))
            }),
            Some(Value::String(s)) => s.trim().parse::<u64>().map(LoopPlan::Counted).map_err(|_| {
                invalid(format!("変数 '{}' の値 '{}' は整数ではありません", name, s))
            }),
            Some(other) => Err(invalid(format!(
                "変数 '{}' は整数またはリストである必要があります: {}",
                name, other
            ))),
        },
    }
}
