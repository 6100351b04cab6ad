//! ステップランナー（外部スクリプトの実行）
//!
//! # 責務
//!
//! ACTION ノード、または LOOP ノードの1回分の繰り返しに対応する外部プログラムを起動し、
//! その結果を取り出します。
//!
//! # プロセス契約
//!
//! - 入力: 実行コンテキストの全変数を環境変数として渡す（親プロセスの環境は継承）
//! - 出力: 標準出力の**最後の空でない行**を JSON オブジェクトとして解釈し、
//!   コンテキストへの更新とする。それ以外の行は診断テキストとしてログに残す
//! - 終了コード 0 が成功。非0は JSON を出力していても失敗
//!
//! # 起動規則
//!
//! 1. スクリプトが既存ファイルで、拡張子にインタプリタが割り当てられていれば `<interpreter> <script>`
//! 2. 既存ファイルならそのまま実行
//! 3. それ以外は文字列をシェルに渡す（`sh -c` / `cmd /C`）
//!
//! ランナー自身はリトライしません。失敗時の扱いはノードの `on_error` で決まります。

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::settings::StepSettings;
use crate::engine::context::ExecutionContext;
use crate::error::StepError;

/// 1ステップの実行結果
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// 終了コード（成功時は常に 0）
    pub exit_code: i32,
    /// 最終行の JSON オブジェクト
    pub parsed_update: Map<String, Value>,
    /// 標準出力全体
    pub raw_stdout: String,
}

impl StepOutcome {
    /// 結果行を除いた診断出力
    ///
    /// 前後の空白を取り除いた文字列を返します。診断出力がなければ空文字列です。
    pub fn diagnostics(&self) -> String {
        let lines: Vec<&str> = self.raw_stdout.lines().collect();
        match lines.iter().rposition(|line| !line.trim().is_empty()) {
            Some(last) => lines[..last].join("\n").trim().to_string(),
            None => String::new(),
        }
    }
}

/// ステップランナー
///
/// エグゼキューターとプロセス起動の境界です。
/// テストではスクリプト化された実装に差し替えます。
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// スクリプトを1回実行する
    ///
    /// # 引数
    ///
    /// - `script`: ノードの `script`
    /// - `context`: 環境変数として渡すコンテキスト（LOOP の `current_index` 等を含む）
    /// - `cancel`: キャンセル用トークン。キャンセルされたら子プロセスを終了させる
    ///
    /// # エラー
    ///
    /// - [`StepError::Failure`] - 非0の終了コード
    /// - [`StepError::Timeout`] - タイムアウト（子プロセスは kill 済み）
    /// - [`StepError::Output`] - 最終行が JSON オブジェクトではない
    /// - [`StepError::Spawn`] - 起動に失敗
    /// - [`StepError::Cancelled`] - キャンセルされた
    async fn run(
        &self,
        script: &str,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError>;
}

/// 子プロセスとしてスクリプトを実行するランナー
#[derive(Debug, Clone, Default)]
pub struct ProcessStepRunner {
    settings: StepSettings,
}

impl ProcessStepRunner {
    /// 新しいランナーを生成
    ///
    /// # 引数
    ///
    /// - `settings`: タイムアウトと拡張子ごとのインタプリタ
    pub fn new(settings: StepSettings) -> Self {
        Self { settings }
    }

    fn build_command(&self, script: &str) -> Command {
        if Path::new(script).is_file() {
            match self.settings.interpreter_for(script) {
                Some(interpreter) => {
                    let mut command = Command::new(interpreter);
                    command.arg(script);
                    command
                }
                None => Command::new(script),
            }
        } else {
            shell_command(script)
        }
    }
}

#[cfg(windows)]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(script);
    command
}

#[cfg(not(windows))]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[async_trait]
impl StepRunner for ProcessStepRunner {
    async fn run(
        &self,
        script: &str,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let mut command = self.build_command(script);
        command
            .envs(context.to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // 孫プロセスもまとめて終了できるよう、子を新しいプロセスグループの先頭にする
        #[cfg(unix)]
        command.process_group(0);

        debug!(script, timeout_secs = self.settings.timeout_secs, "spawning step");
        let child = command.spawn()?;
        #[cfg(unix)]
        let mut group = ProcessGroup::new(child.id());

        // タイムアウト・キャンセルで return すると group の破棄でグループ全体が終了する
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            result = tokio::time::timeout(self.settings.timeout(), child.wait_with_output()) => {
                match result {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(StepError::Timeout {
                            timeout_secs: self.settings.timeout_secs,
                        });
                    }
                }
            }
        };

        #[cfg(unix)]
        group.release();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(StepError::Failure {
                exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                raw_stdout: stdout,
            });
        }

        let parsed_update = parse_result_line(&stdout)?;

        Ok(StepOutcome {
            exit_code,
            parsed_update,
            raw_stdout: stdout,
        })
    }
}

/// ステップのプロセスグループ
///
/// 破棄されると、まだ解放されていなければグループ全体に SIGKILL を送ります。
#[cfg(unix)]
struct ProcessGroup {
    pgid: Option<libc::pid_t>,
}

#[cfg(unix)]
impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    /// 子プロセスが正常に終了した後は何もしない
    fn release(&mut self) {
        self.pgid = None;
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg はシグナルを送るだけで、このプロセスのメモリには触れない
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                debug!(pgid, "process group already exited");
            } else {
                debug!(pgid, "killed step process group");
            }
        }
    }
}

/// 標準出力の最後の空でない行を JSON オブジェクトとして解釈する
///
/// # 例
///
/// ```rust
/// use rpa_flow::engine::runner::parse_result_line;
///
/// let update = parse_result_line("abriendo portal...\n{\"status\": \"ok\"}\n\n").unwrap();
/// assert_eq!(update["status"], "ok");
///
/// assert!(parse_result_line("sin json\n").is_err());
/// assert!(parse_result_line("[1, 2]").is_err());
/// ```
pub fn parse_result_line(stdout: &str) -> Result<Map<String, Value>, StepError> {
    let output_error = |reason: String| StepError::Output {
        reason,
        raw_stdout: stdout.to_string(),
    };

    let last = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| output_error("標準出力が空です".to_string()))?;

    match serde_json::from_str::<Value>(last) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(output_error(format!(
            "最終行が JSON オブジェクトではありません: {}",
            other
        ))),
        Err(e) => Err(output_error(format!("最終行が JSON ではありません: {}", e))),
    }
}
