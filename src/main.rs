//! rpa-flow コマンドラインインターフェース
//!
//! - `run`: ワークフローを実行し、Run Report（JSON）を標準出力に書き出す
//! - `validate`: ワークフローを読み込み、構造と条件式を検査する

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use rpa_flow::config::settings::{LogFormat, LoggingSettings};
use rpa_flow::config::{EngineSettings, LintIssue, NodeKind, Severity, Workflow};
use rpa_flow::engine::{condition, WorkflowExecutor};
use rpa_flow::notify::TelegramNotifier;

/// 読み込み・設定エラーの終了コード（実行失敗の 1 と区別する）
const EXIT_LOAD_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "rpa-flow", version, about = "Graph-based workflow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print its report
    Run(RunArgs),
    /// Check a workflow without running it
    Validate {
        /// Workflow definition (JSON)
        workflow: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Workflow definition (JSON)
    workflow: PathBuf,

    /// Engine settings (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override a workflow variable (KEY=VALUE, VALUE is parsed as JSON when possible)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    vars: Vec<(String, Value)>,

    /// Also write the report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log format on stderr (defaults to the settings file)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { workflow } => validate(&workflow),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "rpa-flow aborted");
            eprintln!("error: {e}");
            ExitCode::from(EXIT_LOAD_ERROR)
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode, Box<dyn Error>> {
    let settings = match &args.config {
        Some(path) => EngineSettings::from_file(path)?,
        None => EngineSettings::default(),
    };
    let format = args.log_format.unwrap_or(settings.logging.format);
    let log_file = run_log_path(&settings.logging, &args.workflow);
    let _guard = init_tracing(&settings.logging, format, Some(&log_file))?;

    let workflow = Arc::new(Workflow::from_file(&args.workflow)?);
    info!(
        workflow = %workflow.name(),
        log_file = %log_file.display(),
        "workflow loaded"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let variables: Map<String, Value> = args.vars.into_iter().collect();
    let report = WorkflowExecutor::new(workflow)
        .with_settings(settings.clone())
        .with_cancellation(cancel)
        .with_variables(variables)
        .execute()
        .await;

    let json = report.to_json()?;
    println!("{json}");
    if let Some(path) = &args.report {
        std::fs::write(path, &json)?;
    }

    if report.is_success() {
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(notify) = &settings.notify {
        if let Err(e) = TelegramNotifier::new(notify).notify_failure(&report).await {
            warn!(error = %e, "failure notification was not delivered");
        }
    }
    Ok(ExitCode::FAILURE)
}

fn validate(path: &Path) -> Result<ExitCode, Box<dyn Error>> {
    let _guard = init_tracing(&LoggingSettings::default(), LogFormat::Text, None)?;

    let workflow = Workflow::from_file(path)?;
    let mut issues = workflow.lint();
    for node in workflow.nodes() {
        if let NodeKind::Decision(decision) = &node.kind {
            if decision.condition.trim().is_empty() {
                continue;
            }
            if let Err(e) = condition::check_syntax(&decision.condition) {
                issues.push(LintIssue {
                    node_id: Some(node.id.clone()),
                    message: e.to_string(),
                    severity: Severity::Error,
                });
            }
        }
    }

    for issue in &issues {
        let level = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &issue.node_id {
            Some(id) => println!("{level}: [{id}] {}", issue.message),
            None => println!("{level}: {}", issue.message),
        }
    }

    let errors = issues
        .iter()
        .filter(|issue| issue.severity == Severity::Error)
        .count();
    println!(
        "{}: {} node(s), {} error(s), {} warning(s)",
        workflow.name(),
        workflow.nodes().len(),
        errors,
        issues.len() - errors
    );

    Ok(if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `<log_dir>/<workflow stem>_<YYYYmmdd_HHMMSS>.log`
fn run_log_path(logging: &LoggingSettings, workflow: &Path) -> PathBuf {
    let stem = workflow
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");
    logging.dir.join(format!(
        "{}_{}.log",
        stem,
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// tracing の初期化
///
/// `RUST_LOG` が設定されていればそれを、なければ `logging.level` をフィルタに使います。
/// `log_file` を指定した場合はファイルにも書き出し、書き込みスレッドのガードを返します。
fn init_tracing(
    logging: &LoggingSettings,
    format: LogFormat,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = path.file_name().unwrap_or_else(|| "rpa-flow.log".as_ref());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// `KEY=VALUE` を解析する（VALUE は JSON として解釈できなければ文字列）
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("'{raw}' は KEY=VALUE 形式ではありません"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("'{raw}' のキーが空です"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(
            parse_key_value("name=Ana").unwrap(),
            ("name".to_string(), json!("Ana"))
        );
        assert_eq!(
            parse_key_value("items=[1,2]").unwrap(),
            ("items".to_string(), json!([1, 2]))
        );
        assert_eq!(
            parse_key_value("url=a=b").unwrap(),
            ("url".to_string(), json!("a=b"))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_run_log_path() {
        let logging = LoggingSettings::default();
        let path = run_log_path(&logging, Path::new("flows/citas.json"));

        assert_eq!(path.parent(), Some(Path::new("logs")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("citas_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "rpa-flow",
            "run",
            "wf.json",
            "--var",
            "x=1",
            "--log-format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.workflow, PathBuf::from("wf.json"));
                assert_eq!(args.vars, vec![("x".to_string(), json!(1))]);
                assert_eq!(args.log_format, Some(LogFormat::Json));
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }
}
