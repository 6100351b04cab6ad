//! RPA Flow - ワークフロー実行エンジン
//!
//! ノード（ACTION / DECISION / LOOP / DATABASE / DELAY ...）とエッジで定義された
//! ワークフローグラフを辿り、外部スクリプトの実行・条件分岐・繰り返し・
//! データベース操作を1つの実行コンテキストを通して行います。
//!
//! # モジュール構成
//!
//! - [`config`][]: ワークフロー定義（JSON）とエンジン設定（TOML）
//! - [`engine`][]: 実行エンジン
//! - [`notify`][]: 失敗通知
//! - [`error`][]: エラー型

pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
