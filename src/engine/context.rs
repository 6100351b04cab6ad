//! 実行コンテキスト（ワークフロー変数）の管理
//!
//! # 責務
//!
//! - 1回の実行の間だけ存在する変数ストア
//! - ステップの出力（JSON オブジェクト）のマージ
//! - 外部プロセスに渡す環境変数への変換
//!
//! # 主要な型
//!
//! - [`ExecutionContext`][]: 変数名 → JSON 値のマップ
//!
//! # 使用例
//!
//! ```rust
//! use rpa_flow::engine::context::ExecutionContext;
//! use serde_json::json;
//!
//! let mut ctx = ExecutionContext::new();
//! ctx.set("status", json!("pending"));
//!
//! // ステップの出力をマージ（後勝ち）
//! let update = json!({"status": "ok", "count": 2});
//! ctx.merge(update.as_object().unwrap().clone());
//!
//! assert_eq!(ctx.get("status"), Some(&json!("ok")));
//! assert_eq!(ctx.get_or("missing", json!(0)), json!(0));
//!
//! // 外部プロセス向けの環境変数
//! let env = ctx.to_env();
//! assert!(env.contains(&("count".to_string(), "2".to_string())));
//! ```

use serde_json::{Map, Value};

/// 実行コンテキスト
///
/// 実行ごとに1つ生成され、実行間で共有されることはありません。
/// 値の型は検証しません（JSON として表現できれば何でも格納できます）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    variables: Map<String, Value>,
}

impl ExecutionContext {
    /// 空のコンテキストを生成
    pub fn new() -> Self {
        Self::default()
    }

    /// 初期変数からコンテキストを生成
    ///
    /// # 引数
    ///
    /// - `variables`: ワークフロー定義の `variables`（と呼び出し側の上書き）
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self { variables }
    }

    /// 変数を取得する
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// 変数を取得する（未定義ならデフォルト値）
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.variables.get(key).cloned().unwrap_or(default)
    }

    /// 変数を設定する
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// 変数を削除する
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    /// 更新をマージする
    ///
    /// キーが衝突した場合は `update` 側の値で上書きします。
    pub fn merge(&mut self, update: Map<String, Value>) {
        for (key, value) in update {
            self.variables.insert(key, value);
        }
    }

    /// レポート用のスナップショット（コピー）
    pub fn snapshot(&self) -> Map<String, Value> {
        self.variables.clone()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// 外部プロセスに渡す環境変数へ変換する
    ///
    /// # 変換規則
    ///
    /// - 文字列: そのまま
    /// - 数値・真偽値: 文字列化（`true` / `false`）
    /// - null: 空文字列
    /// - リスト・マップ: JSON 文字列
    ///
    /// 環境変数名として使えないキー（空、`=` や NUL を含む）と、
    /// NUL を含む値はスキップします。
    pub fn to_env(&self) -> Vec<(String, String)> {
        self.variables
            .iter()
            .filter(|(key, _)| is_valid_env_key(key))
            .map(|(key, value)| (key.clone(), render_env_value(value)))
            .filter(|(_, value)| !value.contains('\0'))
            .collect()
    }
}

fn is_valid_env_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('=') && !key.contains('\0')
}

/// 値を環境変数の文字列表現に変換する
pub fn render_env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_is_empty() {
        let ctx = ExecutionContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.get("x"), None);
    }

    #[test]
    fn test_with_variables() {
        let ctx = ExecutionContext::with_variables(object(json!({"a": 1, "b": "x"})));
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get("b"), Some(&json!("x")));
    }

    #[test]
    fn test_get_or_default() {
        let mut ctx = ExecutionContext::new();
        ctx.set("present", json!(true));

        assert_eq!(ctx.get_or("present", json!(false)), json!(true));
        assert_eq!(ctx.get_or("absent", json!("none")), json!("none"));
    }

    #[test]
    fn test_merge_later_keys_win() {
        let mut ctx = ExecutionContext::with_variables(object(json!({"status": "old", "keep": 1})));
        ctx.merge(object(json!({"status": "new", "added": [1, 2]})));

        assert_eq!(ctx.get("status"), Some(&json!("new")));
        assert_eq!(ctx.get("keep"), Some(&json!(1)));
        assert_eq!(ctx.get("added"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut ctx = ExecutionContext::new();
        ctx.set("x", json!(1));
        let snapshot = ctx.snapshot();
        ctx.set("x", json!(2));

        assert_eq!(snapshot["x"], json!(1));
        assert_eq!(ctx.get("x"), Some(&json!(2)));
    }

    #[test]
    fn test_remove() {
        let mut ctx = ExecutionContext::new();
        ctx.set("current_index", json!(3));

        assert_eq!(ctx.remove("current_index"), Some(json!(3)));
        assert_eq!(ctx.remove("current_index"), None);
    }

    #[test]
    fn test_to_env_renders_values() {
        let ctx = ExecutionContext::with_variables(object(json!({
            "name": "Juan",
            "count": 3,
            "ratio": 0.5,
            "active": true,
            "nothing": null,
            "items": ["a", "b"],
            "meta": {"k": "v"}
        })));

        let env: std::collections::HashMap<_, _> = ctx.to_env().into_iter().collect();

        assert_eq!(env["name"], "Juan");
        assert_eq!(env["count"], "3");
        assert_eq!(env["ratio"], "0.5");
        assert_eq!(env["active"], "true");
        assert_eq!(env["nothing"], "");
        assert_eq!(env["items"], r#"["a","b"]"#);
        assert_eq!(env["meta"], r#"{"k":"v"}"#);
    }

    #[test]
    fn test_to_env_skips_invalid_keys_and_values() {
        let mut ctx = ExecutionContext::new();
        ctx.set("", json!("empty key"));
        ctx.set("a=b", json!("equals"));
        ctx.set("nul", json!("bad\0value"));
        ctx.set("ok", json!("fine"));

        let env = ctx.to_env();
        assert_eq!(env, vec![("ok".to_string(), "fine".to_string())]);
    }
}
