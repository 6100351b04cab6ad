//! DECISION ノードの条件式評価
//!
//! # 責務
//!
//! 条件式を実行コンテキストに対して評価し、真偽値を返します。
//! 文法は `condition.pest` で定義された小さな比較・論理式です。
//!
//! ## 文法
//!
//! - 比較演算子: `==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not in`
//! - 論理演算子: `and`, `or`, `not`（優先順位は `not` > `and` > `or`）
//! - リテラル: 文字列（`'...'` / `"..."`）、数値、`true`/`True`/`false`/`False`、`None`/`null`、リスト `[...]`
//! - 変数参照: `status`, `result.code`（ドット区切りでマップ・リストを辿る）
//!
//! ## 評価規則
//!
//! - 未定義の変数は「欠損」として扱い、エラーにはならない。
//!   欠損値は何とも等しくなく（`!=` は常に真）、順序比較と `in` / `not in` は常に偽
//! - 両辺が数値に見える場合（数値、または数値として読める文字列）は数値として比較
//! - それ以外の順序比較は文字列表現で比較
//! - 比較演算子のない項は真偽値として評価（空文字列・0・空リスト・null は偽）
//!
//! 構文エラーは [`EvaluationError`] になり、ノードの `on_error` に関係なく実行は失敗します。
//!
//! # 例
//!
//! ```rust
//! use rpa_flow::engine::condition;
//! use rpa_flow::engine::context::ExecutionContext;
//! use serde_json::json;
//!
//! let mut ctx = ExecutionContext::new();
//! ctx.set("status", json!("ok"));
//! ctx.set("count", json!("12"));
//!
//! assert!(condition::evaluate("status == 'ok' and count > 9", &ctx).unwrap());
//! assert!(!condition::evaluate("undefined_var == 'ok'", &ctx).unwrap());
//! assert!(condition::evaluate("status ==", &ctx).is_err());
//! ```

use std::cmp::Ordering;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::Value;

use crate::engine::context::{ExecutionContext, render_env_value};
use crate::error::EvaluationError;

#[derive(Parser)]
#[grammar = "engine/condition.pest"]
struct ConditionParser;

/// 被演算子の評価結果
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// 未定義の変数
    Missing,
    Value(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// 条件式を評価する
///
/// # 引数
///
/// - `condition`: 条件式
/// - `context`: 変数参照の解決に使うコンテキスト
///
/// # 戻り値
///
/// - `Ok(bool)`: 評価結果
/// - `Err(EvaluationError)`: 構文エラー
pub fn evaluate(condition: &str, context: &ExecutionContext) -> Result<bool, EvaluationError> {
    let root = parse(condition)?;
    let evaluator = Evaluator { context };
    Ok(evaluator.condition(root))
}

/// 条件式の構文だけを検査する
///
/// ワークフローの事前検証（`validate` コマンド）で使用します。
pub fn check_syntax(condition: &str) -> Result<(), EvaluationError> {
    parse(condition).map(|_| ())
}

fn parse(condition: &str) -> Result<Pair<'_, Rule>, EvaluationError> {
    let mut pairs =
        ConditionParser::parse(Rule::condition, condition).map_err(|e| EvaluationError {
            condition: condition.to_string(),
            message: e.to_string(),
        })?;
    pairs.next().ok_or_else(|| EvaluationError {
        condition: condition.to_string(),
        message: "空の条件式です".to_string(),
    })
}

struct Evaluator<'a> {
    context: &'a ExecutionContext,
}

impl Evaluator<'_> {
    fn condition(&self, pair: Pair<'_, Rule>) -> bool {
        pair.into_inner()
            .find(|p| p.as_rule() == Rule::or_expr)
            .map(|p| self.or_expr(p))
            .unwrap_or(false)
    }

    fn or_expr(&self, pair: Pair<'_, Rule>) -> bool {
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::and_expr)
            .any(|p| self.and_expr(p))
    }

    fn and_expr(&self, pair: Pair<'_, Rule>) -> bool {
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::not_expr)
            .all(|p| self.not_expr(p))
    }

    fn not_expr(&self, pair: Pair<'_, Rule>) -> bool {
        let mut negations = 0usize;
        let mut result = false;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::op_not => negations += 1,
                Rule::comparison => result = self.comparison(inner),
                _ => {}
            }
        }
        if negations % 2 == 1 { !result } else { result }
    }

    fn comparison(&self, pair: Pair<'_, Rule>) -> bool {
        let mut inner = pair.into_inner();
        let Some(left) = inner.next() else {
            return false;
        };
        let left = self.operand(left);

        match (inner.next(), inner.next()) {
            (Some(op), Some(right)) => {
                let Some(op) = cmp_op(op.as_rule()) else {
                    return false;
                };
                compare(op, &left, &self.operand(right))
            }
            _ => truthy(&left),
        }
    }

    fn operand(&self, pair: Pair<'_, Rule>) -> Operand {
        match pair.as_rule() {
            Rule::or_expr => Operand::Value(Value::Bool(self.or_expr(pair))),
            Rule::list => Operand::Value(Value::Array(
                pair.into_inner()
                    .map(|item| match self.operand(item) {
                        Operand::Value(v) => v,
                        Operand::Missing => Value::Null,
                    })
                    .collect(),
            )),
            Rule::string => {
                let text = pair
                    .into_inner()
                    .next()
                    .map(|p| p.as_str())
                    .unwrap_or_default();
                Operand::Value(Value::String(text.to_string()))
            }
            Rule::number => Operand::Value(parse_number(pair.as_str())),
            Rule::boolean => Operand::Value(Value::Bool(pair.as_str().eq_ignore_ascii_case("true"))),
            Rule::null => Operand::Value(Value::Null),
            Rule::identifier => self.lookup(pair.as_str()),
            _ => Operand::Missing,
        }
    }

    /// ドット区切りの変数参照を解決する
    fn lookup(&self, path: &str) -> Operand {
        let mut segments = path.split('.');
        let Some(mut current) = segments.next().and_then(|head| self.context.get(head)) else {
            return Operand::Missing;
        };
        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Operand::Missing,
            }
        }
        Operand::Value(current.clone())
    }
}

fn cmp_op(rule: Rule) -> Option<CmpOp> {
    match rule {
        Rule::op_eq => Some(CmpOp::Eq),
        Rule::op_ne => Some(CmpOp::Ne),
        Rule::op_lt => Some(CmpOp::Lt),
        Rule::op_lte => Some(CmpOp::Le),
        Rule::op_gt => Some(CmpOp::Gt),
        Rule::op_gte => Some(CmpOp::Ge),
        Rule::op_in => Some(CmpOp::In),
        Rule::op_not_in => Some(CmpOp::NotIn),
        _ => None,
    }
}

fn parse_number(text: &str) -> Value {
    match text.parse::<i64>() {
        Ok(i) => Value::from(i),
        Err(_) => text.parse::<f64>().map(Value::from).unwrap_or(Value::Null),
    }
}

fn compare(op: CmpOp, left: &Operand, right: &Operand) -> bool {
    let (Operand::Value(l), Operand::Value(r)) = (left, right) else {
        return op == CmpOp::Ne;
    };

    match op {
        CmpOp::Eq => loose_eq(l, r),
        CmpOp::Ne => !loose_eq(l, r),
        CmpOp::Lt => ordering(l, r) == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering(l, r), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering(l, r) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering(l, r), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => !contains(r, l),
    }
}

/// 数値として解釈できる場合はその値
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        // "nan" や "inf" は文字列として扱う
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l == r;
    }
    match (left, right) {
        (Value::String(_), Value::Bool(_)) | (Value::Bool(_), Value::String(_)) => {
            render_env_value(left).eq_ignore_ascii_case(&render_env_value(right))
        }
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r);
    }
    Some(render_env_value(left).cmp(&render_env_value(right)))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(s) => s.contains(render_env_value(needle).as_str()),
        Value::Object(map) => map.contains_key(render_env_value(needle).as_str()),
        _ => false,
    }
}

fn truthy(operand: &Operand) -> bool {
    match operand {
        Operand::Missing => false,
        Operand::Value(value) => match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> ExecutionContext {
        ExecutionContext::with_variables(value.as_object().cloned().unwrap())
    }

    fn eval(condition: &str, context: &ExecutionContext) -> bool {
        evaluate(condition, context).unwrap()
    }

    #[test]
    fn test_string_equality() {
        let c = ctx(json!({"status": "ok"}));

        assert!(eval("status == 'ok'", &c));
        assert!(eval("status == \"ok\"", &c));
        assert!(!eval("status == 'error'", &c));
        assert!(eval("status != 'error'", &c));
    }

    #[test]
    fn test_numeric_coercion() {
        let c = ctx(json!({"x": 1, "count": "12", "ratio": 0.5}));

        assert!(eval("x == 1", &c));
        assert!(eval("x == 1.0", &c));
        assert!(eval("count > 9", &c));
        assert!(eval("count == 12", &c));
        assert!(eval("ratio < 1", &c));
        assert!(eval("ratio >= 0.5", &c));
        assert!(eval("x <= -1 or x >= 1", &c));
    }

    #[test]
    fn test_nan_and_infinity_strings_compare_as_text() {
        let c = ctx(json!({"status": "nan", "a": "inf", "b": "Infinity"}));

        assert!(eval("status == 'nan'", &c));
        assert!(!eval("status != 'nan'", &c));
        assert!(!eval("a == 'Infinity'", &c));
        assert!(eval("a == 'inf'", &c));
        assert!(eval("b != 'inf'", &c));
        assert!(eval("a < 'z'", &c));
    }

    #[test]
    fn test_non_numeric_ordering_uses_strings() {
        let c = ctx(json!({"name": "beta", "count": "12"}));

        assert!(eval("name > 'alpha'", &c));
        assert!(eval("name < 'gamma'", &c));
        // "12" と "9" はどちらも数値に見えるので数値比較
        assert!(!eval("count < '9'", &c));
    }

    #[test]
    fn test_missing_variable_never_raises() {
        let c = ctx(json!({}));

        assert!(!eval("ghost == 'ok'", &c));
        assert!(eval("ghost != 'ok'", &c));
        assert!(!eval("ghost < 3", &c));
        assert!(!eval("ghost > 3", &c));
        assert!(!eval("ghost in ['a']", &c));
        assert!(!eval("ghost not in ['a']", &c));
        assert!(!eval("'a' in ghost", &c));
        assert!(!eval("ghost", &c));
        assert!(eval("not ghost", &c));
    }

    #[test]
    fn test_missing_does_not_equal_null() {
        let c = ctx(json!({"empty": null}));

        assert!(eval("empty == None", &c));
        assert!(!eval("ghost == None", &c));
    }

    #[test]
    fn test_logical_operators() {
        let c = ctx(json!({"a": true, "b": false, "n": 0}));

        assert!(eval("a and not b", &c));
        assert!(eval("b or a", &c));
        assert!(!eval("a and b", &c));
        assert!(eval("not (a and b)", &c));
        assert!(eval("not not a", &c));
        assert!(!eval("n", &c));
        assert!(eval("a == True and b == False", &c));
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let c = ctx(json!({"a": true, "b": false, "c": false}));

        // a or (b and c)
        assert!(eval("a or b and c", &c));
        // (a or b) and c
        assert!(!eval("(a or b) and c", &c));
    }

    #[test]
    fn test_in_operator() {
        let c = ctx(json!({
            "role": "admin",
            "roles": ["admin", "user"],
            "codes": [1, 2, 3],
            "message": "connection refused",
            "config": {"host": "db"}
        }));

        assert!(eval("role in ['admin', 'root']", &c));
        assert!(eval("role not in ['guest']", &c));
        assert!(eval("'user' in roles", &c));
        assert!(eval("'2' in codes", &c));
        assert!(eval("'refused' in message", &c));
        assert!(!eval("'timeout' in message", &c));
        assert!(eval("'host' in config", &c));
        assert!(eval("'port' not in config", &c));
    }

    #[test]
    fn test_dotted_lookup() {
        let c = ctx(json!({"result": {"code": 200, "rows": [{"id": 7}]}}));

        assert!(eval("result.code == 200", &c));
        assert!(eval("result.rows.0.id == 7", &c));
        assert!(!eval("result.missing == 1", &c));
        assert!(eval("result.missing != 1", &c));
    }

    #[test]
    fn test_bool_and_string_compare_by_text() {
        let c = ctx(json!({"done": true, "flag": "True"}));

        assert!(eval("done == 'true'", &c));
        assert!(eval("flag == true", &c));
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let c = ctx(json!({"order": 1, "index": 2, "nothing": "", "true_count": 3}));

        assert!(eval("order == 1", &c));
        assert!(eval("index == 2", &c));
        assert!(eval("not nothing", &c));
        assert!(eval("true_count == 3", &c));
    }

    #[test]
    fn test_empty_string_literal() {
        let c = ctx(json!({"s": ""}));
        assert!(eval("s == ''", &c));
    }

    #[test]
    fn test_malformed_expressions_are_errors() {
        let c = ctx(json!({"x": 1}));

        for bad in ["", "x ==", "x === 1", "(x == 1", "x == 'open", "and x", "x = 1"] {
            let err = evaluate(bad, &c).unwrap_err();
            assert_eq!(err.condition, bad);
        }
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax("a == 1 and b in [1, 2]").is_ok());
        assert!(check_syntax("a ==").is_err());
    }
}
