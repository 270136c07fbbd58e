//! UTXO の絞り込みと合計額の算出。
//!
//! フィルタは `pay.filter.q.find` に書かれた Mongo 風のクエリで、
//! UTXO レコード (JSON 表現) ごとに真偽を返す。レコードには正規化後の
//! `txid`/`vout`/`value` と、受け取ったときの元のフィールド名の両方が見える。

use std::cmp::Ordering;

use bitcoin::Address;
use serde_json::Value;

use crate::{
    error::AppError,
    types::{Utxo, UtxoSet},
};

/// UTXO に対する述語
pub trait UtxoPredicate {
    fn matches(&self, utxo: &Utxo) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub utxos: Vec<Utxo>,
    pub total: u64,
}

/// 候補を絞り込み、合計額を返す。元の集合は変更しない。
pub fn select(
    address: &Address,
    set: &UtxoSet,
    predicate: Option<&dyn UtxoPredicate>,
) -> Result<Selection, AppError> {
    // フィルタ前に空かどうかを判定する
    if set.unspent.is_empty() {
        return Err(AppError::EmptyWallet { address: address.to_string() });
    }

    let utxos: Vec<Utxo> = match predicate {
        Some(predicate) => set.unspent.iter().filter(|utxo| predicate.matches(utxo)).cloned().collect(),
        None => set.unspent.clone(),
    };

    if utxos.is_empty() {
        return Err(AppError::NoMatchingUtxos {
            address: address.to_string(),
            candidates: set.unspent.len(),
        });
    }

    let total = utxos
        .iter()
        .try_fold(0u64, |total, utxo| total.checked_add(utxo.value))
        .ok_or_else(|| AppError::InputValidation(format!("UTXO 合計額が上限を超えています ({})", address)))?;
    log::debug!("UTXO選択: 候補 {} 件中 {} 件, 合計 {} sats", set.unspent.len(), utxos.len(), total);
    Ok(Selection { utxos, total })
}

/// `find` クエリ
#[derive(Debug, Clone, PartialEq)]
pub enum FindQuery {
    And(Vec<FindQuery>),
    Or(Vec<FindQuery>),
    Nor(Vec<FindQuery>),
    Field { path: Vec<String>, conditions: Vec<Condition> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

impl FindQuery {
    pub fn parse(query: &Value) -> Result<Self, AppError> {
        let object = query
            .as_object()
            .ok_or_else(|| AppError::InvalidFilter(format!("オブジェクトではありません: {}", query)))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            let clause = match key.as_str() {
                "$and" => FindQuery::And(parse_list(key, value)?),
                "$or" => FindQuery::Or(parse_list(key, value)?),
                "$nor" => FindQuery::Nor(parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(AppError::InvalidFilter(format!("未対応の演算子: {}", op)));
                }
                field => FindQuery::Field {
                    path: field.split('.').map(str::to_string).collect(),
                    conditions: parse_conditions(value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(FindQuery::And(clauses))
    }

    pub fn test(&self, document: &Value) -> bool {
        match self {
            FindQuery::And(list) => list.iter().all(|q| q.test(document)),
            FindQuery::Or(list) => list.iter().any(|q| q.test(document)),
            FindQuery::Nor(list) => !list.iter().any(|q| q.test(document)),
            FindQuery::Field { path, conditions } => {
                let field = lookup(document, path);
                conditions.iter().all(|c| c.test(field))
            }
        }
    }
}

impl UtxoPredicate for FindQuery {
    fn matches(&self, utxo: &Utxo) -> bool {
        match document(utxo) {
            Ok(document) => self.test(&document),
            Err(e) => {
                log::warn!("UTXO の JSON 変換に失敗しました ({}:{}): {}", utxo.txid, utxo.vout, e);
                false
            }
        }
    }
}

// 正規化済みの表現に、元のレコードにしかないフィールドを足す
fn document(utxo: &Utxo) -> Result<Value, serde_json::Error> {
    let mut document = serde_json::to_value(utxo)?;
    if let (Value::Object(fields), Some(Value::Object(raw))) = (&mut document, &utxo.raw) {
        for (key, value) in raw {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(document)
}

fn parse_list(key: &str, value: &Value) -> Result<Vec<FindQuery>, AppError> {
    let list = value
        .as_array()
        .ok_or_else(|| AppError::InvalidFilter(format!("{} には配列が必要です", key)))?;
    list.iter().map(FindQuery::parse).collect()
}

fn parse_conditions(value: &Value) -> Result<Vec<Condition>, AppError> {
    let operators = match value.as_object() {
        Some(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        _ => return Ok(vec![Condition::Eq(value.clone())]),
    };

    operators
        .iter()
        .map(|(op, operand)| {
            Ok(match op.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                "$in" => Condition::In(operand_list(op, operand)?),
                "$nin" => Condition::Nin(operand_list(op, operand)?),
                "$exists" => Condition::Exists(operand.as_bool().unwrap_or(true)),
                other => return Err(AppError::InvalidFilter(format!("未対応の演算子: {}", other))),
            })
        })
        .collect()
}

fn operand_list(op: &str, operand: &Value) -> Result<Vec<Value>, AppError> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| AppError::InvalidFilter(format!("{} には配列が必要です", op)))
}

static NULL: Value = Value::Null;

impl Condition {
    fn test(&self, field: Option<&Value>) -> bool {
        // 存在しないフィールドは null と同じ扱い
        let value = field.unwrap_or(&NULL);
        match self {
            Condition::Eq(expected) => equals(value, expected),
            Condition::Ne(expected) => !equals(value, expected),
            Condition::Gt(bound) => field.is_some() && compare(value, bound) == Some(Ordering::Greater),
            Condition::Gte(bound) => {
                field.is_some() && matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Condition::Lt(bound) => field.is_some() && compare(value, bound) == Some(Ordering::Less),
            Condition::Lte(bound) => {
                field.is_some() && matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::In(list) => list.iter().any(|candidate| equals(value, candidate)),
            Condition::Nin(list) => !list.iter().any(|candidate| equals(value, candidate)),
            Condition::Exists(expected) => field.is_some() == *expected,
        }
    }
}

fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
        _ => None,
    })
}

fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal) || a == b
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
