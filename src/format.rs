use bitcoin::{consensus::encode, Transaction};

use crate::config::OutputFormat;

/// 呼び出し側に返す最終結果
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltTransaction {
    Object(Transaction),
    Hex(String),
}

impl BuiltTransaction {
    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            BuiltTransaction::Object(tx) => Some(tx),
            BuiltTransaction::Hex(_) => None,
        }
    }

    pub fn to_hex(&self) -> String {
        match self {
            BuiltTransaction::Object(tx) => encode::serialize_hex(tx),
            BuiltTransaction::Hex(hex) => hex.clone(),
        }
    }

    /// CLI 出力用。構造化形式は JSON、16進形式は文字列そのまま。
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            BuiltTransaction::Object(tx) => serde_json::to_string_pretty(tx),
            BuiltTransaction::Hex(hex) => Ok(hex.clone()),
        }
    }
}

pub fn render(tx: Transaction, format: OutputFormat) -> BuiltTransaction {
    match format {
        OutputFormat::Object => BuiltTransaction::Object(tx),
        OutputFormat::Hex => BuiltTransaction::Hex(encode::serialize_hex(&tx)),
    }
}
