use std::fmt;
use serde::Deserialize;

// 手数料率のデフォルト (sats/KB)
pub const DEFAULT_FEE_RATE_SATS_PER_KB: u64 = 50;

/// トランザクション構築リクエスト。入力はこの構造体だけ。
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default)]
    pub data: Option<DataPayload>,
    #[serde(default)]
    pub pay: Option<PayDirective>,
    #[serde(default)]
    pub tx: Option<TxSource>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub n_data: Vec<DataPayload>,
    #[serde(default = "default_safe")]
    pub safe: bool,
}

fn default_safe() -> bool {
    true
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            data: None,
            pay: None,
            tx: None,
            format: OutputFormat::default(),
            n_data: Vec::new(),
            safe: default_safe(),
        }
    }
}

impl BuildRequest {
    pub fn funding_key(&self) -> Option<&str> {
        self.pay.as_ref().and_then(|pay| pay.key.as_deref())
    }

    /// 手数料率 (sats/KB)。未指定または 0 のときは既定値を使う。
    pub fn fee_rate(&self) -> u64 {
        self.pay
            .as_ref()
            .map(|pay| pay.fee)
            .filter(|&fee| fee > 0)
            .unwrap_or(DEFAULT_FEE_RATE_SATS_PER_KB)
    }

    pub fn receivers(&self) -> &[Receiver] {
        self.pay.as_ref().map_or(&[], |pay| pay.to.as_slice())
    }
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PayDirective {
    #[serde(default)]
    pub key: Option<String>, // WIF
    #[serde(default = "default_fee")]
    pub fee: u64,
    #[serde(default)]
    pub to: Vec<Receiver>,
    #[serde(default)]
    pub filter: Option<UtxoFilter>,
}

fn default_fee() -> u64 {
    DEFAULT_FEE_RATE_SATS_PER_KB
}

impl Default for PayDirective {
    fn default() -> Self {
        Self {
            key: None,
            fee: DEFAULT_FEE_RATE_SATS_PER_KB,
            to: Vec::new(),
            filter: None,
        }
    }
}

// 秘密鍵をログに出さない
impl fmt::Debug for PayDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayDirective")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("fee", &self.fee)
            .field("to", &self.to)
            .field("filter", &self.filter)
            .finish()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    pub address: String,
    pub value: u64, // sats
}

/// `pay.filter` の形式: `{ "v": 3, "q": { "find": { ... } } }`
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UtxoFilter {
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(default)]
    pub q: Option<FilterQuery>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FilterQuery {
    #[serde(default)]
    pub find: Option<serde_json::Value>,
}

impl UtxoFilter {
    pub fn find(&self) -> Option<&serde_json::Value> {
        self.q.as_ref().and_then(|q| q.find.as_ref())
    }
}

/// 埋め込みデータ。配列ならデータ列、文字列なら書き出し済みスクリプト(16進)。
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DataPayload {
    Items(Vec<DataItem>),
    Script(String),
}

/// 受け取り時に一度だけ種別を決める。
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "RawDataItem")]
pub enum DataItem {
    Bytes(Vec<u8>),
    Utf8(String),
    Opcode(u8),
    HexString(String), // "0x" で始まる文字列 (プレフィックス込みで保持)
}

impl DataItem {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if is_hex_prefixed(&text) {
            DataItem::HexString(text)
        } else {
            DataItem::Utf8(text)
        }
    }
}

impl From<&str> for DataItem {
    fn from(text: &str) -> Self {
        DataItem::from_text(text)
    }
}

pub fn is_hex_prefixed(text: &str) -> bool {
    text.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDataItem {
    Text(String),
    Op { op: u8 },
    Bytes { bytes: Vec<u8> },
    Array(Vec<u8>),
}

impl From<RawDataItem> for DataItem {
    fn from(raw: RawDataItem) -> Self {
        match raw {
            RawDataItem::Text(text) => DataItem::from_text(text),
            RawDataItem::Op { op } => DataItem::Opcode(op),
            RawDataItem::Bytes { bytes } | RawDataItem::Array(bytes) => DataItem::Bytes(bytes),
        }
    }
}

/// 既存トランザクション (16進文字列 または バイト列)
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TxSource {
    Hex(String),
    Bytes(Vec<u8>),
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "bsv")]
    Object,
    Hex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_request() {
        let json = r#"{
            "safe": false,
            "format": "hex",
            "data": ["0x6d02", "hello world", {"op": 78}, [1, 2, 3]],
            "nData": [["0x6d03", "second"], "6a0161"],
            "pay": {
                "key": "cVt4o7BGAig1UXywgGSmARhxMdzP5qvQsxKkSsc1XEkw3tDTQFpy",
                "to": [{"address": "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef", "value": 1000}],
                "filter": {"v": 3, "q": {"find": {"value": {"$gt": 100}}}}
            }
        }"#;
        let request: BuildRequest = serde_json::from_str(json).unwrap();

        assert!(!request.safe);
        assert_eq!(request.format, OutputFormat::Hex);
        assert_eq!(
            request.data,
            Some(DataPayload::Items(vec![
                DataItem::HexString("0x6d02".into()),
                DataItem::Utf8("hello world".into()),
                DataItem::Opcode(78),
                DataItem::Bytes(vec![1, 2, 3]),
            ]))
        );
        assert_eq!(request.n_data.len(), 2);
        assert_eq!(request.n_data[1], DataPayload::Script("6a0161".into()));
        assert_eq!(request.fee_rate(), DEFAULT_FEE_RATE_SATS_PER_KB);
        assert_eq!(request.receivers()[0].value, 1000);
        assert!(request.pay.as_ref().unwrap().filter.as_ref().unwrap().find().is_some());
    }

    #[test]
    fn defaults_apply_to_empty_request() {
        let request: BuildRequest = serde_json::from_str("{}").unwrap();
        assert!(request.safe);
        assert_eq!(request.format, OutputFormat::Object);
        assert!(request.data.is_none());
        assert!(request.funding_key().is_none());
        assert!(request.receivers().is_empty());
    }

    #[test]
    fn zero_fee_falls_back_to_default_rate() {
        let zero: BuildRequest = serde_json::from_str(r#"{"pay": {"fee": 0}}"#).unwrap();
        assert_eq!(zero.fee_rate(), DEFAULT_FEE_RATE_SATS_PER_KB);

        let custom: BuildRequest = serde_json::from_str(r#"{"pay": {"fee": 500}}"#).unwrap();
        assert_eq!(custom.fee_rate(), 500);
    }

    #[test]
    fn bsv_format_is_an_object_alias() {
        let request: BuildRequest = serde_json::from_str(r#"{"format": "bsv"}"#).unwrap();
        assert_eq!(request.format, OutputFormat::Object);
    }

    #[test]
    fn tx_source_accepts_hex_and_bytes() {
        let hex: BuildRequest = serde_json::from_str(r#"{"tx": "0200"}"#).unwrap();
        assert_eq!(hex.tx, Some(TxSource::Hex("0200".into())));
        let bytes: BuildRequest = serde_json::from_str(r#"{"tx": [2, 0]}"#).unwrap();
        assert_eq!(bytes.tx, Some(TxSource::Bytes(vec![2, 0])));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let pay = PayDirective {
            key: Some("secret-wif".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", pay).contains("secret-wif"));
    }
}
