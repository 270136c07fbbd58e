use bitcoin::{
    absolute::LockTime, transaction::Version, Address, Amount, OutPoint, PrivateKey, PublicKey,
    Transaction, TxIn, TxOut,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// エクスプローラーから受け取った UTXO。取得後は変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    #[serde(alias = "tx_hash")]
    pub txid: String, // 表示用のバイト順
    #[serde(alias = "tx_pos")]
    pub vout: u32,
    #[serde(alias = "satoshis")]
    pub value: u64,
    // フィルタから参照できるよう、その他のフィールドもそのまま保持する
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
    // 受け取ったままのレコード (tx_hash/tx_pos/satoshis などの元の名前を含む)
    #[serde(skip)]
    pub raw: Option<Value>,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            value,
            extra: serde_json::Map::new(),
            raw: None,
        }
    }

    /// エクスプローラーのレコードを解釈し、元のレコードも保持する
    pub fn from_record(record: Value) -> Result<Self, serde_json::Error> {
        let mut utxo: Utxo = serde_json::from_value(record.clone())?;
        utxo.raw = Some(record);
        Ok(utxo)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtxoSet {
    #[serde(default, deserialize_with = "deserialize_records")]
    pub unspent: Vec<Utxo>,
}

fn deserialize_records<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Utxo>, D::Error> {
    Vec::<Value>::deserialize(deserializer)?
        .into_iter()
        .map(|record| Utxo::from_record(record).map_err(serde::de::Error::custom))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub txid: String,
}

/// 既存トランザクションの分類結果
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionState {
    Fresh,
    ImportableUnsigned(Transaction),
    ImmutableSigned(Transaction),
}

/// 秘密鍵から導出した資金元の情報
#[derive(Debug, Clone)]
pub struct FundingKey {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub address: Address,
}

/// 入力として使う UTXO (署名に必要な前出力を含む)
#[derive(Debug, Clone)]
pub struct FundingInput {
    pub out_point: OutPoint,
    pub tx_out: TxOut, // value とロックスクリプト
}

impl FundingInput {
    pub fn value(&self) -> Amount {
        self.tx_out.value
    }
}

/// 構築途中のトランザクション
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub version: Version,
    pub lock_time: LockTime,
    pub inputs: Vec<FundingInput>,
    pub outputs: Vec<TxOut>,
    pub fee_rate_sats_per_kb: u64,
    pub change_address: Option<Address>,
}

impl TransactionDraft {
    pub fn new(fee_rate_sats_per_kb: u64) -> Self {
        Self {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee_rate_sats_per_kb,
            change_address: None,
        }
    }

    /// 既存の未署名トランザクションから version/lock_time/出力を引き継ぐ
    pub fn from_unsigned(tx: Transaction, fee_rate_sats_per_kb: u64) -> Self {
        Self {
            version: tx.version,
            lock_time: tx.lock_time,
            inputs: Vec::new(),
            outputs: tx.output,
            fee_rate_sats_per_kb,
            change_address: None,
        }
    }

    /// 入力合計。u64 を超える場合は `None`。
    pub fn total_input_value(&self) -> Option<u64> {
        self.inputs
            .iter()
            .try_fold(0u64, |total, input| total.checked_add(input.value().to_sat()))
    }

    /// 出力合計。u64 を超える場合は `None`。
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value.to_sat()))
    }

    /// 署名前 (script_sig と witness は空) のトランザクション
    pub fn to_unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: self.version,
            lock_time: self.lock_time,
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.out_point,
                    ..Default::default()
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }
}
