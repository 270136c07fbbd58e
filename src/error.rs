use std::path::PathBuf;
use bitcoin::address::ParseError as BitcoinAddressError;
use bitcoin::key::FromWifError as BitcoinKeyError; // WIFデコードエラー用
use thiserror::Error;

/// nData の1要素分の失敗内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NDataFailure {
    pub index: usize,
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー ファイル: {file_path:?}, 詳細: {source}")]
    JsonParse {
        file_path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("スクリプト構築エラー 対象: {item}, 詳細: {reason}")]
    ScriptComposition { item: String, reason: String },

    #[error("nData のスクリプト構築に {} 件失敗しました", .failures.len())]
    NDataComposition { failures: Vec<NDataFailure> },

    #[error("トランザクションのデコードに失敗しました: {0}")]
    TransactionDecode(String),

    #[error("署名済みトランザクションは変更できません (pay/data は指定できません)")]
    SignedTransactionImmutable,

    #[error("ウォレットが空です: アドレス {address} に UTXO がありません")]
    EmptyWallet { address: String },

    #[error("フィルタに一致する UTXO がありません: アドレス {address}, 候補 {candidates} 件")]
    NoMatchingUtxos { address: String, candidates: usize },

    #[error("資金不足: 利用可能な総額 {available} sats, 要求額 {required} sats (手数料 {fee} sats を含む)")]
    InsufficientFunds {
        available: u64,
        required: u64,
        fee: u64,
    },

    #[error("ネットワーク不整合 ({subject}): 指定 ({cli_network}) vs 推定 ({inferred_network})")]
    NetworkMismatch {
        subject: String,
        cli_network: String,
        inferred_network: String,
    },

    #[error("署名エラー (入力インデックス {input_index}): {reason}")]
    Signing { input_index: usize, reason: String },

    #[error("フィルタクエリが不正です: {0}")]
    InvalidFilter(String),

    #[error("Bitcoinアドレスエラー: {0}")]
    BitcoinAddress(#[from] BitcoinAddressError),

    #[error("Bitcoin秘密鍵(WIF)処理エラー: {0}")]
    BitcoinKey(#[from] BitcoinKeyError),

    #[error("入力検証エラー: {0}")]
    InputValidation(String),

    #[error("エクスプローラーエラー: {0}")]
    Explorer(String),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),
}
