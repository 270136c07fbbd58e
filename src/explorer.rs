//! UTXO 取得とブロードキャストを担うネットワーク側の抽象。
//!
//! 組み立て処理はこのトレイト経由でしかネットワークに触れない。
//! どちらの操作も一回きりで、再試行はしない。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Address, Network};

use crate::{
    error::AppError,
    types::{Receipt, Utxo, UtxoSet},
};

#[async_trait]
pub trait Explorer: Send + Sync {
    /// アドレスの未使用出力を取得する
    async fn fetch_utxos(&self, address: &Address) -> Result<UtxoSet, AppError>;

    /// 16進エンコード済みの署名済みトランザクションを送信する
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Receipt, AppError>;
}

/// Esplora 互換 REST API (mempool.space など)
pub struct HttpExplorer {
    base_url: String,
    client: reqwest::Client,
}

pub fn default_base_url(network: Network) -> Option<&'static str> {
    match network {
        Network::Bitcoin => Some("https://mempool.space/api"),
        Network::Testnet => Some("https://mempool.space/testnet/api"),
        Network::Signet => Some("https://mempool.space/signet/api"),
        _ => None,
    }
}

impl HttpExplorer {
    pub fn new(network: Network, timeout_secs: u64) -> Result<Self, AppError> {
        let base_url = default_base_url(network).ok_or_else(|| {
            AppError::Explorer(format!("ネットワーク {} には既定のエクスプローラーがありません", network))
        })?;
        Self::with_base_url(base_url, timeout_secs)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Explorer for HttpExplorer {
    async fn fetch_utxos(&self, address: &Address) -> Result<UtxoSet, AppError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        log::info!("UTXO を取得します: {}", url);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let records: Vec<serde_json::Value> = response.json().await?;
        let unspent = records
            .into_iter()
            .map(Utxo::from_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Explorer(format!("UTXO レコードを解釈できません: {}", e)))?;
        log::debug!("UTXO {} 件を取得しました。", unspent.len());
        Ok(UtxoSet { unspent })
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Receipt, AppError> {
        let url = format!("{}/tx", self.base_url);
        log::info!("トランザクションをブロードキャストします: {}", url);

        let response = self.client.post(&url).body(raw_tx_hex.to_string()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Explorer(format!("ブロードキャスト失敗 ({}): {}", status, body.trim())));
        }
        Ok(Receipt { txid: body.trim().to_string() })
    }
}

/// `{ "unspent": [...] }` 形式の JSON ファイルから UTXO を読むオフライン用実装
pub struct FileExplorer {
    path: PathBuf,
}

impl FileExplorer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Explorer for FileExplorer {
    async fn fetch_utxos(&self, address: &Address) -> Result<UtxoSet, AppError> {
        log::info!("UTXO ファイルを読み込みます: {:?} (アドレス {})", self.path, address);
        let content = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content).map_err(|e| AppError::JsonParse {
            file_path: self.path.clone(),
            source: e,
        })
    }

    async fn broadcast(&self, _raw_tx_hex: &str) -> Result<Receipt, AppError> {
        Err(AppError::Explorer("ファイルベースのエクスプローラーはブロードキャストできません".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::PrivateKey;
    use std::io::Write;

    fn address() -> Address {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = PrivateKey::new(secret, Network::Testnet).public_key(&secp);
        Address::p2pkh(public_key.pubkey_hash(), Network::Testnet)
    }

    #[test]
    fn default_urls_follow_the_network() {
        assert_eq!(default_base_url(Network::Bitcoin), Some("https://mempool.space/api"));
        assert_eq!(default_base_url(Network::Testnet), Some("https://mempool.space/testnet/api"));
        assert_eq!(default_base_url(Network::Regtest), None);
        assert!(HttpExplorer::new(Network::Regtest, 10).is_err());
    }

    #[test]
    fn custom_base_url_drops_trailing_slash() {
        let explorer = HttpExplorer::with_base_url("http://localhost:3002/", 5).unwrap();
        assert_eq!(explorer.base_url(), "http://localhost:3002");
    }

    #[tokio::test]
    async fn file_explorer_reads_utxo_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"unspent": [{{"txid": "{}", "vout": 1, "value": 1234}}]}}"#, "ab".repeat(32)).unwrap();

        let explorer = FileExplorer::new(file.path());
        let set = explorer.fetch_utxos(&address()).await.unwrap();
        assert_eq!(set.unspent.len(), 1);
        assert_eq!(set.unspent[0].value, 1234);
    }

    #[tokio::test]
    async fn file_explorer_treats_missing_array_as_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let set = FileExplorer::new(file.path()).fetch_utxos(&address()).await.unwrap();
        assert!(set.unspent.is_empty());
    }

    #[tokio::test]
    async fn file_explorer_cannot_broadcast() {
        let explorer = FileExplorer::new("unused.json");
        assert!(matches!(explorer.broadcast("00").await, Err(AppError::Explorer(_))));
    }
}
