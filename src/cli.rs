use clap::Parser;
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::error::AppError;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// 構築リクエスト (data / pay / tx / nData ...) を記述したJSONファイルへのパス
    #[clap(short, long, value_parser)]
    pub input_file: PathBuf,

    /// 結果を保存するファイルへのパス (省略時は標準出力のみ)
    #[clap(short, long, value_parser)]
    pub output_file: Option<PathBuf>,

    /// 使用するネットワーク ("bitcoin", "testnet", "signet", "regtest")
    #[clap(short, long, value_parser, default_value = "testnet")]
    pub network: String,

    /// UTXO を JSON ファイル ({"unspent": [...]}) から読む (オフライン)
    #[clap(long, value_parser, conflicts_with = "explorer_url")]
    pub utxo_file: Option<PathBuf>,

    /// Esplora 互換 API のベースURL (省略時はネットワークごとの既定値)
    #[clap(long)]
    pub explorer_url: Option<String>,

    /// HTTP タイムアウト (秒)
    #[clap(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// 構築後にブロードキャストする
    #[clap(long, conflicts_with = "utxo_file")]
    pub broadcast: bool,
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, AppError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "signet" => Ok(BitcoinNetwork::Signet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(AppError::InputValidation(format!("無効なネットワークが指定されました: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_names_are_case_insensitive() {
        assert_eq!(parse_network("MainNet").unwrap(), BitcoinNetwork::Bitcoin);
        assert_eq!(parse_network("signet").unwrap(), BitcoinNetwork::Signet);
        assert!(parse_network("litecoin").is_err());
    }

    #[test]
    fn broadcast_and_utxo_file_conflict() {
        let parsed = CliArgs::try_parse_from([
            "datapay", "-i", "req.json", "--utxo-file", "utxos.json", "--broadcast",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn output_file_is_optional() {
        let args = CliArgs::try_parse_from(["datapay", "-i", "req.json"]).unwrap();
        assert!(args.output_file.is_none());
        assert_eq!(args.network, "testnet");
        assert_eq!(args.timeout_secs, 30);
    }
}
