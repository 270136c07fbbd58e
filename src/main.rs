use std::fs::{self, File};
use std::io::Write;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::secp256k1::All as AllContext;
use clap::Parser;

use datapay::{
    cli::{parse_network, CliArgs},
    config::BuildRequest,
    error::AppError,
    explorer::{Explorer, FileExplorer, HttpExplorer},
    transaction,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::init();

    let args = CliArgs::parse();
    log::info!("アプリケーションを開始します。引数: {:?}", args);

    let cli_network = parse_network(&args.network)?;
    log::info!("指定されたネットワーク: {:?}", cli_network);

    let input_file_content = fs::read_to_string(&args.input_file).map_err(|e| {
        log::error!("入力ファイルの読み込みに失敗しました: {:?}", args.input_file);
        AppError::Io(e)
    })?;

    let request: BuildRequest = serde_json::from_str(&input_file_content).map_err(|e| {
        log::error!("入力JSONのパースに失敗しました。");
        AppError::JsonParse {
            file_path: args.input_file.clone(),
            source: e,
        }
    })?;
    log::debug!("リクエストのパース成功: {:?}", request);

    let explorer: Box<dyn Explorer> = match (&args.utxo_file, &args.explorer_url) {
        (Some(path), _) => Box::new(FileExplorer::new(path)),
        (None, Some(url)) => Box::new(HttpExplorer::with_base_url(url.as_str(), args.timeout_secs)?),
        (None, None) => Box::new(HttpExplorer::new(cli_network, args.timeout_secs)?),
    };

    let secp: Secp256k1<AllContext> = Secp256k1::new();

    let output = if args.broadcast {
        let receipt = transaction::send(request, cli_network, explorer.as_ref(), &secp).await?;
        receipt.txid
    } else {
        let built = transaction::assemble(request, cli_network, explorer.as_ref(), &secp).await?;
        log::info!("トランザクションの生成に成功しました。");
        built.to_json().map_err(|e| AppError::InputValidation(format!("JSON出力に失敗しました: {}", e)))?
    };

    println!("{}", output);

    if let Some(output_path) = &args.output_file {
        let mut output_file = File::create(output_path).map_err(|e| {
            log::error!("出力ファイルの作成に失敗しました: {:?}", output_path);
            AppError::Io(e)
        })?;
        output_file.write_all(output.as_bytes()).map_err(|e| {
            log::error!("出力ファイルへの書き込みに失敗しました。");
            AppError::Io(e)
        })?;
        log::info!("結果を {:?} に保存しました。", output_path);
    }

    log::info!("処理が正常に完了しました。");
    Ok(())
}
