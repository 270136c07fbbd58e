use bitcoin::{
    consensus::encode,
    network::Network as BitcoinNetwork,
    script::{Builder, PushBytesBuf},
    secp256k1::{All, Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
    Address, Amount, NetworkKind, OutPoint, PrivateKey, PublicKey, ScriptBuf, Transaction, TxOut, Txid,
};
use std::str::FromStr;

use crate::{
    config::BuildRequest,
    error::AppError,
    explorer::Explorer,
    format::{self, BuiltTransaction},
    planner, script, state,
    types::{FundingInput, FundingKey, Receipt, TransactionDraft, TransactionState, Utxo},
    utxo::{self, FindQuery, UtxoPredicate},
};

// 手数料見積もり用のダミー署名長 (DER署名 + sighashタイプ 1 バイト)
const DUMMY_SIGNATURE_LEN: usize = 73;

// 署名に必要な情報を一時的に保持するための構造体
struct SigningInfo {
    input_index: usize,
    sighash_message: Message,
}

impl FundingKey {
    /// WIF から鍵とおつり先 (P2PKH) を導出する。鍵のネットワークは指定と一致しなければならない。
    pub fn from_wif(wif: &str, network: BitcoinNetwork, secp: &Secp256k1<All>) -> Result<Self, AppError> {
        let private_key = PrivateKey::from_wif(wif)?;
        if private_key.network != NetworkKind::from(network) {
            return Err(AppError::NetworkMismatch {
                subject: "秘密鍵(WIF)".to_string(),
                cli_network: network.to_string(),
                inferred_network: format!("{:?}", private_key.network),
            });
        }
        let public_key = private_key.public_key(secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), network);
        Ok(Self {
            private_key,
            public_key,
            address,
        })
    }
}

/// リクエストからトランザクションを組み立てる。
///
/// 秘密鍵があるときだけ `explorer` から UTXO を取得し、資金投入と署名を行う。
/// 失敗した場合は途中まで作ったものを返さない。
pub async fn assemble<E: Explorer + ?Sized>(
    request: BuildRequest,
    network: BitcoinNetwork,
    explorer: &E,
    secp: &Secp256k1<All>,
) -> Result<BuiltTransaction, AppError> {
    let output_format = request.format;
    let transaction = assemble_transaction(request, network, explorer, secp).await?;
    Ok(format::render(transaction, output_format))
}

/// 組み立てたトランザクションを16進にしてブロードキャストする
pub async fn send<E: Explorer + ?Sized>(
    request: BuildRequest,
    network: BitcoinNetwork,
    explorer: &E,
    secp: &Secp256k1<All>,
) -> Result<Receipt, AppError> {
    let transaction = assemble_transaction(request, network, explorer, secp).await?;
    let serialized_tx = encode::serialize_hex(&transaction);
    log::info!("Raw transaction hex: {}", serialized_tx);
    let receipt = explorer.broadcast(&serialized_tx).await?;
    log::info!("ブロードキャスト完了: txid={}", receipt.txid);
    Ok(receipt)
}

async fn assemble_transaction<E: Explorer + ?Sized>(
    request: BuildRequest,
    network: BitcoinNetwork,
    explorer: &E,
    secp: &Secp256k1<All>,
) -> Result<Transaction, AppError> {
    log::info!("トランザクション構築処理を開始します。ネットワーク: {}", network);

    // 1. 既存トランザクションの分類
    let fee_rate = request.fee_rate();
    let (mut draft, primary_script) = match state::resolve(&request)? {
        TransactionState::ImmutableSigned(tx) => {
            log::info!("署名済みトランザクションをそのまま返します。");
            return Ok(tx);
        }
        TransactionState::ImportableUnsigned(tx) => (TransactionDraft::from_unsigned(tx, fee_rate), None),
        TransactionState::Fresh => (
            TransactionDraft::new(fee_rate),
            script::compose(request.data.as_ref(), request.safe)?,
        ),
    };

    // 2. ネットワークに触れる前に検証できるものは先に済ませる
    let n_data_scripts = script::compose_batch(&request.n_data, request.safe)?;
    let receivers = planner::parse_receivers(request.receivers(), network)?;
    let filter = request
        .pay
        .as_ref()
        .and_then(|pay| pay.filter.as_ref())
        .and_then(|filter| filter.find())
        .map(FindQuery::parse)
        .transpose()?;

    // 3. 資金元の鍵と UTXO
    let funding = match request.funding_key() {
        Some(wif) => {
            let key = FundingKey::from_wif(wif, network, secp)?;
            log::info!("資金元アドレス: {}", key.address);
            let utxo_set = explorer.fetch_utxos(&key.address).await?;
            let predicate = filter.as_ref().map(|query| query as &dyn UtxoPredicate);
            let selection = utxo::select(&key.address, &utxo_set, predicate)?;
            Some((key, selection))
        }
        None => None,
    };

    // 4. 出力の決定
    let inherited = std::mem::take(&mut draft.outputs);
    draft.outputs = planner::plan_outputs(
        inherited,
        primary_script,
        n_data_scripts,
        &receivers,
        funding.as_ref().map(|(_, selection)| selection.total),
    )?;

    let Some((key, selection)) = funding else {
        log::info!("秘密鍵が指定されていないため、未署名のトランザクションを返します。");
        return Ok(draft.to_unsigned_transaction());
    };

    // 5. 入力の追加
    draft.inputs = funding_inputs(&selection.utxos, &key.address)?;
    draft.change_address = Some(key.address.clone());

    // 6. 手数料とおつり
    finalize(&mut draft, &key)?;

    // 7. 署名
    sign(&draft, &key, secp)
}

fn funding_inputs(utxos: &[Utxo], address: &Address) -> Result<Vec<FundingInput>, AppError> {
    utxos
        .iter()
        .map(|utxo| {
            // Txid は表示用の16進を受け取り、内部では逆順のバイト列で保持する
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| AppError::InputValidation(format!("無効なTXID形式 ({}): {}", utxo.txid, e)))?;
            log::debug!("入力追加: txid={}, vout={}, value={}", utxo.txid, utxo.vout, utxo.value);
            Ok(FundingInput {
                out_point: OutPoint::new(txid, utxo.vout),
                tx_out: TxOut {
                    value: Amount::from_sat(utxo.value),
                    script_pubkey: address.script_pubkey(),
                },
            })
        })
        .collect()
}

/// 手数料を見積もり、残りをおつり出力として最後に追加する
fn finalize(draft: &mut TransactionDraft, key: &FundingKey) -> Result<(), AppError> {
    let change_address = draft.change_address.clone().unwrap_or_else(|| key.address.clone());

    // ダミー署名入りの入力とおつり出力を含めてサイズを見積もる
    let mut estimate = draft.to_unsigned_transaction();
    for (input_index, tx_in) in estimate.input.iter_mut().enumerate() {
        tx_in.script_sig = unlocking_script(vec![0u8; DUMMY_SIGNATURE_LEN], &key.public_key, input_index)?;
    }
    estimate.output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: change_address.script_pubkey(),
    });

    let estimated_size = estimate.total_size() as u64;
    let total_fee_sats = estimated_size
        .checked_mul(draft.fee_rate_sats_per_kb)
        .map(|product| product.div_ceil(1000));
    log::debug!(
        "推定サイズ: {} bytes, 手数料率: {} sats/KB, 計算された手数料: {:?} sats",
        estimated_size,
        draft.fee_rate_sats_per_kb,
        total_fee_sats
    );

    let total_input_value_sats = draft
        .total_input_value()
        .ok_or_else(|| AppError::InputValidation("入力合計額が上限を超えています".to_string()))?;
    // 桁あふれは資金不足として扱う
    let required = total_fee_sats
        .zip(draft.total_output_value())
        .and_then(|(fee, outputs)| outputs.checked_add(fee));
    let Some(required) = required.filter(|&required| required <= total_input_value_sats) else {
        log::error!("資金不足: 利用可能 {} sats, 必要額 {:?} sats", total_input_value_sats, required);
        return Err(AppError::InsufficientFunds {
            available: total_input_value_sats,
            required: required.unwrap_or(u64::MAX),
            fee: total_fee_sats.unwrap_or(u64::MAX),
        });
    };

    // おつりは 0 sats でも必ず最後に残す
    let change_value_sats = total_input_value_sats - required;
    log::debug!("おつり: {} sats, おつりアドレス: {}", change_value_sats, change_address);
    draft.outputs.push(TxOut {
        value: Amount::from_sat(change_value_sats),
        script_pubkey: change_address.script_pubkey(),
    });
    Ok(())
}

fn unlocking_script(signature: Vec<u8>, public_key: &PublicKey, input_index: usize) -> Result<ScriptBuf, AppError> {
    let push = PushBytesBuf::try_from(signature).map_err(|e| AppError::Signing {
        input_index,
        reason: format!("署名のPushBytes変換失敗: {}", e),
    })?;
    Ok(Builder::new().push_slice(push).push_key(public_key).into_script())
}

fn sign(draft: &TransactionDraft, key: &FundingKey, secp: &Secp256k1<All>) -> Result<Transaction, AppError> {
    log::info!("トランザクション署名処理を開始します。");
    let mut transaction = draft.to_unsigned_transaction();
    let sighash_type = EcdsaSighashType::All;
    let mut signing_infos: Vec<SigningInfo> = Vec::with_capacity(draft.inputs.len());

    // 1. 署名ハッシュ計算フェーズ
    {
        let sighash_cache = SighashCache::new(&transaction);
        for (input_index, input) in draft.inputs.iter().enumerate() {
            let script_pubkey = &input.tx_out.script_pubkey;
            if !script_pubkey.is_p2pkh() {
                return Err(AppError::Signing {
                    input_index,
                    reason: format!("P2PKH 以外のスクリプトには署名できません: {}", script_pubkey.to_hex_string()),
                });
            }
            let sighash = sighash_cache
                .legacy_signature_hash(input_index, script_pubkey, sighash_type.to_u32())
                .map_err(|e| AppError::Signing { input_index, reason: e.to_string() })?;
            let sighash_message = Message::from_digest_slice(sighash.as_ref())
                .map_err(|e| AppError::Signing { input_index, reason: e.to_string() })?;
            signing_infos.push(SigningInfo {
                input_index,
                sighash_message,
            });
        }
    }

    // 2. 署名生成と適用フェーズ
    for info in signing_infos {
        let signature = bitcoin::ecdsa::Signature {
            signature: secp.sign_ecdsa(&info.sighash_message, &key.private_key.inner),
            sighash_type,
        };
        transaction.input[info.input_index].script_sig =
            unlocking_script(signature.to_vec(), &key.public_key, info.input_index)?;
        log::debug!("入力 {} (P2PKH) の署名適用完了。", info.input_index);
    }
    log::info!("全ての入力 ({} 件) の署名が完了しました。", transaction.input.len());

    Ok(transaction)
}
