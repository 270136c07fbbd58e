use bitcoin::{
    absolute::LockTime,
    consensus::encode::{self, deserialize_partial},
    transaction::Version,
    Transaction, TxIn, TxOut,
};

use crate::{
    config::{BuildRequest, TxSource},
    error::AppError,
    types::TransactionState,
};

/// 既存トランザクションを分類する。署名済みに pay/data を組み合わせた場合はここで拒否する。
pub fn resolve(request: &BuildRequest) -> Result<TransactionState, AppError> {
    let Some(source) = request.tx.as_ref() else {
        log::debug!("既存トランザクションなし: 新規構築");
        return Ok(TransactionState::Fresh);
    };

    let tx = decode(source)?;

    if is_signed(&tx) {
        if request.pay.is_some() || request.data.is_some() || !request.n_data.is_empty() {
            log::error!("署名済みトランザクションに pay/data が指定されました。");
            return Err(AppError::SignedTransactionImmutable);
        }
        log::info!("署名済みトランザクションを取り込みました (入力 {} 件, 出力 {} 件)", tx.input.len(), tx.output.len());
        return Ok(TransactionState::ImmutableSigned(tx));
    }

    if request.data.is_some() {
        log::warn!("未署名トランザクションの取り込み時は data を無視します。");
    }
    log::info!("未署名トランザクションを取り込みました (出力 {} 件)", tx.output.len());
    Ok(TransactionState::ImportableUnsigned(tx))
}

pub fn decode(source: &TxSource) -> Result<Transaction, AppError> {
    let bytes = match source {
        TxSource::Hex(text) => hex::decode(text.trim())
            .map_err(|e| AppError::TransactionDecode(format!("16進デコード失敗: {}", e)))?,
        TxSource::Bytes(bytes) => bytes.clone(),
    };
    match encode::deserialize::<Transaction>(&bytes) {
        Ok(tx) => Ok(tx),
        // 入力 0 件のレガシー形式は 0x00 0x01 が segwit のマーカーとフラグに見えてしまう
        Err(e) if bytes.get(4) == Some(&0) => {
            log::debug!("拡張形式での読み込みに失敗したため、レガシー形式で再試行します: {}", e);
            decode_legacy(&bytes).map_err(|legacy| AppError::TransactionDecode(format!("{} / {}", e, legacy)))
        }
        Err(e) => Err(AppError::TransactionDecode(e.to_string())),
    }
}

// version, 入力, 出力, lock_time を順に読む (witness なし)
fn decode_legacy(bytes: &[u8]) -> Result<Transaction, String> {
    let mut rest = bytes;
    let version: Version = take(&mut rest)?;
    let input: Vec<TxIn> = take(&mut rest)?;
    let output: Vec<TxOut> = take(&mut rest)?;
    let lock_time: LockTime = take(&mut rest)?;
    if !rest.is_empty() {
        return Err(format!("末尾に {} バイトの余分なデータがあります", rest.len()));
    }
    Ok(Transaction { version, lock_time, input, output })
}

fn take<T: encode::Decodable>(rest: &mut &[u8]) -> Result<T, String> {
    let slice: &[u8] = *rest;
    let (value, consumed) = deserialize_partial::<T>(slice).map_err(|e| e.to_string())?;
    *rest = slice.get(consumed..).unwrap_or_default();
    Ok(value)
}

// いずれかの入力に script_sig か witness があれば署名済み
fn is_signed(tx: &Transaction) -> bool {
    tx.input.iter().any(|input| !input.script_sig.is_empty() || !input.witness.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataPayload, PayDirective};
    use bitcoin::{
        absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, TxIn, TxOut,
    };

    fn data_only_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x61]),
            }],
        }
    }

    fn signed_tx() -> Transaction {
        let mut tx = data_only_tx();
        tx.input.push(TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(vec![0x01, 0x02]),
            ..Default::default()
        });
        tx
    }

    fn request_with(tx: &Transaction) -> BuildRequest {
        BuildRequest {
            tx: Some(TxSource::Hex(encode::serialize_hex(tx))),
            ..Default::default()
        }
    }

    #[test]
    fn absent_tx_is_fresh() {
        assert_eq!(resolve(&BuildRequest::default()).unwrap(), TransactionState::Fresh);
    }

    #[test]
    fn tx_without_input_scripts_is_importable() {
        let tx = data_only_tx();
        assert_eq!(resolve(&request_with(&tx)).unwrap(), TransactionState::ImportableUnsigned(tx));
    }

    #[test]
    fn unsigned_inputs_are_still_importable() {
        let mut tx = data_only_tx();
        tx.input.push(TxIn::default());
        assert!(matches!(
            resolve(&request_with(&tx)).unwrap(),
            TransactionState::ImportableUnsigned(_)
        ));
    }

    #[test]
    fn byte_source_decodes_like_hex() {
        let tx = data_only_tx();
        let request = BuildRequest {
            tx: Some(TxSource::Bytes(encode::serialize(&tx))),
            ..Default::default()
        };
        assert_eq!(resolve(&request).unwrap(), TransactionState::ImportableUnsigned(tx));
    }

    #[test]
    fn signed_tx_alone_is_returned_as_is() {
        let tx = signed_tx();
        assert_eq!(resolve(&request_with(&tx)).unwrap(), TransactionState::ImmutableSigned(tx));
    }

    #[test]
    fn signed_tx_rejects_pay_data_and_n_data() {
        let tx = signed_tx();

        let mut with_pay = request_with(&tx);
        with_pay.pay = Some(PayDirective::default());
        assert!(matches!(resolve(&with_pay), Err(AppError::SignedTransactionImmutable)));

        let mut with_data = request_with(&tx);
        with_data.data = Some(DataPayload::Items(vec!["bye world".into()]));
        assert!(matches!(resolve(&with_data), Err(AppError::SignedTransactionImmutable)));

        let mut with_n_data = request_with(&tx);
        with_n_data.n_data = vec![DataPayload::Items(vec!["extra".into()])];
        assert!(matches!(resolve(&with_n_data), Err(AppError::SignedTransactionImmutable)));
    }

    #[test]
    fn legacy_encoded_data_only_tx_is_importable() {
        // version 2, 入力 0 件, 出力 1 件 (0 sats, OP_RETURN "a"), lock_time 0
        let request = BuildRequest {
            tx: Some(TxSource::Hex("0200000000010000000000000000036a016100000000".into())),
            ..Default::default()
        };
        assert_eq!(resolve(&request).unwrap(), TransactionState::ImportableUnsigned(data_only_tx()));
    }

    #[test]
    fn legacy_fallback_still_rejects_trailing_bytes() {
        let request = BuildRequest {
            tx: Some(TxSource::Hex("0200000000010000000000000000036a016100000000ff".into())),
            ..Default::default()
        };
        assert!(matches!(resolve(&request), Err(AppError::TransactionDecode(_))));
    }

    #[test]
    fn malformed_source_fails_to_decode() {
        let bad_hex = BuildRequest {
            tx: Some(TxSource::Hex("not hex".into())),
            ..Default::default()
        };
        assert!(matches!(resolve(&bad_hex), Err(AppError::TransactionDecode(_))));

        let truncated = BuildRequest {
            tx: Some(TxSource::Bytes(vec![0x02, 0x00, 0x00])),
            ..Default::default()
        };
        assert!(matches!(resolve(&truncated), Err(AppError::TransactionDecode(_))));
    }
}
