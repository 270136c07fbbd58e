use bitcoin::{address::NetworkUnchecked, Address, Amount, Network, ScriptBuf, TxOut};

use crate::{config::Receiver, error::AppError};

/// 受取人アドレスを指定ネットワークで解釈する
pub fn parse_receivers(receivers: &[Receiver], network: Network) -> Result<Vec<(Address, Amount)>, AppError> {
    receivers
        .iter()
        .map(|receiver| {
            let address = parse_address(&receiver.address, network)?;
            if receiver.value > Amount::MAX_MONEY.to_sat() {
                return Err(AppError::InputValidation(format!(
                    "送金額 {} sats が上限 {} sats を超えています ({})",
                    receiver.value,
                    Amount::MAX_MONEY.to_sat(),
                    receiver.address
                )));
            }
            Ok((address, Amount::from_sat(receiver.value)))
        })
        .collect()
}

pub fn parse_address(text: &str, network: Network) -> Result<Address, AppError> {
    let unchecked = text.parse::<Address<NetworkUnchecked>>()?;
    if !unchecked.is_valid_for_network(network) {
        return Err(AppError::NetworkMismatch {
            subject: format!("受取人アドレス {}", text),
            cli_network: network.to_string(),
            inferred_network: "別ネットワーク".to_string(),
        });
    }
    Ok(unchecked.assume_checked())
}

/// 出力の並びを決める。
///
/// 順序は固定: 引き継いだ出力 / データ出力、nData 出力、受取人出力。
/// おつり出力は資金投入時に最後に追加される。
/// `available` は資金投入する場合の選択済み UTXO 合計。
pub fn plan_outputs(
    inherited: Vec<TxOut>,
    primary: Option<ScriptBuf>,
    n_data: Vec<ScriptBuf>,
    receivers: &[(Address, Amount)],
    available: Option<u64>,
) -> Result<Vec<TxOut>, AppError> {
    // 出力を作る前に残高を確認する
    if let Some(available) = available {
        // 合計が u64 に収まらない場合も資金不足
        let required = receivers
            .iter()
            .try_fold(0u64, |total, (_, amount)| total.checked_add(amount.to_sat()));
        if required.is_none_or(|required| available < required) {
            log::error!("資金不足: 利用可能 {} sats < 送金合計 {:?} sats", available, required);
            return Err(AppError::InsufficientFunds {
                available,
                required: required.unwrap_or(u64::MAX),
                fee: 0,
            });
        }
    }

    let mut outputs = inherited;
    outputs.extend(primary.into_iter().chain(n_data).map(|script_pubkey| TxOut {
        value: Amount::ZERO,
        script_pubkey,
    }));

    for (address, amount) in receivers {
        log::debug!("受信者出力追加: address={}, value={}", address, amount.to_sat());
        outputs.push(TxOut {
            value: *amount,
            script_pubkey: address.script_pubkey(),
        });
    }

    Ok(outputs)
}
