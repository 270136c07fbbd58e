//! 埋め込みデータ (OP_RETURN) スクリプトの構築。I/O なし。

use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::opcodes::{Opcode, OP_FALSE};
use bitcoin::script::{PushBytesBuf, ScriptBuf};

use crate::{
    config::{DataItem, DataPayload},
    error::{AppError, NDataFailure},
};

/// ペイロードから1本のスクリプトを作る。ペイロードが無ければ `None`。
pub fn compose(payload: Option<&DataPayload>, safe: bool) -> Result<Option<ScriptBuf>, AppError> {
    match payload {
        None => Ok(None),
        Some(DataPayload::Items(items)) => compose_items(items, safe).map(Some),
        Some(DataPayload::Script(text)) => parse_script_hex(text).map(Some),
    }
}

/// `safe` のとき OP_FALSE を先頭に置き、使用不能だが有効な出力にする。
pub fn compose_items(items: &[DataItem], safe: bool) -> Result<ScriptBuf, AppError> {
    let mut script = ScriptBuf::new();
    if safe {
        script.push_opcode(OP_FALSE);
    }
    script.push_opcode(OP_RETURN);

    for item in items {
        match item {
            DataItem::Bytes(bytes) => push_bytes(&mut script, bytes.clone(), item)?,
            DataItem::Utf8(text) => push_bytes(&mut script, text.as_bytes().to_vec(), item)?,
            DataItem::HexString(text) => {
                let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
                let bytes = hex::decode(digits).map_err(|e| AppError::ScriptComposition {
                    item: text.clone(),
                    reason: e.to_string(),
                })?;
                push_bytes(&mut script, bytes, item)?
            }
            DataItem::Opcode(op) => {
                script.push_opcode(Opcode::from(*op));
            }
        }
    }
    log::debug!("データスクリプト構築完了: {} バイト, safe={}", script.len(), safe);
    Ok(script)
}

fn push_bytes(script: &mut ScriptBuf, bytes: Vec<u8>, item: &DataItem) -> Result<(), AppError> {
    let push = PushBytesBuf::try_from(bytes).map_err(|e| AppError::ScriptComposition {
        item: format!("{:?}", item),
        reason: e.to_string(),
    })?;
    script.push_slice(push);
    Ok(())
}

/// 書き出し済みスクリプト (16進, "0x" 省略可) をそのまま読み込む。
pub fn parse_script_hex(text: &str) -> Result<ScriptBuf, AppError> {
    let stripped = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    let bytes = hex::decode(stripped).map_err(|e| AppError::ScriptComposition {
        item: text.to_string(),
        reason: e.to_string(),
    })?;
    let script = ScriptBuf::from_bytes(bytes);

    // 命令列として読めないものは拒否する
    if let Some(Err(e)) = script.instructions().find(|ins| ins.is_err()) {
        return Err(AppError::ScriptComposition {
            item: text.to_string(),
            reason: e.to_string(),
        });
    }
    Ok(script)
}

/// nData をまとめて構築する。1件でも失敗すれば全失敗を集めて返し、成功分も使わない。
pub fn compose_batch(payloads: &[DataPayload], safe: bool) -> Result<Vec<ScriptBuf>, AppError> {
    let mut scripts = Vec::with_capacity(payloads.len());
    let mut failures = Vec::new();

    for (index, payload) in payloads.iter().enumerate() {
        match compose(Some(payload), safe) {
            Ok(Some(script)) => scripts.push(script),
            Ok(None) => {}
            Err(AppError::ScriptComposition { item, reason }) => {
                log::warn!("nData #{} のスクリプト構築に失敗しました: {} ({})", index, item, reason);
                failures.push(NDataFailure { index, item, reason });
            }
            Err(other) => return Err(other),
        }
    }

    if failures.is_empty() {
        Ok(scripts)
    } else {
        Err(AppError::NDataComposition { failures })
    }
}
