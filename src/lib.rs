//! 宣言的なリクエスト (埋め込みデータ・支払い・既存トランザクション) から
//! Bitcoin トランザクションを組み立て、必要なら署名してブロードキャストする。

pub mod cli;
pub mod config;
pub mod error;
pub mod explorer;
pub mod format;
pub mod planner;
pub mod script;
pub mod state;
pub mod transaction;
pub mod types;
pub mod utxo;

pub use config::{BuildRequest, DataItem, DataPayload, OutputFormat, PayDirective, Receiver, TxSource};
pub use error::AppError;
pub use explorer::{Explorer, FileExplorer, HttpExplorer};
pub use format::BuiltTransaction;
pub use transaction::{assemble, send};
pub use types::{Receipt, Utxo, UtxoSet};
