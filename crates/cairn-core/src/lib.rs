//! cairn-core
//!
//! Orchestration around a single-writer knowledge-graph worker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, state, outcome, errors, envelope, retrieval, digest）
//! - **ports**: 抽象化レイヤー（LedgerStore, PayloadStore, StatusArtifactStore, WorkerGateway, NotificationSink, ProcessProbe, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（IngestScheduler, RetrievalGateway, config, 通知ポリシー, reconcile）
//! - **impls**: 実装（ファイル・インメモリの store、子プロセス worker gateway など）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
